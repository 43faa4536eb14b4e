// main.rs

mod contacts;
mod error;
mod ordering;
mod partition;
mod phase;
mod records;
mod scores;

// --- External Crate Imports ---
use anyhow::{anyhow, Context, Error, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use noodles_vcf as vcf;
use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    time::Instant,
};

use cli::{CliArgs, Command};

// --- Main Function ---
fn main() -> Result<(), Error> {
    let total_time_start = Instant::now();
    let cli_args = CliArgs::parse();

    // Initialize logger
    let log_level = cli_args
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or_else(|_| {
            eprintln!(
                "Warning: Invalid log level '{}' provided. Defaulting to Info.",
                cli_args.log_level
            );
            log::LevelFilter::Info
        });
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_micros()
        .init();

    info!("Starting hic_prep with args: {:?}", cli_args);

    match &cli_args.command {
        Command::Heatmap {
            ordering: ordering_path,
            links,
            out,
            no_log,
            label,
            comment_char,
        } => run_heatmap(ordering_path, links, out, !*no_log, label, *comment_char)?,
        Command::SplitLinks {
            input,
            out_dir,
            separator,
            ignore_char,
            extension,
            max_open_files,
        } => {
            let config = partition::PartitionConfig {
                mode: partition::RoutingMode::PairedLoci {
                    separator: separator.clone(),
                },
                ignore_marker: *ignore_char,
                max_open_sinks: *max_open_files,
            };
            run_split(input, out_dir, extension, &config)?
        }
        Command::SplitAlignments {
            input,
            out_dir,
            column,
            unresolved,
            ignore_char,
            extension,
            max_open_files,
        } => {
            let config = partition::PartitionConfig {
                mode: partition::RoutingMode::Column {
                    column: *column,
                    unresolved: unresolved.clone(),
                },
                ignore_marker: *ignore_char,
                max_open_sinks: *max_open_files,
            };
            run_split(input, out_dir, extension, &config)?
        }
        Command::SimBlocks {
            input,
            output,
            block_min,
            block_max,
            invert,
            seed,
        } => run_sim_blocks(input, output, *block_min, *block_max, *invert, *seed)?,
        Command::CompareOrder {
            actual,
            inferred,
            out,
            comment_char,
        } => run_compare_order(actual, inferred, out, *comment_char)?,
        Command::ScoreSeries {
            scores,
            out,
            label,
            comment_char,
        } => run_score_series(scores, out, label, *comment_char)?,
    }

    info!(
        "hic_prep finished successfully in {:.2?}.",
        total_time_start.elapsed()
    );
    Ok(())
}

fn open_lines(path: &Path) -> Result<io::Lines<BufReader<File>>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open input file {}", path.display()))?;
    Ok(BufReader::new(file).lines())
}

fn spinner(unit: &str, what: &str) -> Result<ProgressBar> {
    let template = format!("{{spinner:.green}} [{{elapsed_precise}}] {{pos}} {} {{msg}}", unit);
    let style = ProgressStyle::default_spinner()
        .template(&template)
        .map_err(|e| anyhow!("Failed to create progress bar style: {}", e))?;
    let pb = ProgressBar::new_spinner().with_style(style);
    pb.set_message(what.to_string());
    Ok(pb)
}

fn run_heatmap(
    ordering_path: &Path,
    links_path: &Path,
    out_prefix: &str,
    log_transform: bool,
    label: &str,
    comment_char: char,
) -> Result<()> {
    info!("Reading ordering list from {}", ordering_path.display());
    let index = ordering::IdentifierIndex::from_lines(open_lines(ordering_path)?, comment_char)
        .with_context(|| format!("Failed to read ordering list {}", ordering_path.display()))?;
    if index.is_empty() {
        warn!(
            "Ordering list {} contains no identifiers; the matrix will be empty.",
            ordering_path.display()
        );
    }
    if !index.duplicates().is_empty() {
        warn!(
            "Ordering list {} repeats {} identifier(s); first occurrences were kept.",
            ordering_path.display(),
            index.duplicates().len()
        );
    }
    info!("Indexed {} loci.", index.len());

    let transform = if log_transform {
        contacts::Transform::Log
    } else {
        contacts::Transform::Identity
    };
    let (matrix, stats) =
        contacts::build_matrix(open_lines(links_path)?, &index, transform, comment_char)
            .with_context(|| format!("Failed to build matrix from {}", links_path.display()))?;
    info!(
        "Loaded {} contacts ({} self-pairs skipped, {} comment lines).",
        stats.contacts, stats.self_pairs, stats.comments
    );

    output_writer::ensure_parent_dir(out_prefix)?;
    output_writer::write_matrix(out_prefix, label, &matrix)?;
    Ok(())
}

fn run_split(
    input: &Path,
    out_dir: &Path,
    extension: &str,
    config: &partition::PartitionConfig,
) -> Result<()> {
    info!(
        "Partitioning {} into {} ({:?})",
        input.display(),
        out_dir.display(),
        config.mode
    );
    let pb = spinner("lines", "partitioning")?;
    let lines = open_lines(input)?.inspect(|_| pb.inc(1));
    let result = partition::partition_to_dir(lines, config, out_dir, extension);
    pb.finish_and_clear();

    let summary =
        result.with_context(|| format!("Failed to partition {}", input.display()))?;
    for (key, count) in &summary.written {
        debug!("  {}.{}: {} records", key, extension, count);
    }
    info!(
        "Wrote {} group file(s) to {} ({} records read, {} dropped, {} ignored).",
        summary.written.len(),
        out_dir.display(),
        summary.records,
        summary.dropped,
        summary.ignored
    );
    Ok(())
}

fn run_sim_blocks(
    input: &Path,
    output: &Path,
    block_min: u64,
    block_max: u64,
    invert: bool,
    seed: Option<u64>,
) -> Result<()> {
    let lengths = phase::UniformBlockLengths::seeded(block_min, block_max, seed)?;
    let mut tagger = phase::BlockTagger::new(lengths, invert);

    let mut reader = vcf::io::reader::Builder::default()
        .build_from_path(input)
        .with_context(|| format!("Failed to open input VCF {}", input.display()))?;

    output_writer::ensure_parent_dir(&output.to_string_lossy())?;
    let mut writer = File::create(output)
        .map(|f| vcf::io::Writer::new(BufWriter::new(f)))
        .map_err(|e| anyhow!("Failed to create output file {}: {}", output.display(), e))?;

    info!(
        "Simulating haplotype blocks of {}..={} records for {} (inversion: {})",
        block_min,
        block_max,
        input.display(),
        invert
    );
    let pb = spinner("records", "tagging")?;
    let result = phase::tag_blocks(&mut reader, &mut writer, output, &mut tagger, || pb.inc(1));
    pb.finish_and_clear();

    let summary = result.with_context(|| format!("Failed to tag {}", input.display()))?;
    if summary.unswapped > 0 {
        warn!(
            "{} record(s) in inverted blocks lack a single ALT allele and were not swapped.",
            summary.unswapped
        );
    }
    info!(
        "Tagged {} records into {} block(s); wrote {}.",
        summary.records,
        summary.blocks,
        output.display()
    );
    Ok(())
}

fn run_compare_order(
    actual: &Path,
    inferred: &Path,
    out_prefix: &str,
    comment_char: char,
) -> Result<()> {
    let comparison =
        ordering::compare(open_lines(actual)?, open_lines(inferred)?, comment_char)
            .with_context(|| {
                format!(
                    "Failed to compare {} against {}",
                    inferred.display(),
                    actual.display()
                )
            })?;
    if !comparison.missing_from_inferred.is_empty() {
        warn!(
            "{} identifier(s) of {} are absent from {}.",
            comparison.missing_from_inferred.len(),
            actual.display(),
            inferred.display()
        );
    }
    info!(
        "Compared {} identifiers; mean rank displacement {:.3}.",
        comparison.pairs.len(),
        comparison.mean_displacement()
    );
    output_writer::ensure_parent_dir(out_prefix)?;
    output_writer::write_order_comparison(out_prefix, &comparison)?;
    Ok(())
}

fn run_score_series(
    scores_path: &Path,
    out_prefix: &str,
    label: &str,
    comment_char: char,
) -> Result<()> {
    info!("Reading score series from {}", scores_path.display());
    let series = scores::read_score_series(open_lines(scores_path)?, comment_char)
        .with_context(|| format!("Failed to read scores {}", scores_path.display()))?;
    if let Some(line) = series.restarted_at {
        warn!(
            "Iteration count drops at line {} of {}; later points were ignored.",
            line,
            scores_path.display()
        );
    }
    if let Some((iteration, score)) = series.points.last() {
        info!(
            "Read {} points; final score {} at iteration {}.",
            series.points.len(),
            score,
            iteration
        );
    } else {
        warn!("{} holds no score points.", scores_path.display());
    }
    output_writer::ensure_parent_dir(out_prefix)?;
    output_writer::write_score_series(out_prefix, label, &series)?;
    Ok(())
}

// --- Module Implementations ---

mod cli {
    use clap::{Parser, Subcommand};
    use std::path::PathBuf;

    #[derive(Parser, Debug)]
    #[command(author, version, about = "Hi-C contact preparation and partitioning tool.", long_about = None, propagate_version = true)]
    pub(crate) struct CliArgs {
        #[command(subcommand)]
        pub(crate) command: Command,

        #[arg(long, default_value = "Info", global = true)]
        pub(crate) log_level: String,
    }

    #[derive(Subcommand, Debug)]
    pub(crate) enum Command {
        /// Build a dense symmetric contact matrix for an external heatmap renderer
        Heatmap {
            /// Ordering list: one locus identifier per line
            #[arg(long, required = true)]
            ordering: PathBuf,

            /// Links file: `<locusA> <locusB> <weight>` per line
            #[arg(long, required = true)]
            links: PathBuf,

            /// Output prefix; writes `<out>.matrix.tsv`
            #[arg(short, long = "out", required = true)]
            out: String,

            /// Store raw weights instead of ln(weight)
            #[arg(long, default_value_t = false)]
            no_log: bool,

            /// Axis label placed in the corner cell of the matrix
            #[arg(long, default_value = "unlabeled")]
            label: String,

            #[arg(long, default_value_t = '#')]
            comment_char: char,
        },

        /// Split a links file into one file per group, keeping intra-group links only
        SplitLinks {
            #[arg(short, long, required = true)]
            input: PathBuf,

            #[arg(long, required = true)]
            out_dir: PathBuf,

            /// Separator between group and suffix in locus identifiers
            #[arg(long, default_value = "_")]
            separator: String,

            #[arg(long, default_value_t = '#')]
            ignore_char: char,

            #[arg(long, default_value = "links")]
            extension: String,

            #[arg(long)]
            max_open_files: Option<usize>,
        },

        /// Split an alignment file into one file per value of a column
        SplitAlignments {
            #[arg(short, long, required = true)]
            input: PathBuf,

            #[arg(long, required = true)]
            out_dir: PathBuf,

            /// 1-based column holding the routing key
            #[arg(long, default_value_t = 3)]
            column: usize,

            /// Key value marking records that are not routed anywhere
            #[arg(long, default_value = "*")]
            unresolved: String,

            #[arg(long, default_value_t = '@')]
            ignore_char: char,

            #[arg(long, default_value = "sam")]
            extension: String,

            #[arg(long)]
            max_open_files: Option<usize>,
        },

        /// Tag a sorted VCF with simulated haplotype blocks
        SimBlocks {
            #[arg(short, long, required = true)]
            input: PathBuf,

            #[arg(short, long, required = true)]
            output: PathBuf,

            #[arg(long, default_value_t = 100000)]
            block_min: u64,

            #[arg(long, default_value_t = 100000)]
            block_max: u64,

            /// Swap REF/ALT in every other block
            #[arg(long, default_value_t = false)]
            invert: bool,

            #[arg(long)]
            seed: Option<u64>,
        },

        /// Compare an inferred ordering against a reference ordering
        CompareOrder {
            #[arg(long, required = true)]
            actual: PathBuf,

            #[arg(long, required = true)]
            inferred: PathBuf,

            /// Output prefix; writes `<out>.order.tsv`
            #[arg(short, long = "out", required = true)]
            out: String,

            #[arg(long, default_value_t = '#')]
            comment_char: char,
        },

        /// Extract the score progression of an optimization run
        ScoreSeries {
            /// Score log: `<iteration> <score>` per line
            #[arg(long, required = true)]
            scores: PathBuf,

            /// Output prefix; writes `<out>.scores.tsv`
            #[arg(short, long = "out", required = true)]
            out: String,

            /// Header of the score column
            #[arg(long, default_value = "unlabeled")]
            label: String,

            #[arg(long, default_value_t = '#')]
            comment_char: char,
        },
    }
}

mod output_writer {
    use super::{anyhow, info, BufWriter, File, PathBuf, Result, Write};
    use crate::contacts::InteractionMatrix;
    use crate::ordering::OrderComparison;
    use crate::scores::ScoreSeries;

    fn create_output_file(prefix: &str, suffix: &str) -> Result<(BufWriter<File>, String)> {
        let filename = format!("{}.{}", prefix, suffix);
        File::create(&filename)
            .map(|f| (BufWriter::new(f), filename.clone()))
            .map_err(|e| anyhow!("Failed to create output file {}: {}", filename, e))
    }

    pub(crate) fn ensure_parent_dir(output_prefix: &str) -> Result<()> {
        let output_prefix_path = PathBuf::from(output_prefix);
        if let Some(parent) = output_prefix_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    anyhow!("Failed to create output directory {}: {}", parent.display(), e)
                })?;
                info!("Created output directory: {}", parent.display());
            }
        }
        Ok(())
    }

    pub(crate) fn write_matrix(
        output_prefix: &str,
        label: &str,
        matrix: &InteractionMatrix,
    ) -> Result<()> {
        let (mut writer, filename) = create_output_file(output_prefix, "matrix.tsv")?;
        info!("Writing {}x{} matrix to {}", matrix.dim(), matrix.dim(), filename);

        write!(writer, "{}", label)?;
        for id in &matrix.labels {
            write!(writer, "\t{}", id)?;
        }
        writeln!(writer)?;

        for (i, id) in matrix.labels.iter().enumerate() {
            write!(writer, "{}", id)?;
            for j in 0..matrix.dim() {
                write!(writer, "\t{:.6}", matrix.get(i, j))?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub(crate) fn write_order_comparison(
        output_prefix: &str,
        comparison: &OrderComparison,
    ) -> Result<()> {
        let (mut writer, filename) = create_output_file(output_prefix, "order.tsv")?;
        info!(
            "Writing {} rank pair(s) to {}",
            comparison.pairs.len(),
            filename
        );

        writeln!(writer, "ID\tActualRank\tInferredRank")?;
        for pair in &comparison.pairs {
            writeln!(writer, "{}\t{}\t{}", pair.id, pair.actual, pair.inferred)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub(crate) fn write_score_series(
        output_prefix: &str,
        label: &str,
        series: &ScoreSeries,
    ) -> Result<()> {
        let (mut writer, filename) = create_output_file(output_prefix, "scores.tsv")?;
        info!("Writing {} score point(s) to {}", series.points.len(), filename);

        writeln!(writer, "Iteration\t{}", label)?;
        for (iteration, score) in &series.points {
            writeln!(writer, "{}\t{}", iteration, score)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::text_lines;
    use std::fs;

    #[test]
    fn matrix_tsv_has_labels_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("nested").join("gm");
        let prefix = prefix.to_string_lossy().into_owned();

        let index = ordering::IdentifierIndex::from_lines(text_lines("A\nB"), '#').unwrap();
        let (matrix, _) = contacts::build_matrix(
            text_lines("A B 2.5"),
            &index,
            contacts::Transform::Identity,
            '#',
        )
        .unwrap();
        output_writer::ensure_parent_dir(&prefix).unwrap();
        output_writer::write_matrix(&prefix, "contigs", &matrix).unwrap();

        let written = fs::read_to_string(format!("{}.matrix.tsv", prefix)).unwrap();
        assert_eq!(
            written,
            "contigs\tA\tB\nA\t0.000000\t2.500000\nB\t2.500000\t0.000000\n"
        );
    }

    #[test]
    fn order_tsv_lists_rank_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("cmp").to_string_lossy().into_owned();
        let comparison =
            ordering::compare(text_lines("x\ny\nz"), text_lines("z\nx"), '#').unwrap();
        output_writer::write_order_comparison(&prefix, &comparison).unwrap();

        let written = fs::read_to_string(format!("{}.order.tsv", prefix)).unwrap();
        assert_eq!(written, "ID\tActualRank\tInferredRank\nx\t0\t1\nz\t2\t0\n");
    }

    #[test]
    fn order_tsv_without_shared_ids_has_only_header() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("cmp").to_string_lossy().into_owned();
        let comparison = ordering::compare(text_lines("x\ny"), text_lines(""), '#').unwrap();
        output_writer::write_order_comparison(&prefix, &comparison).unwrap();

        let written = fs::read_to_string(format!("{}.order.tsv", prefix)).unwrap();
        assert_eq!(written, "ID\tActualRank\tInferredRank\n");
    }

    #[test]
    fn empty_ordering_writes_empty_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let ordering_path = dir.path().join("order.txt");
        let links_path = dir.path().join("gm.links");
        fs::write(&ordering_path, "# no loci\n").unwrap();
        fs::write(&links_path, "# no links\n").unwrap();
        let prefix = dir.path().join("gm").to_string_lossy().into_owned();

        run_heatmap(&ordering_path, &links_path, &prefix, true, "contigs", '#').unwrap();

        let written = fs::read_to_string(format!("{}.matrix.tsv", prefix)).unwrap();
        assert_eq!(written, "contigs\n");
    }

    #[test]
    fn score_series_tsv_stops_at_restart() {
        let dir = tempfile::tempdir().unwrap();
        let scores_path = dir.path().join("opt.log");
        fs::write(&scores_path, "0 -12.5\n100 -4\n200 -1.25\n0 -30\n").unwrap();
        let prefix = dir.path().join("out").join("opt").to_string_lossy().into_owned();

        run_score_series(&scores_path, &prefix, "GM12878", '#').unwrap();

        let written = fs::read_to_string(format!("{}.scores.tsv", prefix)).unwrap();
        assert_eq!(written, "Iteration\tGM12878\n0\t-12.5\n100\t-4\n200\t-1.25\n");
    }

    #[test]
    fn sim_blocks_tags_a_vcf_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("vars.vcf");
        let output = dir.path().join("out").join("vars.blk.vcf");
        fs::write(
            &input,
            "##fileformat=VCFv4.3\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
1\t1\t.\tA\tC\t.\tPASS\t.\n\
1\t2\t.\tA\tC\t.\tPASS\t.\n\
1\t3\t.\tA\tC\t.\tPASS\t.\n",
        )
        .unwrap();

        run_sim_blocks(&input, &output, 2, 2, true, Some(1)).unwrap();

        let mut reader = vcf::io::reader::Builder::default()
            .build_from_path(&output)
            .unwrap();
        let header = reader.read_header().unwrap();
        assert!(header.infos().contains_key(phase::BLOCK_KEY));
        let refs: Vec<String> = reader
            .record_bufs(&header)
            .map(|r| r.unwrap().reference_bases().to_string())
            .collect();
        assert_eq!(refs, vec!["A", "A", "C"]);
    }

    fn parse_heatmap(extra: &[&'static str]) -> (bool, String) {
        let mut argv = vec![
            "hic_prep", "heatmap", "--ordering", "o.txt", "--links", "l.txt", "--out", "gm",
        ];
        argv.extend_from_slice(extra);
        match CliArgs::try_parse_from(argv).unwrap().command {
            Command::Heatmap { no_log, label, .. } => (no_log, label),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn cli_heatmap_defaults_to_log_transform() {
        assert_eq!(parse_heatmap(&[]), (false, "unlabeled".to_string()));
        assert!(parse_heatmap(&["--no-log"]).0);
    }

    #[test]
    fn cli_parses_split_links() {
        let args = CliArgs::try_parse_from([
            "hic_prep",
            "split-links",
            "--input",
            "GM.links",
            "--out-dir",
            "split",
            "--max-open-files",
            "64",
        ])
        .unwrap();
        match args.command {
            Command::SplitLinks {
                separator,
                ignore_char,
                extension,
                max_open_files,
                ..
            } => {
                assert_eq!(separator, "_");
                assert_eq!(ignore_char, '#');
                assert_eq!(extension, "links");
                assert_eq!(max_open_files, Some(64));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn cli_parses_sim_blocks_defaults() {
        let args = CliArgs::try_parse_from([
            "hic_prep",
            "sim-blocks",
            "-i",
            "vars.vcf",
            "-o",
            "vars.blk.vcf",
            "--seed",
            "7",
        ])
        .unwrap();
        match args.command {
            Command::SimBlocks {
                block_min,
                block_max,
                invert,
                seed,
                ..
            } => {
                assert_eq!((block_min, block_max), (100000, 100000));
                assert!(!invert);
                assert_eq!(seed, Some(7));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
