// phase.rs

use crate::error::{PrepError, Result};
use log::{debug, info};
use noodles_vcf::{
    self as vcf,
    header::record::value::{
        map::{
            info::{Number, Type},
            Info,
        },
        Map,
    },
    variant::{
        io::Write as _,
        record_buf::{info::field::Value, AlternateBases},
        RecordBuf,
    },
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Uniform};
use std::io::{BufRead, Write};
use std::path::Path;

/// INFO key carrying the block id of each record.
pub const BLOCK_KEY: &str = "BLOCK";
const BLOCK_DESCRIPTION: &str = "Simulated haplotype block";

/// Source of haplotype block lengths, in records.
pub trait BlockLengths {
    fn next_length(&mut self) -> u64;
}

/// Block lengths drawn uniformly from `[min, max]`.
pub struct UniformBlockLengths<R> {
    rng: R,
    dist: Uniform<u64>,
}

impl<R: Rng> UniformBlockLengths<R> {
    pub fn new(rng: R, min: u64, max: u64) -> Result<Self> {
        if min == 0 {
            return Err(PrepError::Config(
                "minimum block length must be >= 1".to_string(),
            ));
        }
        let dist = Uniform::new_inclusive(min, max).map_err(|e| {
            PrepError::Config(format!("invalid block length range [{}, {}]: {}", min, max, e))
        })?;
        Ok(Self { rng, dist })
    }
}

impl UniformBlockLengths<ChaCha8Rng> {
    /// ChaCha8-backed lengths. Without a seed one is drawn from the thread
    /// RNG and logged so the run can be repeated.
    pub fn seeded(min: u64, max: u64, seed: Option<u64>) -> Result<Self> {
        let seed = seed.unwrap_or_else(|| rand::rng().random());
        info!("Block length seed: {}", seed);
        Self::new(ChaCha8Rng::seed_from_u64(seed), min, max)
    }
}

impl<R: Rng> BlockLengths for UniformBlockLengths<R> {
    fn next_length(&mut self) -> u64 {
        self.dist.sample(&mut self.rng)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseBlockState {
    pub current_length: u64,
    pub length_target: u64,
    pub block_id: u64,
    pub inverted: bool,
}

/// Assigns consecutive records to haplotype blocks.
///
/// Every block holds exactly the number of records drawn for it. Each new
/// block flips the inversion state; with inversion enabled, records of
/// inverted blocks have REF and ALT swapped.
pub struct BlockTagger<L> {
    lengths: L,
    state: PhaseBlockState,
    invert: bool,
}

impl<L: BlockLengths> BlockTagger<L> {
    pub fn new(mut lengths: L, invert: bool) -> Self {
        let length_target = lengths.next_length();
        Self {
            lengths,
            state: PhaseBlockState {
                current_length: 0,
                length_target,
                block_id: 1,
                inverted: false,
            },
            invert,
        }
    }

    pub fn state(&self) -> &PhaseBlockState {
        &self.state
    }

    /// Moves the state machine forward by one record.
    pub fn advance(&mut self) -> &PhaseBlockState {
        if self.state.current_length >= self.state.length_target {
            self.state.current_length = 0;
            self.state.length_target = self.lengths.next_length();
            self.state.inverted = !self.state.inverted;
            self.state.block_id += 1;
            debug!(
                "Starting block {} (target {} records, inverted: {}).",
                self.state.block_id, self.state.length_target, self.state.inverted
            );
        }
        self.state.current_length += 1;
        &self.state
    }

    /// Advances and tags `record` with the current block id. REF and ALT
    /// are swapped when inversion is enabled and the block is inverted.
    ///
    /// Returns `false` when the record sits in an inverted block but could
    /// not be swapped because it does not carry exactly one ALT allele.
    pub fn tag(&mut self, record: &mut RecordBuf) -> Result<bool> {
        let invert = self.invert;
        let state = self.advance();
        let block_id = i32::try_from(state.block_id).map_err(|_| {
            PrepError::Config(format!(
                "block id {} exceeds the VCF Integer range",
                state.block_id
            ))
        })?;
        let inverted = invert && state.inverted;

        record
            .info_mut()
            .insert(BLOCK_KEY.to_string(), Some(Value::Integer(block_id)));
        if inverted {
            return Ok(swap_alleles(record));
        }
        Ok(true)
    }
}

fn swap_alleles(record: &mut RecordBuf) -> bool {
    if record.alternate_bases().as_ref().len() != 1 {
        return false;
    }
    let alternate = record.alternate_bases().as_ref()[0].clone();
    let reference = std::mem::replace(record.reference_bases_mut(), alternate);
    *record.alternate_bases_mut() = AlternateBases::from(vec![reference]);
    true
}

/// Declares the `BLOCK` INFO field, replacing any existing definition.
pub fn declare_block_info(header: &mut vcf::Header) {
    header.infos_mut().insert(
        BLOCK_KEY.to_string(),
        Map::<Info>::new(Number::Count(1), Type::Integer, BLOCK_DESCRIPTION),
    );
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TagSummary {
    pub records: u64,
    pub blocks: u64,
    /// Records in inverted blocks left as-is for lack of a single ALT allele.
    pub unswapped: u64,
}

/// Reads every record of `reader`, tags it and writes it to `writer`.
///
/// The input header is written with a `BLOCK` INFO definition added.
/// `on_record` is called once per record written.
pub fn tag_blocks<R, W, L>(
    reader: &mut vcf::io::Reader<R>,
    writer: &mut vcf::io::Writer<W>,
    out_path: &Path,
    tagger: &mut BlockTagger<L>,
    mut on_record: impl FnMut(),
) -> Result<TagSummary>
where
    R: BufRead,
    W: Write,
    L: BlockLengths,
{
    let write_err = |source: std::io::Error| PrepError::Resource {
        action: "write",
        path: out_path.to_path_buf(),
        source,
    };

    let mut header = reader.read_header().map_err(|source| PrepError::Vcf {
        location: "header".to_string(),
        source,
    })?;
    declare_block_info(&mut header);
    writer.write_header(&header).map_err(write_err)?;

    let mut summary = TagSummary::default();
    for (idx, result) in reader.record_bufs(&header).enumerate() {
        let mut record = result.map_err(|source| PrepError::Vcf {
            location: format!("record {}", idx + 1),
            source,
        })?;
        if !tagger.tag(&mut record)? {
            summary.unswapped += 1;
            debug!(
                "Record {} has {} ALT allele(s); left unswapped in an inverted block.",
                idx + 1,
                record.alternate_bases().as_ref().len()
            );
        }
        writer
            .write_variant_record(&header, &record)
            .map_err(write_err)?;
        summary.records += 1;
        on_record();
    }
    writer.get_mut().flush().map_err(write_err)?;

    summary.blocks = if summary.records == 0 {
        0
    } else {
        tagger.state().block_id
    };
    Ok(summary)
}
