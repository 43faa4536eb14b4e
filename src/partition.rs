// partition.rs

use crate::error::{PrepError, Result};
use crate::records::{DataLine, DataLines};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Group key of an identifier: everything before the first `separator`, or
/// the whole identifier when the separator does not occur.
pub fn group_key<'a>(identifier: &'a str, separator: &str) -> &'a str {
    if separator.is_empty() {
        return identifier;
    }
    match identifier.find(separator) {
        Some(pos) => &identifier[..pos],
        None => identifier,
    }
}

/// How a record's routing key is derived.
#[derive(Debug, Clone)]
pub enum RoutingMode {
    /// Route on a 1-based whitespace-delimited column; records whose value
    /// equals `unresolved` are dropped.
    Column { column: usize, unresolved: String },
    /// Route on the group keys of the first two loci; records whose loci
    /// belong to different groups are dropped.
    PairedLoci { separator: String },
}

impl RoutingMode {
    pub fn validate(&self) -> Result<()> {
        match self {
            RoutingMode::Column { column: 0, .. } => Err(PrepError::Config(
                "routing column is 1-based and must be >= 1".to_string(),
            )),
            RoutingMode::PairedLoci { separator } if separator.is_empty() => Err(
                PrepError::Config("group separator must not be empty".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Routing key of `line`, or `None` when the record is to be dropped.
    pub fn route<'a>(&self, line: &'a DataLine) -> Result<Option<&'a str>> {
        let mut fields = line.text.split_whitespace();
        match self {
            RoutingMode::Column { column, unresolved } => {
                let value = fields.nth(column - 1).ok_or_else(|| {
                    PrepError::parse(
                        line.number,
                        format!("record has no column {}", column),
                        &line.text,
                    )
                })?;
                Ok((value != unresolved.as_str()).then_some(value))
            }
            RoutingMode::PairedLoci { separator } => {
                let (a, b) = match (fields.next(), fields.next()) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(PrepError::parse(
                            line.number,
                            "expected at least two loci",
                            &line.text,
                        ))
                    }
                };
                let key_a = group_key(a, separator);
                let key_b = group_key(b, separator);
                Ok((key_a == key_b).then_some(key_a))
            }
        }
    }
}

/// Opens the output sink for a group key.
pub trait SinkFactory {
    type Sink: Write;

    fn open(&mut self, key: &str, line: usize) -> Result<Self::Sink>;

    /// Where the sink for `key` lives, for error messages.
    fn describe(&self, key: &str) -> PathBuf;

    /// Flushes and releases `sink`. Called exactly once per opened sink.
    fn close(&self, mut sink: Self::Sink) -> io::Result<()> {
        let flushed = sink.flush();
        drop(sink);
        flushed
    }
}

/// Flushes `sink` once and closes the inner writer. Bytes left in the buffer
/// after a failed flush are discarded rather than written again on drop.
fn close_buffered<W: Write>(mut sink: BufWriter<W>) -> io::Result<()> {
    let flushed = sink.flush();
    let (inner, _unwritten) = sink.into_parts();
    drop(inner);
    flushed
}

/// Writes each group to `<out_dir>/<key>.<extension>`.
#[derive(Debug, Clone)]
pub struct FileSinkFactory {
    out_dir: PathBuf,
    extension: String,
}

impl FileSinkFactory {
    pub fn new(out_dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            out_dir: out_dir.into(),
            extension: extension.into(),
        }
    }
}

impl SinkFactory for FileSinkFactory {
    type Sink = BufWriter<File>;

    fn open(&mut self, key: &str, line: usize) -> Result<Self::Sink> {
        if key.is_empty()
            || key == "."
            || key == ".."
            || key.contains(std::path::is_separator)
        {
            return Err(PrepError::InvalidGroupKey {
                line,
                key: key.to_string(),
            });
        }
        let path = self.describe(key);
        debug!("Opening output sink {}", path.display());
        File::create(&path)
            .map(BufWriter::new)
            .map_err(|source| PrepError::Resource {
                action: "create",
                path,
                source,
            })
    }

    fn describe(&self, key: &str) -> PathBuf {
        self.out_dir.join(format!("{}.{}", key, self.extension))
    }

    fn close(&self, sink: Self::Sink) -> io::Result<()> {
        close_buffered(sink)
    }
}

#[derive(Debug, Clone)]
pub struct PartitionConfig {
    pub mode: RoutingMode,
    pub ignore_marker: char,
    /// Upper bound on distinct sinks kept open at once.
    pub max_open_sinks: Option<usize>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PartitionSummary {
    pub records: u64,
    pub ignored: u64,
    pub dropped: u64,
    pub written: BTreeMap<String, u64>,
}

/// The sinks opened by one `partition` call, in opening order.
struct SinkSet<W: Write> {
    keys: HashMap<String, usize>,
    sinks: Vec<(String, W)>,
}

impl<W: Write> SinkSet<W> {
    fn new() -> Self {
        Self {
            keys: HashMap::new(),
            sinks: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.sinks.len()
    }

    fn slot(&self, key: &str) -> Option<usize> {
        self.keys.get(key).copied()
    }

    fn insert(&mut self, key: &str, sink: W) -> usize {
        let slot = self.sinks.len();
        self.keys.insert(key.to_string(), slot);
        self.sinks.push((key.to_string(), sink));
        slot
    }

    fn sink_mut(&mut self, slot: usize) -> &mut W {
        &mut self.sinks[slot].1
    }

    /// Closes every sink exactly once through `factory`. All sinks are
    /// closed even if some flushes fail; the first failure is returned.
    fn close_all<F: SinkFactory<Sink = W>>(self, factory: &F) -> Result<()> {
        let mut first_error = None;
        for (key, sink) in self.sinks {
            if let Err(source) = factory.close(sink) {
                warn!("Failed to flush output sink for key '{}': {}", key, source);
                if first_error.is_none() {
                    first_error = Some(PrepError::Resource {
                        action: "flush",
                        path: factory.describe(&key),
                        source,
                    });
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Routes every data line of `lines` to the sink of its key.
///
/// Sinks are opened lazily on the first record for a key and stay open until
/// the stream ends. Whether the stream ends normally or with an error, every
/// opened sink is flushed and closed before this function returns; on the
/// failing path the routing error is returned.
pub fn partition<I, F>(
    lines: I,
    config: &PartitionConfig,
    factory: &mut F,
) -> Result<PartitionSummary>
where
    I: Iterator<Item = io::Result<String>>,
    F: SinkFactory,
{
    config.mode.validate()?;
    let mut sinks: SinkSet<F::Sink> = SinkSet::new();
    let mut summary = PartitionSummary::default();
    let mut data_lines = DataLines::new(lines, config.ignore_marker);

    let routed = route_all(&mut data_lines, config, factory, &mut sinks, &mut summary);
    summary.ignored = data_lines.skipped();
    let opened = sinks.len();
    let closed = sinks.close_all(&*factory);

    match (routed, closed) {
        (Err(e), _) => {
            warn!("Partitioning aborted; closed {} open output sink(s).", opened);
            Err(e)
        }
        (Ok(()), Err(e)) => Err(e),
        (Ok(()), Ok(())) => {
            info!(
                "Partitioned {} records into {} group(s); {} dropped, {} ignored.",
                summary.records, opened, summary.dropped, summary.ignored
            );
            Ok(summary)
        }
    }
}

fn route_all<I, F>(
    data_lines: &mut DataLines<I>,
    config: &PartitionConfig,
    factory: &mut F,
    sinks: &mut SinkSet<F::Sink>,
    summary: &mut PartitionSummary,
) -> Result<()>
where
    I: Iterator<Item = io::Result<String>>,
    F: SinkFactory,
{
    for line in data_lines {
        let line = line?;
        summary.records += 1;
        let key = match config.mode.route(&line)? {
            Some(key) => key,
            None => {
                debug!("Dropping record at line {}: no routable key.", line.number);
                summary.dropped += 1;
                continue;
            }
        };

        let slot = match sinks.slot(key) {
            Some(slot) => slot,
            None => {
                if let Some(limit) = config.max_open_sinks {
                    if sinks.len() >= limit {
                        return Err(PrepError::SinkLimit {
                            line: line.number,
                            key: key.to_string(),
                            limit,
                        });
                    }
                }
                let sink = factory.open(key, line.number)?;
                sinks.insert(key, sink)
            }
        };
        let sink = sinks.sink_mut(slot);
        sink.write_all(line.text.as_bytes())
            .and_then(|_| sink.write_all(b"\n"))
            .map_err(|source| PrepError::Resource {
                action: "write",
                path: factory.describe(key),
                source,
            })?;
        *summary.written.entry(key.to_string()).or_insert(0) += 1;
    }
    Ok(())
}

/// Creates `out_dir` if needed and partitions into `<key>.<extension>` files.
pub fn partition_to_dir<I>(
    lines: I,
    config: &PartitionConfig,
    out_dir: &Path,
    extension: &str,
) -> Result<PartitionSummary>
where
    I: Iterator<Item = io::Result<String>>,
{
    fs::create_dir_all(out_dir).map_err(|source| PrepError::Resource {
        action: "create directory for",
        path: out_dir.to_path_buf(),
        source,
    })?;
    let mut factory = FileSinkFactory::new(out_dir, extension);
    partition(lines, config, &mut factory)
}
