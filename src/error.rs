// error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while indexing, building, partitioning or tagging records.
///
/// Line numbers are 1-based and count every physical line of the input,
/// comment lines included, so they can be used directly with `sed -n`.
#[derive(Debug, Error)]
pub enum PrepError {
    /// Malformed line (wrong field count, unparsable or negative weight).
    #[error("parse error at line {line}: {reason} (line: '{content}')")]
    Parse {
        line: usize,
        reason: String,
        content: String,
    },

    /// Identifier absent from the ordering index.
    #[error("unknown locus '{locus}' at line {line}: not present in the ordering list")]
    UnknownLocus { line: usize, locus: String },

    /// Non-positive weight under log transform.
    #[error("invalid weight {weight} at line {line}: log transform requires a weight > 0")]
    InvalidWeight { line: usize, weight: f64 },

    /// Failure to open, write or flush an output sink.
    #[error("failed to {action} output sink '{}': {source}", path.display())]
    Resource {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to open a sink for key '{key}' at line {line}: limit of {limit} open output files reached")]
    SinkLimit {
        line: usize,
        key: String,
        limit: usize,
    },

    #[error("group key '{key}' derived at line {line} cannot be used as an output file name")]
    InvalidGroupKey { line: usize, key: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Header or variant record rejected by the VCF reader, or a record the
    /// VCF writer could not encode.
    #[error("invalid VCF {location}: {source}")]
    Vcf {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("read error at line {line}: {source}")]
    Io {
        line: usize,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PrepError>;

impl PrepError {
    pub(crate) fn parse(line: usize, reason: impl Into<String>, content: &str) -> Self {
        PrepError::Parse {
            line,
            reason: reason.into(),
            content: content.to_string(),
        }
    }
}
