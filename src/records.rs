// records.rs

use crate::error::{PrepError, Result};
use std::io;

/// A non-comment, non-blank input line with its 1-based physical line number.
#[derive(Debug, Clone, PartialEq)]
pub struct DataLine {
    pub number: usize,
    pub text: String,
}

/// Iterates over the data lines of a line-oriented text stream.
///
/// Lines starting with `marker` and whitespace-only lines are skipped and
/// counted. A read failure is yielded once as `PrepError::Io` and ends the
/// iteration.
pub struct DataLines<I> {
    inner: I,
    marker: char,
    line_number: usize,
    skipped: u64,
    failed: bool,
}

impl<I> DataLines<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    pub fn new(inner: I, marker: char) -> Self {
        Self {
            inner,
            marker,
            line_number: 0,
            skipped: 0,
            failed: false,
        }
    }

    /// Number of comment and blank lines consumed so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl<I> Iterator for DataLines<I>
where
    I: Iterator<Item = io::Result<String>>,
{
    type Item = Result<DataLine>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let raw = self.inner.next()?;
            self.line_number += 1;
            match raw {
                Ok(text) => {
                    if text.starts_with(self.marker) || text.trim().is_empty() {
                        self.skipped += 1;
                        continue;
                    }
                    return Some(Ok(DataLine {
                        number: self.line_number,
                        text,
                    }));
                }
                Err(source) => {
                    self.failed = true;
                    return Some(Err(PrepError::Io {
                        line: self.line_number,
                        source,
                    }));
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn text_lines(text: &str) -> impl Iterator<Item = io::Result<String>> + '_ {
    text.lines().map(|l| Ok(l.to_string()))
}
