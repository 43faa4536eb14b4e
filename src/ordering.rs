// ordering.rs

use crate::error::{PrepError, Result};
use crate::records::DataLines;
use log::debug;
use std::collections::HashMap;
use std::io;

/// Dense, stable identifier -> index mapping built from an ordering list.
///
/// Indices are assigned in first-seen order starting at 0. A repeated
/// identifier keeps the index of its first occurrence; the repeat is
/// remembered in `duplicates` but is not an error here.
#[derive(Debug, Clone, Default)]
pub struct IdentifierIndex {
    ids: HashMap<String, usize>,
    labels: Vec<String>,
    first_lines: Vec<usize>,
    duplicates: Vec<(usize, String)>,
}

impl IdentifierIndex {
    pub fn from_lines<I>(lines: I, comment_marker: char) -> Result<Self>
    where
        I: Iterator<Item = io::Result<String>>,
    {
        let mut index = IdentifierIndex::default();
        for line in DataLines::new(lines, comment_marker) {
            let line = line?;
            let id = line.text.trim();
            if index.ids.contains_key(id) {
                debug!(
                    "Identifier '{}' repeated at line {}; keeping index {}.",
                    id, line.number, index.ids[id]
                );
                index.duplicates.push((line.number, id.to_string()));
                continue;
            }
            index.ids.insert(id.to_string(), index.labels.len());
            index.labels.push(id.to_string());
            index.first_lines.push(line.number);
        }
        Ok(index)
    }

    pub fn get(&self, id: &str) -> Option<usize> {
        self.ids.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Identifiers in index order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Line on which the identifier with index `idx` first appeared.
    pub fn first_line(&self, idx: usize) -> Option<usize> {
        self.first_lines.get(idx).copied()
    }

    /// `(line number, identifier)` of every ignored repeat.
    pub fn duplicates(&self) -> &[(usize, String)] {
        &self.duplicates
    }
}

/// One point of an order comparison: an identifier's rank in the reference
/// ordering and its rank in the inferred ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct RankPair {
    pub id: String,
    pub actual: usize,
    pub inferred: usize,
}

#[derive(Debug, Clone)]
pub struct OrderComparison {
    /// Sorted by `actual` rank.
    pub pairs: Vec<RankPair>,
    /// Reference identifiers that never appear in the inferred ordering.
    pub missing_from_inferred: Vec<String>,
}

impl OrderComparison {
    /// Mean absolute rank displacement over the compared identifiers.
    pub fn mean_displacement(&self) -> f64 {
        if self.pairs.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .pairs
            .iter()
            .map(|p| (p.actual as f64 - p.inferred as f64).abs())
            .sum();
        total / self.pairs.len() as f64
    }
}

/// Compares an inferred ordering against a reference ordering.
///
/// The reference must not repeat identifiers, and every inferred identifier
/// must be present in the reference.
pub fn compare<A, B>(actual: A, inferred: B, comment_marker: char) -> Result<OrderComparison>
where
    A: Iterator<Item = io::Result<String>>,
    B: Iterator<Item = io::Result<String>>,
{
    let reference = IdentifierIndex::from_lines(actual, comment_marker)?;
    if let Some((line, id)) = reference.duplicates().first() {
        return Err(PrepError::parse(
            *line,
            "duplicate identifier in reference ordering",
            id,
        ));
    }

    let inferred = IdentifierIndex::from_lines(inferred, comment_marker)?;
    let mut inferred_rank_by_actual: Vec<Option<usize>> = vec![None; reference.len()];
    for (inferred_rank, id) in inferred.labels().iter().enumerate() {
        match reference.get(id) {
            Some(actual_rank) => inferred_rank_by_actual[actual_rank] = Some(inferred_rank),
            None => {
                return Err(PrepError::UnknownLocus {
                    line: inferred.first_line(inferred_rank).unwrap_or(0),
                    locus: id.clone(),
                });
            }
        }
    }

    let mut pairs = Vec::with_capacity(inferred.len());
    let mut missing_from_inferred = Vec::new();
    for (actual_rank, slot) in inferred_rank_by_actual.into_iter().enumerate() {
        let id = &reference.labels()[actual_rank];
        match slot {
            Some(inferred_rank) => pairs.push(RankPair {
                id: id.clone(),
                actual: actual_rank,
                inferred: inferred_rank,
            }),
            None => missing_from_inferred.push(id.clone()),
        }
    }
    Ok(OrderComparison {
        pairs,
        missing_from_inferred,
    })
}
