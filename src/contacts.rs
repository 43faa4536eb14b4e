// contacts.rs

use crate::error::{PrepError, Result};
use crate::ordering::IdentifierIndex;
use crate::records::{DataLine, DataLines};
use log::{debug, info};
use ndarray::Array2;
use std::io;

/// One `<locusA> <locusB> <weight>` line of a contact (links) file.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactRecord<'a> {
    pub locus_a: &'a str,
    pub locus_b: &'a str,
    pub weight: f64,
}

impl<'a> ContactRecord<'a> {
    pub fn parse(line: &'a DataLine) -> Result<Self> {
        let fields: Vec<&str> = line.text.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(PrepError::parse(
                line.number,
                format!("expected 3 fields (locusA locusB weight), found {}", fields.len()),
                &line.text,
            ));
        }
        let weight: f64 = fields[2].parse().map_err(|e| {
            PrepError::parse(
                line.number,
                format!("weight '{}' is not a number: {}", fields[2], e),
                &line.text,
            )
        })?;
        if !weight.is_finite() || weight < 0.0 {
            return Err(PrepError::parse(
                line.number,
                format!("weight '{}' must be a finite number >= 0", fields[2]),
                &line.text,
            ));
        }
        Ok(ContactRecord {
            locus_a: fields[0],
            locus_b: fields[1],
            weight,
        })
    }

    pub fn is_self_pair(&self) -> bool {
        self.locus_a == self.locus_b
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Identity,
    /// Natural logarithm; only defined for weights > 0.
    Log,
}

impl Transform {
    fn apply(self, weight: f64, line: usize) -> Result<f64> {
        match self {
            Transform::Identity => Ok(weight),
            Transform::Log if weight > 0.0 => Ok(weight.ln()),
            Transform::Log => Err(PrepError::InvalidWeight { line, weight }),
        }
    }
}

/// Dense symmetric contact matrix with its axis labels.
#[derive(Debug, Clone)]
pub struct InteractionMatrix {
    pub labels: Vec<String>,
    pub values: Array2<f64>,
}

impl InteractionMatrix {
    pub fn dim(&self) -> usize {
        self.labels.len()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[[i, j]]
    }
}

/// Counts reported after a matrix build.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildStats {
    pub contacts: u64,
    pub self_pairs: u64,
    pub comments: u64,
}

/// Builds the dense N x N matrix for the loci of `index` from a contact stream.
///
/// Each accepted contact is written to both `M[i][j]` and `M[j][i]`; a later
/// contact for the same pair replaces the earlier value. Self-pairs leave the
/// matrix untouched. The whole line is validated before any cell is written.
pub fn build_matrix<I>(
    lines: I,
    index: &IdentifierIndex,
    transform: Transform,
    comment_marker: char,
) -> Result<(InteractionMatrix, BuildStats)>
where
    I: Iterator<Item = io::Result<String>>,
{
    let n = index.len();
    let mut values = Array2::<f64>::zeros((n, n));
    let mut stats = BuildStats::default();

    let mut data_lines = DataLines::new(lines, comment_marker);
    for line in data_lines.by_ref() {
        let line = line?;
        let record = ContactRecord::parse(&line)?;
        if record.is_self_pair() {
            stats.self_pairs += 1;
            continue;
        }
        let i = lookup(index, record.locus_a, line.number)?;
        let j = lookup(index, record.locus_b, line.number)?;
        let value = transform.apply(record.weight, line.number)?;

        values[[i, j]] = value;
        values[[j, i]] = value;
        stats.contacts += 1;
    }
    stats.comments = data_lines.skipped();

    debug!(
        "Matrix build: {} contacts, {} self-pairs skipped, {} comment lines.",
        stats.contacts, stats.self_pairs, stats.comments
    );
    info!("Built {}x{} interaction matrix ({:?} transform).", n, n, transform);

    Ok((
        InteractionMatrix {
            labels: index.labels().to_vec(),
            values,
        },
        stats,
    ))
}

fn lookup(index: &IdentifierIndex, locus: &str, line: usize) -> Result<usize> {
    index.get(locus).ok_or_else(|| PrepError::UnknownLocus {
        line,
        locus: locus.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::text_lines;

    fn abc() -> IdentifierIndex {
        IdentifierIndex::from_lines(text_lines("A\nB\nC"), '#').unwrap()
    }

    fn build(text: &str, transform: Transform) -> Result<InteractionMatrix> {
        build_matrix(text_lines(text), &abc(), transform, '#').map(|(m, _)| m)
    }

    #[test]
    fn identity_matrix_example() {
        let (matrix, stats) =
            build_matrix(text_lines("A B 2.0\nB C 4.0\nA A 9.0"), &abc(), Transform::Identity, '#')
                .unwrap();
        let expected = ndarray::arr2(&[[0.0, 2.0, 0.0], [2.0, 0.0, 4.0], [0.0, 4.0, 0.0]]);
        assert_eq!(matrix.values, expected);
        assert_eq!(matrix.labels, vec!["A", "B", "C"]);
        assert_eq!(stats.contacts, 2);
        assert_eq!(stats.self_pairs, 1);
    }

    #[test]
    fn matrix_is_symmetric() {
        let matrix = build("C A 1.5\nB A 0.25\n# note\nC B 7", Transform::Identity).unwrap();
        for i in 0..matrix.dim() {
            for j in 0..matrix.dim() {
                assert_eq!(matrix.get(i, j), matrix.get(j, i));
            }
        }
        assert_eq!(matrix.get(0, 2), 1.5);
        assert_eq!(matrix.get(1, 0), 0.25);
    }

    #[test]
    fn self_pairs_never_touch_cells() {
        let matrix = build("A A 9\nB B 3\nC C 1", Transform::Identity).unwrap();
        assert!(matrix.values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn self_pair_with_zero_weight_is_skipped_under_log() {
        let matrix = build("A A 0\nA B 1", Transform::Log).unwrap();
        assert_eq!(matrix.get(0, 1), 0.0);
        assert_eq!(matrix.get(1, 0), 0.0);
    }

    #[test]
    fn later_duplicate_overwrites() {
        let matrix = build("A B 2\nB A 5", Transform::Identity).unwrap();
        assert_eq!(matrix.get(0, 1), 5.0);
        assert_eq!(matrix.get(1, 0), 5.0);
    }

    #[test]
    fn log_transform_applies_natural_log() {
        let matrix = build("A B 10\nB C 1", Transform::Log).unwrap();
        assert!((matrix.get(0, 1) - 10f64.ln()).abs() < 1e-12);
        assert!((matrix.get(1, 0) - 10f64.ln()).abs() < 1e-12);
        assert_eq!(matrix.get(1, 2), 0.0);
    }

    #[test]
    fn log_transform_rejects_non_positive_weight() {
        let err = build("A B 2\nB C 0", Transform::Log).unwrap_err();
        match err {
            PrepError::InvalidWeight { line, weight } => {
                assert_eq!(line, 2);
                assert_eq!(weight, 0.0);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn zero_weight_is_fine_without_transform() {
        let matrix = build("A B 0", Transform::Identity).unwrap();
        assert_eq!(matrix.get(0, 1), 0.0);
    }

    #[test]
    fn unknown_locus_is_fatal() {
        let err = build("A B 1\nA Z 3", Transform::Identity).unwrap_err();
        match err {
            PrepError::UnknownLocus { line, locus } => {
                assert_eq!(line, 2);
                assert_eq!(locus, "Z");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn malformed_lines_are_parse_errors() {
        assert!(matches!(
            build("A B", Transform::Identity),
            Err(PrepError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            build("A B 1 extra", Transform::Identity),
            Err(PrepError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            build("# c\nA B heavy", Transform::Identity),
            Err(PrepError::Parse { line: 2, .. })
        ));
        assert!(matches!(
            build("A B -1", Transform::Identity),
            Err(PrepError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            build("A B NaN", Transform::Identity),
            Err(PrepError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn empty_ordering_gives_empty_matrix() {
        let index = IdentifierIndex::from_lines(text_lines("# nothing"), '#').unwrap();
        let (matrix, _) = build_matrix(text_lines(""), &index, Transform::Identity, '#').unwrap();
        assert_eq!(matrix.dim(), 0);
        assert_eq!(matrix.values.shape(), &[0, 0]);
    }
}
