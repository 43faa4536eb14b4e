// scores.rs

use crate::error::{PrepError, Result};
use crate::records::DataLines;
use log::debug;
use std::io;

/// Score progression of an optimization run, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreSeries {
    pub points: Vec<(u64, f64)>,
    /// Line at which a lower iteration number ended the series, if any.
    pub restarted_at: Option<usize>,
}

/// Reads `<iteration> <score> [...]` lines into a score series.
///
/// Reading stops at the first iteration lower than the one before it, which
/// marks a restarted run appended to the same log; nothing after that line is
/// parsed. Repeated iteration numbers are kept. Extra columns are ignored.
pub fn read_score_series<I>(lines: I, comment_marker: char) -> Result<ScoreSeries>
where
    I: Iterator<Item = io::Result<String>>,
{
    let mut series = ScoreSeries::default();
    let mut last = 0u64;

    for line in DataLines::new(lines, comment_marker) {
        let line = line?;
        let mut fields = line.text.split_whitespace();
        let (Some(iteration), Some(score)) = (fields.next(), fields.next()) else {
            return Err(PrepError::parse(
                line.number,
                "expected at least 2 fields (iteration score)",
                &line.text,
            ));
        };
        let iteration: u64 = iteration.parse().map_err(|e| {
            PrepError::parse(
                line.number,
                format!("iteration '{}' is not a non-negative integer: {}", iteration, e),
                &line.text,
            )
        })?;
        if iteration < last {
            debug!(
                "Iteration {} at line {} follows {}; stopping the series there.",
                iteration, line.number, last
            );
            series.restarted_at = Some(line.number);
            break;
        }
        let score: f64 = score
            .parse()
            .ok()
            .filter(|s: &f64| s.is_finite())
            .ok_or_else(|| {
                PrepError::parse(
                    line.number,
                    format!("score '{}' is not a finite number", score),
                    &line.text,
                )
            })?;
        last = iteration;
        series.points.push((iteration, score));
    }
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::text_lines;

    fn read(text: &str) -> Result<ScoreSeries> {
        read_score_series(text_lines(text), '#')
    }

    #[test]
    fn reads_points_in_order() {
        let series = read("0 -10.5\n1 -8\n1 -7.25\n5 -3 0.4").unwrap();
        assert_eq!(
            series.points,
            vec![(0, -10.5), (1, -8.0), (1, -7.25), (5, -3.0)]
        );
        assert_eq!(series.restarted_at, None);
    }

    #[test]
    fn stops_at_first_lower_iteration() {
        let series = read("# run 1\n0 1.0\n10 2.0\n20 3.0\n0 0.5\n10 garbage").unwrap();
        assert_eq!(series.points, vec![(0, 1.0), (10, 2.0), (20, 3.0)]);
        assert_eq!(series.restarted_at, Some(5));
    }

    #[test]
    fn malformed_lines_are_parse_errors() {
        assert!(matches!(read("0 1.0\n7"), Err(PrepError::Parse { line: 2, .. })));
        assert!(matches!(read("x 1.0"), Err(PrepError::Parse { line: 1, .. })));
        assert!(matches!(read("-1 1.0"), Err(PrepError::Parse { line: 1, .. })));
        assert!(matches!(read("3 high"), Err(PrepError::Parse { line: 1, .. })));
        assert!(matches!(read("3 inf"), Err(PrepError::Parse { line: 1, .. })));
    }

    #[test]
    fn empty_input_gives_empty_series() {
        assert_eq!(read("# nothing\n\n").unwrap(), ScoreSeries::default());
    }
}
