//! Equal-count quantile segmentation of customer value

use std::collections::BTreeSet;
use std::fmt;

use polars::prelude::*;

use crate::error::{CltvError, CltvResult};

/// Ordinal segment; `rank` 0 is the lowest-value bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Segment {
    rank: u8,
    count: u8,
}

impl Segment {
    pub fn rank(&self) -> usize {
        usize::from(self.rank)
    }

    /// Letter label: the top bucket is `A`, each lower bucket the next letter
    pub fn label(&self) -> char {
        char::from(b'A' + (self.count - 1 - self.rank))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Bucket edges at the `i / buckets` quantiles of `values`, linearly interpolated
pub fn quantile_edges(values: &[f64], buckets: usize) -> CltvResult<Vec<f64>> {
    let column = Float64Chunked::from_slice("value", values);
    (0..=buckets)
        .map(|i| {
            column
                .quantile(i as f64 / buckets as f64, QuantileInterpolOptions::Linear)?
                .ok_or_else(|| CltvError::Bucketing {
                    buckets,
                    reason: "no values to take quantiles of".to_string(),
                })
        })
        .collect()
}

/// Assign each value to one of `buckets` equal-count segments, ascending.
///
/// The first bucket is closed on both ends, the others are `(lo, hi]`.
/// Ties that would collapse two edges into one are reported as an error
/// instead of silently producing fewer buckets.
pub fn assign_segments(values: &[f64], buckets: usize) -> CltvResult<Vec<Segment>> {
    if !(2..=26).contains(&buckets) {
        return Err(CltvError::Bucketing {
            buckets,
            reason: "segment count must be between 2 and 26".to_string(),
        });
    }
    if values.is_empty() {
        return Ok(Vec::new());
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(CltvError::Bucketing {
            buckets,
            reason: "values must be finite".to_string(),
        });
    }

    let distinct: BTreeSet<u64> = values.iter().map(|v| v.to_bits()).collect();
    if distinct.len() < buckets {
        return Err(CltvError::Bucketing {
            buckets,
            reason: format!("only {} distinct values", distinct.len()),
        });
    }

    let edges = quantile_edges(values, buckets)?;
    if edges.windows(2).any(|w| w[0] >= w[1]) {
        return Err(CltvError::Bucketing {
            buckets,
            reason: format!("bucket edges are not unique: {:?}", edges),
        });
    }

    let count = buckets as u8;
    let segments = values
        .iter()
        .map(|&v| {
            // first inner edge that is >= v; values on an edge fall in the lower bucket
            let rank = edges[1..buckets].partition_point(|&edge| edge < v);
            Segment {
                rank: rank as u8,
                count,
            }
        })
        .collect();
    Ok(segments)
}
