//! Group normalization: proportional rescaling of a metric group's raw
//! values so they sum to the group's target.

use crate::model::round_to;

const SUM_EPSILON: f64 = 1e-9;

#[derive(Clone, Debug, PartialEq)]
pub struct Normalized {
    pub values: Vec<f64>,
    /// True when the raw values were rescaled; the boundary surfaces this
    /// to the user rather than adjusting silently.
    pub was_normalized: bool,
}

/// Rescale `raw` so it sums to `target`, keeping `precision` decimals.
///
/// A raw sum already at the target passes through unchanged, as does an
/// all-zero group ("no data yet" is not an error). Rounding can leave the
/// normalized sum off by one least-significant unit across the whole
/// group; that is accepted, not corrected further.
pub fn normalize_group(raw: &[f64], target: f64, precision: u32) -> Normalized {
    let sum: f64 = raw.iter().sum();

    if sum.abs() < SUM_EPSILON || (sum - target).abs() < SUM_EPSILON {
        return Normalized {
            values: raw.to_vec(),
            was_normalized: false,
        };
    }

    let values = raw
        .iter()
        .map(|value| round_to(value / sum * target, precision))
        .collect();

    Normalized {
        values,
        was_normalized: true,
    }
}
