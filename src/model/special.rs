//! Special functions needed by the purchase model

pub use statrs::function::gamma::ln_gamma;

const MAX_SERIES_TERMS: usize = 500_000;
const SERIES_EPSILON: f64 = 1e-15;

/// Gauss hypergeometric series 2F1(a, b; c; z) for 0 <= z < 1.
///
/// Returns `None` when the series diverges numerically or does not settle
/// within the term budget.
pub fn hyp2f1(a: f64, b: f64, c: f64, z: f64) -> Option<f64> {
    if !(0.0..1.0).contains(&z) || (c <= 0.0 && c.fract() == 0.0) {
        return None;
    }

    let mut term = 1.0;
    let mut sum = 1.0;
    for n in 0..MAX_SERIES_TERMS {
        let k = n as f64;
        term *= (a + k) * (b + k) / ((c + k) * (k + 1.0)) * z;
        sum += term;
        if !sum.is_finite() {
            return None;
        }
        if term.abs() <= SERIES_EPSILON * sum.abs() {
            return Some(sum);
        }
    }
    None
}

/// Natural log of 2F1(a, b; c; z).
///
/// Falls back to Euler's transformation
/// `2F1(a, b; c; z) = (1 - z)^(c - a - b) 2F1(c - a, c - b; c; z)`
/// when the direct series overflows or is not positive.
pub fn ln_hyp2f1(a: f64, b: f64, c: f64, z: f64) -> Option<f64> {
    if let Some(value) = hyp2f1(a, b, c, z).filter(|v| *v > 0.0) {
        return Some(value.ln());
    }
    let value = hyp2f1(c - a, c - b, c, z).filter(|v| *v > 0.0)?;
    Some(value.ln() + (c - a - b) * (1.0 - z).ln())
}
