//! BG/NBD (Beta-Geometric / Negative Binomial) purchase model
//!
//! While active, a customer buys as a Poisson process with a gamma(r, alpha)
//! distributed rate; after each purchase they drop out with a beta(a, b)
//! distributed probability.

use ndarray::{Array1, ArrayView1, Zip};

use super::optimize::NelderMead;
use super::special::{ln_gamma, ln_hyp2f1};
use super::{check_columns, warn_pinned, FrequencyModel, LOG_PARAM_LIMIT};
use crate::error::{CltvError, CltvResult};

const MODEL_NAME: &str = "BG/NBD";
const PARAM_NAMES: [&str; 4] = ["r", "alpha", "a", "b"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetaGeoParams {
    pub r: f64,
    pub alpha: f64,
    pub a: f64,
    pub b: f64,
}

impl BetaGeoParams {
    fn from_log(x: &[f64]) -> Self {
        let p = |i: usize| x[i].clamp(-LOG_PARAM_LIMIT, LOG_PARAM_LIMIT).exp();
        Self {
            r: p(0),
            alpha: p(1),
            a: p(2),
            b: p(3),
        }
    }

    fn sum_of_squares(&self) -> f64 {
        self.r.powi(2) + self.alpha.powi(2) + self.a.powi(2) + self.b.powi(2)
    }
}

#[derive(Debug, Clone)]
pub struct BetaGeoModel {
    penalizer: f64,
    optimizer: NelderMead,
    params: Option<BetaGeoParams>,
}

impl BetaGeoModel {
    pub fn new(penalizer: f64, max_iterations: usize, tolerance: f64) -> Self {
        Self {
            penalizer,
            optimizer: NelderMead::new(max_iterations, tolerance),
            params: None,
        }
    }

    /// Build an already fitted model
    pub fn with_params(params: BetaGeoParams) -> Self {
        Self {
            penalizer: 0.0,
            optimizer: NelderMead::new(1, 1.0),
            params: Some(params),
        }
    }

    pub fn params(&self) -> Option<BetaGeoParams> {
        self.params
    }

    fn fitted(&self) -> CltvResult<BetaGeoParams> {
        self.params
            .ok_or_else(|| CltvError::model_fit(MODEL_NAME, "model has not been fitted"))
    }

    /// Mean log-likelihood per customer
    pub fn log_likelihood(
        params: &BetaGeoParams,
        frequency: ArrayView1<f64>,
        recency: ArrayView1<f64>,
        t: ArrayView1<f64>,
    ) -> f64 {
        let BetaGeoParams { r, alpha, a, b } = *params;
        let base = ln_gamma(a + b) - ln_gamma(b) - ln_gamma(r) + r * alpha.ln();

        let mut total = 0.0;
        Zip::from(&frequency)
            .and(&recency)
            .and(&t)
            .for_each(|&x, &rec, &tt| {
                let a1 = ln_gamma(r + x);
                let a2 = ln_gamma(b + x) - ln_gamma(a + b + x);
                let a3 = -(r + x) * (alpha + tt).ln();
                let a4 = a.ln() - (b + x.max(1.0) - 1.0).ln() - (r + x) * (rec + alpha).ln();

                let m = a3.max(a4);
                let repeat = if x > 0.0 { (a4 - m).exp() } else { 0.0 };
                total += base + a1 + a2 + ((a3 - m).exp() + repeat).ln() + m;
            });
        total / frequency.len() as f64
    }

    /// Expected purchases in `(0, horizon]` for one customer
    fn expected_purchases(
        params: &BetaGeoParams,
        horizon: f64,
        x: f64,
        recency: f64,
        t: f64,
    ) -> Option<f64> {
        let BetaGeoParams { r, alpha, a, b } = *params;
        if horizon <= 0.0 {
            return Some(0.0);
        }

        let hyp_a = r + x;
        let hyp_b = b + x;
        let hyp_c = a + b + x - 1.0;
        let z = horizon / (alpha + t + horizon);
        let ln_hyp = ln_hyp2f1(hyp_a, hyp_b, hyp_c, z)?;

        let first = (a + b + x - 1.0) / (a - 1.0);
        let second = 1.0 - (ln_hyp + (r + x) * ((alpha + t) / (alpha + horizon + t)).ln()).exp();
        let active = if x > 0.0 {
            a / (b + x - 1.0) * ((alpha + t) / (alpha + recency)).powf(r + x)
        } else {
            0.0
        };

        let expected = first * second / (1.0 + active);
        expected.is_finite().then_some(expected)
    }
}

impl FrequencyModel for BetaGeoModel {
    fn fit(
        &mut self,
        frequency: ArrayView1<f64>,
        recency: ArrayView1<f64>,
        t: ArrayView1<f64>,
    ) -> CltvResult<()> {
        check_columns(MODEL_NAME, &[frequency.len(), recency.len(), t.len()])?;

        let penalizer = self.penalizer;
        let objective = |x: &[f64]| {
            let params = BetaGeoParams::from_log(x);
            -Self::log_likelihood(&params, frequency, recency, t)
                + penalizer * params.sum_of_squares()
        };

        let result = self.optimizer.minimize(objective, &[0.0; 4]);
        if !result.value.is_finite() {
            return Err(CltvError::model_fit(MODEL_NAME, "likelihood is not finite"));
        }
        if !result.converged {
            return Err(CltvError::model_fit(
                MODEL_NAME,
                format!("no convergence after {} iterations", result.iterations),
            ));
        }

        warn_pinned(MODEL_NAME, &PARAM_NAMES, &result.x);
        let params = BetaGeoParams::from_log(&result.x);
        log::debug!(
            "{} fitted on {} customers in {} iterations: r={:.4} alpha={:.4} a={:.4} b={:.4} (objective {:.6})",
            MODEL_NAME,
            frequency.len(),
            result.iterations,
            params.r,
            params.alpha,
            params.a,
            params.b,
            result.value
        );
        self.params = Some(params);
        Ok(())
    }

    fn predict(
        &self,
        horizon: f64,
        frequency: ArrayView1<f64>,
        recency: ArrayView1<f64>,
        t: ArrayView1<f64>,
    ) -> CltvResult<Array1<f64>> {
        let params = self.fitted()?;
        check_columns(MODEL_NAME, &[frequency.len(), recency.len(), t.len()])?;

        let mut expected = Array1::<f64>::zeros(frequency.len());
        for (i, out) in expected.iter_mut().enumerate() {
            *out = Self::expected_purchases(&params, horizon, frequency[i], recency[i], t[i])
                .ok_or_else(|| {
                    CltvError::model_fit(
                        MODEL_NAME,
                        format!("expected purchases undefined for customer row {}", i),
                    )
                })?;
        }
        Ok(expected)
    }
}
