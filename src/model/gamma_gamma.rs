//! Gamma-Gamma spend model
//!
//! Transaction values of a customer are gamma(p, nu) distributed, and the
//! rate nu varies across customers as gamma(q, v).

use ndarray::{Array1, ArrayView1, Zip};

use super::optimize::NelderMead;
use super::special::ln_gamma;
use super::{check_columns, warn_pinned, MonetaryModel, LOG_PARAM_LIMIT};
use crate::error::{CltvError, CltvResult};

const MODEL_NAME: &str = "Gamma-Gamma";
const PARAM_NAMES: [&str; 3] = ["p", "q", "v"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GammaGammaParams {
    pub p: f64,
    pub q: f64,
    pub v: f64,
}

impl GammaGammaParams {
    fn from_log(x: &[f64]) -> Self {
        let p = |i: usize| x[i].clamp(-LOG_PARAM_LIMIT, LOG_PARAM_LIMIT).exp();
        Self {
            p: p(0),
            q: p(1),
            v: p(2),
        }
    }

    fn sum_of_squares(&self) -> f64 {
        self.p.powi(2) + self.q.powi(2) + self.v.powi(2)
    }

    /// Mean spend per transaction across the population
    pub fn population_mean(&self) -> f64 {
        self.v * self.p / (self.q - 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct GammaGammaModel {
    penalizer: f64,
    optimizer: NelderMead,
    params: Option<GammaGammaParams>,
}

impl GammaGammaModel {
    pub fn new(penalizer: f64, max_iterations: usize, tolerance: f64) -> Self {
        Self {
            penalizer,
            optimizer: NelderMead::new(max_iterations, tolerance),
            params: None,
        }
    }

    pub fn with_params(params: GammaGammaParams) -> Self {
        Self {
            penalizer: 0.0,
            optimizer: NelderMead::new(1, 1.0),
            params: Some(params),
        }
    }

    pub fn params(&self) -> Option<GammaGammaParams> {
        self.params
    }

    fn fitted(&self) -> CltvResult<GammaGammaParams> {
        self.params
            .ok_or_else(|| CltvError::model_fit(MODEL_NAME, "model has not been fitted"))
    }

    /// Mean log-likelihood per customer
    pub fn log_likelihood(
        params: &GammaGammaParams,
        frequency: ArrayView1<f64>,
        monetary: ArrayView1<f64>,
    ) -> f64 {
        let GammaGammaParams { p, q, v } = *params;
        let mut total = 0.0;
        Zip::from(&frequency).and(&monetary).for_each(|&x, &m| {
            total += ln_gamma(p * x + q) - ln_gamma(p * x) - ln_gamma(q)
                + q * v.ln()
                + (p * x - 1.0) * m.ln()
                + (p * x) * x.ln()
                - (p * x + q) * (x * m + v).ln();
        });
        total / frequency.len() as f64
    }
}

impl MonetaryModel for GammaGammaModel {
    fn fit(&mut self, frequency: ArrayView1<f64>, monetary: ArrayView1<f64>) -> CltvResult<()> {
        check_columns(MODEL_NAME, &[frequency.len(), monetary.len()])?;
        if frequency.iter().any(|&x| x <= 0.0) || monetary.iter().any(|&m| m <= 0.0) {
            return Err(CltvError::model_fit(
                MODEL_NAME,
                "frequency and monetary values must be positive",
            ));
        }

        let penalizer = self.penalizer;
        let objective = |x: &[f64]| {
            let params = GammaGammaParams::from_log(x);
            -Self::log_likelihood(&params, frequency, monetary)
                + penalizer * params.sum_of_squares()
        };

        let result = self.optimizer.minimize(objective, &[0.0; 3]);
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
        let params = GammaGammaParams::from_log(&result.x);
        log::debug!(
            "{} fitted on {} customers in {} iterations: p={:.4} q={:.4} v={:.4} (objective {:.6})",
            MODEL_NAME,
            frequency.len(),
            result.iterations,
            params.p,
            params.q,
            params.v,
            result.value
        );
        self.params = Some(params);
        Ok(())
    }

    /// Shrinks each customer's observed mean towards the population mean,
    /// weighted by how many transactions back it.
    fn conditional_expected_average_value(
        &self,
        frequency: ArrayView1<f64>,
        monetary: ArrayView1<f64>,
    ) -> CltvResult<Array1<f64>> {
        let params = self.fitted()?;
        check_columns(MODEL_NAME, &[frequency.len(), monetary.len()])?;

        let GammaGammaParams { p, q, .. } = params;
        let population_mean = params.population_mean();
        let expected = Zip::from(&frequency)
            .and(&monetary)
            .map_collect(|&x, &m| {
                let weight = p * x / (p * x + q - 1.0);
                (1.0 - weight) * population_mean + weight * m
            });

        if expected.iter().any(|v| !v.is_finite()) {
            return Err(CltvError::model_fit(
                MODEL_NAME,
                format!("expected spend undefined for q={:.4}", q),
            ));
        }
        Ok(expected)
    }
}
