//! Purchase-frequency and monetary-value models
//!
//! The pipeline talks to the models only through [`FrequencyModel`] and
//! [`MonetaryModel`]. The bundled implementations are a BG/NBD purchase
//! model and a Gamma-Gamma spend model, both fitted by penalized maximum
//! likelihood.

pub mod bgnbd;
pub mod gamma_gamma;
pub mod optimize;
pub mod special;

use ndarray::{Array1, ArrayView1, Zip};

use crate::config::TimeUnit;
use crate::error::{CltvError, CltvResult};

pub use bgnbd::{BetaGeoModel, BetaGeoParams};
pub use gamma_gamma::{GammaGammaModel, GammaGammaParams};

/// Predicts how many transactions a customer makes over a future window.
///
/// `frequency`, `recency` and `t` are per-customer columns of equal length;
/// `recency`, `t` and `horizon` share one time unit.
pub trait FrequencyModel {
    fn fit(
        &mut self,
        frequency: ArrayView1<f64>,
        recency: ArrayView1<f64>,
        t: ArrayView1<f64>,
    ) -> CltvResult<()>;

    /// Expected number of transactions in `(0, horizon]`
    fn predict(
        &self,
        horizon: f64,
        frequency: ArrayView1<f64>,
        recency: ArrayView1<f64>,
        t: ArrayView1<f64>,
    ) -> CltvResult<Array1<f64>>;
}

/// Projection window for [`MonetaryModel::lifetime_value`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifetimeValueParams {
    pub months: u32,
    pub time_unit: TimeUnit,
    /// Monthly discount rate
    pub discount_rate: f64,
}

/// Estimates the value of a customer's transactions.
pub trait MonetaryModel {
    fn fit(&mut self, frequency: ArrayView1<f64>, monetary: ArrayView1<f64>) -> CltvResult<()>;

    /// Expected mean transaction value given the observed history
    fn conditional_expected_average_value(
        &self,
        frequency: ArrayView1<f64>,
        monetary: ArrayView1<f64>,
    ) -> CltvResult<Array1<f64>>;

    /// Discounted value of the expected transactions over the projection window
    fn lifetime_value(
        &self,
        frequency_model: &dyn FrequencyModel,
        frequency: ArrayView1<f64>,
        recency: ArrayView1<f64>,
        t: ArrayView1<f64>,
        monetary: ArrayView1<f64>,
        params: LifetimeValueParams,
    ) -> CltvResult<Array1<f64>> {
        let adjusted = self.conditional_expected_average_value(frequency, monetary)?;
        discounted_lifetime_value(frequency_model, frequency, recency, t, adjusted.view(), params)
    }
}

/// Sum of monthly expected revenue, each month discounted back to today.
///
/// Month `i` covers model time `((i - 1) * f, i * f]` where `f` is the
/// number of time-unit steps per month.
pub fn discounted_lifetime_value(
    frequency_model: &dyn FrequencyModel,
    frequency: ArrayView1<f64>,
    recency: ArrayView1<f64>,
    t: ArrayView1<f64>,
    value_per_transaction: ArrayView1<f64>,
    params: LifetimeValueParams,
) -> CltvResult<Array1<f64>> {
    let factor = params.time_unit.steps_per_month();
    let mut clv = Array1::<f64>::zeros(frequency.len());

    let mut previous = Array1::<f64>::zeros(frequency.len());
    for month in 1..=params.months {
        let step = f64::from(month) * factor;
        let cumulative = frequency_model.predict(step, frequency, recency, t)?;
        if cumulative.len() != clv.len() {
            return Err(CltvError::model_fit(
                "lifetime value",
                format!(
                    "frequency model returned {} rows for {} customers",
                    cumulative.len(),
                    clv.len()
                ),
            ));
        }
        let discount = (1.0 + params.discount_rate).powf(step / factor);

        Zip::from(&mut clv)
            .and(&cumulative)
            .and(&previous)
            .and(&value_per_transaction)
            .for_each(|clv, &now, &before, &value| {
                *clv += value * (now - before) / discount;
            });
        previous = cumulative;
    }

    if clv.iter().any(|v| !v.is_finite()) {
        return Err(CltvError::model_fit(
            "lifetime value",
            "projection produced non-finite values",
        ));
    }
    Ok(clv)
}

/// All column lengths must be equal and non-zero
pub(crate) fn check_columns(model: &'static str, lengths: &[usize]) -> CltvResult<usize> {
    let len = lengths.first().copied().unwrap_or(0);
    if len == 0 {
        return Err(CltvError::model_fit(model, "no observations"));
    }
    if lengths.iter().any(|&l| l != len) {
        return Err(CltvError::model_fit(model, "input columns differ in length"));
    }
    Ok(len)
}

/// Log-parameters are clamped to this magnitude while searching
pub(crate) const LOG_PARAM_LIMIT: f64 = 20.0;

/// Indices of log-parameters sitting on the search bound
pub(crate) fn pinned_parameters(x: &[f64]) -> Vec<usize> {
    x.iter()
        .enumerate()
        .filter(|(_, v)| v.abs() >= LOG_PARAM_LIMIT)
        .map(|(i, _)| i)
        .collect()
}

/// Warn when a fit ended with parameters pinned at `exp(±LOG_PARAM_LIMIT)`
pub(crate) fn warn_pinned(model: &'static str, names: &[&str], x: &[f64]) {
    let pinned: Vec<&str> = pinned_parameters(x)
        .into_iter()
        .filter_map(|i| names.get(i).copied())
        .collect();
    if !pinned.is_empty() {
        log::warn!(
            "{} parameters {} reached the search bound exp(±{}); the fit is likely degenerate",
            model,
            pinned.join(", "),
            LOG_PARAM_LIMIT
        );
    }
}
