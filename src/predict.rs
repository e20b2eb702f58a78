//! Purchase, spend and lifetime value predictions per customer

use std::collections::HashMap;

use crate::aggregate::{CustomerAggregate, ModelInputs};
use crate::config::ModelConfig;
use crate::error::{CltvError, CltvResult};
use crate::model::{FrequencyModel, LifetimeValueParams, MonetaryModel};

/// Model outputs for one customer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Expected transactions over the configured horizon
    pub expected_purchases_horizon: f64,
    /// Expected mean value of a future transaction
    pub expected_average_profit: f64,
    /// Discounted value over the projection window
    pub clv: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomerPrediction {
    pub aggregate: CustomerAggregate,
    pub prediction: Prediction,
}

/// Fit both models on the aggregates and predict every customer.
///
/// # Arguments
/// * `aggregates` - Repeat customers, in output order, with spans in `config.time_unit` steps
/// * `config` - Horizon, penalizers and projection settings
/// * `frequency_model` / `monetary_model` - Unfitted model instances; they are fitted in place
///
/// # Returns
/// * One prediction per aggregate, in the same order
pub fn predict_customers(
    aggregates: &[CustomerAggregate],
    config: &ModelConfig,
    frequency_model: &mut dyn FrequencyModel,
    monetary_model: &mut dyn MonetaryModel,
) -> CltvResult<Vec<CustomerPrediction>> {
    if aggregates.is_empty() {
        log::warn!("No customers to predict, skipping model fitting");
        return Ok(Vec::new());
    }

    let inputs = ModelInputs::from_aggregates(aggregates);
    let (f, r, t, m) = (
        inputs.frequency.view(),
        inputs.recency.view(),
        inputs.t.view(),
        inputs.monetary.view(),
    );

    frequency_model.fit(f, r, t)?;
    let horizon = config.time_unit.steps_from_weeks(config.horizon_weeks);
    let expected_purchases = frequency_model.predict(horizon, f, r, t)?;
    ensure_row_count(aggregates, expected_purchases.len())?;
    log::info!(
        "Predicted purchases over {} weeks ({} {} steps) for {} customers",
        config.horizon_weeks,
        horizon,
        config.time_unit,
        inputs.len()
    );

    monetary_model.fit(f, m)?;
    let expected_profit = monetary_model.conditional_expected_average_value(f, m)?;
    ensure_row_count(aggregates, expected_profit.len())?;

    let clv = monetary_model.lifetime_value(
        &*frequency_model,
        f,
        r,
        t,
        m,
        LifetimeValueParams {
            months: config.clv_months,
            time_unit: config.time_unit,
            discount_rate: config.discount_rate,
        },
    )?;
    ensure_row_count(aggregates, clv.len())?;
    log::info!(
        "Projected lifetime value over {} months at {}% monthly discount",
        config.clv_months,
        config.discount_rate * 100.0
    );

    let predictions: HashMap<&str, Prediction> = aggregates
        .iter()
        .zip(expected_purchases.iter())
        .zip(expected_profit.iter())
        .zip(clv.iter())
        .map(|(((aggregate, &purchases), &profit), &clv)| {
            (
                aggregate.customer_id.as_str(),
                Prediction {
                    expected_purchases_horizon: purchases,
                    expected_average_profit: profit,
                    clv,
                },
            )
        })
        .collect();

    merge_predictions(aggregates, &predictions)
}

/// A model returning fewer rows than customers leaves the rest unmatched
fn ensure_row_count(aggregates: &[CustomerAggregate], rows: usize) -> CltvResult<()> {
    match aggregates.get(rows) {
        Some(unmatched) => Err(CltvError::JoinIntegrity {
            customer_id: unmatched.customer_id.clone(),
        }),
        None => Ok(()),
    }
}

/// Attach predictions to aggregates by customer id.
///
/// Every aggregate must have a prediction; a missing one means a model
/// returned fewer rows than it was given.
pub fn merge_predictions(
    aggregates: &[CustomerAggregate],
    predictions: &HashMap<&str, Prediction>,
) -> CltvResult<Vec<CustomerPrediction>> {
    aggregates
        .iter()
        .map(|aggregate| {
            let prediction = predictions
                .get(aggregate.customer_id.as_str())
                .copied()
                .ok_or_else(|| CltvError::JoinIntegrity {
                    customer_id: aggregate.customer_id.clone(),
                })?;
            Ok(CustomerPrediction {
                aggregate: aggregate.clone(),
                prediction,
            })
        })
        .collect()
}
