//! End-to-end CLTV pipeline: load, clean, aggregate, predict, segment

use std::path::Path;

use crate::aggregate::aggregate_customers;
use crate::clean::{clean_transactions, CleaningReport, OutlierThresholds};
use crate::config::PipelineConfig;
use crate::data::{load_transactions, RawTransaction};
use crate::error::CltvResult;
use crate::model::{
    BetaGeoModel, BetaGeoParams, FrequencyModel, GammaGammaModel, GammaGammaParams, MonetaryModel,
};
use crate::predict::predict_customers;
use crate::report::CltvTable;

/// Everything a run produces besides the table itself
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub table: CltvTable,
    pub cleaning: CleaningReport,
    pub quantity_thresholds: Option<OutlierThresholds>,
    pub price_thresholds: Option<OutlierThresholds>,
    /// Repeat customers that reached the models
    pub customers: usize,
    /// Fitted parameters, `None` when there was nothing to fit
    pub bgnbd: Option<BetaGeoParams>,
    pub gamma_gamma: Option<GammaGammaParams>,
}

/// Run the pipeline on a transaction file with the bundled models.
pub fn run_pipeline<P: AsRef<Path>>(input: P, config: &PipelineConfig) -> CltvResult<PipelineOutput> {
    config.validate()?;
    let mut bgf = BetaGeoModel::new(
        config.model.bgnbd_penalizer,
        config.model.max_iterations,
        config.model.tolerance,
    );
    let mut ggf = GammaGammaModel::new(
        config.model.gamma_gamma_penalizer,
        config.model.max_iterations,
        config.model.tolerance,
    );

    let mut output = run_with_models(input, config, &mut bgf, &mut ggf)?;
    output.bgnbd = bgf.params();
    output.gamma_gamma = ggf.params();
    if let (Some(bg), Some(gg)) = (output.bgnbd, output.gamma_gamma) {
        log::info!(
            "BG/NBD r={:.4} alpha={:.4} a={:.4} b={:.4}; Gamma-Gamma p={:.4} q={:.4} v={:.4}",
            bg.r,
            bg.alpha,
            bg.a,
            bg.b,
            gg.p,
            gg.q,
            gg.v
        );
    }
    Ok(output)
}

/// Run the pipeline on a transaction file with caller-supplied models.
pub fn run_with_models<P: AsRef<Path>>(
    input: P,
    config: &PipelineConfig,
    frequency_model: &mut dyn FrequencyModel,
    monetary_model: &mut dyn MonetaryModel,
) -> CltvResult<PipelineOutput> {
    config.validate()?;
    let rows = load_transactions(input, config.sheet.as_deref())?;
    process_transactions(rows, config, frequency_model, monetary_model)
}

/// Run every stage after loading on rows already in memory.
pub fn process_transactions(
    rows: Vec<RawTransaction>,
    config: &PipelineConfig,
    frequency_model: &mut dyn FrequencyModel,
    monetary_model: &mut dyn MonetaryModel,
) -> CltvResult<PipelineOutput> {
    let cleaned = clean_transactions(&rows, &config.cleaning, config.today)?;
    let aggregates = aggregate_customers(
        &cleaned.frame,
        &config.aggregation,
        config.today,
        config.model.time_unit,
    )?;
    log::info!(
        "{} repeat customers from {} cleaned transactions",
        aggregates.len(),
        cleaned.frame.height()
    );

    let predictions =
        predict_customers(&aggregates, &config.model, frequency_model, monetary_model)?;
    let table = CltvTable::from_predictions(predictions, config.segments)?;
    if table.is_empty() {
        log::warn!("No customers left after cleaning and aggregation, result is empty");
    }

    Ok(PipelineOutput {
        table,
        cleaning: cleaned.report,
        quantity_thresholds: cleaned.quantity_thresholds,
        price_thresholds: cleaned.price_thresholds,
        customers: aggregates.len(),
        bgnbd: None,
        gamma_gamma: None,
    })
}
