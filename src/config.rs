//! Pipeline configuration
//!
//! Defaults reproduce the reference analysis of the Online Retail II
//! dataset (UK market, reference date 2011-12-11, six month projection).
//! Every field can be overridden from a TOML file and from the command line.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::{CltvError, CltvResult};

/// Granularity of the recency/T columns, used to convert the monthly
/// projection horizon into model time steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    #[serde(rename = "W")]
    Week,
    #[serde(rename = "M")]
    Month,
    #[serde(rename = "D")]
    Day,
    #[serde(rename = "H")]
    Hour,
}

impl TimeUnit {
    /// Number of model time steps in one month.
    pub fn steps_per_month(self) -> f64 {
        match self {
            TimeUnit::Week => 4.345,
            TimeUnit::Month => 1.0,
            TimeUnit::Day => 30.0,
            TimeUnit::Hour => 30.0 * 24.0,
        }
    }

    /// Length of one model time step in days
    pub fn days_per_step(self) -> f64 {
        match self {
            TimeUnit::Week => 7.0,
            TimeUnit::Month => 30.0,
            TimeUnit::Day => 1.0,
            TimeUnit::Hour => 1.0 / 24.0,
        }
    }

    /// Convert a span given in weeks to model time steps
    pub fn steps_from_weeks(self, weeks: f64) -> f64 {
        weeks * 7.0 / self.days_per_step()
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TimeUnit::Week => "W",
            TimeUnit::Month => "M",
            TimeUnit::Day => "D",
            TimeUnit::Hour => "H",
        };
        f.write_str(label)
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "W" => Ok(TimeUnit::Week),
            "M" => Ok(TimeUnit::Month),
            "D" => Ok(TimeUnit::Day),
            "H" => Ok(TimeUnit::Hour),
            other => Err(format!("Unknown time unit '{}', expected one of W, M, D, H", other)),
        }
    }
}

/// Row filtering and outlier capping settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    /// Invoices containing this substring are cancellations
    pub cancellation_marker: String,
    /// Only transactions from this country are kept
    pub country: String,
    /// Lower percentile of the capping range (the usual IQR choice would be 0.25)
    pub lower_quantile: f64,
    /// Upper percentile of the capping range (the usual IQR choice would be 0.75)
    pub upper_quantile: f64,
    /// Range multiplier applied on both sides of the percentile span
    pub iqr_multiplier: f64,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            cancellation_marker: "C".to_string(),
            country: "United Kingdom".to_string(),
            lower_quantile: 0.01,
            upper_quantile: 0.99,
            iqr_multiplier: 1.5,
        }
    }
}

/// Per-customer aggregation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Customers with this many invoices or fewer are dropped
    pub min_frequency: u32,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self { min_frequency: 1 }
    }
}

/// Model fitting and projection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Horizon for expected purchase counts, in weeks whatever the time unit
    pub horizon_weeks: f64,
    pub bgnbd_penalizer: f64,
    pub gamma_gamma_penalizer: f64,
    /// Projection length of the lifetime value, in months
    pub clv_months: u32,
    /// Unit of recency, T and the model's time axis
    pub time_unit: TimeUnit,
    /// Monthly discount rate
    pub discount_rate: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            horizon_weeks: 24.0,
            bgnbd_penalizer: 0.001,
            gamma_gamma_penalizer: 0.01,
            clv_months: 6,
            time_unit: TimeUnit::Week,
            discount_rate: 0.01,
            max_iterations: 5000,
            tolerance: 1e-8,
        }
    }
}

/// Complete configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fixed analysis date used for tenure
    pub today: NaiveDate,
    /// Table name when the input path is a directory of CSV files
    pub sheet: Option<String>,
    /// Number of CLV segments
    pub segments: usize,
    pub cleaning: CleaningConfig,
    pub aggregation: AggregationConfig,
    pub model: ModelConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            today: NaiveDate::from_ymd_opt(2011, 12, 11).unwrap_or_default(),
            sheet: None,
            segments: 4,
            cleaning: CleaningConfig::default(),
            aggregation: AggregationConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Read a TOML configuration file. Missing keys fall back to defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> CltvResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| CltvError::file_access(path.display().to_string(), e))?;
        let config: PipelineConfig = toml::from_str(&content).map_err(|e| {
            CltvError::Config(format!("Failed to parse '{}': {}", path.display(), e))
        })?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> CltvResult<()> {
        let cleaning = &self.cleaning;
        if cleaning.cancellation_marker.is_empty() {
            return Err(CltvError::Config("cancellation marker must not be empty".into()));
        }
        if cleaning.country.trim().is_empty() {
            return Err(CltvError::Config("target country must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&cleaning.lower_quantile)
            || !(0.0..=1.0).contains(&cleaning.upper_quantile)
            || cleaning.lower_quantile >= cleaning.upper_quantile
        {
            return Err(CltvError::Config(format!(
                "outlier quantiles must satisfy 0 <= lower < upper <= 1, got {} and {}",
                cleaning.lower_quantile, cleaning.upper_quantile
            )));
        }
        if !(cleaning.iqr_multiplier >= 0.0) {
            return Err(CltvError::Config("iqr multiplier must be non-negative".into()));
        }

        let model = &self.model;
        if !(model.horizon_weeks > 0.0) {
            return Err(CltvError::Config("prediction horizon must be positive".into()));
        }
        if !(model.bgnbd_penalizer >= 0.0) || !(model.gamma_gamma_penalizer >= 0.0) {
            return Err(CltvError::Config("penalizer coefficients must be non-negative".into()));
        }
        if model.clv_months == 0 {
            return Err(CltvError::Config("CLV projection needs at least one month".into()));
        }
        if !(model.discount_rate >= 0.0) {
            return Err(CltvError::Config("discount rate must be non-negative".into()));
        }
        if model.max_iterations == 0 || !(model.tolerance > 0.0) {
            return Err(CltvError::Config(
                "optimizer needs positive iteration budget and tolerance".into(),
            ));
        }

        if !(2..=26).contains(&self.segments) {
            return Err(CltvError::Config(format!(
                "segment count must be between 2 and 26, got {}",
                self.segments
            )));
        }
        Ok(())
    }
}
