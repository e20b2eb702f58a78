//! Command-line interface definitions and argument parsing

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

use crate::config::{PipelineConfig, TimeUnit};
use crate::report::Column;

/// Customer lifetime value CLI using BG/NBD and Gamma-Gamma models
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the transaction CSV file, or a directory of CSV tables with --sheet
    #[arg(short, long, default_value = "online_retail_II.csv")]
    pub input: PathBuf,

    /// Optional TOML configuration file; flags below override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output path for the CLTV table
    #[arg(short, long, default_value = "cltv.csv")]
    pub output: PathBuf,

    /// Write SVG charts to this path
    #[arg(long)]
    pub chart: Option<PathBuf>,

    /// Number of customers to print
    #[arg(long, default_value = "10")]
    pub top: usize,

    /// Column used to rank the printed customers
    #[arg(long, default_value = "clv")]
    pub sort_by: Column,

    /// Reference date for tenure, as YYYY-MM-DD
    #[arg(long)]
    pub today: Option<NaiveDate>,

    /// Table name inside an input directory
    #[arg(long)]
    pub sheet: Option<String>,

    /// Number of CLV segments
    #[arg(short = 'k', long)]
    pub segments: Option<usize>,

    /// Market to keep
    #[arg(long)]
    pub country: Option<String>,

    /// Invoice marker of cancellations
    #[arg(long)]
    pub cancellation_marker: Option<String>,

    /// Lower percentile for outlier capping
    #[arg(long)]
    pub lower_quantile: Option<f64>,

    /// Upper percentile for outlier capping
    #[arg(long)]
    pub upper_quantile: Option<f64>,

    /// Multiplier of the percentile range for outlier capping
    #[arg(long)]
    pub iqr_multiplier: Option<f64>,

    /// Customers with this many invoices or fewer are dropped
    #[arg(long)]
    pub min_frequency: Option<u32>,

    /// Horizon for expected purchases, in weeks
    #[arg(long)]
    pub horizon_weeks: Option<f64>,

    /// L2 penalizer of the BG/NBD fit
    #[arg(long)]
    pub bgnbd_penalizer: Option<f64>,

    /// L2 penalizer of the Gamma-Gamma fit
    #[arg(long)]
    pub gamma_gamma_penalizer: Option<f64>,

    /// CLV projection length in months
    #[arg(long)]
    pub months: Option<u32>,

    /// Time unit of recency and T (W, M, D or H)
    #[arg(long)]
    pub time_unit: Option<TimeUnit>,

    /// Monthly discount rate
    #[arg(long)]
    pub discount_rate: Option<f64>,

    /// Maximum optimizer iterations per model
    #[arg(long)]
    pub max_iters: Option<usize>,

    /// Optimizer convergence tolerance
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Build the pipeline configuration: file values first, then flags
    pub fn to_config(&self) -> crate::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(today) = self.today {
            config.today = today;
        }
        if let Some(sheet) = &self.sheet {
            config.sheet = Some(sheet.clone());
        }
        if let Some(segments) = self.segments {
            config.segments = segments;
        }

        let cleaning = &mut config.cleaning;
        if let Some(country) = &self.country {
            cleaning.country = country.clone();
        }
        if let Some(marker) = &self.cancellation_marker {
            cleaning.cancellation_marker = marker.clone();
        }
        if let Some(q) = self.lower_quantile {
            cleaning.lower_quantile = q;
        }
        if let Some(q) = self.upper_quantile {
            cleaning.upper_quantile = q;
        }
        if let Some(k) = self.iqr_multiplier {
            cleaning.iqr_multiplier = k;
        }

        if let Some(min_frequency) = self.min_frequency {
            config.aggregation.min_frequency = min_frequency;
        }

        let model = &mut config.model;
        if let Some(horizon) = self.horizon_weeks {
            model.horizon_weeks = horizon;
        }
        if let Some(penalizer) = self.bgnbd_penalizer {
            model.bgnbd_penalizer = penalizer;
        }
        if let Some(penalizer) = self.gamma_gamma_penalizer {
            model.gamma_gamma_penalizer = penalizer;
        }
        if let Some(months) = self.months {
            model.clv_months = months;
        }
        if let Some(unit) = self.time_unit {
            model.time_unit = unit;
        }
        if let Some(rate) = self.discount_rate {
            model.discount_rate = rate;
        }
        if let Some(max_iters) = self.max_iters {
            model.max_iterations = max_iters;
        }
        if let Some(tolerance) = self.tolerance {
            model.tolerance = tolerance;
        }

        config.validate()?;
        Ok(config)
    }
}
