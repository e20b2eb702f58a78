//! CLTV Forge: customer lifetime value estimation from retail transactions
//!
//! Transactions are cleaned and capped, summarised per customer, fed to a
//! BG/NBD purchase model and a Gamma-Gamma spend model, and the resulting
//! lifetime values are split into equal-count segments.

pub mod aggregate;
pub mod clean;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod predict;
pub mod report;
pub mod segment;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use config::{PipelineConfig, TimeUnit};
pub use data::{load_transactions, RawTransaction};
pub use error::{CltvError, CltvResult};
pub use model::{BetaGeoModel, FrequencyModel, GammaGammaModel, MonetaryModel};
pub use pipeline::{process_transactions, run_pipeline, run_with_models, PipelineOutput};
pub use report::{CltvRow, CltvTable, Column};
pub use segment::{assign_segments, Segment};

/// Result type of the binary-facing helpers
pub type Result<T> = anyhow::Result<T>;
