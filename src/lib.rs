//! Allocation Flux - batch engine for event-pivot anomaly analytics
//!
//! Flux measures how the rate of allocation changes moved around a pivot
//! event, broken down by the geographic lean of each entity's zip code,
//! through a deterministic pipeline: geographic resolution → cohort sizing →
//! event bucketing → baseline normalization → direction aggregation.
//!
//! ## Modules
//!
//! - **Rate Pipeline**: per-capita rates per (bucket, cohort), normalized
//!   against same-weekday, same-time-of-day history
//! - **Direction**: raw deltas and their distribution in a window around the pivot

pub mod baseline;
pub mod bucket;
pub mod cohort;
pub mod config;
pub mod direction;
pub mod encoder;
pub mod error;
pub mod geography;
pub mod normalizer;
pub mod pipeline;
pub mod schema;
pub mod types;

pub use config::AnalysisConfig;
pub use encoder::{OutputEncoder, OutputFormat};
pub use error::AnalysisError;
pub use geography::{SegmentScheme, ZipLeanTable};
pub use pipeline::{analyze, analyze_files, AnalysisPipeline};

// Schema exports
pub use schema::{InputPaths, InputTables, SchemaViolation, Table, TableLoader};

/// Flux version reported by the CLI
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "allocation-flux";
