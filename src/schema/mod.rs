//! Input table schemas
//!
//! This module defines the four input tables the pipeline consumes (regions,
//! zip crosswalk, entity snapshot, allocation changes), their validation
//! rules, and loaders for CSV and JSON encodings.

mod loader;
mod tables;

pub use loader::*;
pub use tables::*;
