//! Fatal pipeline errors.
//!
//! Per-record problems (unmapped labels, malformed numbers, missing join
//! partners) never surface here; they become missing values or dropped rows
//! inside the stage that meets them. Only structural problems that make a
//! whole run meaningless are errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::mapping::CategoryDomain;

/// Structural errors that abort a run at startup or at a stage boundary.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A category mapping file could not be read.
    #[error("mapping file for {domain} not found at {path}")]
    MissingMapping {
        domain: CategoryDomain,
        path: PathBuf,
    },

    /// A category mapping file was read but is not a label -> code object.
    #[error("malformed mapping for {domain}: {reason}")]
    MalformedMapping {
        domain: CategoryDomain,
        reason: String,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An input table lacks a column the stage cannot work without.
    #[error("table {table} has no column {column}")]
    MissingColumn { table: String, column: String },

    /// The external booster failed to train or predict.
    #[error("booster failed: {0}")]
    Booster(String),
}
