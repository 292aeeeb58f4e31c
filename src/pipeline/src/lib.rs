//! Keiba pipeline
//!
//! Turns saved race and horse pages into leak-free per-entry feature tables,
//! trains a win classifier through an external booster, and evaluates
//! box-betting strategies against the official payout tables.

pub mod cli;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod features;
pub mod mapping;
pub mod population;
pub mod preprocess;
pub mod rawdf;
pub mod table;
pub mod train;
pub mod types;

pub use error::PipelineError;
