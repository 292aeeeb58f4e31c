//! Feature engineering: rolling history aggregates joined with race and
//! entry attributes.
//!
//! The same path serves training (finished races) and prediction (entry
//! lists without results); only the rank column differs.

pub mod builder;
pub mod history;

pub use builder::{create_features, model_input_columns, FeatureRow, FeatureTable};
pub use history::{aggregate, HistoryFeatures, HorseHistoryIndex, WindowSizes, WindowStats};
