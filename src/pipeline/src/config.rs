//! Configuration for the keiba pipeline.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::features::{model_input_columns, WindowSizes};

/// Largest box worth simulating: a full JRA field.
pub const MAX_BOX_SIZE: usize = 18;

/// Directory layout of the pipeline artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_html_race_dir")]
    pub html_race_dir: String,
    #[serde(default = "default_html_horse_dir")]
    pub html_horse_dir: String,
    #[serde(default = "default_rawdf_dir")]
    pub rawdf_dir: String,
    #[serde(default = "default_mapping_dir")]
    pub mapping_dir: String,
    #[serde(default = "default_preprocessed_dir")]
    pub preprocessed_dir: String,
    #[serde(default = "default_feature_dir")]
    pub feature_dir: String,
    #[serde(default = "default_train_dir")]
    pub train_dir: String,
    #[serde(default = "default_evaluation_dir")]
    pub evaluation_dir: String,
}

fn default_html_race_dir() -> String {
    "data/html/race".to_string()
}

fn default_html_horse_dir() -> String {
    "data/html/horse".to_string()
}

fn default_rawdf_dir() -> String {
    "data/rawdf".to_string()
}

fn default_mapping_dir() -> String {
    "mappings".to_string()
}

fn default_preprocessed_dir() -> String {
    "data/01_preprocessed".to_string()
}

fn default_feature_dir() -> String {
    "data/02_feature".to_string()
}

fn default_train_dir() -> String {
    "data/03_train".to_string()
}

fn default_evaluation_dir() -> String {
    "data/04_evaluation".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            html_race_dir: default_html_race_dir(),
            html_horse_dir: default_html_horse_dir(),
            rawdf_dir: default_rawdf_dir(),
            mapping_dir: default_mapping_dir(),
            preprocessed_dir: default_preprocessed_dir(),
            feature_dir: default_feature_dir(),
            train_dir: default_train_dir(),
            evaluation_dir: default_evaluation_dir(),
        }
    }
}

/// Rolling history feature configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    /// Trailing window sizes; 1000 stands in for the whole career
    #[serde(default = "default_window_sizes")]
    pub window_sizes: Vec<usize>,
}

fn default_window_sizes() -> Vec<usize> {
    vec![3, 5, 10, 1000]
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            window_sizes: default_window_sizes(),
        }
    }
}

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Model input columns, in order
    #[serde(default)]
    pub feature_columns: Vec<String>,
    /// First date of the validation period (YYYY-MM-DD)
    #[serde(default = "default_valid_start_date")]
    pub valid_start_date: String,
    /// First date of the test period (YYYY-MM-DD)
    #[serde(default = "default_test_start_date")]
    pub test_start_date: String,
    /// Explicit path to the lightgbm executable
    #[serde(default)]
    pub lightgbm_path: Option<String>,
    /// Booster hyperparameters, passed through verbatim
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

fn default_valid_start_date() -> String {
    "2023-07-01".to_string()
}

fn default_test_start_date() -> String {
    "2023-10-01".to_string()
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            feature_columns: Vec::new(),
            valid_start_date: default_valid_start_date(),
            test_start_date: default_test_start_date(),
            lightgbm_path: None,
            params: BTreeMap::new(),
        }
    }
}

impl TrainConfig {
    /// Parse and order-check the split dates.
    pub fn split_dates(&self) -> Result<(NaiveDate, NaiveDate), PipelineError> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| PipelineError::Config(format!("bad date {:?}: {}", s, e)))
        };
        let valid = parse(&self.valid_start_date)?;
        let test = parse(&self.test_start_date)?;
        if valid >= test {
            return Err(PipelineError::Config(format!(
                "valid_start_date {} must precede test_start_date {}",
                valid, test
            )));
        }
        Ok((valid, test))
    }
}

/// Box-bet evaluation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_box_size")]
    pub box_size: usize,
    #[serde(default = "default_sort_column")]
    pub sort_column: String,
    #[serde(default)]
    pub ascending: bool,
    #[serde(default = "default_experiment_name")]
    pub experiment_name: String,
    #[serde(default = "default_baseline_column")]
    pub baseline_column: String,
    #[serde(default = "default_baseline_name")]
    pub baseline_name: String,
}

fn default_box_size() -> usize {
    3
}

fn default_sort_column() -> String {
    "pred".to_string()
}

fn default_experiment_name() -> String {
    "model".to_string()
}

fn default_baseline_column() -> String {
    "popularity".to_string()
}

fn default_baseline_name() -> String {
    "pop".to_string()
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            box_size: default_box_size(),
            sort_column: default_sort_column(),
            ascending: false,
            experiment_name: default_experiment_name(),
            baseline_column: default_baseline_column(),
            baseline_name: default_baseline_name(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub train: TrainConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

impl AppConfig {
    /// Load configuration from defaults, config file and environment
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // Add config file if exists
            .add_source(config::File::with_name("config").required(false))
            // Override with environment variables (KEIBA_EVALUATION__BOX_SIZE, etc.)
            .add_source(
                config::Environment::with_prefix("KEIBA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make every run meaningless.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let windows = WindowSizes::new(&self.features.window_sizes)
            .map_err(|e| PipelineError::Config(format!("features.window_sizes: {}", e)))?;
        if !(1..=MAX_BOX_SIZE).contains(&self.evaluation.box_size) {
            return Err(PipelineError::Config(format!(
                "evaluation.box_size must be between 1 and {}, got {}",
                MAX_BOX_SIZE, self.evaluation.box_size
            )));
        }
        self.train.split_dates()?;

        let known = model_input_columns(&windows);
        let unknown: Vec<&str> = self
            .train
            .feature_columns
            .iter()
            .map(String::as_str)
            .filter(|c| !known.iter().any(|k| k == c))
            .collect();
        if !unknown.is_empty() {
            return Err(PipelineError::Config(format!(
                "unknown train.feature_columns: {}",
                unknown.join(", ")
            )));
        }
        Ok(())
    }

    /// `validate` plus the checks only training needs.
    pub fn validate_for_training(&self) -> Result<(), PipelineError> {
        self.validate()?;
        if self.train.feature_columns.is_empty() {
            return Err(PipelineError::Config("train.feature_columns is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.features.window_sizes, vec![3, 5, 10, 1000]);
        assert_eq!(config.evaluation.box_size, 3);
        assert_eq!(config.evaluation.sort_column, "pred");
        assert!(!config.evaluation.ascending);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut config = AppConfig::default();
        config.features.window_sizes = vec![3, 0];
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_box() {
        let mut config = AppConfig::default();
        config.evaluation.box_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_box() {
        let mut config = AppConfig::default();
        config.evaluation.box_size = 5_000_000;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
        config.evaluation.box_size = MAX_BOX_SIZE;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_feature_columns() {
        let mut config = AppConfig::default();
        config.train.feature_columns = vec!["speed_index".to_string(), "rank_7races".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("speed_index"));
        assert!(err.to_string().contains("rank_7races"));

        // The finishing rank is the label, not an input.
        config.train.feature_columns = vec!["rank".to_string()];
        assert!(config.validate().is_err());

        config.train.feature_columns = vec![
            "umaban".to_string(),
            "race_class".to_string(),
            "prize_1000races".to_string(),
        ];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_training_needs_feature_columns() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(matches!(
            config.validate_for_training(),
            Err(PipelineError::Config(_))
        ));
        config.train.feature_columns = vec!["sin_date".to_string()];
        assert!(config.validate_for_training().is_ok());
    }

    #[test]
    fn test_split_dates_order() {
        let mut train = TrainConfig::default();
        train.valid_start_date = "2023-10-01".to_string();
        train.test_start_date = "2023-07-01".to_string();
        assert!(train.split_dates().is_err());

        train.test_start_date = "2024-01-01".to_string();
        let (valid, test) = train.split_dates().unwrap();
        assert!(valid < test);
    }
}
