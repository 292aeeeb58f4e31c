//! Time-split training through an external gradient-boosting booster.
//!
//! The shipped booster drives the LightGBM command-line executable: datasets
//! are written as TSV with the label first, training and prediction run as
//! separate `task=` invocations, and scores are read back from the result
//! file.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;
use chrono::NaiveDate;
use polars::prelude::*;
use tracing::{debug, info};

use crate::config::TrainConfig;
use crate::error::PipelineError;
use crate::table::{FrameBuilder, TextTable};
use crate::types::{parse_date, PredictionRow};

/// One feature table row as the trainer sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub race_id: String,
    pub horse_id: String,
    pub date: NaiveDate,
    pub rank: Option<u32>,
    pub tansho_odds: Option<f64>,
    pub popularity: Option<u32>,
    pub umaban: Option<u32>,
    /// Values of the configured feature columns, in order.
    pub features: Vec<Option<f64>>,
}

impl TrainingRow {
    /// Binary target: the horse won.
    pub fn target(&self) -> bool {
        self.rank == Some(1)
    }
}

/// Read the configured feature columns out of a feature table.
pub fn load_training_rows(
    table: &TextTable,
    feature_columns: &[String],
) -> Result<Vec<TrainingRow>, PipelineError> {
    if feature_columns.is_empty() {
        return Err(PipelineError::Config("train.feature_columns is empty".into()));
    }
    let race_ids = table.column("race_id")?;
    let horse_ids = table.column("horse_id")?;
    let dates = table.column("date")?;
    let ranks = table.column("rank")?;
    let odds = table.column("tansho_odds")?;
    let popularity = table.column("popularity")?;
    let umaban = table.column("umaban")?;
    let features = feature_columns
        .iter()
        .map(|name| table.column(name))
        .collect::<Result<Vec<_>, _>>()?;

    Ok((0..table.height())
        .filter_map(|i| {
            Some(TrainingRow {
                race_id: race_ids.get(i)?.to_string(),
                horse_id: horse_ids.get(i)?.to_string(),
                date: parse_date(dates.get(i)?)?,
                rank: ranks.parse(i),
                tansho_odds: odds.parse(i),
                popularity: popularity.parse(i),
                umaban: umaban.parse(i),
                features: features.iter().map(|c| c.parse(i)).collect(),
            })
        })
        .collect())
}

/// Date-based split.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub train: Vec<TrainingRow>,
    pub valid: Vec<TrainingRow>,
    pub test: Vec<TrainingRow>,
}

/// Split rows into `date < valid_start`, `valid_start <= date < test_start`
/// and `date >= test_start`.
pub fn create_dataset(rows: Vec<TrainingRow>, valid_start: NaiveDate, test_start: NaiveDate) -> Dataset {
    let mut dataset = Dataset::default();
    for row in rows {
        if row.date < valid_start {
            dataset.train.push(row);
        } else if row.date < test_start {
            dataset.valid.push(row);
        } else {
            dataset.test.push(row);
        }
    }
    info!(
        "dataset: {} train, {} valid, {} test rows",
        dataset.train.len(),
        dataset.valid.len(),
        dataset.test.len()
    );
    dataset
}

/// A model that can be fitted on the train/valid split and score rows.
pub trait Booster {
    fn fit(
        &mut self,
        train: &[TrainingRow],
        valid: &[TrainingRow],
        feature_columns: &[String],
    ) -> anyhow::Result<()>;

    /// One score per row, in row order.
    fn predict(&self, rows: &[TrainingRow], feature_columns: &[String]) -> anyhow::Result<Vec<f64>>;

    /// Feature name and importance, most important first.
    fn feature_importance(&self) -> anyhow::Result<Vec<(String, f64)>>;
}

/// Fits a booster and scores the test period.
pub struct Trainer<B: Booster> {
    booster: B,
    feature_columns: Vec<String>,
}

impl<B: Booster> Trainer<B> {
    pub fn new(booster: B, feature_columns: Vec<String>) -> Self {
        Self {
            booster,
            feature_columns,
        }
    }

    pub fn booster(&self) -> &B {
        &self.booster
    }

    /// Fit on train/valid and return test-period predictions.
    pub fn run(&mut self, dataset: &Dataset) -> anyhow::Result<Vec<PredictionRow>> {
        if dataset.train.is_empty() {
            return Err(PipelineError::Booster("no training rows before the validation date".into()).into());
        }
        self.booster
            .fit(&dataset.train, &dataset.valid, &self.feature_columns)?;
        let scores = self.booster.predict(&dataset.test, &self.feature_columns)?;
        if scores.len() != dataset.test.len() {
            return Err(PipelineError::Booster(format!(
                "{} scores for {} test rows",
                scores.len(),
                dataset.test.len()
            ))
            .into());
        }

        Ok(dataset
            .test
            .iter()
            .zip(scores)
            .map(|(row, pred)| PredictionRow {
                race_id: row.race_id.clone(),
                horse_id: row.horse_id.clone(),
                target: row.target(),
                rank: row.rank,
                tansho_odds: row.tansho_odds,
                popularity: row.popularity,
                umaban: row.umaban,
                pred: Some(pred),
            })
            .collect())
    }
}

/// Importance table, most important first.
pub fn importance_frame(importance: &[(String, f64)]) -> PolarsResult<DataFrame> {
    FrameBuilder::new()
        .text("feature", importance.iter().map(|(f, _)| f.clone()).collect())
        .float("importance", importance.iter().map(|(_, v)| Some(*v)).collect())
        .finish()
}

/// LightGBM command-line booster.
pub struct LightGbmCli {
    executable: PathBuf,
    work_dir: PathBuf,
    params: BTreeMap<String, String>,
}

impl LightGbmCli {
    pub fn new(executable: PathBuf, work_dir: PathBuf, params: BTreeMap<String, String>) -> Self {
        Self {
            executable,
            work_dir,
            params,
        }
    }

    /// Booster configured from `[train]`, writing artifacts under `work_dir`.
    pub fn from_config(config: &TrainConfig, work_dir: &Path) -> Result<Self, PipelineError> {
        let executable = resolve_lightgbm_executable(config.lightgbm_path.as_deref())?;
        info!("Using LightGBM executable at {}", executable.display());
        Ok(Self::new(executable, work_dir.to_path_buf(), config.params.clone()))
    }

    pub fn model_path(&self) -> PathBuf {
        self.work_dir.join("model.txt")
    }

    /// Training parameters: defaults, overridden by configured params.
    pub fn train_params(&self, train_path: &Path, valid_path: Option<&Path>) -> BTreeMap<String, String> {
        let mut params: BTreeMap<String, String> = [
            ("objective", "binary"),
            ("num_iterations", "10000"),
            ("early_stopping_round", "100"),
            ("metric_freq", "100"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        params.extend(self.params.clone());

        params.insert("task".into(), "train".into());
        params.insert("header".into(), "true".into());
        params.insert("label_column".into(), "0".into());
        params.insert("data".into(), train_path.to_string_lossy().into_owned());
        match valid_path {
            Some(path) => {
                params.insert("valid_data".into(), path.to_string_lossy().into_owned());
            }
            None => {
                params.remove("early_stopping_round");
            }
        }
        params.insert(
            "output_model".into(),
            self.model_path().to_string_lossy().into_owned(),
        );
        params
    }

    fn run(&self, conf_name: &str, params: &BTreeMap<String, String>) -> anyhow::Result<()> {
        let conf_path = self.work_dir.join(conf_name);
        let conf: String = params
            .iter()
            .map(|(k, v)| format!("{} = {}\n", k, v))
            .collect();
        fs::write(&conf_path, conf)
            .with_context(|| format!("Failed to write {}", conf_path.display()))?;
        debug!("running {} config={}", self.executable.display(), conf_path.display());

        let status = Command::new(&self.executable)
            .arg(format!("config={}", conf_path.to_string_lossy()))
            .status()
            .with_context(|| format!("Failed to spawn {}", self.executable.display()))?;
        if !status.success() {
            return Err(PipelineError::Booster(format!(
                "{} exited with {}",
                conf_name, status
            ))
            .into());
        }
        Ok(())
    }
}

impl Booster for LightGbmCli {
    fn fit(
        &mut self,
        train: &[TrainingRow],
        valid: &[TrainingRow],
        feature_columns: &[String],
    ) -> anyhow::Result<()> {
        fs::create_dir_all(&self.work_dir)
            .with_context(|| format!("Failed to create {}", self.work_dir.display()))?;
        let train_path = self.work_dir.join("train.tsv");
        write_dataset(&train_path, train, feature_columns)?;
        let valid_path = if valid.is_empty() {
            None
        } else {
            let path = self.work_dir.join("valid.tsv");
            write_dataset(&path, valid, feature_columns)?;
            Some(path)
        };

        info!(
            "Launching LightGBM: {} train rows, {} valid rows, {} features",
            train.len(),
            valid.len(),
            feature_columns.len()
        );
        let params = self.train_params(&train_path, valid_path.as_deref());
        self.run("train.conf", &params)?;
        info!("LightGBM training complete, model at {}", self.model_path().display());
        Ok(())
    }

    fn predict(&self, rows: &[TrainingRow], feature_columns: &[String]) -> anyhow::Result<Vec<f64>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let data_path = self.work_dir.join("test.tsv");
        let result_path = self.work_dir.join("predict_result.txt");
        write_dataset(&data_path, rows, feature_columns)?;

        let params: BTreeMap<String, String> = [
            ("task", "predict".to_string()),
            ("header", "true".to_string()),
            ("label_column", "0".to_string()),
            ("data", data_path.to_string_lossy().into_owned()),
            ("input_model", self.model_path().to_string_lossy().into_owned()),
            ("output_result", result_path.to_string_lossy().into_owned()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        self.run("predict.conf", &params)?;

        let raw = fs::read_to_string(&result_path)
            .with_context(|| format!("Failed to read {}", result_path.display()))?;
        parse_scores(&raw)
    }

    fn feature_importance(&self) -> anyhow::Result<Vec<(String, f64)>> {
        let path = self.model_path();
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(parse_feature_importances(&text))
    }
}

/// Write a dataset as TSV: header, label first, `nan` for missing values.
pub fn write_dataset(path: &Path, rows: &[TrainingRow], feature_columns: &[String]) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    let mut header = String::from("target");
    for name in feature_columns {
        header.push('\t');
        header.push_str(name);
    }
    writeln!(writer, "{}", header)?;

    for row in rows {
        let mut line = (row.target() as u8).to_string();
        for value in &row.features {
            line.push('\t');
            match value {
                Some(v) => line.push_str(&v.to_string()),
                None => line.push_str("nan"),
            }
        }
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;
    Ok(())
}

/// One score per line; the first token of each line.
pub fn parse_scores(raw: &str) -> anyhow::Result<Vec<f64>> {
    raw.lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(|token| {
            token.parse::<f64>().map_err(|_| {
                anyhow::Error::from(PipelineError::Booster(format!("bad score {:?}", token)))
            })
        })
        .collect()
}

/// The `feature_importances:` section of a LightGBM text model, sorted
/// descending.
pub fn parse_feature_importances(model_text: &str) -> Vec<(String, f64)> {
    let mut importance: Vec<(String, f64)> = model_text
        .lines()
        .skip_while(|line| line.trim() != "feature_importances:")
        .skip(1)
        .take_while(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let (name, value) = line.split_once('=')?;
            Some((name.trim().to_string(), value.trim().parse().ok()?))
        })
        .collect();
    importance.sort_by(|a, b| b.1.total_cmp(&a.1));
    importance
}

/// Executable from the explicit path, `LIGHTGBM_BIN`, or `PATH`.
pub fn resolve_lightgbm_executable(explicit: Option<&str>) -> Result<PathBuf, PipelineError> {
    if let Some(path) = explicit {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
        return Err(PipelineError::Config(format!(
            "train.lightgbm_path {} does not exist",
            path.display()
        )));
    }
    if let Some(path) = std::env::var_os("LIGHTGBM_BIN").map(PathBuf::from) {
        if path.exists() {
            return Ok(path);
        }
    }
    find_in_path("lightgbm").ok_or_else(|| {
        PipelineError::Config(
            "lightgbm executable not found in PATH; set train.lightgbm_path or LIGHTGBM_BIN".into(),
        )
    })
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let path_value = std::env::var_os("PATH")?;
    for entry in std::env::split_paths(&path_value) {
        let candidate = entry.join(binary);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(horse_id: &str, d: NaiveDate, rank: Option<u32>, feature: Option<f64>) -> TrainingRow {
        TrainingRow {
            race_id: "r1".to_string(),
            horse_id: horse_id.to_string(),
            date: d,
            rank,
            tansho_odds: Some(3.5),
            popularity: Some(2),
            umaban: Some(5),
            features: vec![feature, Some(1.0)],
        }
    }

    /// Scores each row by its first feature.
    struct FirstFeature {
        fitted_on: usize,
    }

    impl Booster for FirstFeature {
        fn fit(&mut self, train: &[TrainingRow], _: &[TrainingRow], _: &[String]) -> anyhow::Result<()> {
            self.fitted_on = train.len();
            Ok(())
        }

        fn predict(&self, rows: &[TrainingRow], _: &[String]) -> anyhow::Result<Vec<f64>> {
            Ok(rows.iter().map(|r| r.features[0].unwrap_or(0.0)).collect())
        }

        fn feature_importance(&self) -> anyhow::Result<Vec<(String, f64)>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_create_dataset_split_boundaries() {
        let rows = vec![
            row("a", date(2023, 6, 30), Some(1), None),
            row("b", date(2023, 7, 1), Some(2), None),
            row("c", date(2023, 9, 30), Some(3), None),
            row("d", date(2023, 10, 1), Some(1), None),
        ];
        let dataset = create_dataset(rows, date(2023, 7, 1), date(2023, 10, 1));
        assert_eq!(dataset.train.len(), 1);
        assert_eq!(dataset.valid.len(), 2);
        assert_eq!(dataset.test.len(), 1);
        assert_eq!(dataset.test[0].horse_id, "d");
    }

    #[test]
    fn test_trainer_scores_test_period() {
        let rows = vec![
            row("a", date(2023, 1, 1), Some(1), Some(0.1)),
            row("b", date(2023, 8, 1), Some(2), Some(0.2)),
            row("c", date(2023, 11, 1), Some(1), Some(0.7)),
            row("d", date(2023, 11, 1), None, None),
        ];
        let dataset = create_dataset(rows, date(2023, 7, 1), date(2023, 10, 1));
        let mut trainer = Trainer::new(FirstFeature { fitted_on: 0 }, vec!["x".into(), "y".into()]);
        let predictions = trainer.run(&dataset).unwrap();

        assert_eq!(trainer.booster().fitted_on, 1);
        assert_eq!(predictions.len(), 2);
        assert!(predictions[0].target);
        assert_eq!(predictions[0].pred, Some(0.7));
        assert!(!predictions[1].target);
        assert_eq!(predictions[1].umaban, Some(5));
    }

    #[test]
    fn test_trainer_requires_training_rows() {
        let dataset = create_dataset(
            vec![row("a", date(2024, 1, 1), Some(1), None)],
            date(2023, 7, 1),
            date(2023, 10, 1),
        );
        let mut trainer = Trainer::new(FirstFeature { fitted_on: 0 }, vec!["x".into()]);
        assert!(trainer.run(&dataset).is_err());
    }

    #[test]
    fn test_load_training_rows() {
        let table = TextTable::from_rows(
            "features",
            &["race_id", "horse_id", "date", "rank", "tansho_odds", "popularity", "umaban", "rank_3races"],
            &[
                vec!["r1", "h1", "2023-01-15", "1", "2.1", "1", "7", "2.5"],
                vec!["r1", "h2", "2023-01-15", "", "", "", "3", ""],
            ],
        )
        .unwrap();
        let columns = vec!["rank_3races".to_string()];
        let rows = load_training_rows(&table, &columns).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].target());
        assert_eq!(rows[0].features, vec![Some(2.5)]);
        assert_eq!(rows[1].features, vec![None]);

        let unknown = vec!["speed_index".to_string()];
        assert!(matches!(
            load_training_rows(&table, &unknown),
            Err(PipelineError::MissingColumn { .. })
        ));
        assert!(matches!(
            load_training_rows(&table, &[]),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_write_dataset_uses_nan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.tsv");
        let rows = vec![row("a", date(2023, 1, 1), Some(1), None)];
        write_dataset(&path, &rows, &["x".to_string(), "y".to_string()]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "target\tx\ty\n1\tnan\t1\n");
    }

    #[test]
    fn test_train_params_override_defaults() {
        let mut params = BTreeMap::new();
        params.insert("learning_rate".to_string(), "0.01".to_string());
        params.insert("num_iterations".to_string(), "500".to_string());
        let booster = LightGbmCli::new(PathBuf::from("lightgbm"), PathBuf::from("out"), params);

        let conf = booster.train_params(Path::new("out/train.tsv"), Some(Path::new("out/valid.tsv")));
        assert_eq!(conf["objective"], "binary");
        assert_eq!(conf["num_iterations"], "500");
        assert_eq!(conf["learning_rate"], "0.01");
        assert_eq!(conf["early_stopping_round"], "100");
        assert_eq!(conf["task"], "train");

        // Early stopping needs a validation set
        let conf = booster.train_params(Path::new("out/train.tsv"), None);
        assert!(!conf.contains_key("early_stopping_round"));
        assert!(!conf.contains_key("valid_data"));
    }

    #[test]
    fn test_parse_feature_importances() {
        let model = "tree\nversion=v4\n\nend of trees\n\nfeature_importances:\nrank_3races=41\nprize_5races=77\numaban=3\n\nparameters:\n[boosting: gbdt]\n";
        let importance = parse_feature_importances(model);
        assert_eq!(
            importance,
            vec![
                ("prize_5races".to_string(), 77.0),
                ("rank_3races".to_string(), 41.0),
                ("umaban".to_string(), 3.0),
            ]
        );
        assert!(parse_feature_importances("tree\n").is_empty());
    }

    #[test]
    fn test_parse_scores() {
        assert_eq!(parse_scores("0.12\n0.5\n\n").unwrap(), vec![0.12, 0.5]);
        assert!(parse_scores("0.1\nabc\n").is_err());
    }

    #[test]
    fn test_explicit_executable_must_exist() {
        let err = resolve_lightgbm_executable(Some("/nonexistent/lightgbm")).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
