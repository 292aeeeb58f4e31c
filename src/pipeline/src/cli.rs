//! CLI commands for keiba-pipeline.
//!
//! Each command runs one pipeline stage; every path defaults from
//! `AppConfig.paths`.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::evaluation::{print_summary_table, Evaluator, PayoutTable, SortColumn, Strategy};
use crate::features::{create_features, WindowSizes};
use crate::mapping::Mappings;
use crate::population;
use crate::preprocess::{
    normalize_horse_results, normalize_payouts, normalize_race_info, normalize_results,
    read_payouts_json, write_payouts_json, EntryRecord, HorseRaceRecord, RaceRecord, RankPolicy,
};
use crate::rawdf::{create_horse_results, create_race_tables, write_raw_table};
use crate::table::{read_records, write_records, write_tsv, TextTable};
use crate::train::{create_dataset, importance_frame, load_training_rows, Booster, LightGbmCli, Trainer};
use crate::types::PredictionRow;

#[derive(Parser)]
#[command(name = "keiba-pipeline")]
#[command(version, about = "Keiba pipeline: features, training and box-bet evaluation", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract raw tables from saved race and horse pages
    Rawdf,

    /// Normalize raw tables into typed tables
    Preprocess,

    /// Build the training feature table
    Features,

    /// Build features for races that have not been run yet
    PredictFeatures {
        /// Raw entry list (results table layout, without 着順)
        #[arg(long)]
        entries: PathBuf,

        /// Raw race info table for the same races
        #[arg(long)]
        race_info: PathBuf,
    },

    /// Train the booster and score the test period
    Train,

    /// Evaluate box bets on the test-period predictions
    Evaluate {
        /// Box size
        #[arg(short, long)]
        n: Option<usize>,

        /// Prediction column to rank by (pred, popularity, tansho_odds, umaban)
        #[arg(short, long)]
        sort_column: Option<String>,

        /// Rank in ascending order
        #[arg(long)]
        ascending: bool,
    },

    /// Run preprocess, features, train and evaluate in order
    All,
}

/// Dispatch a parsed command.
pub fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    match cli.command {
        Commands::Rawdf => run_rawdf(&config),
        Commands::Preprocess => run_preprocess(&config),
        Commands::Features => run_features(&config),
        Commands::PredictFeatures { entries, race_info } => {
            run_predict_features(&config, &entries, &race_info)
        }
        Commands::Train => {
            config.validate_for_training()?;
            run_train(&config)
        }
        Commands::Evaluate {
            n,
            sort_column,
            ascending,
        } => {
            let mut config = config;
            if let Some(n) = n {
                config.evaluation.box_size = n;
            }
            if let Some(column) = sort_column {
                config.evaluation.sort_column = column;
            }
            if ascending {
                config.evaluation.ascending = true;
            }
            config.validate()?;
            run_evaluate(&config)
        }
        Commands::All => {
            config.validate_for_training()?;
            run_preprocess(&config)?;
            run_features(&config)?;
            run_train(&config)?;
            run_evaluate(&config)
        }
    }
}

/// Saved pages -> raw TSV tables.
pub fn run_rawdf(config: &AppConfig) -> anyhow::Result<()> {
    let out = Path::new(&config.paths.rawdf_dir);

    let races = create_race_tables(Path::new(&config.paths.html_race_dir))?;
    write_raw_table(&out.join("results.tsv"), &races.results)?;
    write_raw_table(&out.join("race_info.tsv"), &races.race_info)?;
    write_raw_table(&out.join("return_tables.tsv"), &races.return_tables)?;

    let horses = create_horse_results(Path::new(&config.paths.html_horse_dir))?;
    write_raw_table(&out.join("horse_results.tsv"), &horses)?;

    info!("Raw tables written to {}", out.display());
    Ok(())
}

/// Raw tables -> typed tables.
pub fn run_preprocess(config: &AppConfig) -> anyhow::Result<()> {
    let raw = Path::new(&config.paths.rawdf_dir);
    let out = Path::new(&config.paths.preprocessed_dir);
    let mappings = Mappings::load_dir(&config.paths.mapping_dir)?;

    let table = TextTable::read("results", raw.join("results.tsv"))?;
    let (entries, report) = normalize_results(&table, &mappings, RankPolicy::Required)?;
    info!("{}", report);
    write_records(out.join("results.tsv"), &entries)?;

    let table = TextTable::read("race_info", raw.join("race_info.tsv"))?;
    let (races, report) = normalize_race_info(&table, &mappings)?;
    info!("{}", report);
    write_records(out.join("race_info.tsv"), &races)?;

    let table = TextTable::read("horse_results", raw.join("horse_results.tsv"))?;
    let (history, report) = normalize_horse_results(&table, &mappings)?;
    info!("{}", report);
    write_records(out.join("horse_results.tsv"), &history)?;

    let table = TextTable::read("return_tables", raw.join("return_tables.tsv"))?;
    let (payouts, report) = normalize_payouts(&table)?;
    info!("{}", report);
    write_payouts_json(out.join("return_tables.json"), &payouts)?;

    Ok(())
}

/// Typed tables -> population and feature table.
pub fn run_features(config: &AppConfig) -> anyhow::Result<()> {
    let pre = Path::new(&config.paths.preprocessed_dir);
    let out = Path::new(&config.paths.feature_dir);
    let windows = WindowSizes::new(&config.features.window_sizes)?;

    let entries: Vec<EntryRecord> = read_records(pre.join("results.tsv"))?;
    let races: Vec<RaceRecord> = read_records(pre.join("race_info.tsv"))?;
    let history: Vec<HorseRaceRecord> = read_records(pre.join("horse_results.tsv"))?;

    let population = population::build(&entries, &races);
    write_records(out.join("population.tsv"), &population)?;

    let features = create_features(&population, &entries, &races, &history, &windows);
    let mut df = features.to_frame()?;
    write_tsv(out.join("features.tsv"), &mut df)?;
    info!("Feature table written to {}", out.display());
    Ok(())
}

/// Entry list of unrun races -> feature table, using the stored history.
pub fn run_predict_features(
    config: &AppConfig,
    entries_path: &Path,
    race_info_path: &Path,
) -> anyhow::Result<()> {
    let pre = Path::new(&config.paths.preprocessed_dir);
    let out = Path::new(&config.paths.feature_dir);
    let windows = WindowSizes::new(&config.features.window_sizes)?;
    let mappings = Mappings::load_dir(&config.paths.mapping_dir)?;

    let table = TextTable::read("entries", entries_path)?;
    let (entries, report) = normalize_results(&table, &mappings, RankPolicy::Optional)?;
    info!("{}", report);

    let table = TextTable::read("race_info", race_info_path)?;
    let (races, report) = normalize_race_info(&table, &mappings)?;
    info!("{}", report);

    let history: Vec<HorseRaceRecord> = read_records(pre.join("horse_results.tsv"))?;

    let population = population::build(&entries, &races);
    let features = create_features(&population, &entries, &races, &history, &windows);
    let mut df = features.to_frame()?;
    write_tsv(out.join("features_prediction.tsv"), &mut df)?;
    info!("Prediction features written to {}", out.display());
    Ok(())
}

/// Feature table -> test-period predictions and feature importance.
pub fn run_train(config: &AppConfig) -> anyhow::Result<()> {
    let features_path = Path::new(&config.paths.feature_dir).join("features.tsv");
    let out = Path::new(&config.paths.train_dir);
    let (valid_start, test_start) = config.train.split_dates()?;

    let table = TextTable::read("features", &features_path)?;
    let rows = load_training_rows(&table, &config.train.feature_columns)?;
    let dataset = create_dataset(rows, valid_start, test_start);

    let booster = LightGbmCli::from_config(&config.train, out)?;
    let mut trainer = Trainer::new(booster, config.train.feature_columns.clone());
    let predictions = trainer.run(&dataset)?;
    write_records(out.join("evaluation.tsv"), &predictions)?;

    let importance = trainer.booster().feature_importance()?;
    let mut df = importance_frame(&importance)?;
    write_tsv(out.join("importance.tsv"), &mut df)?;

    info!(
        "Scored {} test rows; model at {}",
        predictions.len(),
        trainer.booster().model_path().display()
    );
    Ok(())
}

/// Predictions + payouts -> box-bet summary against the baseline.
pub fn run_evaluate(config: &AppConfig) -> anyhow::Result<()> {
    let eval = &config.evaluation;
    let predictions: Vec<PredictionRow> =
        read_records(Path::new(&config.paths.train_dir).join("evaluation.tsv"))?;
    let payouts =
        read_payouts_json(Path::new(&config.paths.preprocessed_dir).join("return_tables.json"))?;

    let strategy = Strategy::new(
        &eval.experiment_name,
        parse_sort_column(&eval.sort_column)?,
        eval.ascending,
    );
    let baseline_column = parse_sort_column(&eval.baseline_column)?;
    let baseline = Strategy::new(
        &eval.baseline_name,
        baseline_column,
        baseline_column != SortColumn::Pred,
    );

    let evaluator = Evaluator::new(predictions, PayoutTable::new(payouts));
    let summary = evaluator.summarize_box_top_n(&strategy, &baseline, eval.box_size);

    let out = Path::new(&config.paths.evaluation_dir).join("box_summary.tsv");
    let mut df = summary.to_frame()?;
    write_tsv(&out, &mut df)?;
    info!("Box summary written to {}", out.display());

    print_summary_table(&summary, eval.box_size);
    Ok(())
}

fn parse_sort_column(name: &str) -> Result<SortColumn, PipelineError> {
    name.parse()
}
