//! Final feature table assembly.

use std::collections::HashMap;

use chrono::NaiveDate;
use polars::prelude::*;
use tracing::{info, warn};

use super::history::{aggregate, HorseHistoryIndex, WindowSizes, WindowStats};
use crate::preprocess::{EntryRecord, HorseRaceRecord, RaceRecord};
use crate::table::{FrameBuilder, TsvRecord};
use crate::types::{PopulationRow, DATE_FORMAT};

/// Entry attributes carried into the feature table.
const ENTRY_COLUMNS: [&str; 13] = [
    "jockey_id",
    "trainer_id",
    "owner_id",
    "rank",
    "umaban",
    "wakuban",
    "tansho_odds",
    "popularity",
    "impost",
    "sex",
    "age",
    "weight",
    "weight_diff",
];

/// Race attributes carried into the feature table.
const RACE_COLUMNS: [&str; 10] = [
    "race_type",
    "around",
    "course_len",
    "weather",
    "ground_state",
    "race_class",
    "place",
    "month",
    "sin_date",
    "cos_date",
];

/// Columns a model may be trained on: every entry and race attribute except
/// the finishing rank, plus the window aggregates.
pub fn model_input_columns(windows: &WindowSizes) -> Vec<String> {
    ENTRY_COLUMNS
        .iter()
        .chain(RACE_COLUMNS.iter())
        .filter(|&&c| c != "rank")
        .map(|s| s.to_string())
        .chain(windows.column_names())
        .collect()
}

/// One model input row.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub population: PopulationRow,
    pub entry: EntryRecord,
    pub race: RaceRecord,
    pub history: Vec<WindowStats>,
}

/// Feature rows plus the window layout they were built with.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub windows: WindowSizes,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All column names in output order.
    pub fn column_names(&self) -> Vec<String> {
        ["race_id", "horse_id", "date"]
            .iter()
            .chain(ENTRY_COLUMNS.iter())
            .chain(RACE_COLUMNS.iter())
            .map(|s| s.to_string())
            .chain(self.windows.column_names())
            .collect()
    }

    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        let rows = &self.rows;
        let mut df = FrameBuilder::new()
            .text(
                "race_id",
                rows.iter().map(|r| r.population.race_id.clone()).collect(),
            )
            .text(
                "horse_id",
                rows.iter().map(|r| r.population.horse_id.clone()).collect(),
            )
            .text(
                "date",
                rows.iter()
                    .map(|r| r.population.date.format(DATE_FORMAT).to_string())
                    .collect(),
            )
            .finish()?;

        let entries: Vec<EntryRecord> = rows.iter().map(|r| r.entry.clone()).collect();
        let entry_df = EntryRecord::to_frame(&entries)?.select(ENTRY_COLUMNS)?;
        df.hstack_mut(entry_df.get_columns())?;

        let races: Vec<RaceRecord> = rows.iter().map(|r| r.race.clone()).collect();
        let race_df = RaceRecord::to_frame(&races)?.select(RACE_COLUMNS)?;
        df.hstack_mut(race_df.get_columns())?;

        let mut history = FrameBuilder::new();
        for (j, &n) in self.windows.as_slice().iter().enumerate() {
            history = history
                .float(
                    &WindowSizes::rank_column(n),
                    rows.iter().map(|r| r.history[j].mean_rank).collect(),
                )
                .float(
                    &WindowSizes::prize_column(n),
                    rows.iter().map(|r| r.history[j].mean_prize).collect(),
                );
        }
        let history_df = history.finish()?;
        df.hstack_mut(history_df.get_columns())?;

        Ok(df)
    }
}

/// Join population, entries, race info and history aggregates.
///
/// Entries join on (race_id, horse_id) and races on (race_id, date), both
/// inner; history joins left. Output follows population order and never
/// holds more than one row per population row.
pub fn create_features(
    population: &[PopulationRow],
    entries: &[EntryRecord],
    races: &[RaceRecord],
    history: &[HorseRaceRecord],
    windows: &WindowSizes,
) -> FeatureTable {
    let entry_index: HashMap<(&str, &str), &EntryRecord> = entries
        .iter()
        .rev()
        .map(|e| ((e.race_id.as_str(), e.horse_id.as_str()), e))
        .collect();
    let race_index: HashMap<(&str, NaiveDate), &RaceRecord> = races
        .iter()
        .rev()
        .map(|r| ((r.race_id.as_str(), r.date), r))
        .collect();

    let index = HorseHistoryIndex::new(history);
    let aggregates = aggregate(population, &index, windows);

    let mut rows = Vec::with_capacity(population.len());
    let mut unmatched = 0usize;
    for (row, stats) in population.iter().zip(aggregates) {
        let entry = entry_index.get(&(row.race_id.as_str(), row.horse_id.as_str()));
        let race = race_index.get(&(row.race_id.as_str(), row.date));
        let (Some(entry), Some(race)) = (entry, race) else {
            unmatched += 1;
            continue;
        };
        rows.push(FeatureRow {
            population: row.clone(),
            entry: (*entry).clone(),
            race: (*race).clone(),
            history: stats.windows,
        });
    }

    if unmatched > 0 {
        warn!("{} population rows without entry or race info", unmatched);
    }
    info!(
        "features: {} rows, {} horses with history",
        rows.len(),
        index.horses()
    );

    FeatureTable {
        windows: windows.clone(),
        rows,
    }
}
