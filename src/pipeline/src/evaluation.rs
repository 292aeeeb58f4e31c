//! Box-bet simulation against historical payout tables.
//!
//! A strategy ranks the entries of each race by one prediction column and
//! boxes the top `n` horses: every combination inside the selection is bought
//! for every bet type. A box hits exactly when a winning combination, taken
//! as a set, is contained in the selection.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

use polars::prelude::*;
use tracing::info;

use crate::error::PipelineError;
use crate::preprocess::PayoutRecord;
use crate::table::FrameBuilder;
use crate::types::{BetType, PredictionRow};

/// Stake unit payouts are quoted against.
pub const STAKE_UNIT: f64 = 100.0;

/// Prediction column a strategy ranks by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Pred,
    Popularity,
    TanshoOdds,
    Umaban,
}

impl FromStr for SortColumn {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pred" => Ok(SortColumn::Pred),
            "popularity" => Ok(SortColumn::Popularity),
            "tansho_odds" | "odds" => Ok(SortColumn::TanshoOdds),
            "umaban" => Ok(SortColumn::Umaban),
            _ => Err(PipelineError::Config(format!("unknown sort column {:?}", s))),
        }
    }
}

impl SortColumn {
    pub fn name(&self) -> &'static str {
        match self {
            SortColumn::Pred => "pred",
            SortColumn::Popularity => "popularity",
            SortColumn::TanshoOdds => "tansho_odds",
            SortColumn::Umaban => "umaban",
        }
    }

    fn value(&self, row: &PredictionRow) -> Option<f64> {
        match self {
            SortColumn::Pred => row.pred,
            SortColumn::Popularity => row.popularity.map(f64::from),
            SortColumn::TanshoOdds => row.tansho_odds,
            SortColumn::Umaban => row.umaban.map(f64::from),
        }
    }
}

/// A named ranking rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub name: String,
    pub sort_column: SortColumn,
    pub ascending: bool,
}

impl Strategy {
    pub fn new(name: &str, sort_column: SortColumn, ascending: bool) -> Self {
        Self {
            name: name.to_string(),
            sort_column,
            ascending,
        }
    }

    /// Most popular first.
    pub fn popularity(name: &str) -> Self {
        Self::new(name, SortColumn::Popularity, true)
    }
}

/// Payout records grouped by race.
#[derive(Debug, Clone, Default)]
pub struct PayoutTable {
    by_race: HashMap<String, Vec<PayoutRecord>>,
}

impl PayoutTable {
    pub fn new(records: Vec<PayoutRecord>) -> Self {
        let mut by_race: HashMap<String, Vec<PayoutRecord>> = HashMap::new();
        for record in records {
            by_race.entry(record.race_id.clone()).or_default().push(record);
        }
        Self { by_race }
    }

    pub fn get(&self, race_id: &str) -> &[PayoutRecord] {
        self.by_race.get(race_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Top `n` horse numbers per race under `sort_column`.
///
/// Missing sort values rank last in either direction; ties keep input
/// order. Entries without a horse number cannot be bet and are skipped.
pub fn select_top_n(
    predictions: &[PredictionRow],
    sort_column: SortColumn,
    ascending: bool,
    n: usize,
) -> BTreeMap<String, Vec<String>> {
    let mut by_race: BTreeMap<&str, Vec<&PredictionRow>> = BTreeMap::new();
    for row in predictions {
        by_race.entry(row.race_id.as_str()).or_default().push(row);
    }

    by_race
        .into_iter()
        .map(|(race_id, mut rows)| {
            rows.sort_by(|a, b| {
                match (sort_column.value(a), sort_column.value(b)) {
                    (Some(x), Some(y)) => {
                        let ord = x.total_cmp(&y);
                        if ascending {
                            ord
                        } else {
                            ord.reverse()
                        }
                    }
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                }
            });
            let selected = rows
                .iter()
                .filter_map(|r| r.umaban)
                .take(n)
                .map(|u| u.to_string())
                .collect();
            (race_id.to_string(), selected)
        })
        .collect()
}

/// Outcome of one box on one bet type in one race.
#[derive(Debug, Clone, PartialEq)]
pub struct BetSimulationResult {
    pub race_id: String,
    pub bet_type: BetType,
    pub hit: bool,
    /// Sum of payouts of every winning combination inside the box.
    pub hit_return: u64,
    /// Tickets bought.
    pub n_bets: u64,
}

impl BetSimulationResult {
    /// Return per unit staked.
    pub fn return_per_unit(&self) -> f64 {
        if self.n_bets == 0 {
            0.0
        } else {
            self.hit_return as f64 / self.n_bets as f64 / STAKE_UNIT
        }
    }
}

/// Simulate one race's box against its payout rows.
///
/// Bet types without a payout row for the race are not simulated.
pub fn simulate_race(
    race_id: &str,
    selected: &[String],
    payouts: &[PayoutRecord],
    n: usize,
) -> Vec<BetSimulationResult> {
    let selection: HashSet<&str> = selected.iter().map(String::as_str).collect();
    let mut by_type: BTreeMap<BetType, BetSimulationResult> = BTreeMap::new();

    for payout in payouts {
        let result = by_type
            .entry(payout.bet_type)
            .or_insert_with(|| BetSimulationResult {
                race_id: race_id.to_string(),
                bet_type: payout.bet_type,
                hit: false,
                hit_return: 0,
                n_bets: payout.bet_type.tickets(n),
            });
        let hit = payout
            .win_umaban
            .iter()
            .all(|u| selection.contains(u.trim()));
        if hit {
            result.hit = true;
            result.hit_return += payout.payout;
        }
    }

    by_type.into_values().collect()
}

/// Hit and return rates of one bet type across races.
#[derive(Debug, Clone, PartialEq)]
pub struct BetTypeSummary {
    pub bet_type: BetType,
    pub races: usize,
    pub hits: usize,
    pub total_return: u64,
    pub total_bets: u64,
}

impl BetTypeSummary {
    pub fn new(bet_type: BetType) -> Self {
        Self {
            bet_type,
            races: 0,
            hits: 0,
            total_return: 0,
            total_bets: 0,
        }
    }

    pub fn hit_rate(&self) -> f64 {
        if self.races > 0 {
            self.hits as f64 / self.races as f64
        } else {
            0.0
        }
    }

    pub fn return_rate(&self) -> f64 {
        if self.total_bets > 0 {
            self.total_return as f64 / self.total_bets as f64 / STAKE_UNIT
        } else {
            0.0
        }
    }
}

/// Result of one strategy.
#[derive(Debug, Clone)]
pub struct BoxReport {
    pub strategy: Strategy,
    pub n: usize,
    pub results: Vec<BetSimulationResult>,
    /// Per bet type, in bet type order. Bet types with no tickets at this
    /// `n` are absent.
    pub summary: Vec<BetTypeSummary>,
}

impl BoxReport {
    pub fn get(&self, bet_type: BetType) -> Option<&BetTypeSummary> {
        self.summary.iter().find(|s| s.bet_type == bet_type)
    }
}

fn summarize(results: &[BetSimulationResult]) -> Vec<BetTypeSummary> {
    let mut by_type: BTreeMap<BetType, BetTypeSummary> = BTreeMap::new();
    for result in results {
        if result.n_bets == 0 {
            continue;
        }
        let summary = by_type
            .entry(result.bet_type)
            .or_insert_with(|| BetTypeSummary::new(result.bet_type));
        summary.races += 1;
        summary.hits += result.hit as usize;
        summary.total_return += result.hit_return;
        summary.total_bets += result.n_bets;
    }
    by_type.into_values().collect()
}

/// Strategy evaluation over a fixed prediction and payout snapshot.
pub struct Evaluator {
    predictions: Vec<PredictionRow>,
    payouts: PayoutTable,
}

impl Evaluator {
    pub fn new(predictions: Vec<PredictionRow>, payouts: PayoutTable) -> Self {
        Self {
            predictions,
            payouts,
        }
    }

    /// Box the top `n` of each race under `strategy`.
    ///
    /// Only races present in both predictions and payouts are evaluated.
    pub fn box_top_n(&self, strategy: &Strategy, n: usize) -> BoxReport {
        let selections =
            select_top_n(&self.predictions, strategy.sort_column, strategy.ascending, n);

        let mut results = Vec::new();
        let mut races = 0usize;
        for (race_id, selected) in &selections {
            let payouts = self.payouts.get(race_id);
            if payouts.is_empty() {
                continue;
            }
            races += 1;
            results.extend(simulate_race(race_id, selected, payouts, n));
        }
        info!(
            "{}: boxed top {} by {} over {} races",
            strategy.name,
            n,
            strategy.sort_column.name(),
            races
        );

        let summary = summarize(&results);
        BoxReport {
            strategy: strategy.clone(),
            n,
            results,
            summary,
        }
    }

    /// Evaluate `strategy` and `baseline` side by side.
    pub fn summarize_box_top_n(
        &self,
        strategy: &Strategy,
        baseline: &Strategy,
        n: usize,
    ) -> BoxSummary {
        BoxSummary::from_reports(&[self.box_top_n(strategy, n), self.box_top_n(baseline, n)])
    }
}

/// Hit and return rates of several strategies, outer-joined on bet type.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxSummary {
    /// `hitrate_<name>` and `returnrate_<name>`, in lexical order.
    pub columns: Vec<String>,
    pub rows: BTreeMap<BetType, HashMap<String, f64>>,
}

impl BoxSummary {
    pub fn from_reports(reports: &[BoxReport]) -> Self {
        let mut columns = Vec::new();
        let mut rows: BTreeMap<BetType, HashMap<String, f64>> = BTreeMap::new();
        for report in reports {
            let hit_column = format!("hitrate_{}", report.strategy.name);
            let return_column = format!("returnrate_{}", report.strategy.name);
            for summary in &report.summary {
                let row = rows.entry(summary.bet_type).or_default();
                row.insert(hit_column.clone(), summary.hit_rate());
                row.insert(return_column.clone(), summary.return_rate());
            }
            columns.push(hit_column);
            columns.push(return_column);
        }
        columns.sort();
        columns.dedup();
        Self { columns, rows }
    }

    pub fn get(&self, bet_type: BetType, column: &str) -> Option<f64> {
        self.rows.get(&bet_type).and_then(|row| row.get(column)).copied()
    }

    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        let mut builder = FrameBuilder::new().text(
            "bet_type",
            self.rows.keys().map(|b| b.name().to_string()).collect(),
        );
        for column in &self.columns {
            builder = builder.float(
                column,
                self.rows.values().map(|row| row.get(column).copied()).collect(),
            );
        }
        builder.finish()
    }
}

/// Print a summary in table format.
pub fn print_summary_table(summary: &BoxSummary, n: usize) {
    println!("=== Box Top-{} Summary ===", n);
    println!();
    print!("  {:10}", "Bet Type");
    for column in &summary.columns {
        print!(" {:>18}", column);
    }
    println!();
    println!("  {}", "-".repeat(10 + 19 * summary.columns.len()));
    for (bet_type, row) in &summary.rows {
        print!("  {:10}", bet_type.name());
        for column in &summary.columns {
            match row.get(column) {
                Some(value) => print!(" {:>17.1}%", value * 100.0),
                None => print!(" {:>18}", "-"),
            }
        }
        println!();
    }
}
