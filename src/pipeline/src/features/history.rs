//! Leak-free rolling statistics over a horse's past races.
//!
//! History is grouped by horse once and sorted most recent first; each
//! population row then binary-searches its cutoff so only races strictly
//! before the race date are ever visible.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::error::PipelineError;
use crate::preprocess::HorseRaceRecord;
use crate::types::PopulationRow;

/// Trailing window sizes, validated and de-duplicated in configured order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSizes(Vec<usize>);

impl WindowSizes {
    pub fn new(sizes: &[usize]) -> Result<Self, PipelineError> {
        if sizes.is_empty() {
            return Err(PipelineError::Config("no window sizes".into()));
        }
        let mut windows = Vec::with_capacity(sizes.len());
        for &n in sizes {
            if n == 0 {
                return Err(PipelineError::Config("window size 0".into()));
            }
            if !windows.contains(&n) {
                windows.push(n);
            }
        }
        Ok(Self(windows))
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn max(&self) -> usize {
        self.0.iter().copied().max().unwrap_or(0)
    }

    pub fn rank_column(n: usize) -> String {
        format!("rank_{}races", n)
    }

    pub fn prize_column(n: usize) -> String {
        format!("prize_{}races", n)
    }

    /// Output columns, rank then prize per window.
    pub fn column_names(&self) -> Vec<String> {
        self.0
            .iter()
            .flat_map(|&n| [Self::rank_column(n), Self::prize_column(n)])
            .collect()
    }
}

impl Default for WindowSizes {
    fn default() -> Self {
        Self(vec![3, 5, 10, 1000])
    }
}

/// Past races grouped by horse, most recent first.
pub struct HorseHistoryIndex<'a> {
    history: HashMap<&'a str, Vec<&'a HorseRaceRecord>>,
}

impl<'a> HorseHistoryIndex<'a> {
    pub fn new(records: &'a [HorseRaceRecord]) -> Self {
        let mut history: HashMap<&str, Vec<&HorseRaceRecord>> = HashMap::new();
        for record in records {
            history.entry(record.horse_id.as_str()).or_default().push(record);
        }
        // Stable: same-day records keep file order
        for races in history.values_mut() {
            races.sort_by(|a, b| b.date.cmp(&a.date));
        }
        Self { history }
    }

    pub fn horses(&self) -> usize {
        self.history.len()
    }

    /// Races of `horse_id` dated strictly before `before`, most recent first.
    pub fn prior_races(&self, horse_id: &str, before: NaiveDate) -> &[&'a HorseRaceRecord] {
        match self.history.get(horse_id) {
            Some(races) => {
                let cutoff = races.partition_point(|r| r.date >= before);
                &races[cutoff..]
            }
            None => &[],
        }
    }
}

/// Means over one trailing window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowStats {
    pub window: usize,
    /// Races actually averaged: `min(window, available)`.
    pub races: usize,
    pub mean_rank: Option<f64>,
    pub mean_prize: Option<f64>,
}

/// Rolling statistics of one population row.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryFeatures {
    pub race_id: String,
    pub horse_id: String,
    pub date: NaiveDate,
    pub windows: Vec<WindowStats>,
}

#[cfg(test)]
impl HistoryFeatures {
    fn window(&self, n: usize) -> Option<&WindowStats> {
        self.windows.iter().find(|w| w.window == n)
    }
}

/// Window means over records ordered most recent first.
pub fn window_stats(prior: &[&HorseRaceRecord], windows: &WindowSizes) -> Vec<WindowStats> {
    let depth = prior.len().min(windows.max());
    // prefix[k] = (sum of rank, sum of prize) over the k most recent races
    let mut prefix = Vec::with_capacity(depth + 1);
    prefix.push((0.0f64, 0.0f64));
    for record in &prior[..depth] {
        let (rank, prize) = prefix[prefix.len() - 1];
        prefix.push((rank + record.rank as f64, prize + record.prize));
    }

    windows
        .as_slice()
        .iter()
        .map(|&n| {
            let k = n.min(depth);
            let (mean_rank, mean_prize) = if k == 0 {
                (None, None)
            } else {
                let (rank, prize) = prefix[k];
                (Some(rank / k as f64), Some(prize / k as f64))
            };
            WindowStats {
                window: n,
                races: k,
                mean_rank,
                mean_prize,
            }
        })
        .collect()
}

/// Rolling rank/prize means for every population row, in population order.
///
/// Exactly one output per input row; a horse without prior races gets
/// missing means rather than being dropped.
pub fn aggregate(
    population: &[PopulationRow],
    index: &HorseHistoryIndex<'_>,
    windows: &WindowSizes,
) -> Vec<HistoryFeatures> {
    population
        .iter()
        .map(|row| HistoryFeatures {
            race_id: row.race_id.clone(),
            horse_id: row.horse_id.clone(),
            date: row.date,
            windows: window_stats(index.prior_races(&row.horse_id, row.date), windows),
        })
        .collect()
}
