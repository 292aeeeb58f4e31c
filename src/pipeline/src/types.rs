//! Shared record types passed between pipeline stages.

use std::fmt;

use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::table::{int_of, FrameBuilder, TextTable, TsvRecord};

/// Date format of every normalized table.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

/// Bet type of a payout table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetType {
    Win,      // 単勝 - 1st
    Place,    // 複勝 - any of top 3 (top 2 in small fields)
    Quinella, // 馬連 - 1st and 2nd any order
    Wide,     // ワイド - 2 horses in top 3
    Exacta,   // 馬単 - 1st and 2nd in order
    Trio,     // 三連複 - 1st, 2nd, 3rd any order
    Trifecta, // 三連単 - 1st, 2nd, 3rd in order
}

impl BetType {
    pub const ALL: [BetType; 7] = [
        BetType::Win,
        BetType::Place,
        BetType::Quinella,
        BetType::Wide,
        BetType::Exacta,
        BetType::Trio,
        BetType::Trifecta,
    ];

    /// Bet type of a payout table label. Bracket quinella (枠連) has no variant.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        BetType::ALL.into_iter().find(|b| b.label() == label)
    }

    pub fn name(&self) -> &'static str {
        match self {
            BetType::Win => "win",
            BetType::Place => "place",
            BetType::Quinella => "quinella",
            BetType::Wide => "wide",
            BetType::Exacta => "exacta",
            BetType::Trio => "trio",
            BetType::Trifecta => "trifecta",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BetType::Win => "単勝",
            BetType::Place => "複勝",
            BetType::Quinella => "馬連",
            BetType::Wide => "ワイド",
            BetType::Exacta => "馬単",
            BetType::Trio => "三連複",
            BetType::Trifecta => "三連単",
        }
    }

    /// Number of horses in one winning combination.
    pub fn combination_size(&self) -> usize {
        match self {
            BetType::Win | BetType::Place => 1,
            BetType::Quinella | BetType::Wide | BetType::Exacta => 2,
            BetType::Trio | BetType::Trifecta => 3,
        }
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self, BetType::Exacta | BetType::Trifecta)
    }

    /// Distinct tickets in a box over `n` horses, saturating at `u64::MAX`.
    pub fn tickets(&self, n: usize) -> u64 {
        let n = n as u64;
        let k = self.combination_size() as u64;
        let count = if self.is_ordered() {
            permutations(n, k)
        } else {
            choose(n, k)
        };
        count.unwrap_or(u64::MAX)
    }
}

impl fmt::Display for BetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn permutations(n: u64, k: u64) -> Option<u64> {
    if k > n {
        return Some(0);
    }
    (n - k + 1..=n).try_fold(1u64, |acc, x| acc.checked_mul(x))
}

fn choose(n: u64, k: u64) -> Option<u64> {
    if k > n {
        return Some(0);
    }
    // acc * (n - i) is always divisible by i + 1
    (0..k).try_fold(1u64, |acc, i| Some(acc.checked_mul(n - i)? / (i + 1)))
}

/// The unit of feature computation: one horse in one race, dated by the race.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PopulationRow {
    pub race_id: String,
    pub horse_id: String,
    pub date: NaiveDate,
}

impl TsvRecord for PopulationRow {
    const TABLE: &'static str = "population";

    fn to_frame(rows: &[Self]) -> PolarsResult<DataFrame> {
        FrameBuilder::new()
            .text("race_id", rows.iter().map(|r| r.race_id.clone()).collect())
            .text("horse_id", rows.iter().map(|r| r.horse_id.clone()).collect())
            .text(
                "date",
                rows.iter().map(|r| r.date.format(DATE_FORMAT).to_string()).collect(),
            )
            .finish()
    }

    fn from_table(table: &TextTable) -> Result<Vec<Self>, PipelineError> {
        let race_ids = table.column("race_id")?;
        let horse_ids = table.column("horse_id")?;
        let dates = table.column("date")?;
        Ok((0..table.height())
            .filter_map(|i| {
                Some(PopulationRow {
                    race_id: race_ids.get(i)?.to_string(),
                    horse_id: horse_ids.get(i)?.to_string(),
                    date: parse_date(dates.get(i)?)?,
                })
            })
            .collect())
    }
}

/// One scored entry, as produced by the trainer and consumed by the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRow {
    pub race_id: String,
    pub horse_id: String,
    pub target: bool,
    pub rank: Option<u32>,
    pub tansho_odds: Option<f64>,
    pub popularity: Option<u32>,
    pub umaban: Option<u32>,
    pub pred: Option<f64>,
}

impl TsvRecord for PredictionRow {
    const TABLE: &'static str = "evaluation";

    fn to_frame(rows: &[Self]) -> PolarsResult<DataFrame> {
        FrameBuilder::new()
            .text("race_id", rows.iter().map(|r| r.race_id.clone()).collect())
            .text("horse_id", rows.iter().map(|r| r.horse_id.clone()).collect())
            .int("target", rows.iter().map(|r| Some(r.target as i64)).collect())
            .int("rank", rows.iter().map(|r| int_of(r.rank)).collect())
            .float("tansho_odds", rows.iter().map(|r| r.tansho_odds).collect())
            .int("popularity", rows.iter().map(|r| int_of(r.popularity)).collect())
            .int("umaban", rows.iter().map(|r| int_of(r.umaban)).collect())
            .float("pred", rows.iter().map(|r| r.pred).collect())
            .finish()
    }

    fn from_table(table: &TextTable) -> Result<Vec<Self>, PipelineError> {
        let race_ids = table.column("race_id")?;
        let horse_ids = table.column("horse_id")?;
        let targets = table.column("target")?;
        let ranks = table.column("rank")?;
        let odds = table.column("tansho_odds")?;
        let popularity = table.column("popularity")?;
        let umaban = table.column("umaban")?;
        let pred = table.column("pred")?;
        Ok((0..table.height())
            .filter_map(|i| {
                Some(PredictionRow {
                    race_id: race_ids.get(i)?.to_string(),
                    horse_id: horse_ids.get(i)?.to_string(),
                    target: targets.parse::<u8>(i) == Some(1),
                    rank: ranks.parse(i),
                    tansho_odds: odds.parse(i),
                    popularity: popularity.parse(i),
                    umaban: umaban.parse(i),
                    pred: pred.parse(i),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bet_type_parsing() {
        assert_eq!(BetType::from_label(" 三連単"), Some(BetType::Trifecta));
        assert_eq!(BetType::from_label("枠連"), None);
        for bet_type in BetType::ALL {
            assert_eq!(BetType::from_label(bet_type.label()), Some(bet_type));
        }
    }

    #[test]
    fn test_tickets() {
        let counts: Vec<u64> = BetType::ALL.iter().map(|b| b.tickets(3)).collect();
        // win, place, quinella, wide, exacta, trio, trifecta
        assert_eq!(counts, vec![3, 3, 3, 3, 6, 1, 6]);

        assert_eq!(BetType::Trifecta.tickets(5), 60);
        assert_eq!(BetType::Trio.tickets(5), 10);
        assert_eq!(BetType::Quinella.tickets(1), 0);
        assert_eq!(BetType::Win.tickets(1), 1);
    }

    #[test]
    fn test_tickets_saturate_on_huge_box() {
        assert_eq!(BetType::Trifecta.tickets(5_000_000), u64::MAX);
        assert_eq!(BetType::Trio.tickets(18), 816);
        assert_eq!(BetType::Trifecta.tickets(18), 4896);
        assert_eq!(BetType::Win.tickets(5_000_000), 5_000_000);
    }

    #[test]
    fn test_bet_type_serde() {
        let json = serde_json::to_string(&BetType::Trifecta).unwrap();
        assert_eq!(json, "\"trifecta\"");
        let parsed: BetType = serde_json::from_str("\"wide\"").unwrap();
        assert_eq!(parsed, BetType::Wide);
    }

    #[test]
    fn test_prediction_rows_from_table() {
        let table = TextTable::from_rows(
            "evaluation",
            &["race_id", "horse_id", "target", "rank", "tansho_odds", "popularity", "umaban", "pred"],
            &[
                vec!["r1", "h1", "1", "1", "2.4", "1", "7", "0.61"],
                vec!["r1", "h2", "0", "", "", "", "3", ""],
            ],
        )
        .unwrap();
        let rows = PredictionRow::from_table(&table).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].target);
        assert_eq!(rows[0].umaban, Some(7));
        assert!(!rows[1].target);
        assert_eq!(rows[1].rank, None);
        assert_eq!(rows[1].pred, None);
    }
}
