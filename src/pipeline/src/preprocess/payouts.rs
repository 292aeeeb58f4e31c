//! Payout table normalization.
//!
//! A raw payout row holds one bet type of one race, with every winning
//! combination and payout packed into two whitespace-separated cells:
//!
//! ```text
//! 複勝    7 3 12          150 210 380
//! ワイド  3 - 7 7 - 12    420 900
//! 三連単  7 → 3 → 12      12,340
//! ```
//!
//! Normalization explodes those cells into one record per winning
//! combination, keeping the combination as an ordered list of horse numbers.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::OnceLock;

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::NormalizeReport;
use crate::error::PipelineError;
use crate::table::TextTable;
use crate::types::BetType;

/// One winning combination of one bet type in one race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRecord {
    pub race_id: String,
    pub bet_type: BetType,
    /// Horse numbers in finishing order for ordered bet types.
    pub win_umaban: Vec<String>,
    /// Payout per 100 yen staked.
    pub payout: u64,
}

fn separator_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r" (?:-|→) ").expect("valid regex"))
}

/// Collapse combination separators and thousands commas, then split on
/// whitespace.
fn split_cell(text: &str) -> Vec<String> {
    separator_pattern()
        .replace_all(text, "-")
        .replace(',', "")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Explode one raw payout row.
///
/// Returns `None` when the combination and payout counts disagree.
pub fn explode_payout_row(
    race_id: &str,
    bet_type: BetType,
    combinations: &str,
    payouts: &str,
) -> Option<Vec<PayoutRecord>> {
    let combinations = split_cell(combinations);
    let payouts = split_cell(payouts);
    if combinations.len() != payouts.len() {
        return None;
    }

    let mut records = Vec::with_capacity(combinations.len());
    for (combination, payout) in combinations.iter().zip(&payouts) {
        let win_umaban: Vec<String> = combination.split('-').map(str::to_string).collect();
        let Ok(payout) = payout.parse::<u64>() else {
            warn!("race {}: {} payout {:?} is not a number", race_id, bet_type, payout);
            continue;
        };
        if win_umaban.len() != bet_type.combination_size() {
            warn!(
                "race {}: {} combination {:?} has {} horses",
                race_id,
                bet_type,
                combination,
                win_umaban.len()
            );
            continue;
        }
        records.push(PayoutRecord {
            race_id: race_id.to_string(),
            bet_type,
            win_umaban,
            payout,
        });
    }
    Some(records)
}

/// Normalize a raw payout table.
///
/// Labels without a bet type (枠連) are skipped silently; malformed cells are
/// skipped with a warning naming the race.
pub fn normalize_payouts(
    raw: &TextTable,
) -> Result<(Vec<PayoutRecord>, NormalizeReport), PipelineError> {
    let race_ids = raw.column("race_id")?;
    let labels = raw.column("bet_type")?;
    let combinations = raw.column("win_umaban")?;
    let payouts = raw.column("return")?;

    let mut report = NormalizeReport::new("return_tables", raw.height());
    let mut records = Vec::new();

    for i in 0..raw.height() {
        let (Some(race_id), Some(label)) = (race_ids.get(i), labels.get(i)) else {
            report.drop_row();
            continue;
        };
        let Some(bet_type) = BetType::from_label(label) else {
            report.drop_row();
            continue;
        };
        let exploded = explode_payout_row(
            race_id,
            bet_type,
            combinations.get(i).unwrap_or_default(),
            payouts.get(i).unwrap_or_default(),
        );
        match exploded {
            Some(rows) => {
                records.extend(rows);
                report.keep();
            }
            None => {
                warn!(
                    "race {}: {} combinations and payouts do not pair up, skipped",
                    race_id, bet_type
                );
                report.drop_row();
            }
        }
    }

    Ok((records, report))
}

/// Write payout records as a JSON array, keeping combinations as lists.
pub fn write_payouts_json<P: AsRef<Path>>(path: P, records: &[PayoutRecord]) -> anyhow::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer(BufWriter::new(file), records)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn read_payouts_json<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<PayoutRecord>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let records = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn umaban(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_explode_place() {
        let rows = explode_payout_row("r1", BetType::Place, "7 3 12", "150 210 1,380").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].win_umaban, umaban(&["7"]));
        assert_eq!(rows[2].win_umaban, umaban(&["12"]));
        assert_eq!(rows[2].payout, 1380);
    }

    #[test]
    fn test_explode_keeps_order() {
        let rows = explode_payout_row("r1", BetType::Trifecta, "7 → 3 → 12", "12,340").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].win_umaban, umaban(&["7", "3", "12"]));
        assert_eq!(rows[0].payout, 12340);

        let rows = explode_payout_row("r1", BetType::Wide, "3 - 7 7 - 12 3 - 12", "420 900 610")
            .unwrap();
        let combos: Vec<_> = rows.iter().map(|r| r.win_umaban.clone()).collect();
        assert_eq!(
            combos,
            vec![umaban(&["3", "7"]), umaban(&["7", "12"]), umaban(&["3", "12"])]
        );
    }

    #[test]
    fn test_explode_count_mismatch() {
        assert!(explode_payout_row("r1", BetType::Place, "7 3 12", "150 210").is_none());
    }

    #[test]
    fn test_normalize_payouts() {
        let raw = TextTable::from_rows(
            "return_tables",
            &["race_id", "bet_type", "win_umaban", "return"],
            &[
                vec!["r1", "単勝", "7", "520"],
                vec!["r1", "枠連", "2 - 4", "1,020"],
                vec!["r1", "馬連", "3 - 7", "1,450"],
                vec!["r1", "複勝", "7 3", "150"],
            ],
        )
        .unwrap();
        let (records, report) = normalize_payouts(&raw).unwrap();
        assert_eq!(report.kept, 2);
        assert_eq!(report.dropped, 2);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].bet_type, BetType::Win);
        assert_eq!(records[1].bet_type, BetType::Quinella);
        assert_eq!(records[1].payout, 1450);
    }

    #[test]
    fn test_json_keeps_lists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("return_tables.json");
        let records = vec![PayoutRecord {
            race_id: "202301010101".to_string(),
            bet_type: BetType::Exacta,
            win_umaban: umaban(&["12", "3"]),
            payout: 4870,
        }];
        write_payouts_json(&path, &records).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains(r#""win_umaban":["12","3"]"#));
        assert_eq!(read_payouts_json(&path).unwrap(), records);
    }
}
