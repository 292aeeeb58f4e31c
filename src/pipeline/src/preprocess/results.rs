//! Race result (and entry list) normalization.

use polars::prelude::*;
use tracing::warn;

use super::{first_number, paren_number, split_first_char, NormalizeReport};
use crate::error::PipelineError;
use crate::mapping::{CategoryCode, Mappings};
use crate::table::{cell, int_of, FrameBuilder, TextTable, TsvRecord};

/// Whether a finishing rank is required to keep a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankPolicy {
    /// Finished races: rows without a numeric rank (取消, 除外, 失格...) are dropped.
    Required,
    /// Entry lists of races that have not run yet.
    Optional,
}

/// One horse's entry in one race.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryRecord {
    pub race_id: String,
    pub horse_id: String,
    pub jockey_id: Option<String>,
    pub trainer_id: Option<String>,
    pub owner_id: Option<String>,
    pub rank: Option<u32>,
    pub umaban: Option<u32>,
    pub wakuban: Option<u32>,
    pub tansho_odds: Option<f64>,
    pub popularity: Option<u32>,
    pub impost: Option<f64>,
    pub sex: CategoryCode,
    pub age: Option<u32>,
    pub weight: Option<u32>,
    pub weight_diff: Option<i32>,
}

/// Normalize a raw results table.
///
/// Output is ordered by (race_id, umaban) so row order carries no
/// information about the finishing order.
pub fn normalize_results(
    raw: &TextTable,
    mappings: &Mappings,
    policy: RankPolicy,
) -> Result<(Vec<EntryRecord>, NormalizeReport), PipelineError> {
    let race_ids = raw.column("race_id")?;
    let horse_ids = raw.column("horse_id")?;
    let umaban = raw.column("馬番")?;
    let rank = match policy {
        RankPolicy::Required => Some(raw.column("着順")?),
        RankPolicy::Optional => raw.column_opt("着順"),
    };
    let jockey_ids = raw.column_opt("jockey_id");
    let trainer_ids = raw.column_opt("trainer_id");
    let owner_ids = raw.column_opt("owner_id");
    let wakuban = raw.column_opt("枠番");
    let odds = raw.column_opt("単勝");
    let popularity = raw.column_opt("人気");
    let impost = raw.column_opt("斤量");
    let sex_age = raw.column_opt("性齢");
    let weight = raw.column_opt("馬体重");

    let mut report = NormalizeReport::new("results", raw.height());
    let mut records = Vec::with_capacity(raw.height());

    for i in 0..raw.height() {
        let (Some(race_id), Some(horse_id)) = (race_ids.get(i), horse_ids.get(i)) else {
            report.drop_row();
            continue;
        };
        let rank_value: Option<u32> = rank.and_then(|c| c.parse(i));
        if policy == RankPolicy::Required && rank_value.is_none() {
            report.drop_row();
            continue;
        }

        let (sex, age) = match cell(sex_age, i).and_then(split_first_char) {
            Some((sex, age)) => (mappings.sex.code(sex), age.parse().ok()),
            None => (CategoryCode::Unmapped, None),
        };
        let weight_text = cell(weight, i);

        records.push(EntryRecord {
            race_id: race_id.to_string(),
            horse_id: horse_id.to_string(),
            jockey_id: cell(jockey_ids, i).map(str::to_string),
            trainer_id: cell(trainer_ids, i).map(str::to_string),
            owner_id: cell(owner_ids, i).map(str::to_string),
            rank: rank_value,
            umaban: umaban.parse(i),
            wakuban: wakuban.and_then(|c| c.parse(i)),
            tansho_odds: odds.and_then(|c| c.parse(i)),
            popularity: popularity.and_then(|c| c.parse(i)),
            impost: impost.and_then(|c| c.parse(i)),
            sex,
            age,
            weight: weight_text.and_then(first_number),
            weight_diff: weight_text.and_then(paren_number),
        });
        report.keep();
    }

    if report.dropped > 0 {
        warn!("{}", report);
    }

    records.sort_by(|a, b| {
        a.race_id
            .cmp(&b.race_id)
            .then_with(|| match (a.umaban, b.umaban) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
    });

    Ok((records, report))
}

impl TsvRecord for EntryRecord {
    const TABLE: &'static str = "results";

    fn to_frame(rows: &[Self]) -> PolarsResult<DataFrame> {
        FrameBuilder::new()
            .text("race_id", rows.iter().map(|r| r.race_id.clone()).collect())
            .text("horse_id", rows.iter().map(|r| r.horse_id.clone()).collect())
            .opt_text("jockey_id", rows.iter().map(|r| r.jockey_id.clone()).collect())
            .opt_text("trainer_id", rows.iter().map(|r| r.trainer_id.clone()).collect())
            .opt_text("owner_id", rows.iter().map(|r| r.owner_id.clone()).collect())
            .int("rank", rows.iter().map(|r| int_of(r.rank)).collect())
            .int("umaban", rows.iter().map(|r| int_of(r.umaban)).collect())
            .int("wakuban", rows.iter().map(|r| int_of(r.wakuban)).collect())
            .float("tansho_odds", rows.iter().map(|r| r.tansho_odds).collect())
            .int("popularity", rows.iter().map(|r| int_of(r.popularity)).collect())
            .float("impost", rows.iter().map(|r| r.impost).collect())
            .int("sex", rows.iter().map(|r| int_of(r.sex.value())).collect())
            .int("age", rows.iter().map(|r| int_of(r.age)).collect())
            .int("weight", rows.iter().map(|r| int_of(r.weight)).collect())
            .int("weight_diff", rows.iter().map(|r| int_of(r.weight_diff)).collect())
            .finish()
    }

    fn from_table(table: &TextTable) -> Result<Vec<Self>, PipelineError> {
        let race_ids = table.column("race_id")?;
        let horse_ids = table.column("horse_id")?;
        let jockey_ids = table.column("jockey_id")?;
        let trainer_ids = table.column("trainer_id")?;
        let owner_ids = table.column("owner_id")?;
        let rank = table.column("rank")?;
        let umaban = table.column("umaban")?;
        let wakuban = table.column("wakuban")?;
        let odds = table.column("tansho_odds")?;
        let popularity = table.column("popularity")?;
        let impost = table.column("impost")?;
        let sex = table.column("sex")?;
        let age = table.column("age")?;
        let weight = table.column("weight")?;
        let weight_diff = table.column("weight_diff")?;

        Ok((0..table.height())
            .filter_map(|i| {
                Some(EntryRecord {
                    race_id: race_ids.get(i)?.to_string(),
                    horse_id: horse_ids.get(i)?.to_string(),
                    jockey_id: jockey_ids.get(i).map(str::to_string),
                    trainer_id: trainer_ids.get(i).map(str::to_string),
                    owner_id: owner_ids.get(i).map(str::to_string),
                    rank: rank.parse(i),
                    umaban: umaban.parse(i),
                    wakuban: wakuban.parse(i),
                    tansho_odds: odds.parse(i),
                    popularity: popularity.parse(i),
                    impost: impost.parse(i),
                    sex: CategoryCode::from_value(sex.parse(i)),
                    age: age.parse(i),
                    weight: weight.parse(i),
                    weight_diff: weight_diff.parse(i),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::fixtures;

    const COLUMNS: [&str; 11] = [
        "race_id", "horse_id", "jockey_id", "着順", "枠番", "馬番", "性齢", "斤量", "単勝",
        "人気", "馬体重",
    ];

    fn raw() -> TextTable {
        TextTable::from_rows(
            "results",
            &COLUMNS,
            &[
                vec!["202301010101", "2019100001", "01167", "1", "4", "7", "牡3", "56.0", "3.2", "1", "482(+4)"],
                vec!["202301010101", "2019100002", "01075", "2", "2", "3", "牝3", "54", "5.8", "2", "440(-2)"],
                vec!["202301010101", "2019100003", "01001", "取", "1", "1", "セ4", "57", "", "", "計不"],
                vec!["202301010101", "2019100004", "", "3", "8", "12", "牡?", "55", "12.1", "5", "500(0)"],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_normalize_results() {
        let mappings = fixtures::mappings();
        let (records, report) = normalize_results(&raw(), &mappings, RankPolicy::Required).unwrap();

        assert_eq!(report.kept, 3);
        assert_eq!(report.dropped, 1);
        // Sorted by umaban, not by finishing order
        let umaban: Vec<_> = records.iter().map(|r| r.umaban).collect();
        assert_eq!(umaban, vec![Some(3), Some(7), Some(12)]);

        let winner = &records[1];
        assert_eq!(winner.rank, Some(1));
        assert_eq!(winner.sex, CategoryCode::Mapped(0));
        assert_eq!(winner.age, Some(3));
        assert_eq!(winner.weight, Some(482));
        assert_eq!(winner.weight_diff, Some(4));
        assert_eq!(winner.impost, Some(56.0));
        assert_eq!(records[0].weight_diff, Some(-2));
        assert_eq!(records[2].jockey_id, None);
        assert_eq!(records[2].age, None);
    }

    #[test]
    fn test_optional_rank_keeps_entries() {
        let mappings = fixtures::mappings();
        let (records, report) = normalize_results(&raw(), &mappings, RankPolicy::Optional).unwrap();
        assert_eq!(report.dropped, 0);
        assert_eq!(records.len(), 4);
        let scratched = records.iter().find(|r| r.umaban == Some(1)).unwrap();
        assert_eq!(scratched.rank, None);
        assert_eq!(scratched.weight, None);
        assert_eq!(scratched.tansho_odds, None);
    }

    #[test]
    fn test_missing_rank_column_only_fatal_when_required() {
        let mappings = fixtures::mappings();
        let entries = TextTable::from_rows(
            "entries",
            &["race_id", "horse_id", "馬番"],
            &[vec!["202305050811", "2020100001", "5"]],
        )
        .unwrap();
        assert!(normalize_results(&entries, &mappings, RankPolicy::Required).is_err());
        let (records, _) = normalize_results(&entries, &mappings, RankPolicy::Optional).unwrap();
        assert_eq!(records[0].umaban, Some(5));
        assert_eq!(records[0].sex, CategoryCode::Unmapped);
    }

    #[test]
    fn test_tsv_round_trip() {
        let mappings = fixtures::mappings();
        let (records, _) = normalize_results(&raw(), &mappings, RankPolicy::Required).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.tsv");
        crate::table::write_records(&path, &records).unwrap();
        let back: Vec<EntryRecord> = crate::table::read_records(&path).unwrap();
        assert_eq!(back, records);
    }
}
