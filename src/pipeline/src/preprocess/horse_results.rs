//! Horse race-history normalization.

use std::sync::OnceLock;

use chrono::NaiveDate;
use polars::prelude::*;
use regex::Regex;
use tracing::warn;

use super::{first_number, nth_char, NormalizeReport};
use crate::error::PipelineError;
use crate::mapping::{CategoryCode, Mappings};
use crate::table::{cell, int_of, FrameBuilder, TextTable, TsvRecord};
use crate::types::{parse_date, DATE_FORMAT};

/// One past race of one horse.
#[derive(Debug, Clone, PartialEq)]
pub struct HorseRaceRecord {
    pub horse_id: String,
    pub date: NaiveDate,
    /// Finishing position; non-finishes count as last (field size).
    pub rank: u32,
    pub prize: f64,
    /// Margin behind the winner in lengths; winners record 0.
    pub rank_diff: Option<f64>,
    pub weather: CategoryCode,
    pub race_type: CategoryCode,
    pub course_len: Option<u32>,
    pub ground_state: CategoryCode,
    pub race_class: CategoryCode,
    /// Elapsed time in seconds.
    pub time: Option<f64>,
    pub win: bool,
    pub rentai: bool,
    pub show: bool,
    pub place: Option<String>,
    pub n_horses: Option<u32>,
}

impl HorseRaceRecord {
    /// Build a record with outcome flags derived from `rank`; other
    /// attributes start missing.
    pub fn new(horse_id: &str, date: NaiveDate, rank: u32, prize: f64) -> Self {
        Self {
            horse_id: horse_id.to_string(),
            date,
            rank,
            prize,
            rank_diff: None,
            weather: CategoryCode::Unmapped,
            race_type: CategoryCode::Unmapped,
            course_len: None,
            ground_state: CategoryCode::Unmapped,
            race_class: CategoryCode::Unmapped,
            time: None,
            win: rank == 1,
            rentai: rank <= 2,
            show: rank <= 3,
            place: None,
            n_horses: None,
        }
    }
}

/// History dates are "2023/01/05" on the page; normalized files use ISO.
pub fn parse_history_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y/%m/%d")
        .ok()
        .or_else(|| parse_date(text))
}

/// "1:34.5" -> 94.5 seconds.
pub fn parse_race_time(text: &str) -> Option<f64> {
    let (minutes, seconds) = text.split_once(':')?;
    let minutes: u32 = minutes.trim().parse().ok()?;
    let seconds: f64 = seconds.trim().parse().ok()?;
    if !(0.0..60.0).contains(&seconds) {
        return None;
    }
    Some(minutes as f64 * 60.0 + seconds)
}

/// Finishing position with the demotion marker removed: "3(降)" -> 3.
fn parse_rank(text: &str) -> Option<u32> {
    text.replace("(降)", "").trim().parse().ok()
}

fn parse_prize(text: Option<&str>) -> f64 {
    text.and_then(|t| t.replace(',', "").parse().ok())
        .unwrap_or(0.0)
}

fn venue(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\D+").expect("valid regex"));
    re.find(text).map(|m| m.as_str().to_string())
}

/// Normalize a raw horse history table.
///
/// A non-numeric finishing position (中止, 取消, 除外...) is imputed to the
/// field size so the race still counts in history windows. Rows without a
/// date, or with neither a rank nor a field size, are dropped.
pub fn normalize_horse_results(
    raw: &TextTable,
    mappings: &Mappings,
) -> Result<(Vec<HorseRaceRecord>, NormalizeReport), PipelineError> {
    let horse_ids = raw.column("horse_id")?;
    let dates = raw.column("日付")?;
    let ranks = raw.column("着順")?;
    let n_horses = raw.column_opt("頭数");
    let weather = raw.column_opt("天気");
    let distance = raw.column_opt("距離");
    let ground = raw.column_opt("馬場");
    let margin = raw.column_opt("着差");
    let prize = raw.column_opt("賞金");
    let race_name = raw.column_opt("レース名");
    let time = raw.column_opt("タイム");
    let meeting = raw.column_opt("開催");

    let mut report = NormalizeReport::new("horse_results", raw.height());
    let mut records = Vec::with_capacity(raw.height());

    for i in 0..raw.height() {
        let Some(horse_id) = horse_ids.get(i) else {
            report.drop_row();
            continue;
        };
        let Some(date) = dates.get(i).and_then(parse_history_date) else {
            report.drop_row();
            continue;
        };
        let field_size: Option<u32> = n_horses.and_then(|c| c.parse(i));
        let Some(rank) = ranks.get(i).and_then(parse_rank).or(field_size) else {
            report.drop_row();
            continue;
        };

        let distance_text = cell(distance, i);
        let mut record = HorseRaceRecord::new(horse_id, date, rank, parse_prize(cell(prize, i)));
        record.rank_diff = margin
            .and_then(|c| c.parse::<f64>(i))
            .map(|d| d.max(0.0));
        record.weather = mappings.weather.code_opt(cell(weather, i));
        record.race_type = mappings
            .race_type
            .code_opt(distance_text.and_then(|d| nth_char(d, 0)));
        record.course_len = distance_text.and_then(first_number);
        record.ground_state = mappings.ground_state.code_opt(cell(ground, i));
        record.race_class = cell(race_name, i)
            .map_or(CategoryCode::Unmapped, |name| mappings.race_class.code_in(name));
        record.time = cell(time, i).and_then(parse_race_time);
        record.place = cell(meeting, i).and_then(venue);
        record.n_horses = field_size;

        records.push(record);
        report.keep();
    }

    if report.dropped > 0 {
        warn!("{}", report);
    }

    Ok((records, report))
}

impl TsvRecord for HorseRaceRecord {
    const TABLE: &'static str = "horse_results";

    fn to_frame(rows: &[Self]) -> PolarsResult<DataFrame> {
        let code = |f: fn(&HorseRaceRecord) -> CategoryCode| -> Vec<Option<i64>> {
            rows.iter().map(|r| int_of(f(r).value())).collect()
        };
        let flag = |f: fn(&HorseRaceRecord) -> bool| -> Vec<Option<i64>> {
            rows.iter().map(|r| Some(f(r) as i64)).collect()
        };
        FrameBuilder::new()
            .text("horse_id", rows.iter().map(|r| r.horse_id.clone()).collect())
            .text(
                "date",
                rows.iter().map(|r| r.date.format(DATE_FORMAT).to_string()).collect(),
            )
            .int("rank", rows.iter().map(|r| Some(r.rank as i64)).collect())
            .float("prize", rows.iter().map(|r| Some(r.prize)).collect())
            .float("rank_diff", rows.iter().map(|r| r.rank_diff).collect())
            .int("weather", code(|r| r.weather))
            .int("race_type", code(|r| r.race_type))
            .int("course_len", rows.iter().map(|r| int_of(r.course_len)).collect())
            .int("ground_state", code(|r| r.ground_state))
            .int("race_class", code(|r| r.race_class))
            .float("time", rows.iter().map(|r| r.time).collect())
            .int("win", flag(|r| r.win))
            .int("rentai", flag(|r| r.rentai))
            .int("show", flag(|r| r.show))
            .opt_text("place", rows.iter().map(|r| r.place.clone()).collect())
            .int("n_horses", rows.iter().map(|r| int_of(r.n_horses)).collect())
            .finish()
    }

    fn from_table(table: &TextTable) -> Result<Vec<Self>, PipelineError> {
        let horse_ids = table.column("horse_id")?;
        let dates = table.column("date")?;
        let ranks = table.column("rank")?;
        let prizes = table.column("prize")?;
        let rank_diff = table.column("rank_diff")?;
        let weather = table.column("weather")?;
        let race_type = table.column("race_type")?;
        let course_len = table.column("course_len")?;
        let ground_state = table.column("ground_state")?;
        let race_class = table.column("race_class")?;
        let time = table.column("time")?;
        let place = table.column("place")?;
        let n_horses = table.column("n_horses")?;

        Ok((0..table.height())
            .filter_map(|i| {
                let mut record = HorseRaceRecord::new(
                    horse_ids.get(i)?,
                    parse_date(dates.get(i)?)?,
                    ranks.parse(i)?,
                    prizes.parse(i).unwrap_or(0.0),
                );
                record.rank_diff = rank_diff.parse(i);
                record.weather = CategoryCode::from_value(weather.parse(i));
                record.race_type = CategoryCode::from_value(race_type.parse(i));
                record.course_len = course_len.parse(i);
                record.ground_state = CategoryCode::from_value(ground_state.parse(i));
                record.race_class = CategoryCode::from_value(race_class.parse(i));
                record.time = time.parse(i);
                record.place = place.get(i).map(str::to_string);
                record.n_horses = n_horses.parse(i);
                Some(record)
            })
            .collect())
    }
}
