//! Race info normalization.
//!
//! The raw race info row holds the page title and two token lists scraped
//! from the descriptive paragraphs, e.g.
//! `info1 = ["芝右1600m", "天候:晴", "芝:良", "発走:15:40"]` and
//! `info2 = ["2023年1月5日", "1回中山1日目", "4歳以上1勝クラス", ...]`.

use std::f64::consts::PI;
use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use regex::Regex;
use tracing::warn;

use super::{first_number, nth_char, NormalizeReport};
use crate::error::PipelineError;
use crate::mapping::{CategoryCode, Mappings};
use crate::table::{int_of, FrameBuilder, TextTable, TsvRecord};
use crate::types::{parse_date, DATE_FORMAT};

/// Facts of one race known before it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceRecord {
    pub race_id: String,
    pub date: NaiveDate,
    pub race_type: CategoryCode,
    pub around: CategoryCode,
    pub course_len: Option<u32>,
    pub weather: CategoryCode,
    pub ground_state: CategoryCode,
    pub race_class: CategoryCode,
    /// Venue code, characters 4..6 of the race id.
    pub place: Option<u32>,
    pub month: u32,
    pub sin_date: f64,
    pub cos_date: f64,
}

fn date_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})年(\d{1,2})月(\d{1,2})日").expect("valid regex"))
}

fn weather_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"天候:(\w+)").expect("valid regex"))
}

fn ground_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:芝|ダート|障害):(\w+)").expect("valid regex"))
}

fn course_len_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)m").expect("valid regex"))
}

/// Parse a Japanese calendar date such as "2023年1月5日".
pub fn parse_japanese_date(text: &str) -> Option<NaiveDate> {
    let caps = date_pattern().captures(text)?;
    let year = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let day = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Sine/cosine of the day of year over a 365.25-day period, shifted to [0, 2].
pub fn seasonal_encoding(date: NaiveDate) -> (f64, f64) {
    let angle = 2.0 * PI * date.ordinal() as f64 / 365.25;
    (angle.sin() + 1.0, angle.cos() + 1.0)
}

/// Venue code embedded in a race id.
pub fn place_code(race_id: &str) -> Option<u32> {
    race_id.get(4..6).and_then(|s| s.parse().ok())
}

/// Token list stored as a JSON array. A cell that is not an array is one token.
fn tokens(text: &str) -> Vec<String> {
    serde_json::from_str(text).unwrap_or_else(|_| vec![text.to_string()])
}

fn capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Normalize a raw race info table. Rows without a parsable date are skipped.
pub fn normalize_race_info(
    raw: &TextTable,
    mappings: &Mappings,
) -> Result<(Vec<RaceRecord>, NormalizeReport), PipelineError> {
    let race_ids = raw.column("race_id")?;
    let titles = raw.column_opt("title");
    let info1 = raw.column("info1")?;
    let info2 = raw.column("info2")?;

    let mut report = NormalizeReport::new("race_info", raw.height());
    let mut records = Vec::with_capacity(raw.height());

    for i in 0..raw.height() {
        let Some(race_id) = race_ids.get(i) else {
            report.drop_row();
            continue;
        };
        let info1_text = info1.get(i).unwrap_or_default();
        let info2_text = info2.get(i).unwrap_or_default();
        let info1_tokens = tokens(info1_text);
        let info2_tokens = tokens(info2_text);

        let Some(date) = info2_tokens.first().and_then(|t| parse_japanese_date(t)) else {
            warn!("race {}: no date in info block, skipped", race_id);
            report.drop_row();
            continue;
        };

        let head = info1_tokens.first().map(String::as_str).unwrap_or_default();
        let title = titles.and_then(|c| c.get(i)).unwrap_or_default();
        let race_class = match mappings.race_class.find_in(title) {
            Some(label) => mappings.race_class.code(label),
            None => mappings.race_class.code_in(&info2_tokens.join(" ")),
        };
        let (sin_date, cos_date) = seasonal_encoding(date);

        records.push(RaceRecord {
            race_id: race_id.to_string(),
            date,
            race_type: mappings.race_type.code_opt(nth_char(head, 0)),
            around: mappings.around.code_opt(nth_char(head, 1)),
            course_len: capture(course_len_pattern(), info1_text).and_then(first_number),
            weather: mappings.weather.code_opt(capture(weather_pattern(), info1_text)),
            ground_state: mappings
                .ground_state
                .code_opt(capture(ground_pattern(), info1_text)),
            race_class,
            place: place_code(race_id),
            month: date.month(),
            sin_date,
            cos_date,
        });
        report.keep();
    }

    if report.dropped > 0 {
        warn!("{}", report);
    }

    Ok((records, report))
}

impl TsvRecord for RaceRecord {
    const TABLE: &'static str = "race_info";

    fn to_frame(rows: &[Self]) -> PolarsResult<DataFrame> {
        let code = |f: fn(&RaceRecord) -> CategoryCode| -> Vec<Option<i64>> {
            rows.iter().map(|r| int_of(f(r).value())).collect()
        };
        FrameBuilder::new()
            .text("race_id", rows.iter().map(|r| r.race_id.clone()).collect())
            .text(
                "date",
                rows.iter().map(|r| r.date.format(DATE_FORMAT).to_string()).collect(),
            )
            .int("race_type", code(|r| r.race_type))
            .int("around", code(|r| r.around))
            .int("course_len", rows.iter().map(|r| int_of(r.course_len)).collect())
            .int("weather", code(|r| r.weather))
            .int("ground_state", code(|r| r.ground_state))
            .int("race_class", code(|r| r.race_class))
            .int("place", rows.iter().map(|r| int_of(r.place)).collect())
            .int("month", rows.iter().map(|r| Some(r.month as i64)).collect())
            .float("sin_date", rows.iter().map(|r| Some(r.sin_date)).collect())
            .float("cos_date", rows.iter().map(|r| Some(r.cos_date)).collect())
            .finish()
    }

    fn from_table(table: &TextTable) -> Result<Vec<Self>, PipelineError> {
        let race_ids = table.column("race_id")?;
        let dates = table.column("date")?;
        let race_type = table.column("race_type")?;
        let around = table.column("around")?;
        let course_len = table.column("course_len")?;
        let weather = table.column("weather")?;
        let ground_state = table.column("ground_state")?;
        let race_class = table.column("race_class")?;
        let place = table.column("place")?;

        Ok((0..table.height())
            .filter_map(|i| {
                let date = parse_date(dates.get(i)?)?;
                let (sin_date, cos_date) = seasonal_encoding(date);
                Some(RaceRecord {
                    race_id: race_ids.get(i)?.to_string(),
                    date,
                    race_type: CategoryCode::from_value(race_type.parse(i)),
                    around: CategoryCode::from_value(around.parse(i)),
                    course_len: course_len.parse(i),
                    weather: CategoryCode::from_value(weather.parse(i)),
                    ground_state: CategoryCode::from_value(ground_state.parse(i)),
                    race_class: CategoryCode::from_value(race_class.parse(i)),
                    place: place.parse(i),
                    month: date.month(),
                    sin_date,
                    cos_date,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::fixtures;

    fn raw() -> TextTable {
        TextTable::from_rows(
            "race_info",
            &["race_id", "title", "info1", "info2"],
            &[
                vec![
                    "202306010811",
                    "中山金杯(G3)",
                    r#"["芝右2000m", "天候:晴", "芝:良", "発走:15:45"]"#,
                    r#"["2023年1月5日", "1回中山1日目", "4歳以上オープン", "(国際)(特指)", "ハンデ"]"#,
                ],
                vec![
                    "202306010801",
                    "3歳未勝利",
                    r#"["ダ右1200m", "天候:曇", "ダート:稍重", "発走:10:05"]"#,
                    r#"["2023年1月5日", "1回中山1日目", "3歳未勝利"]"#,
                ],
                vec![
                    "202306010805",
                    "4歳以上",
                    r#"["ダ左1800m", "天候:雪", "ダート:不良"]"#,
                    r#"["2023年1月5日", "1回中山1日目", "4歳以上1勝クラス"]"#,
                ],
                vec!["202306010899", "broken", r#"["芝右1600m"]"#, r#"["発走時刻未定"]"#],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_normalize_race_info() {
        let mappings = fixtures::mappings();
        let (records, report) = normalize_race_info(&raw(), &mappings).unwrap();

        assert_eq!(report.kept, 3);
        assert_eq!(report.dropped, 1);

        let kinpai = &records[0];
        assert_eq!(kinpai.date, NaiveDate::from_ymd_opt(2023, 1, 5).unwrap());
        assert_eq!(kinpai.race_type, CategoryCode::Mapped(0));
        assert_eq!(kinpai.around, CategoryCode::Mapped(0));
        assert_eq!(kinpai.course_len, Some(2000));
        assert_eq!(kinpai.weather, CategoryCode::Mapped(0));
        assert_eq!(kinpai.ground_state, CategoryCode::Mapped(0));
        // Title wins over the secondary block
        assert_eq!(kinpai.race_class, CategoryCode::Mapped(7));
        assert_eq!(kinpai.place, Some(6));
        assert_eq!(kinpai.month, 1);

        let maiden = &records[1];
        assert_eq!(maiden.race_type, CategoryCode::Mapped(1));
        assert_eq!(maiden.ground_state, CategoryCode::Mapped(1));
        assert_eq!(maiden.race_class, CategoryCode::Mapped(1));

        // Class only in the secondary block
        let allowance = &records[2];
        assert_eq!(allowance.around, CategoryCode::Mapped(1));
        assert_eq!(allowance.weather, CategoryCode::Mapped(5));
        assert_eq!(allowance.race_class, CategoryCode::Mapped(2));
    }

    #[test]
    fn test_seasonal_encoding_is_non_negative() {
        let mut date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        while date.year() == 2024 {
            let (s, c) = seasonal_encoding(date);
            assert!((0.0..=2.0).contains(&s));
            assert!((0.0..=2.0).contains(&c));
            date = date.succ_opt().unwrap();
        }
        let (s, c) = seasonal_encoding(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
        assert!((s - ((2.0 * PI / 365.25).sin() + 1.0)).abs() < 1e-12);
        assert!((c - ((2.0 * PI / 365.25).cos() + 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_parse_japanese_date() {
        assert_eq!(
            parse_japanese_date("2022年12月28日"),
            NaiveDate::from_ymd_opt(2022, 12, 28)
        );
        assert_eq!(parse_japanese_date("2022年13月1日"), None);
        assert_eq!(parse_japanese_date("12/28"), None);
    }

    #[test]
    fn test_place_code() {
        assert_eq!(place_code("202306010811"), Some(6));
        assert_eq!(place_code("2023"), None);
    }
}
