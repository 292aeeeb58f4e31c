//! Raw table normalization.
//!
//! Each submodule turns one raw text table into typed records. Per-row
//! problems never fail a batch: unparsable numbers become `None`, unmapped
//! labels become `CategoryCode::Unmapped`, and rows missing a key are
//! dropped and counted in the `NormalizeReport`.

pub mod horse_results;
pub mod payouts;
pub mod race_info;
pub mod results;

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

pub use horse_results::{normalize_horse_results, HorseRaceRecord};
pub use payouts::{normalize_payouts, read_payouts_json, write_payouts_json, PayoutRecord};
pub use race_info::{normalize_race_info, RaceRecord};
pub use results::{normalize_results, EntryRecord, RankPolicy};

/// Row counts of one normalization run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub table: &'static str,
    pub input_rows: usize,
    pub kept: usize,
    pub dropped: usize,
}

impl NormalizeReport {
    pub fn new(table: &'static str, input_rows: usize) -> Self {
        Self {
            table,
            input_rows,
            ..Default::default()
        }
    }

    pub(crate) fn keep(&mut self) {
        self.kept += 1;
    }

    pub(crate) fn drop_row(&mut self) {
        self.dropped += 1;
    }
}

impl fmt::Display for NormalizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} rows in, {} kept, {} dropped",
            self.table, self.input_rows, self.kept, self.dropped
        )
    }
}

/// First run of ASCII digits in `text`, parsed.
pub(crate) fn first_number<T: std::str::FromStr>(text: &str) -> Option<T> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\d+").expect("valid regex"));
    re.find(text).and_then(|m| m.as_str().parse().ok())
}

/// Signed integer inside the first pair of parentheses: "482(+4)" -> 4.
pub(crate) fn paren_number(text: &str) -> Option<i32> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\((.+)\)").expect("valid regex"));
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().trim_start_matches('+').parse().ok())
}

/// Stable leading-character split: "牡4" -> ("牡", "4").
pub(crate) fn split_first_char(text: &str) -> Option<(&str, &str)> {
    let first = text.chars().next()?;
    Some(text.split_at(first.len_utf8()))
}

/// The `n`th character as a string slice.
pub(crate) fn nth_char(text: &str, n: usize) -> Option<&str> {
    let (start, c) = text.char_indices().nth(n)?;
    Some(&text[start..start + c.len_utf8()])
}
