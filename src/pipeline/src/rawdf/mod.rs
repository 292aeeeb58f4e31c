//! Saved HTML pages -> raw text tables.
//!
//! Pages are read from disk (the scraper that downloads them is a separate
//! tool); every cell is kept as text and typed later by `preprocess`.

pub mod horse_page;
pub mod race_page;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use encoding_rs::EUC_JP;
use polars::prelude::*;
use scraper::{ElementRef, Selector};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::table::{write_tsv, FrameBuilder};

pub use horse_page::parse_horse_page;
pub use race_page::{parse_race_page, RacePage};

/// A text table whose columns are the union of every row's headers.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    columns: Vec<String>,
    rows: Vec<HashMap<String, String>>,
}

impl RawTable {
    /// An empty table whose first column is the source id.
    pub fn new(id_column: &str) -> Self {
        Self {
            columns: vec![id_column.to_string()],
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<(String, String)>) {
        let mut cells = HashMap::with_capacity(row.len());
        for (column, value) in row {
            if !self.columns.contains(&column) {
                self.columns.push(column.clone());
            }
            cells.entry(column).or_insert(value);
        }
        self.rows.push(cells);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[cfg(test)]
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        self.rows.get(row)?.get(column).map(String::as_str)
    }

    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        let mut builder = FrameBuilder::new();
        for column in &self.columns {
            builder = builder.opt_text(
                column,
                self.rows.iter().map(|row| row.get(column).cloned()).collect(),
            );
        }
        builder.finish()
    }
}

/// Read a saved page. UTF-8 is taken as is; anything else is decoded as
/// EUC-JP, the encoding of the race database pages.
pub fn read_html(path: &Path) -> anyhow::Result<String> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            let (decoded, _, _) = EUC_JP.decode(err.as_bytes());
            decoded.into_owned()
        }
    };
    Ok(text
        .replace("<diary_snap_cut>", "")
        .replace("</diary_snap_cut>", ""))
}

/// `<id>.html` / `<id>.bin` files under `dir`, sorted by id.
pub fn html_files(dir: &Path) -> Vec<(String, PathBuf)> {
    let mut files: Vec<(String, PathBuf)> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            matches!(
                e.path().extension().and_then(|x| x.to_str()),
                Some("html") | Some("bin")
            )
        })
        .filter_map(|e| {
            let id = e.path().file_stem()?.to_str()?.to_string();
            Some((id, e.into_path()))
        })
        .collect();
    files.sort();
    files
}

/// Visible text of a cell; text split by `<br>` or child elements is
/// joined with single spaces.
pub(crate) fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Header -> cell text pairs for every data row of a table. Header text
/// has all whitespace removed.
pub(crate) fn table_rows(table: ElementRef<'_>) -> Vec<Vec<(String, String)>> {
    let (Ok(tr), Ok(th), Ok(td)) = (
        Selector::parse("tr"),
        Selector::parse("th"),
        Selector::parse("td"),
    ) else {
        return Vec::new();
    };

    let mut headers: Vec<String> = Vec::new();
    let mut rows = Vec::new();
    for row in table.select(&tr) {
        let header_cells: Vec<_> = row.select(&th).collect();
        if !header_cells.is_empty() && headers.is_empty() {
            headers = header_cells
                .into_iter()
                .map(|c| c.text().collect::<String>().split_whitespace().collect())
                .collect();
            continue;
        }
        let cells: Vec<String> = row.select(&td).map(cell_text).collect();
        if cells.is_empty() {
            continue;
        }
        rows.push(headers.iter().cloned().zip(cells).collect());
    }
    rows
}

/// Raw tables extracted from race pages.
#[derive(Debug, Clone)]
pub struct RaceTables {
    pub results: RawTable,
    pub race_info: RawTable,
    pub return_tables: RawTable,
}

/// Read one page of a batch. Unreadable pages are skipped with a warning.
fn read_page(id: &str, path: &Path) -> Option<String> {
    match read_html(path) {
        Ok(html) => Some(html),
        Err(e) => {
            warn!("skipping page {}: {:#}", id, e);
            None
        }
    }
}

/// Parse every race page under `dir`. Pages that cannot be read or have no
/// results table are skipped with a warning.
pub fn create_race_tables(dir: &Path) -> anyhow::Result<RaceTables> {
    let files = html_files(dir);
    info!("Parsing {} race pages from {}", files.len(), dir.display());
    Ok(race_tables_from(files))
}

fn race_tables_from(files: Vec<(String, PathBuf)>) -> RaceTables {
    let mut tables = RaceTables {
        results: RawTable::new("race_id"),
        race_info: RawTable::new("race_id"),
        return_tables: RawTable::new("race_id"),
    };

    for (race_id, path) in files {
        let Some(html) = read_page(&race_id, &path) else {
            continue;
        };
        let Some(page) = parse_race_page(&html, &race_id) else {
            warn!("table not found at {}", race_id);
            continue;
        };
        for row in page.results {
            tables.results.push(row);
        }
        match page.race_info {
            Some(row) => tables.race_info.push(row),
            None => warn!("race info not found at {}", race_id),
        }
        for row in page.payouts {
            tables.return_tables.push(row);
        }
    }

    info!(
        "rawdf: {} result rows, {} races, {} payout rows",
        tables.results.len(),
        tables.race_info.len(),
        tables.return_tables.len()
    );
    tables
}

/// Parse every horse page under `dir`. Unreadable pages are skipped with a
/// warning.
pub fn create_horse_results(dir: &Path) -> anyhow::Result<RawTable> {
    let files = html_files(dir);
    info!("Parsing {} horse pages from {}", files.len(), dir.display());
    Ok(horse_results_from(files))
}

fn horse_results_from(files: Vec<(String, PathBuf)>) -> RawTable {
    let mut table = RawTable::new("horse_id");
    for (horse_id, path) in files {
        let Some(html) = read_page(&horse_id, &path) else {
            continue;
        };
        match parse_horse_page(&html, &horse_id) {
            Some(rows) => {
                for row in rows {
                    table.push(row);
                }
            }
            None => warn!("table not found at {}", horse_id),
        }
    }
    table
}

pub fn write_raw_table(path: &Path, table: &RawTable) -> anyhow::Result<()> {
    let mut df = table.to_frame()?;
    write_tsv(path, &mut df)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_table_union_of_columns() {
        let mut table = RawTable::new("race_id");
        table.push(vec![
            ("race_id".into(), "r1".into()),
            ("着順".into(), "1".into()),
        ]);
        table.push(vec![
            ("race_id".into(), "r2".into()),
            ("馬番".into(), "3".into()),
        ]);
        assert_eq!(table.columns(), &["race_id", "着順", "馬番"]);
        assert_eq!(table.get(1, "着順"), None);
        assert_eq!(table.get(1, "馬番"), Some("3"));

        let df = table.to_frame().unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), 3);
    }

    #[test]
    fn test_read_html_decodes_euc_jp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("202301010101.html");
        let (bytes, _, _) = EUC_JP.encode("<p>芝右1600m</p><diary_snap_cut>x</diary_snap_cut>");
        std::fs::write(&path, &bytes).unwrap();
        let html = read_html(&path).unwrap();
        assert_eq!(html, "<p>芝右1600m</p>x");
    }

    #[test]
    fn test_unreadable_page_does_not_stop_batch() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("2020104385.html");
        std::fs::write(
            &good,
            r#"<table class="db_h_race_results"><tr><th>日付</th><th>着 順</th></tr>
               <tr><td>2023/04/16</td><td>1</td></tr></table>"#,
        )
        .unwrap();
        let files = vec![
            ("2019100001".to_string(), dir.path().join("2019100001.html")),
            ("2020104385".to_string(), good),
        ];

        let table = horse_results_from(files.clone());
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0, "horse_id"), Some("2020104385"));
        assert_eq!(table.get(0, "着順"), Some("1"));

        // Neither file is a race page; both are skipped without an error
        let races = race_tables_from(files);
        assert!(races.results.is_empty());
        assert!(races.race_info.is_empty());
    }

    #[test]
    fn test_html_files_sorted_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2019100002.bin"), "").unwrap();
        std::fs::write(dir.path().join("2019100001.html"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        let ids: Vec<String> = html_files(dir.path()).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["2019100001", "2019100002"]);
    }
}
