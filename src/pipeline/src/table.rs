//! Tab-separated table I/O.
//!
//! Every table is read with all columns as text so that scraped cells reach
//! the normalizers untouched, then parsed per field. Typed records go back
//! out through `FrameBuilder`.

use std::fs::{self, File};
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use polars::prelude::*;

use crate::error::PipelineError;

/// A table whose columns are all text.
pub struct TextTable {
    name: String,
    df: DataFrame,
}

impl TextTable {
    pub fn new(name: &str, df: DataFrame) -> Self {
        Self {
            name: name.to_string(),
            df,
        }
    }

    /// Read a TSV file with every column as text.
    pub fn read<P: AsRef<Path>>(name: &str, path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .map_parse_options(|opts| opts.with_separator(b'\t'))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .with_context(|| format!("Failed to open {}", path.display()))?
            .finish()
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Self::new(name, df))
    }

    /// Build a table from literal rows. Empty strings read back as missing.
    pub fn from_rows(name: &str, columns: &[&str], rows: &[Vec<&str>]) -> PolarsResult<Self> {
        let mut builder = FrameBuilder::new();
        for (j, column) in columns.iter().enumerate() {
            let values: Vec<Option<String>> = rows
                .iter()
                .map(|row| row.get(j).map(|s| s.to_string()))
                .collect();
            builder = builder.opt_text(column, values);
        }
        Ok(Self::new(name, builder.finish()?))
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    /// A required column.
    pub fn column(&self, column: &str) -> Result<TextColumn<'_>, PipelineError> {
        self.column_opt(column)
            .ok_or_else(|| PipelineError::MissingColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })
    }

    /// A column that some sources omit.
    pub fn column_opt(&self, column: &str) -> Option<TextColumn<'_>> {
        self.df
            .column(column)
            .ok()
            .and_then(|c| c.str().ok())
            .map(|inner| TextColumn { inner })
    }
}

/// Borrowed view of one text column.
#[derive(Clone, Copy)]
pub struct TextColumn<'a> {
    inner: &'a StringChunked,
}

impl<'a> TextColumn<'a> {
    /// Trimmed cell text; blank cells are missing.
    pub fn get(&self, i: usize) -> Option<&'a str> {
        self.inner
            .get(i)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Parse a cell, coercing failures to missing.
    pub fn parse<T: FromStr>(&self, i: usize) -> Option<T> {
        self.get(i).and_then(|s| s.parse().ok())
    }
}

/// Cell of an optional column.
pub fn cell<'a>(column: Option<TextColumn<'a>>, i: usize) -> Option<&'a str> {
    column.and_then(|c| c.get(i))
}

/// Column-by-column DataFrame construction.
#[derive(Default)]
pub struct FrameBuilder {
    columns: Vec<Column>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, values: Vec<String>) -> Self {
        self.columns.push(Column::new(name.into(), values));
        self
    }

    pub fn opt_text(mut self, name: &str, values: Vec<Option<String>>) -> Self {
        self.columns.push(Column::new(name.into(), values));
        self
    }

    pub fn int(mut self, name: &str, values: Vec<Option<i64>>) -> Self {
        self.columns.push(Column::new(name.into(), values));
        self
    }

    pub fn float(mut self, name: &str, values: Vec<Option<f64>>) -> Self {
        self.columns.push(Column::new(name.into(), values));
        self
    }

    pub fn finish(self) -> PolarsResult<DataFrame> {
        DataFrame::new(self.columns)
    }
}

/// Write a DataFrame as TSV, creating parent directories.
pub fn write_tsv<P: AsRef<Path>>(path: P, df: &mut DataFrame) -> anyhow::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b'\t')
        .finish(df)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// A record type with a TSV representation.
pub trait TsvRecord: Sized {
    /// Table name used in error messages.
    const TABLE: &'static str;

    fn to_frame(rows: &[Self]) -> PolarsResult<DataFrame>;

    fn from_table(table: &TextTable) -> Result<Vec<Self>, PipelineError>;
}

pub fn write_records<R: TsvRecord, P: AsRef<Path>>(path: P, rows: &[R]) -> anyhow::Result<()> {
    let mut df = R::to_frame(rows)?;
    write_tsv(path, &mut df)
}

pub fn read_records<R: TsvRecord, P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<R>> {
    let table = TextTable::read(R::TABLE, path)?;
    Ok(R::from_table(&table)?)
}

pub(crate) fn int_of<T: Into<i64>>(value: Option<T>) -> Option<i64> {
    value.map(Into::into)
}
