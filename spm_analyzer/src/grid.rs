//! Tabular view over CSV and spreadsheet exports.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::NaiveDateTime;

use crate::{timefmt, SpmError};

#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Empty,
    Number(f64),
    Text(String),
    DateTime(NaiveDateTime),
}

static EMPTY: Cell = Cell::Empty;

impl Cell {
    fn text(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(trimmed.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    /// Display text of the cell, trimmed.
    pub fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Number(v) => v.to_string(),
            Cell::Text(s) => s.clone(),
            Cell::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Lenient numeric value: a leading number in text, otherwise 0.
    pub fn as_number(&self) -> f64 {
        match self {
            Cell::Number(v) if v.is_finite() => *v,
            Cell::Text(s) => parse_leading_f64(s).unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Timestamp of the cell. Numbers are spreadsheet serials, text goes
    /// through `parse_text`.
    pub fn as_time(&self, parse_text: fn(&str) -> Option<NaiveDateTime>) -> Option<NaiveDateTime> {
        match self {
            Cell::Empty => None,
            Cell::Number(v) => timefmt::from_spreadsheet_serial(*v),
            Cell::Text(s) => parse_text(s),
            Cell::DateTime(dt) => Some(*dt),
        }
    }
}

/// Parse the longest numeric prefix of `text` (sign, digits, one decimal
/// point, optional exponent), ignoring leading whitespace.
pub fn parse_leading_f64(text: &str) -> Option<f64> {
    let s = text.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let mut digits = 0;
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => digits += 1,
            b'.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end += 1;
    }
    if digits == 0 {
        return None;
    }
    // exponent only counts when followed by digits
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    s[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Rows of cells with absolute sheet positions preserved.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Grid {
    rows: Vec<Vec<Cell>>,
}

impl Grid {
    pub fn from_rows(rows: Vec<Vec<Cell>>) -> Self {
        Self { rows }
    }

    /// Every CSV line becomes a row; no header handling and ragged lines are
    /// kept as-is.
    pub fn from_csv(input: &[u8]) -> Result<Self, SpmError> {
        let input = input.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(input);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(input);
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| SpmError::Format(format!("invalid CSV: {e}")))?;
            rows.push(record.iter().map(Cell::text).collect());
        }
        Ok(Self { rows })
    }

    /// First worksheet of an XLSX/XLS/ODS workbook.
    pub fn from_workbook(input: &[u8]) -> Result<Self, SpmError> {
        let cursor = Cursor::new(input.to_vec());
        let mut workbook = open_workbook_auto_from_rs(cursor)
            .map_err(|e| SpmError::Format(format!("unreadable workbook: {e}")))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| SpmError::Format("workbook has no worksheets".into()))?
            .map_err(|e| SpmError::Format(format!("unreadable worksheet: {e}")))?;

        let (row_offset, col_offset) = range
            .start()
            .map(|(r, c)| (r as usize, c as usize))
            .unwrap_or((0, 0));
        let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); row_offset];
        for row in range.rows() {
            let mut cells = vec![Cell::Empty; col_offset];
            cells.extend(row.iter().map(cell_from_data));
            rows.push(cells);
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY)
    }

    /// Trimmed text of every cell in `row`.
    pub fn row_texts(&self, row: usize) -> Vec<String> {
        self.rows
            .get(row)
            .map(|cells| cells.iter().map(Cell::as_text).collect())
            .unwrap_or_default()
    }

    /// First row index below `limit` satisfying `pred`.
    pub fn find_row<F>(&self, limit: usize, mut pred: F) -> Option<usize>
    where
        F: FnMut(&[Cell]) -> bool,
    {
        self.rows
            .iter()
            .take(limit)
            .position(|cells| pred(cells.as_slice()))
    }
}

pub(crate) fn row_is_blank(cells: &[Cell]) -> bool {
    cells.iter().all(Cell::is_empty)
}

#[allow(unreachable_patterns)]
fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::Int(v) => Cell::Number(*v as f64),
        Data::Float(v) => Cell::Number(*v),
        Data::Bool(v) => Cell::Text(v.to_string()),
        Data::String(s) => Cell::text(s),
        Data::DateTime(dt) => {
            let serial = dt.as_f64();
            timefmt::from_spreadsheet_serial(serial)
                .map(Cell::DateTime)
                .unwrap_or(Cell::Number(serial))
        }
        Data::DateTimeIso(s) => timefmt::parse_iso_like(s)
            .map(Cell::DateTime)
            .unwrap_or_else(|| Cell::text(s)),
        Data::DurationIso(s) => Cell::text(s),
        Data::Error(_) => Cell::Empty,
        _ => Cell::Empty,
    }
}
