//! Vendor adapters: one row parser per recorder make, all emitting
//! [`RawRow`]s in canonical units (metres, km/h).

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::brake_test::BrakeTestTable;
use crate::events::StopGate;
use crate::grid::{self, Cell, Grid};
use crate::{pdf_text, timefmt, RawRow, SpmError};

const KM_TO_M: f64 = 1000.0;

lazy_static! {
    static ref RECORDER_ROW_START: Regex =
        Regex::new(r"^\d{2}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2}").unwrap();
    static ref TELPRO_TIME: Regex = Regex::new(r"(?i)time|date").unwrap();
    static ref TELPRO_DISTANCE: Regex = Regex::new(r"(?i)dist").unwrap();
    static ref TELPRO_SPEED: Regex = Regex::new(r"(?i)speed|kmph").unwrap();
    static ref TELPRO_EVENT: Regex = Regex::new(r"(?i)event").unwrap();
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    Vel,
    Mr,
    Telpro,
    TelproNew,
    Laxven,
    Rtis,
    Shm,
}

impl Vendor {
    pub const ALL: [Vendor; 7] = [
        Vendor::Vel,
        Vendor::Mr,
        Vendor::Telpro,
        Vendor::TelproNew,
        Vendor::Laxven,
        Vendor::Rtis,
        Vendor::Shm,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Vendor::Vel => "vel",
            Vendor::Mr => "mr",
            Vendor::Telpro => "telpro",
            Vendor::TelproNew => "telpro_new",
            Vendor::Laxven => "laxven",
            Vendor::Rtis => "rtis",
            Vendor::Shm => "shm",
        }
    }

    pub fn config(&self) -> VendorConfig {
        use Container::*;
        let standard = VendorConfig {
            name: self.name(),
            containers: &[Workbook],
            distance: DistanceEncoding::Cumulative,
            speed_filter: SpeedFilter::AsRecorded,
            station_tolerance_m: 400.0,
            brake_table: BrakeTestTable::standard(),
        };
        match self {
            Vendor::Vel | Vendor::Mr => VendorConfig {
                containers: &[Pdf, Text],
                ..standard
            },
            Vendor::Telpro | Vendor::Laxven => standard,
            Vendor::TelproNew => VendorConfig {
                distance: DistanceEncoding::Incremental,
                ..standard
            },
            Vendor::Rtis => VendorConfig {
                containers: &[Csv, Workbook],
                distance: DistanceEncoding::Incremental,
                speed_filter: SpeedFilter::GpsRounded,
                station_tolerance_m: 500.0,
                brake_table: BrakeTestTable::widened(),
                ..standard
            },
            Vendor::Shm => VendorConfig {
                containers: &[Csv, Workbook],
                distance: DistanceEncoding::Incremental,
                ..standard
            },
        }
    }

    /// Parse a recorder export. `format` is a file name or extension.
    pub fn parse(&self, input: &[u8], format: &str) -> Result<ParsedLog, SpmError> {
        let config = self.config();
        let container = Container::from_hint(format)
            .ok_or_else(|| SpmError::UnsupportedFormat(format.to_string()))?;
        if !config.containers.contains(&container) {
            return Err(SpmError::UnsupportedFormat(format!(
                "{} cannot read {:?} input ({format})",
                self, container
            )));
        }

        let extraction = match self {
            Vendor::Vel | Vendor::Mr => {
                parse_recorder_text(&pdf_text::extract_lines(input, container)?, *self)
            }
            Vendor::Telpro => parse_telpro(&load_grid(input, container)?)?,
            Vendor::TelproNew => parse_telpro_new(&load_grid(input, container)?),
            Vendor::Laxven => parse_laxven(&load_grid(input, container)?)?,
            Vendor::Rtis => parse_rtis(&load_grid(input, container)?)?,
            Vendor::Shm => parse_shm(&load_grid(input, container)?, container)?,
        };
        extraction.finish(*self, &config)
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Vendor {
    type Err = SpmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        Vendor::ALL
            .into_iter()
            .find(|v| v.name() == key)
            .ok_or_else(|| SpmError::InvalidParameter(format!("unknown vendor '{s}'")))
    }
}

/// Physical container of a recorder export.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Container {
    Pdf,
    /// Text already extracted from a PDF report.
    Text,
    Csv,
    Workbook,
}

impl Container {
    pub fn from_hint(format: &str) -> Option<Self> {
        let lc = format.trim().to_ascii_lowercase();
        let ext = lc.rsplit('.').next().unwrap_or(lc.as_str());
        match ext {
            "pdf" => Some(Container::Pdf),
            "txt" | "text" => Some(Container::Text),
            "csv" => Some(Container::Csv),
            "xlsx" | "xls" | "xlsm" | "xlsb" | "ods" => Some(Container::Workbook),
            _ => None,
        }
    }
}

/// How the distance column of a vendor is encoded.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DistanceEncoding {
    /// Odometer-style running total, already converted to metres.
    Cumulative,
    /// Metres travelled since the previous row.
    Incremental,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpeedFilter {
    AsRecorded,
    /// GPS speed: below 0.5 km/h is stationary, otherwise whole km/h.
    GpsRounded,
}

impl SpeedFilter {
    pub fn apply(&self, speed_kmh: f64) -> f64 {
        match self {
            SpeedFilter::AsRecorded => speed_kmh,
            SpeedFilter::GpsRounded if speed_kmh < 0.5 => 0.0,
            SpeedFilter::GpsRounded => speed_kmh.round(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VendorConfig {
    pub name: &'static str,
    pub containers: &'static [Container],
    pub distance: DistanceEncoding,
    pub speed_filter: SpeedFilter,
    pub station_tolerance_m: f64,
    pub brake_table: BrakeTestTable,
}

/// Rows of one export plus what the adapter learned about the file.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedLog {
    pub vendor: Vendor,
    pub rows: Vec<RawRow>,
    /// Rows skipped because their timestamp did not parse.
    pub dropped_rows: usize,
    pub encoding: DistanceEncoding,
    pub stop_gate: StopGate,
    pub header_row: Option<usize>,
    pub headers: Vec<String>,
}

struct Extraction {
    rows: Vec<RawRow>,
    dropped_rows: usize,
    first_bad_time: Option<String>,
    header_row: Option<usize>,
    headers: Vec<String>,
    stop_gate: StopGate,
}

impl Extraction {
    fn new(stop_gate: StopGate) -> Self {
        Self {
            rows: Vec::new(),
            dropped_rows: 0,
            first_bad_time: None,
            header_row: None,
            headers: Vec::new(),
            stop_gate,
        }
    }

    fn with_header(mut self, row: usize, headers: Vec<String>) -> Self {
        self.header_row = Some(row);
        self.headers = headers;
        self
    }

    fn push(
        &mut self,
        time: Option<NaiveDateTime>,
        raw_time: impl FnOnce() -> String,
        distance_m: f64,
        speed_kmh: f64,
        event: String,
    ) {
        match time {
            Some(time) => self.rows.push(RawRow {
                time,
                distance_m,
                speed_kmh,
                event,
            }),
            None => {
                self.dropped_rows += 1;
                if self.first_bad_time.is_none() {
                    self.first_bad_time = Some(raw_time());
                }
            }
        }
    }

    fn finish(self, vendor: Vendor, config: &VendorConfig) -> Result<ParsedLog, SpmError> {
        if self.rows.is_empty() {
            return Err(match self.first_bad_time {
                Some(sample) if self.dropped_rows > 0 => SpmError::DateParse(format!(
                    "none of {} rows had a readable time (first: '{sample}')",
                    self.dropped_rows
                )),
                _ => SpmError::NoData,
            });
        }
        if self.dropped_rows > 0 {
            warn!(
                "{}: dropped {} rows with unreadable time (first: '{}')",
                vendor,
                self.dropped_rows,
                self.first_bad_time.as_deref().unwrap_or_default()
            );
        }
        let rows = self
            .rows
            .into_iter()
            .map(|mut row| {
                row.speed_kmh = config.speed_filter.apply(row.speed_kmh);
                row
            })
            .collect();
        Ok(ParsedLog {
            vendor,
            rows,
            dropped_rows: self.dropped_rows,
            encoding: config.distance,
            stop_gate: self.stop_gate,
            header_row: self.header_row,
            headers: self.headers,
        })
    }
}

fn load_grid(input: &[u8], container: Container) -> Result<Grid, SpmError> {
    match container {
        Container::Csv => Grid::from_csv(input),
        Container::Workbook => Grid::from_workbook(input),
        other => Err(SpmError::UnsupportedFormat(format!(
            "{other:?} input is not tabular"
        ))),
    }
}

fn event_text(cell: &Cell) -> String {
    cell.as_text().trim().to_ascii_uppercase()
}

fn find_column(headers: &[String], re: &Regex) -> Option<usize> {
    headers.iter().position(|h| re.is_match(h))
}

fn missing_columns(headers: &[String]) -> SpmError {
    SpmError::Format(format!(
        "missing required columns (found: {})",
        headers.join(", ")
    ))
}

fn dmy_or_iso(text: &str) -> Option<NaiveDateTime> {
    timefmt::parse_dmy_flexible(text).or_else(|| timefmt::parse_iso_like(text))
}

fn slash_or_iso(text: &str) -> Option<NaiveDateTime> {
    timefmt::parse_dmy_slash_full(text).or_else(|| timefmt::parse_iso_like(text))
}

/// VEL and MR PDF reports. Table rows start with `DD-MM-YY HH:MM:SS`,
/// followed by cumulative km and speed; the event is the last column of a
/// full-width row.
fn parse_recorder_text(lines: &[String], vendor: Vendor) -> Extraction {
    let gate = match vendor {
        Vendor::Vel => StopGate::Event("STOP".into()),
        _ => StopGate::SpeedOnly,
    };
    let mut out = Extraction::new(gate);
    for line in lines {
        if !RECORDER_ROW_START.is_match(line) {
            continue;
        }
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 4 {
            continue;
        }
        let stamp = format!("{} {}", cols[0], cols[1]);
        let distance_km = grid::parse_leading_f64(cols[2]).unwrap_or(0.0);
        let speed = grid::parse_leading_f64(cols[3]).unwrap_or(0.0);
        let mut event = if cols.len() >= 12 {
            cols[cols.len() - 1].replace(',', "").to_ascii_uppercase()
        } else {
            String::new()
        };
        if speed == 0.0 && !event.contains("STOP") {
            event = "STOP".into();
        }
        out.push(
            timefmt::parse_dmy_dash_yy(&stamp),
            || stamp.clone(),
            distance_km * KM_TO_M,
            speed,
            event,
        );
    }
    out
}

/// Telpro workbook: header row sniffed within the first 11 rows.
fn parse_telpro(grid: &Grid) -> Result<Extraction, SpmError> {
    let header_row = grid
        .find_row(11, |cells| {
            cells
                .iter()
                .any(|c| c.as_text().to_ascii_lowercase().contains("speed"))
        })
        .unwrap_or(0);
    let headers = grid.row_texts(header_row);
    debug!("telpro header at row {header_row}: {headers:?}");

    let (time_col, dist_col, speed_col) = match (
        find_column(&headers, &TELPRO_TIME),
        find_column(&headers, &TELPRO_DISTANCE),
        find_column(&headers, &TELPRO_SPEED),
    ) {
        (Some(t), Some(d), Some(s)) => (t, d, s),
        _ => return Err(missing_columns(&headers)),
    };
    let event_col = find_column(&headers, &TELPRO_EVENT);

    let mut out = Extraction::new(StopGate::SpeedOnly).with_header(header_row, headers);
    for row in (header_row + 1)..grid.len() {
        if grid::row_is_blank(&grid.rows()[row]) {
            continue;
        }
        let time_cell = grid.cell(row, time_col);
        out.push(
            time_cell.as_time(dmy_or_iso),
            || time_cell.as_text(),
            grid.cell(row, dist_col).as_number() * KM_TO_M,
            grid.cell(row, speed_col).as_number(),
            event_col
                .map(|c| event_text(grid.cell(row, c)))
                .unwrap_or_default(),
        );
    }
    Ok(out)
}

/// Newer Telpro layout: no header, data from the third row, fixed columns
/// A time, B speed, C metres since previous row, F event.
fn parse_telpro_new(grid: &Grid) -> Extraction {
    const DATA_START: usize = 2;
    let mut out = Extraction::new(StopGate::Event("STOP".into()));
    for row in DATA_START..grid.len() {
        if grid::row_is_blank(&grid.rows()[row]) {
            continue;
        }
        let time_cell = grid.cell(row, 0);
        let mut event = event_text(grid.cell(row, 5));
        if event == "HALT" {
            event = "STOP".into();
        }
        out.push(
            time_cell.as_time(dmy_or_iso),
            || time_cell.as_text(),
            grid.cell(row, 2).as_number(),
            grid.cell(row, 1).as_number(),
            event,
        );
    }
    out
}

/// Laxven workbook: header at row 5 with exact column names, a units row,
/// then data.
fn parse_laxven(grid: &Grid) -> Result<Extraction, SpmError> {
    const HEADER_ROW: usize = 4;
    const DATA_START: usize = 6;
    let headers = grid.row_texts(HEADER_ROW);
    let column = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let (time_col, dist_col, speed_col, event_col) = match (
        column("Time"),
        column("Distance"),
        column("Speed"),
        column("Event"),
    ) {
        (Some(t), Some(d), Some(s), Some(e)) => (t, d, s, e),
        _ => return Err(missing_columns(&headers)),
    };

    let mut out = Extraction::new(StopGate::SpeedOnly).with_header(HEADER_ROW, headers);
    for row in DATA_START..grid.len() {
        if grid::row_is_blank(&grid.rows()[row]) {
            continue;
        }
        let time_cell = grid.cell(row, time_col);
        out.push(
            time_cell.as_time(timefmt::parse_dmy_flexible),
            || time_cell.as_text(),
            grid.cell(row, dist_col).as_number() * KM_TO_M,
            grid.cell(row, speed_col).as_number(),
            event_text(grid.cell(row, event_col)),
        );
    }

    // newer firmware reports halts as 79G, older as 9G
    let code = if out.rows.iter().any(|r| r.event == "79G") {
        "79G"
    } else {
        "9G"
    };
    debug!("laxven stop event code {code}");
    out.stop_gate = StopGate::Event(code.into());
    Ok(out)
}

/// RTIS (GPS) export: first row is the header.
fn parse_rtis(grid: &Grid) -> Result<Extraction, SpmError> {
    let headers = grid.row_texts(0);
    let lower: Vec<String> = headers.iter().map(|h| h.to_ascii_lowercase()).collect();
    let (time_col, speed_col, dist_col) = match (
        lower.iter().position(|h| h.contains("time")),
        lower.iter().position(|h| h == "speed"),
        lower.iter().position(|h| h.contains("distfromprev")),
    ) {
        (Some(t), Some(s), Some(d)) => (t, s, d),
        _ => return Err(missing_columns(&headers)),
    };

    let mut out = Extraction::new(StopGate::SpeedOnly).with_header(0, headers);
    for row in 1..grid.len() {
        if grid::row_is_blank(&grid.rows()[row]) {
            continue;
        }
        let time_cell = grid.cell(row, time_col);
        out.push(
            time_cell.as_time(timefmt::parse_iso_like),
            || time_cell.as_text(),
            grid.cell(row, dist_col).as_number(),
            grid.cell(row, speed_col).as_number(),
            String::new(),
        );
    }
    Ok(out)
}

/// SHM export: a free-form preamble, then a `Date/Time` header row.
fn parse_shm(grid: &Grid, container: Container) -> Result<Extraction, SpmError> {
    let header_row = match container {
        Container::Csv => grid
            .find_row(grid.len(), |cells| {
                let joined = cells.iter().map(Cell::as_text).collect::<Vec<_>>().join(",");
                joined.contains("Date/Time") && joined.contains("Speed")
            })
            .ok_or_else(|| SpmError::Format("header row with Date/Time and Speed not found".into()))?,
        _ => grid
            .find_row(grid.len(), |cells| {
                cells
                    .first()
                    .is_some_and(|c| c.as_text().contains("Date/Time"))
            })
            .unwrap_or(0),
    };
    let headers = grid.row_texts(header_row);
    debug!("shm header at row {header_row}: {headers:?}");
    let column = |needle: &str| headers.iter().position(|h| h.contains(needle));
    let (time_col, speed_col, dist_col) =
        match (column("Date/Time"), column("Speed"), column("Distance")) {
            (Some(t), Some(s), Some(d)) => (t, s, d),
            _ => return Err(missing_columns(&headers)),
        };

    let mut out = Extraction::new(StopGate::SpeedOnly).with_header(header_row, headers);
    for row in (header_row + 1)..grid.len() {
        if grid::row_is_blank(&grid.rows()[row]) {
            continue;
        }
        let time_cell = grid.cell(row, time_col);
        let speed = grid.cell(row, speed_col).as_number();
        let event = if speed == 0.0 { "STOP" } else { "RUN" };
        out.push(
            time_cell.as_time(slash_or_iso),
            || time_cell.as_text(),
            grid.cell(row, dist_col).as_number(),
            speed,
            event.into(),
        );
    }
    Ok(out)
}
