//! Speed-recorder (SPM) trip analysis library.
//!
//! Recorder exports from several vendors are parsed into a common row
//! sequence, normalized into a distance-aligned series that starts at the
//! train's real departure, and reduced to the compliance events a reviewer
//! needs: overspeed episodes, stops with their braking profile, and the
//! in-trip brake tests.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod brake_test;
pub mod departure;
pub mod events;
pub mod grid;
pub mod normalize;
pub mod pdf_text;
pub mod report;
pub mod stations;
pub mod timefmt;
pub mod vendor;

pub use brake_test::{
    BrakeTestOutcome, BrakeTestReport, BrakeTestResult, BrakeTestTable, BrakeTestWindows,
    SpeedWindow,
};
pub use events::{BrakingTechnique, LookbackSpeed, OverspeedEpisode, StopEpisode, StopGate};
pub use report::{ChartPoint, InputFingerprint, TripAnalysis, TripSummary};
pub use stations::{Route, RouteStation, Station, StationTable, UNKNOWN_SECTION};
pub use vendor::{Container, DistanceEncoding, ParsedLog, Vendor, VendorConfig};

#[derive(Error, Debug)]
pub enum SpmError {
    #[error("format error: {0}")]
    Format(String),
    #[error("unparseable timestamp: {0}")]
    DateParse(String),
    #[error("no data found in the selected time range")]
    NoData,
    #[error("station {station} not found in section {section}")]
    StationNotFound { section: String, station: String },
    #[error("no valid departure found")]
    NoDeparture,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),
    #[error("station table error: {0}")]
    StationTable(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Rolling-stock class; selects the brake-test speed windows.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RakeType {
    Goods,
    Coaching,
    Memu,
}

impl Default for RakeType {
    fn default() -> Self {
        RakeType::Goods
    }
}

impl fmt::Display for RakeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RakeType::Goods => "GOODS",
            RakeType::Coaching => "COACHING",
            RakeType::Memu => "MEMU",
        };
        f.write_str(name)
    }
}

impl FromStr for RakeType {
    type Err = SpmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GOODS" => Ok(RakeType::Goods),
            "COACHING" => Ok(RakeType::Coaching),
            "MEMU" => Ok(RakeType::Memu),
            other => Err(SpmError::InvalidParameter(format!("unknown rake type '{other}'"))),
        }
    }
}

/// One row as emitted by a vendor adapter.
///
/// Units are already canonical (metres, km/h); `distance_m` is either an
/// odometer reading or a per-row increment depending on the vendor's
/// [`DistanceEncoding`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RawRow {
    pub time: NaiveDateTime,
    pub distance_m: f64,
    pub speed_kmh: f64,
    pub event: String,
}

/// One normalized recorder reading.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub time: NaiveDateTime,
    pub distance_m: f64,
    pub speed_kmh: f64,
    pub event: String,
}

impl Sample {
    pub fn new(time: NaiveDateTime, distance_m: f64, speed_kmh: f64) -> Self {
        Self {
            time,
            distance_m,
            speed_kmh,
            event: String::new(),
        }
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }
}

/// Seconds elapsed from `a` to `b`.
pub(crate) fn seconds_between(a: NaiveDateTime, b: NaiveDateTime) -> f64 {
    (b - a).num_milliseconds() as f64 / 1000.0
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CrewMember {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub designation: String,
    #[serde(default)]
    pub group_cli: String,
    #[serde(default)]
    pub cug_number: String,
}

/// Trip metadata entered by the reviewer alongside the recorder export.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TripDetails {
    #[serde(default)]
    pub loco_number: String,
    #[serde(default)]
    pub train_number: String,
    #[serde(default)]
    pub rake_type: RakeType,
    pub max_permissible_speed_kmh: f64,
    pub section: String,
    pub from_station: String,
    pub to_station: String,
    pub from_time: NaiveDateTime,
    pub to_time: NaiveDateTime,
    #[serde(default)]
    pub loco_pilot: Option<CrewMember>,
    #[serde(default)]
    pub assistant_loco_pilot: Option<CrewMember>,
    #[serde(default)]
    pub analysed_by: String,
}

impl TripDetails {
    /// Checks that must pass before any file is read.
    pub fn validate(&self) -> Result<(), SpmError> {
        if self.to_time <= self.from_time {
            return Err(SpmError::Validation(
                "to date/time must be later than from date/time".into(),
            ));
        }
        let from = stations::normalize_name(&self.from_station);
        let to = stations::normalize_name(&self.to_station);
        if from.is_empty() || to.is_empty() {
            return Err(SpmError::Validation("from and to stations are required".into()));
        }
        if from == to {
            return Err(SpmError::Validation(
                "from and to stations cannot be the same".into(),
            ));
        }
        if !self.max_permissible_speed_kmh.is_finite() || self.max_permissible_speed_kmh <= 0.0 {
            return Err(SpmError::InvalidParameter(format!(
                "maximum permissible speed must be positive, got {}",
                self.max_permissible_speed_kmh
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisParams {
    pub max_gap_sec: f64,
    pub min_stop_sec: f64,
    pub departure_min_movement_m: f64,
    pub lookback_distances_m: Vec<f64>,
    pub station_tolerance_m: Option<f64>,
    pub brake_tests: bool,
    pub brake_test_max_duration_sec: f64,
    pub reacceleration_kmh: f64,
    pub reacceleration_sec: f64,
    pub chart_max_points: usize,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            max_gap_sec: 10.0,
            min_stop_sec: 10.0,
            departure_min_movement_m: 200.0,
            lookback_distances_m: vec![1000.0, 800.0, 500.0, 100.0, 50.0],
            station_tolerance_m: None,
            brake_tests: true,
            brake_test_max_duration_sec: 60.0,
            reacceleration_kmh: 2.0,
            reacceleration_sec: 2.0,
            chart_max_points: 500,
        }
    }
}

impl AnalysisParams {
    pub fn validate(&self) -> Result<(), SpmError> {
        let non_negative = [
            ("max_gap_sec", self.max_gap_sec),
            ("min_stop_sec", self.min_stop_sec),
            ("departure_min_movement_m", self.departure_min_movement_m),
            ("brake_test_max_duration_sec", self.brake_test_max_duration_sec),
            ("reacceleration_kmh", self.reacceleration_kmh),
            ("reacceleration_sec", self.reacceleration_sec),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(SpmError::InvalidParameter(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.lookback_distances_m.iter().any(|d| !d.is_finite() || *d <= 0.0) {
            return Err(SpmError::InvalidParameter(
                "lookback distances must be positive".into(),
            ));
        }
        if let Some(tol) = self.station_tolerance_m {
            if !tol.is_finite() || tol < 0.0 {
                return Err(SpmError::InvalidParameter(format!(
                    "station tolerance must be non-negative, got {tol}"
                )));
            }
        }
        if self.chart_max_points == 0 {
            return Err(SpmError::InvalidParameter(
                "chart_max_points must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Parse a recorder export for `vendor` using the provided format hint
/// (file name or extension).
pub fn parse_log(input: &[u8], vendor: Vendor, format: &str) -> Result<ParsedLog, SpmError> {
    vendor.parse(input, format)
}

/// Run the full pipeline on a raw recorder export.
pub fn analyze_trip(
    input: &[u8],
    format: &str,
    vendor: Vendor,
    stations: &StationTable,
    trip: &TripDetails,
    params: &AnalysisParams,
) -> Result<TripAnalysis, SpmError> {
    trip.validate()?;
    params.validate()?;
    let log = parse_log(input, vendor, format)?;
    let mut analysis = analyze_log(log, stations, trip, params)?;
    analysis.fingerprint.input_sha256 = Some(report::sha256_hex(input));
    Ok(analysis)
}

/// Run the pipeline on rows that were already parsed by a vendor adapter.
pub fn analyze_log(
    log: ParsedLog,
    stations: &StationTable,
    trip: &TripDetails,
    params: &AnalysisParams,
) -> Result<TripAnalysis, SpmError> {
    trip.validate()?;
    params.validate()?;
    let config = log.vendor.config();

    let windowed = normalize::filter_window(&log.rows, trip.from_time, trip.to_time)?;
    let route = stations.route(&trip.section, &trip.from_station, &trip.to_station)?;
    let aligned = normalize::align_distances(windowed, log.encoding, route.from_distance_m);

    let departure_idx = departure::find_departure(&aligned, params.departure_min_movement_m)?;
    debug!(
        "departure at index {} ({})",
        departure_idx, aligned[departure_idx].time
    );
    let series = departure::rebase_at_departure(aligned, departure_idx);

    let overspeeds = events::group_overspeeds(
        &series,
        trip.max_permissible_speed_kmh,
        &route,
        params.max_gap_sec,
    );
    let tolerance = params
        .station_tolerance_m
        .unwrap_or(config.station_tolerance_m);
    let stops = events::detect_stops(&series, &log.stop_gate, &route, params, tolerance);

    let brake_tests = if params.brake_tests {
        let windows = config.brake_table.windows(trip.rake_type);
        Some(brake_test::evaluate(
            &series,
            windows,
            &brake_test::ReductionLimits::from_params(params),
        ))
    } else {
        None
    };

    let summary = report::summarize(&series, log.dropped_rows, &stops, &overspeeds);
    if summary.distance_reversals > 0 {
        warn!(
            "{} distance reversals passed through unchanged",
            summary.distance_reversals
        );
    }
    let chart = report::chart_series(&series, params.chart_max_points);
    let fingerprint = InputFingerprint {
        input_sha256: None,
        params_sha256: report::params_hash_sha256(params)?,
    };

    Ok(TripAnalysis {
        vendor: log.vendor,
        trip: trip.clone(),
        params: params.clone(),
        summary,
        route,
        overspeeds,
        stops,
        brake_tests,
        chart,
        fingerprint,
    })
}
