//! Per-trip result record handed to the report front-end.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::brake_test::BrakeTestReport;
use crate::events::{OverspeedEpisode, StopEpisode};
use crate::normalize::count_reversals;
use crate::stations::Route;
use crate::vendor::Vendor;
use crate::{seconds_between, AnalysisParams, Sample, SpmError, TripDetails};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TripSummary {
    pub sample_count: usize,
    pub dropped_rows: usize,
    pub distance_reversals: usize,
    pub departure_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub running_duration_sec: f64,
    pub distance_m: f64,
    pub average_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub stop_count: usize,
    pub total_stop_sec: f64,
    pub overspeed_count: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChartPoint {
    pub time: NaiveDateTime,
    pub speed_kmh: f64,
    pub distance_m: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct InputFingerprint {
    pub input_sha256: Option<String>,
    pub params_sha256: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TripAnalysis {
    pub vendor: Vendor,
    pub trip: TripDetails,
    pub params: AnalysisParams,
    pub summary: TripSummary,
    pub route: Route,
    pub overspeeds: Vec<OverspeedEpisode>,
    pub stops: Vec<StopEpisode>,
    pub brake_tests: Option<BrakeTestReport>,
    pub chart: Vec<ChartPoint>,
    pub fingerprint: InputFingerprint,
}

pub fn summarize(
    series: &[Sample],
    dropped_rows: usize,
    stops: &[StopEpisode],
    overspeeds: &[OverspeedEpisode],
) -> TripSummary {
    let mut summary = TripSummary {
        sample_count: series.len(),
        dropped_rows,
        distance_reversals: count_reversals(series),
        stop_count: stops.len(),
        total_stop_sec: stops.iter().map(|s| s.duration_sec).sum(),
        overspeed_count: overspeeds.len(),
        ..TripSummary::default()
    };
    let (Some(first), Some(last)) = (series.first(), series.last()) else {
        return summary;
    };
    summary.departure_time = Some(first.time);
    summary.end_time = Some(last.time);
    summary.running_duration_sec = seconds_between(first.time, last.time);
    summary.distance_m = last.distance_m - first.distance_m;
    summary.max_speed_kmh = series
        .iter()
        .map(|s| s.speed_kmh)
        .fold(0.0, f64::max);
    if summary.running_duration_sec > 0.0 {
        summary.average_speed_kmh = summary.distance_m / summary.running_duration_sec * 3.6;
    }
    summary
}

/// Every `ceil(n / max_points)`-th sample.
pub fn chart_series(series: &[Sample], max_points: usize) -> Vec<ChartPoint> {
    let stride = series.len().div_ceil(max_points.max(1)).max(1);
    series
        .iter()
        .step_by(stride)
        .map(|s| ChartPoint {
            time: s.time,
            speed_kmh: s.speed_kmh,
            distance_m: s.distance_m,
        })
        .collect()
}

pub fn params_hash_sha256(params: &AnalysisParams) -> Result<String, SpmError> {
    let bytes =
        serde_json::to_vec(params).map_err(|e| SpmError::InvalidParameter(e.to_string()))?;
    Ok(sha256_hex(&bytes))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
