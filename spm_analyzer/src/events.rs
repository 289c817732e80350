//! Overspeed and stop episodes derived from the departure-aligned series.

use std::fmt;

use chrono::NaiveDateTime;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::stations::{Route, UNKNOWN_SECTION};
use crate::{seconds_between, AnalysisParams, Sample};

/// Which zero-speed samples count towards a stop.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum StopGate {
    SpeedOnly,
    /// Zero speed and this event code.
    Event(String),
}

impl StopGate {
    pub fn selects(&self, sample: &Sample) -> bool {
        sample.speed_kmh == 0.0
            && match self {
                StopGate::SpeedOnly => true,
                StopGate::Event(code) => sample.event == *code,
            }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OverspeedEpisode {
    pub section: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub min_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub start_distance_m: f64,
    pub end_distance_m: f64,
    pub sample_count: usize,
}

impl OverspeedEpisode {
    fn open(sample: &Sample, section: String) -> Self {
        Self {
            section,
            start_time: sample.time,
            end_time: sample.time,
            min_speed_kmh: sample.speed_kmh,
            max_speed_kmh: sample.speed_kmh,
            start_distance_m: sample.distance_m,
            end_distance_m: sample.distance_m,
            sample_count: 1,
        }
    }

    fn extend(&mut self, sample: &Sample) {
        self.end_time = sample.time;
        self.end_distance_m = sample.distance_m;
        self.min_speed_kmh = self.min_speed_kmh.min(sample.speed_kmh);
        self.max_speed_kmh = self.max_speed_kmh.max(sample.speed_kmh);
        self.sample_count += 1;
    }

    pub fn duration_sec(&self) -> f64 {
        seconds_between(self.start_time, self.end_time)
    }
}

/// Group samples above `mps` into episodes. An episode ends when speed
/// drops to `mps`, the section label changes, or the time step exceeds
/// `max_gap_sec`.
pub fn group_overspeeds(
    samples: &[Sample],
    mps: f64,
    route: &Route,
    max_gap_sec: f64,
) -> Vec<OverspeedEpisode> {
    let mut episodes = Vec::new();
    let mut open: Option<OverspeedEpisode> = None;
    for (i, sample) in samples.iter().enumerate() {
        if sample.speed_kmh <= mps {
            if let Some(done) = open.take() {
                episodes.push(done);
            }
            continue;
        }
        let section = route.section_label(sample.distance_m);
        let contiguous =
            i == 0 || seconds_between(samples[i - 1].time, sample.time) <= max_gap_sec;
        match open.as_mut() {
            Some(episode) if contiguous && episode.section == section => episode.extend(sample),
            _ => {
                if let Some(done) = open.replace(OverspeedEpisode::open(sample, section)) {
                    episodes.push(done);
                }
            }
        }
    }
    episodes.extend(open);
    episodes
}

/// First and last sample index of a run of stop samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StopSpan {
    pub first: usize,
    pub last: usize,
}

/// Runs of gated zero-speed samples, split where consecutive selected
/// samples are more than `max_gap_sec` apart, keeping runs longer than
/// `min_stop_sec`.
pub fn stop_spans(
    samples: &[Sample],
    gate: &StopGate,
    max_gap_sec: f64,
    min_stop_sec: f64,
) -> Vec<StopSpan> {
    let mut spans = Vec::new();
    let mut current: Option<StopSpan> = None;
    for (i, sample) in samples.iter().enumerate() {
        if !gate.selects(sample) {
            continue;
        }
        current = match current {
            Some(span) if seconds_between(samples[span.last].time, sample.time) <= max_gap_sec => {
                Some(StopSpan { last: i, ..span })
            }
            previous => {
                spans.extend(previous);
                Some(StopSpan { first: i, last: i })
            }
        };
    }
    spans.extend(current);
    spans.retain(|span| {
        seconds_between(samples[span.first].time, samples[span.last].time) > min_stop_sec
    });
    spans
}

/// Speed at a fixed distance before a stop; `None` when the series does not
/// reach that far back.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct LookbackSpeed {
    pub distance_m: f64,
    pub speed_kmh: Option<f64>,
}

impl fmt::Display for LookbackSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.speed_kmh {
            Some(speed) => write!(f, "{speed:.0}"),
            None => f.write_str("N/A"),
        }
    }
}

/// For each distance, the speed of the nearest earlier sample at least that
/// far behind `index`.
pub fn lookback_speeds(samples: &[Sample], index: usize, distances_m: &[f64]) -> Vec<LookbackSpeed> {
    let Some(stop) = samples.get(index) else {
        return Vec::new();
    };
    distances_m
        .iter()
        .map(|&distance_m| LookbackSpeed {
            distance_m,
            speed_kmh: samples[..=index]
                .iter()
                .rev()
                .find(|s| stop.distance_m - s.distance_m >= distance_m)
                .map(|s| s.speed_kmh),
        })
        .collect()
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BrakingTechnique {
    /// Speed never rises on the approach.
    Smooth,
    Uneven,
    Indeterminate,
}

impl BrakingTechnique {
    pub fn classify(profile: &[LookbackSpeed]) -> Self {
        let mut points: Vec<&LookbackSpeed> =
            profile.iter().filter(|p| p.speed_kmh.is_some()).collect();
        if points.len() < 2 {
            return BrakingTechnique::Indeterminate;
        }
        points.sort_by_key(|p| std::cmp::Reverse(OrderedFloat(p.distance_m)));
        let speeds: Vec<f64> = points.iter().filter_map(|p| p.speed_kmh).collect();
        if speeds.windows(2).any(|w| w[1] > w[0]) {
            BrakingTechnique::Uneven
        } else {
            BrakingTechnique::Smooth
        }
    }
}

impl fmt::Display for BrakingTechnique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BrakingTechnique::Smooth => "Smooth",
            BrakingTechnique::Uneven => "Uneven",
            BrakingTechnique::Indeterminate => "Indeterminate",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StopEpisode {
    /// 1-based stop number within the trip.
    pub group: usize,
    /// Index of the last stationary sample in the analysed series.
    pub index: usize,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub duration_sec: f64,
    pub location_m: f64,
    pub station_label: String,
    pub speeds_before: Vec<LookbackSpeed>,
    pub braking_technique: BrakingTechnique,
}

/// Stop episodes with location and approach profile.
pub fn detect_stops(
    samples: &[Sample],
    gate: &StopGate,
    route: &Route,
    params: &AnalysisParams,
    station_tolerance_m: f64,
) -> Vec<StopEpisode> {
    stop_spans(samples, gate, params.max_gap_sec, params.min_stop_sec)
        .into_iter()
        .enumerate()
        .map(|(n, span)| {
            let first = &samples[span.first];
            let last = &samples[span.last];
            let station_label = match route.nearest_station(last.distance_m, station_tolerance_m) {
                Some(station) => station.name.clone(),
                None => route.section_label(last.distance_m),
            };
            let speeds_before = lookback_speeds(samples, span.last, &params.lookback_distances_m);
            StopEpisode {
                group: n + 1,
                index: span.last,
                start_time: first.time,
                end_time: last.time,
                duration_sec: seconds_between(first.time, last.time),
                location_m: last.distance_m,
                station_label,
                braking_technique: BrakingTechnique::classify(&speeds_before),
                speeds_before,
            }
        })
        .collect()
}

/// Stops whose location could not be attributed to a station or section.
pub fn unlocated(stops: &[StopEpisode]) -> usize {
    stops
        .iter()
        .filter(|s| s.station_label == UNKNOWN_SECTION)
        .count()
}
