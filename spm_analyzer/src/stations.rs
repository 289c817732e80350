//! Station reference table and the route between two stations of a section.

use std::collections::HashMap;
use std::io::Read;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::grid::parse_leading_f64;
use crate::SpmError;

/// Label used when a distance falls outside every station interval.
pub const UNKNOWN_SECTION: &str = "Unknown";

/// Canonical form used to compare section and station names.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_uppercase()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Station {
    pub name: String,
    /// Position along the section.
    pub cumulative_distance_m: f64,
}

/// Stations of every section, in table order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StationTable {
    sections: HashMap<String, Vec<Station>>,
}

impl StationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a station unless the section already lists it.
    pub fn insert(&mut self, section: &str, station: &str, cumulative_distance_m: f64) {
        let name = normalize_name(station);
        if name.is_empty() {
            return;
        }
        let stations = self.sections.entry(normalize_name(section)).or_default();
        if stations.iter().any(|s| s.name == name) {
            return;
        }
        stations.push(Station {
            name,
            cumulative_distance_m,
        });
    }

    /// Read the station/signal reference CSV: `SECTION`, `STATION` and a
    /// cumulative distance column in metres (header containing `CUM` and
    /// `DIST`).
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, SpmError> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| SpmError::StationTable(e.to_string()))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_ascii_uppercase())
            .collect();
        let section_col = headers.iter().position(|h| h == "SECTION");
        let station_col = headers.iter().position(|h| h == "STATION");
        let dist_col = headers
            .iter()
            .position(|h| h.contains("CUM") && h.contains("DIST"));
        let (section_col, station_col, dist_col) = match (section_col, station_col, dist_col) {
            (Some(a), Some(b), Some(c)) => (a, b, c),
            _ => {
                return Err(SpmError::StationTable(format!(
                    "expected SECTION, STATION and cumulative distance columns (found: {})",
                    headers.join(", ")
                )))
            }
        };

        let mut table = Self::new();
        for record in rdr.records() {
            let record = record.map_err(|e| SpmError::StationTable(e.to_string()))?;
            let field = |idx: usize| record.get(idx).unwrap_or("").trim();
            let distance = parse_leading_f64(field(dist_col)).unwrap_or(0.0);
            table.insert(field(section_col), field(station_col), distance);
        }
        debug!("loaded {} sections", table.sections.len());
        Ok(table)
    }

    pub fn section(&self, section: &str) -> Option<&[Station]> {
        self.sections
            .get(&normalize_name(section))
            .map(Vec::as_slice)
    }

    /// Section names, sorted.
    pub fn sections(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Stations between `from` and `to` inclusive, ordered from the
    /// from-station with distances measured from it.
    pub fn route(&self, section: &str, from: &str, to: &str) -> Result<Route, SpmError> {
        let not_found = |station: &str| SpmError::StationNotFound {
            section: section.to_string(),
            station: station.to_string(),
        };
        let stations = self.section(section).ok_or_else(|| not_found(from))?;
        let from_name = normalize_name(from);
        let to_name = normalize_name(to);
        let from_idx = stations
            .iter()
            .position(|s| s.name == from_name)
            .ok_or_else(|| not_found(from))?;
        let to_idx = stations
            .iter()
            .position(|s| s.name == to_name)
            .ok_or_else(|| not_found(to))?;

        let from_distance_m = stations[from_idx].cumulative_distance_m;
        let direction = if from_idx > to_idx { -1.0 } else { 1.0 };
        let along = |s: &Station| RouteStation {
            name: s.name.clone(),
            distance_m: (s.cumulative_distance_m - from_distance_m) * direction,
        };
        let mut route_stations: Vec<RouteStation> = stations
            [from_idx.min(to_idx)..=from_idx.max(to_idx)]
            .iter()
            .map(along)
            .collect();
        if from_idx > to_idx {
            route_stations.reverse();
        }

        Ok(Route {
            section: normalize_name(section),
            from_station: from_name,
            to_station: to_name,
            from_distance_m,
            stations: route_stations,
            section_stations: stations.iter().map(along).collect(),
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RouteStation {
    pub name: String,
    /// Distance from the from-station.
    pub distance_m: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Route {
    pub section: String,
    pub from_station: String,
    pub to_station: String,
    /// Cumulative position of the from-station on the section.
    pub from_distance_m: f64,
    pub stations: Vec<RouteStation>,
    /// Every station of the section, at signed distances along the
    /// direction of travel.
    pub section_stations: Vec<RouteStation>,
}

impl Route {
    /// `"A-B"` for the first station interval `[A, B)` containing
    /// `distance_m`, else [`UNKNOWN_SECTION`].
    pub fn section_label(&self, distance_m: f64) -> String {
        self.stations
            .windows(2)
            .find(|pair| distance_m >= pair[0].distance_m && distance_m < pair[1].distance_m)
            .map(|pair| format!("{}-{}", pair[0].name, pair[1].name))
            .unwrap_or_else(|| UNKNOWN_SECTION.to_string())
    }

    /// Closest station of the section strictly within `tolerance_m`,
    /// including stations beyond either end of the route.
    pub fn nearest_station(&self, distance_m: f64, tolerance_m: f64) -> Option<&RouteStation> {
        self.section_stations
            .iter()
            .filter(|s| (s.distance_m - distance_m).abs() < tolerance_m)
            .min_by_key(|s| OrderedFloat((s.distance_m - distance_m).abs()))
    }
}
