//! Departure detection.
//!
//! Recorders are usually switched on well before the train leaves: shunting
//! moves and stationary brake checks produce short bursts of speed that are
//! not the start of the run. Departure is the first moving sample from
//! which the train covers the minimum movement without stopping again.

use crate::{Sample, SpmError};

/// Index of the first sample with `speed >= 1` from which accumulated
/// movement reaches `min_movement_m` before any zero-speed sample.
pub fn find_departure(samples: &[Sample], min_movement_m: f64) -> Result<usize, SpmError> {
    let mut i = 0;
    while i < samples.len() {
        if samples[i].speed_kmh < 1.0 {
            i += 1;
            continue;
        }
        let mut moved = 0.0;
        let mut j = i;
        loop {
            if samples[j].speed_kmh == 0.0 {
                // every candidate before j would hit this stop too
                i = j + 1;
                break;
            }
            if j > i {
                moved += (samples[j].distance_m - samples[j - 1].distance_m).abs();
            }
            if moved >= min_movement_m {
                return Ok(i);
            }
            j += 1;
            if j == samples.len() {
                return Err(SpmError::NoDeparture);
            }
        }
    }
    Err(SpmError::NoDeparture)
}

/// Drop samples before `departure` and make its distance the zero point.
pub fn rebase_at_departure(samples: Vec<Sample>, departure: usize) -> Vec<Sample> {
    let origin = samples
        .get(departure)
        .map(|s| s.distance_m)
        .unwrap_or_default();
    samples
        .into_iter()
        .skip(departure)
        .map(|mut s| {
            s.distance_m -= origin;
            s
        })
        .collect()
}
