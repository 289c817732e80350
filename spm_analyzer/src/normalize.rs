//! Time-window selection and distance alignment.

use chrono::NaiveDateTime;

use crate::vendor::DistanceEncoding;
use crate::{RawRow, Sample, SpmError};

/// Rows with `from <= time <= to`.
pub fn filter_window(
    rows: &[RawRow],
    from: NaiveDateTime,
    to: NaiveDateTime,
) -> Result<Vec<RawRow>, SpmError> {
    let selected: Vec<RawRow> = rows
        .iter()
        .filter(|row| row.time >= from && row.time <= to)
        .cloned()
        .collect();
    if selected.is_empty() {
        return Err(SpmError::NoData);
    }
    Ok(selected)
}

/// Express every distance as metres past the from-station.
///
/// Odometer readings are offset by the from-station's position on the
/// section. Incremental vendors are accumulated over the window, starting
/// at zero on the first selected row.
pub fn align_distances(
    rows: Vec<RawRow>,
    encoding: DistanceEncoding,
    from_station_m: f64,
) -> Vec<Sample> {
    let mut travelled = 0.0;
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| {
            let distance_m = match encoding {
                DistanceEncoding::Cumulative => row.distance_m - from_station_m,
                DistanceEncoding::Incremental => {
                    if i > 0 {
                        travelled += row.distance_m;
                    }
                    travelled
                }
            };
            Sample {
                time: row.time,
                distance_m,
                speed_kmh: row.speed_kmh,
                event: row.event,
            }
        })
        .collect()
}

/// Number of places where the distance goes backwards.
pub fn count_reversals(samples: &[Sample]) -> usize {
    samples
        .windows(2)
        .filter(|pair| pair[1].distance_m < pair[0].distance_m)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(sec: u32, distance_m: f64, speed_kmh: f64) -> RawRow {
        RawRow {
            time: NaiveDate::from_ymd_opt(2026, 1, 19)
                .unwrap()
                .and_hms_opt(10, 0, sec)
                .unwrap(),
            distance_m,
            speed_kmh,
            event: String::new(),
        }
    }

    #[test]
    fn window_is_inclusive() {
        let rows: Vec<RawRow> = (0..10).map(|s| row(s, 0.0, 0.0)).collect();
        let kept = filter_window(&rows, rows[2].time, rows[5].time).unwrap();
        assert_eq!(kept.len(), 4);
        assert_eq!(kept[0].time, rows[2].time);
        assert_eq!(kept[3].time, rows[5].time);
    }

    #[test]
    fn empty_window_is_no_data() {
        let rows = vec![row(0, 0.0, 0.0)];
        let err = filter_window(&rows, row(10, 0.0, 0.0).time, row(20, 0.0, 0.0).time);
        assert!(matches!(err, Err(SpmError::NoData)));
    }

    #[test]
    fn cumulative_is_offset_by_station() {
        let rows = vec![row(0, 12_500.0, 0.0), row(1, 12_620.0, 30.0)];
        let samples = align_distances(rows, DistanceEncoding::Cumulative, 12_000.0);
        assert_eq!(samples[0].distance_m, 500.0);
        assert_eq!(samples[1].distance_m, 620.0);
    }

    #[test]
    fn incremental_starts_at_zero() {
        let rows = vec![row(0, 7.0, 25.0), row(1, 7.0, 25.0), row(2, 8.0, 29.0)];
        let samples = align_distances(rows, DistanceEncoding::Incremental, 12_000.0);
        let d: Vec<f64> = samples.iter().map(|s| s.distance_m).collect();
        assert_eq!(d, vec![0.0, 7.0, 15.0]);
    }

    #[test]
    fn reversals_are_counted() {
        let rows = vec![row(0, 100.0, 5.0), row(1, 90.0, 5.0), row(2, 120.0, 5.0)];
        let samples = align_distances(rows, DistanceEncoding::Cumulative, 0.0);
        assert_eq!(count_reversals(&samples), 1);
        assert_eq!(samples[1].distance_m, 90.0);
    }
}
