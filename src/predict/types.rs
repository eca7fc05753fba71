use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// A single instantaneous look at the satellite from the station.
/// Angles are radians, azimuth within [0, 2π).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PassEvent {
    pub time: DateTime<Utc>,
    pub az: f64,
    pub el: f64,
}

/// Rise, one or more culminations and fall of one pass, strictly ordered in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassInfo {
    pub rise: PassEvent,
    pub culminations: Vec<PassEvent>,
    pub fall: PassEvent,
}

impl PassInfo {
    /// The highest culmination, or the rise for a pass without one.
    pub fn peak(&self) -> &PassEvent {
        self.culminations
            .iter()
            .max_by(|a, b| a.el.total_cmp(&b.el))
            .unwrap_or(&self.rise)
    }

    pub fn duration(&self) -> Duration {
        self.fall.time - self.rise.time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackPoint {
    pub time: DateTime<Utc>,
    pub az: f64,
    pub el: f64,
}

/// Range velocity in m/s, negative while the satellite approaches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DopplerPoint {
    pub time: DateTime<Utc>,
    pub range_velocity: f64,
}

/// Linear interpolation of range velocity at `at`, held constant outside the series.
pub fn range_velocity_at(series: &[DopplerPoint], at: DateTime<Utc>) -> Option<f64> {
    let first = series.first()?;
    let last = series.last()?;
    if at <= first.time {
        return Some(first.range_velocity);
    }
    if at >= last.time {
        return Some(last.range_velocity);
    }
    let idx = series.partition_point(|p| p.time <= at);
    let (a, b) = (&series[idx - 1], &series[idx]);
    let span = (b.time - a.time).num_microseconds()? as f64;
    let into = (at - a.time).num_microseconds()? as f64;
    let frac = if span > 0.0 { into / span } else { 0.0 };
    Some(a.range_velocity + frac * (b.range_velocity - a.range_velocity))
}

/// Temperature and pressure used for refraction correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weather {
    pub temperature_c: f64,
    pub pressure_mbar: f64,
}

impl Default for Weather {
    fn default() -> Self {
        Self {
            temperature_c: 25.0,
            pressure_mbar: 1010.0,
        }
    }
}

/// Serializable pass summary in degrees for humans and scripts.
#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    pub satellite: String,
    pub rise: DateTime<Utc>,
    pub culmination: DateTime<Utc>,
    pub fall: DateTime<Utc>,
    pub max_elevation_deg: f64,
    pub rise_azimuth_deg: f64,
    pub fall_azimuth_deg: f64,
    pub duration_seconds: i64,
}

impl PassSummary {
    pub fn new(satellite: &str, info: &PassInfo) -> Self {
        let peak = info.peak();
        Self {
            satellite: satellite.to_string(),
            rise: info.rise.time,
            culmination: peak.time,
            fall: info.fall.time,
            max_elevation_deg: round2(peak.el.to_degrees()),
            rise_azimuth_deg: round2(info.rise.az.to_degrees()),
            fall_azimuth_deg: round2(info.fall.az.to_degrees()),
            duration_seconds: info.duration().num_seconds(),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
