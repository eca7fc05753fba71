use chrono::{DateTime, Duration, Utc};

use crate::predict::error::PredictError;
use crate::predict::pass_finder::{find_events, refine_maximum, EventKind, FINE_STEP_MILLIS};
use crate::predict::types::{DopplerPoint, PassEvent, PassInfo, TrackPoint, Weather};
use crate::predict::{Ephemeris, GroundStation};

pub const DEFAULT_MAX_REJECTED_PASSES: usize = 100;
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::seconds(2);

/// Predicts passes of a satellite over one station and samples their tracks.
#[derive(Debug, Clone)]
pub struct Tracker {
    station: GroundStation,
    max_rejected: usize,
    sample_interval: Duration,
}

impl Tracker {
    pub fn new(station: GroundStation) -> Self {
        Self {
            station,
            max_rejected: DEFAULT_MAX_REJECTED_PASSES,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }

    pub fn with_max_rejected(mut self, max_rejected: usize) -> Self {
        self.max_rejected = max_rejected.max(1);
        self
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        if interval > Duration::zero() {
            self.sample_interval = interval;
        }
        self
    }

    pub fn station(&self) -> &GroundStation {
        &self.station
    }

    /// Finds the first pass in `(after, after + lookahead]` whose highest
    /// culmination reaches `min_elevation` (radians).
    ///
    /// A pass already in progress at `after` is reported with a rise at
    /// `after`. A pass still rising when the window closes is cut short with
    /// a fall at the end of the window.
    pub fn next_pass<E: Ephemeris + ?Sized>(
        &self,
        sat: &E,
        after: DateTime<Utc>,
        min_elevation: f64,
        lookahead: Duration,
    ) -> Result<PassInfo, PredictError> {
        let end = after + lookahead;
        let events = find_events(sat, &self.station, after, end)?;
        if events.is_empty() {
            log::error!("No pass of {} found before {}", sat.name(), end);
            return Err(PredictError::NoEvents {
                satellite: sat.name().to_string(),
                start: after,
                end,
            });
        }

        let mut groups: Vec<Vec<DateTime<Utc>>> = Vec::new();
        let mut current: Vec<DateTime<Utc>> = Vec::new();

        match events[0].kind {
            EventKind::Rise => {}
            EventKind::Culmination => current.push(after),
            EventKind::Fall => {
                // Past the highest point, the rest of the pass is still worth working
                let left = events[0].time - after;
                log::info!("{} is setting, {}s of this pass left", sat.name(), left.num_seconds());
                current.push(after);
                current.push(after + Duration::milliseconds(FINE_STEP_MILLIS).min(left / 2));
            }
        }

        for event in &events {
            current.push(event.time);
            if event.kind == EventKind::Fall {
                groups.push(std::mem::take(&mut current));
            }
        }

        // The window may close mid-pass. Keep it if it already culminated.
        match events.last().map(|e| e.kind) {
            Some(EventKind::Culmination) if current.len() >= 2 && current.last() < Some(&end) => {
                log::warn!("Pass of {} truncated at end of lookahead {}", sat.name(), end);
                current.push(end);
                groups.push(current);
            }
            Some(EventKind::Rise) => {
                log::debug!("Ignoring pass of {} rising at end of lookahead", sat.name());
            }
            _ => {}
        }

        let mut rejected = 0;
        for times in groups {
            let info = self.build_pass_info(sat, &times)?;
            if info.culminations.iter().any(|c| c.el >= min_elevation) {
                return Ok(info);
            }
            rejected += 1;
            if rejected >= self.max_rejected {
                log::warn!(
                    "Gave up after {} passes of {} below {:.1}°el",
                    rejected,
                    sat.name(),
                    min_elevation.to_degrees()
                );
                return Err(PredictError::CandidateLimit {
                    satellite: sat.name().to_string(),
                    rejected,
                    min_elevation_deg: min_elevation.to_degrees(),
                });
            }
        }

        log::warn!(
            "No passes for {} before {} with elevation >= {:.1}°",
            sat.name(),
            end,
            min_elevation.to_degrees()
        );
        Err(PredictError::NoPass {
            satellite: sat.name().to_string(),
            min_elevation_deg: min_elevation.to_degrees(),
            end,
        })
    }

    fn build_pass_info<E: Ephemeris + ?Sized>(
        &self,
        sat: &E,
        times: &[DateTime<Utc>],
    ) -> Result<PassInfo, PredictError> {
        // Refraction is left out here, culminations may be days away
        let mut events = times
            .iter()
            .map(|&t| {
                let look = sat.look(&self.station, t)?;
                Ok(PassEvent {
                    time: t,
                    az: look.az,
                    el: look.el,
                })
            })
            .collect::<Result<Vec<_>, PredictError>>()?;
        let fall = events.pop().ok_or_else(|| PredictError::Propagation("empty pass".into()))?;
        let rise = events.remove(0);
        if events.is_empty() {
            // Too short for the coarse scan to bracket its maximum
            let (time, el) = refine_maximum(sat, &self.station, rise.time, fall.time)?;
            let az = sat.look(&self.station, time)?.az;
            events.push(PassEvent { time, az, el });
        }
        Ok(PassInfo {
            rise,
            culminations: events,
            fall,
        })
    }

    /// Samples a pass every `sample_interval` from rise to fall, returning
    /// refraction corrected pointing and range velocity on the same time grid.
    pub fn track<E: Ephemeris + ?Sized>(
        &self,
        sat: &E,
        pass: &PassInfo,
        weather: Weather,
    ) -> Result<(Vec<TrackPoint>, Vec<DopplerPoint>), PredictError> {
        let times = linspace(pass.rise.time, pass.fall.time, self.sample_count(pass));

        let mut pointing = Vec::with_capacity(times.len());
        let mut doppler = Vec::with_capacity(times.len());
        for time in times {
            let look = sat.look(&self.station, time)?;
            let el = refract(look.el.to_degrees(), weather).to_radians();
            pointing.push(TrackPoint {
                time,
                az: look.az,
                el,
            });
            doppler.push(DopplerPoint {
                time,
                range_velocity: look.range_velocity,
            });
        }

        log::debug!(
            "Sampled {} points of {} from {} to {}",
            pointing.len(),
            sat.name(),
            pass.rise.time,
            pass.fall.time
        );
        Ok((pointing, doppler))
    }

    fn sample_count(&self, pass: &PassInfo) -> usize {
        let duration_ms = pass.duration().num_milliseconds().max(0);
        let step_ms = self.sample_interval.num_milliseconds().max(1);
        ((duration_ms / step_ms) as usize).max(2)
    }
}

/// `count` evenly spaced instants from `start` to `end` inclusive.
pub fn linspace(start: DateTime<Utc>, end: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
    if count < 2 {
        return vec![start];
    }
    let span_us = (end - start).num_microseconds().unwrap_or(0) as f64;
    (0..count)
        .map(|i| {
            let offset = span_us * i as f64 / (count - 1) as f64;
            start + Duration::microseconds(offset.round() as i64)
        })
        .collect()
}

/// Bennett's refraction in degrees for an apparent altitude, scaled for
/// temperature and pressure. Zero outside [-1°, 89.9°].
pub fn refraction(alt_deg: f64, weather: Weather) -> f64 {
    if !(-1.0..=89.9).contains(&alt_deg) {
        return 0.0;
    }
    let r = 0.016667 / (alt_deg + 7.31 / (alt_deg + 4.4)).to_radians().tan();
    r * (0.28 * weather.pressure_mbar / (weather.temperature_c + 273.0))
}

/// Apparent altitude of a body at true altitude `alt_deg`.
pub fn refract(alt_deg: f64, weather: Weather) -> f64 {
    let mut apparent = alt_deg;
    for _ in 0..20 {
        let next = alt_deg + refraction(apparent, weather);
        let converged = (next - apparent).abs() < 3.0e-5;
        apparent = next;
        if converged {
            break;
        }
    }
    apparent
}
