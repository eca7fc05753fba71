use chrono::{DateTime, Duration, Utc};

use crate::predict::error::PredictError;
use crate::predict::{Ephemeris, GroundStation};

const COARSE_STEP_SECONDS: i64 = 30; // coarse scan of the whole window
pub(crate) const FINE_STEP_MILLIS: i64 = 500; // refinement resolution
const HORIZON_ELEVATION: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum EventKind {
    Rise,
    Culmination,
    Fall,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizonEvent {
    pub time: DateTime<Utc>,
    pub kind: EventKind,
}

/// Finds horizon crossings and elevation maxima above the horizon within
/// `(start, end]`, sorted by time.
pub fn find_events<E: Ephemeris + ?Sized>(
    sat: &E,
    station: &GroundStation,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<HorizonEvent>, PredictError> {
    let coarse_step = Duration::seconds(COARSE_STEP_SECONDS);
    let elevation = |t: DateTime<Utc>| sat.look(station, t).map(|l| l.el);

    let mut events = Vec::new();
    // Last two coarse samples, for crossings and maxima. Seeded one step
    // before the window so a maximum in the first interval is bracketed.
    let seed = start - coarse_step;
    let mut prev2: Option<(DateTime<Utc>, f64)> = None;
    let mut prev: Option<(DateTime<Utc>, f64)> = Some((seed, elevation(seed)?));
    let mut cursor = start;

    loop {
        let el = elevation(cursor)?;

        if let (Some((t0, e0)), Some((_, e1))) = (prev2, prev) {
            if e0 < e1 && e1 >= el && e1 > HORIZON_ELEVATION {
                let (t, peak) = refine_maximum(sat, station, t0, cursor)?;
                if peak > HORIZON_ELEVATION {
                    events.push(HorizonEvent {
                        time: t,
                        kind: EventKind::Culmination,
                    });
                }
            }
        }

        if let Some((prev_t, prev_el)) = prev {
            let rising = prev_el < HORIZON_ELEVATION && el >= HORIZON_ELEVATION;
            let setting = prev_el >= HORIZON_ELEVATION && el < HORIZON_ELEVATION;
            if rising || setting {
                let t = refine_crossing(sat, station, prev_t, cursor, rising)?;
                events.push(HorizonEvent {
                    time: t,
                    kind: if rising { EventKind::Rise } else { EventKind::Fall },
                });
            }
        }

        prev2 = prev;
        prev = Some((cursor, el));

        if cursor >= end {
            break;
        }
        cursor = (cursor + coarse_step).min(end);
    }

    events.retain(|e| e.time > start && e.time <= end);
    events.sort_by_key(|e| e.time);
    Ok(events)
}

/// Binary search to find exact horizon crossing time
fn refine_crossing<E: Ephemeris + ?Sized>(
    sat: &E,
    station: &GroundStation,
    before: DateTime<Utc>,
    after: DateTime<Utc>,
    rising: bool,
) -> Result<DateTime<Utc>, PredictError> {
    let mut low = before;
    let mut high = after;

    while (high - low).num_milliseconds() > FINE_STEP_MILLIS {
        let mid = low + (high - low) / 2;
        let above = sat.look(station, mid)?.el >= HORIZON_ELEVATION;
        if above == rising {
            high = mid;
        } else {
            low = mid;
        }
    }

    Ok(high)
}

/// Ternary search for the elevation maximum inside a bracketing interval.
pub(crate) fn refine_maximum<E: Ephemeris + ?Sized>(
    sat: &E,
    station: &GroundStation,
    before: DateTime<Utc>,
    after: DateTime<Utc>,
) -> Result<(DateTime<Utc>, f64), PredictError> {
    let mut low = before;
    let mut high = after;

    while (high - low).num_milliseconds() > FINE_STEP_MILLIS {
        let third = (high - low) / 3;
        let m1 = low + third;
        let m2 = high - third;
        if sat.look(station, m1)?.el < sat.look(station, m2)?.el {
            low = m1;
        } else {
            high = m2;
        }
    }

    let t = low + (high - low) / 2;
    Ok((t, sat.look(station, t)?.el))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::predict::ephemeris::Look;
    use chrono::TimeZone;
    use std::f64::consts::PI;

    /// Elevation follows a sine wave, positive half of every period is a pass.
    pub struct SineSky {
        pub epoch: DateTime<Utc>,
        pub period_s: f64,
        pub peak: f64,
        pub offset: f64,
    }

    impl Ephemeris for SineSky {
        fn name(&self) -> &str {
            "sine"
        }

        fn epoch(&self) -> DateTime<Utc> {
            self.epoch
        }

        fn look(&self, _station: &GroundStation, at: DateTime<Utc>) -> Result<Look, PredictError> {
            let s = (at - self.epoch).num_milliseconds() as f64 / 1000.0;
            let phase = 2.0 * PI * s / self.period_s;
            Ok(Look {
                az: (phase / 2.0).rem_euclid(2.0 * PI),
                el: self.peak * phase.sin() + self.offset,
                range_km: 1000.0,
                range_velocity: -phase.cos(),
            })
        }
    }

    pub fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn finds_rise_culmination_fall() {
        let sky = SineSky {
            epoch: epoch(),
            period_s: 3600.0,
            peak: 0.5,
            offset: 0.0,
        };
        let start = epoch() - Duration::minutes(10);
        let events = find_events(&sky, &GroundStation::default(), start, start + Duration::hours(2))
            .unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Rise,
                EventKind::Culmination,
                EventKind::Fall,
                EventKind::Rise,
                EventKind::Culmination,
                EventKind::Fall,
            ]
        );
        // Culmination of the first pass at a quarter period
        let culm = events[1].time;
        assert!((culm - (epoch() + Duration::seconds(900))).num_seconds().abs() <= 1);
        let rise = events[0].time;
        assert!((rise - epoch()).num_seconds().abs() <= 1);
    }

    #[test]
    fn peak_right_after_start_is_found() {
        let sky = SineSky {
            epoch: epoch(),
            period_s: 3600.0,
            peak: 0.5,
            offset: 0.0,
        };
        let start = epoch() + Duration::seconds(890);
        let events = find_events(&sky, &GroundStation::default(), start, start + Duration::hours(1))
            .unwrap();
        assert_eq!(events[0].kind, EventKind::Culmination);
        assert!((events[0].time - (epoch() + Duration::seconds(900))).num_seconds().abs() <= 1);
        assert_eq!(events[1].kind, EventKind::Fall);
    }

    #[test]
    fn crossing_before_start_is_not_reported() {
        let sky = SineSky {
            epoch: epoch(),
            period_s: 3600.0,
            peak: 0.5,
            offset: 0.0,
        };
        let start = epoch() + Duration::seconds(10);
        let events = find_events(&sky, &GroundStation::default(), start, start + Duration::minutes(20))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Culmination);
    }

    #[test]
    fn never_above_horizon_has_no_events() {
        let sky = SineSky {
            epoch: epoch(),
            period_s: 3600.0,
            peak: 0.2,
            offset: -0.5,
        };
        let events =
            find_events(&sky, &GroundStation::default(), epoch(), epoch() + Duration::hours(6))
                .unwrap();
        assert!(events.is_empty());
    }
}
