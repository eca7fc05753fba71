use chrono::{DateTime, Duration, Utc};

use crate::predict::{DopplerPoint, TrackPoint};

/// Everything one pass replays: the true satellite track, the rotator path
/// derived from it, the range velocity series and the uplink window.
#[derive(Debug, Clone)]
pub struct PassPlan {
    pub raw: Vec<TrackPoint>,
    pub path: Vec<TrackPoint>,
    pub doppler: Vec<DopplerPoint>,
    /// First sample above the minimum elevation, `None` if there is none.
    pub aos: Option<DateTime<Utc>>,
    /// Last sample above the minimum elevation, else the end of the track.
    pub los: DateTime<Utc>,
}

impl PassPlan {
    pub fn new(
        raw: Vec<TrackPoint>,
        path: Vec<TrackPoint>,
        doppler: Vec<DopplerPoint>,
        min_elevation: f64,
    ) -> Self {
        let aos = raw.iter().find(|p| p.el > min_elevation).map(|p| p.time);
        let los = raw
            .iter()
            .rev()
            .find(|p| p.el > min_elevation)
            .or(raw.last())
            .map(|p| p.time)
            .unwrap_or_else(Utc::now);
        if aos.is_none() {
            log::warn!(
                "Track never rises above {:.1}°el, the uplink will stay closed",
                min_elevation.to_degrees()
            );
        }
        Self {
            raw,
            path,
            doppler,
            aos,
            los,
        }
    }

    /// Point-and-hold: a fixed azimuth at the horizon from now until far in
    /// the future, uplink open throughout.
    pub fn hold(azimuth: f64, now: DateTime<Utc>) -> Self {
        let end = now + Duration::days(3650);
        let raw: Vec<TrackPoint> = [now, end]
            .into_iter()
            .map(|time| TrackPoint {
                time,
                az: azimuth,
                el: 0.0,
            })
            .collect();
        let doppler = [now, end]
            .into_iter()
            .map(|time| DopplerPoint {
                time,
                range_velocity: 0.0,
            })
            .collect();
        Self {
            path: raw.clone(),
            raw,
            doppler,
            aos: Some(now),
            los: end,
        }
    }

    /// Moves every instant by `offset`, used to replay a future pass now.
    pub fn shifted(mut self, offset: Duration) -> Self {
        for p in self.raw.iter_mut().chain(self.path.iter_mut()) {
            p.time += offset;
        }
        for p in self.doppler.iter_mut() {
            p.time += offset;
        }
        self.aos = self.aos.map(|t| t + offset);
        self.los += offset;
        self
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.raw.first().map(|p| p.time)
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.raw.last().map(|p| p.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn track(els: &[f64]) -> Vec<TrackPoint> {
        els.iter()
            .enumerate()
            .map(|(i, el)| TrackPoint {
                time: t0() + Duration::seconds(2 * i as i64),
                az: 1.0,
                el: el.to_radians(),
            })
            .collect()
    }

    #[test]
    fn aos_and_los_bracket_the_high_part() {
        let raw = track(&[0.0, 10.0, 20.0, 40.0, 20.0, 10.0, 0.0]);
        let plan = PassPlan::new(raw.clone(), raw, Vec::new(), 15.0_f64.to_radians());
        assert_eq!(plan.aos, Some(t0() + Duration::seconds(4)));
        assert_eq!(plan.los, t0() + Duration::seconds(8));
    }

    #[test]
    fn low_track_has_no_aos() {
        let raw = track(&[0.0, 5.0, 0.0]);
        let plan = PassPlan::new(raw.clone(), raw, Vec::new(), 15.0_f64.to_radians());
        assert_eq!(plan.aos, None);
        assert_eq!(plan.los, t0() + Duration::seconds(4));
    }

    #[test]
    fn hold_is_two_flat_samples() {
        let plan = PassPlan::hold(2.0, t0());
        assert_eq!(plan.path.len(), 2);
        assert_eq!(plan.doppler.len(), 2);
        assert!(plan.path.iter().all(|p| p.az == 2.0 && p.el == 0.0));
        assert_eq!(plan.aos, Some(t0()));
        assert!(plan.los > t0() + Duration::days(3000));
    }

    #[test]
    fn shift_moves_every_instant() {
        let raw = track(&[0.0, 20.0, 0.0]);
        let plan = PassPlan::new(raw.clone(), raw, Vec::new(), 15.0_f64.to_radians())
            .shifted(Duration::hours(-1));
        assert_eq!(plan.start(), Some(t0() - Duration::hours(1)));
        assert_eq!(plan.path[0].time, t0() - Duration::hours(1));
        assert_eq!(plan.aos, Some(t0() + Duration::seconds(2) - Duration::hours(1)));
        assert_eq!(plan.los, plan.aos.unwrap());
    }
}
