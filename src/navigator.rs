use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::fmt;

use crate::predict::{PassInfo, TrackPoint};

pub const DEFAULT_FLIP_THRESHOLD_DEG: f64 = 78.0;

/// Which of the equivalent antenna solutions a pass is flown with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NavigationMode {
    Straight,
    /// Mirrored through zenith so the rotator never crosses the 0°/360° seam.
    Backhand,
    /// Azimuth pinned at the contained angle (radians), the pass becomes an
    /// elevation sweep from 0° to 180°.
    Flip(f64),
}

impl fmt::Display for NavigationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavigationMode::Straight => write!(f, "Straight"),
            NavigationMode::Backhand => write!(f, "Backhand"),
            NavigationMode::Flip(az) => write!(f, "Flip at {:.1}°az", az.to_degrees()),
        }
    }
}

/// Chooses and applies a navigation mode for one pass.
#[derive(Debug, Clone)]
pub struct Navigator {
    pub mode: NavigationMode,
    rise_az: f64,
    culm_az: f64,
    culm_el: f64,
    fall_az: f64,
}

impl Navigator {
    pub fn new(pass: &PassInfo) -> Self {
        Self::with_flip_threshold(pass, DEFAULT_FLIP_THRESHOLD_DEG.to_radians())
    }

    pub fn with_flip_threshold(pass: &PassInfo, flip_threshold: f64) -> Self {
        let peak = pass.peak();
        let mode = select_mode(pass.rise.az, peak.az, peak.el, pass.fall.az, flip_threshold);
        Self {
            mode,
            rise_az: pass.rise.az,
            culm_az: peak.az,
            culm_el: peak.el,
            fall_az: pass.fall.az,
        }
    }

    pub fn azel(&self, az: f64, el: f64) -> (f64, f64) {
        transform(self.mode, az, el)
    }

    /// The rotator path for a raw track, on the same time grid.
    pub fn path(&self, track: &[TrackPoint]) -> Vec<TrackPoint> {
        track
            .iter()
            .map(|p| {
                let (az, el) = self.azel(p.az, p.el);
                TrackPoint { time: p.time, az, el }
            })
            .collect()
    }
}

impl fmt::Display for Navigator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rise {:.0}°az, culmination {:.0}°az {:.0}°el, fall {:.0}°az: {}",
            self.rise_az.to_degrees(),
            self.culm_az.to_degrees(),
            self.culm_el.to_degrees(),
            self.fall_az.to_degrees(),
            self.mode
        )
    }
}

/// Pure mode selection from the pass geometry, all angles in radians.
pub fn select_mode(
    rise_az: f64,
    culm_az: f64,
    culm_el: f64,
    fall_az: f64,
    flip_threshold: f64,
) -> NavigationMode {
    if culm_el >= flip_threshold {
        let mut flip_az = ((rise_az + fall_az + PI) / 2.0).rem_euclid(TAU);
        if flip_az.cos() > 0.0 {
            flip_az = (flip_az + PI).rem_euclid(TAU);
        }
        return NavigationMode::Flip(flip_az);
    }

    if monotonic(rise_az, culm_az, fall_az) {
        return NavigationMode::Straight;
    }

    let rotated = |az: f64| (az + PI).rem_euclid(TAU);
    if monotonic(rotated(rise_az), rotated(culm_az), rotated(fall_az)) {
        return NavigationMode::Backhand;
    }

    // Needs the extended azimuth range, not handled
    log::warn!(
        "No seam free path for rise {:.1}°az, culmination {:.1}°az, fall {:.1}°az, flying it straight",
        rise_az.to_degrees(),
        culm_az.to_degrees(),
        fall_az.to_degrees()
    );
    NavigationMode::Straight
}

pub fn transform(mode: NavigationMode, az: f64, el: f64) -> (f64, f64) {
    match mode {
        NavigationMode::Straight => (az, el),
        NavigationMode::Backhand => ((az + PI).rem_euclid(TAU), PI - el),
        NavigationMode::Flip(flip_az) => (flip_az, FRAC_PI_2 - (az - flip_az).cos() * (FRAC_PI_2 - el)),
    }
}

fn monotonic(a: f64, b: f64, c: f64) -> bool {
    (a < b && b < c) || (a > b && b > c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::PassEvent;
    use chrono::{TimeZone, Utc};

    fn pass(rise_az: f64, culm_az: f64, culm_el: f64, fall_az: f64) -> PassInfo {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let event = |secs: i64, az: f64, el: f64| PassEvent {
            time: t0 + chrono::Duration::seconds(secs),
            az: az.to_radians(),
            el: el.to_radians(),
        };
        PassInfo {
            rise: event(0, rise_az, 0.0),
            culminations: vec![event(300, culm_az, culm_el)],
            fall: event(600, fall_az, 0.0),
        }
    }

    fn close(a: f64, b: f64) -> bool {
        let d = (a - b).rem_euclid(TAU);
        d < 1e-9 || TAU - d < 1e-9
    }

    #[test]
    fn straight_for_plain_pass() {
        assert_eq!(Navigator::new(&pass(45.0, 90.0, 45.0, 135.0)).mode, NavigationMode::Straight);
    }

    #[test]
    fn backhand_across_north() {
        assert_eq!(Navigator::new(&pass(350.0, 0.0, 45.0, 170.0)).mode, NavigationMode::Backhand);
    }

    #[test]
    fn flip_for_overhead_pass() {
        let nav = Navigator::new(&pass(45.0, 90.0, 90.0, 135.0));
        // (45 + 135 + 180) / 2 = 180, already south
        match nav.mode {
            NavigationMode::Flip(az) => assert!(close(az, PI)),
            other => panic!("expected flip, got {other}"),
        }
    }

    #[test]
    fn flip_azimuth_is_moved_south() {
        // (200 + 340 + 180) / 2 = 360 -> 0, north, rotated to 180
        let nav = Navigator::new(&pass(200.0, 270.0, 85.0, 340.0));
        match nav.mode {
            NavigationMode::Flip(az) => assert!(close(az, PI)),
            other => panic!("expected flip, got {other}"),
        }
    }

    #[test]
    fn flip_wins_regardless_of_azimuth() {
        for (r, c, f) in [(10.0, 350.0, 20.0), (45.0, 90.0, 135.0), (350.0, 0.0, 170.0)] {
            let nav = Navigator::new(&pass(r, c, 78.0, f));
            assert!(matches!(nav.mode, NavigationMode::Flip(_)), "{nav}");
        }
    }

    #[test]
    fn flip_threshold_is_configurable() {
        let info = pass(45.0, 90.0, 80.0, 135.0);
        let nav = Navigator::with_flip_threshold(&info, 85.0_f64.to_radians());
        assert_eq!(nav.mode, NavigationMode::Straight);
    }

    #[test]
    fn unresolvable_falls_back_to_straight() {
        // Neither raw nor rotated sequence is monotonic
        assert_eq!(Navigator::new(&pass(10.0, 200.0, 40.0, 20.0)).mode, NavigationMode::Straight);
    }

    #[test]
    fn selection_and_transform_are_deterministic() {
        let info = pass(350.0, 0.0, 45.0, 170.0);
        let a = Navigator::new(&info);
        let b = Navigator::new(&info);
        assert_eq!(a.mode, b.mode);
        assert_eq!(a.azel(1.0, 0.3), a.azel(1.0, 0.3));
        assert_eq!(a.azel(1.0, 0.3), b.azel(1.0, 0.3));
    }

    #[test]
    fn backhand_round_trip() {
        for az_deg in [0.0, 45.0, 179.9, 180.0, 270.0, 359.9] {
            for el_deg in [0.0, 30.0, 89.0] {
                let (az, el) = (f64::to_radians(az_deg), f64::to_radians(el_deg));
                let (az1, el1) = transform(NavigationMode::Backhand, az, el);
                let (az2, el2) = transform(NavigationMode::Backhand, az1, el1);
                assert!(close(az2, az));
                assert!((el2 - el).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn flip_sweeps_elevation_through_zenith() {
        let mode = NavigationMode::Flip(PI);
        // Rising on the flip side stays low, setting on the far side ends near 180
        let (az, el) = transform(mode, PI, 0.0);
        assert!(close(az, PI));
        assert!(el.abs() < 1e-12);
        let (_, el) = transform(mode, 0.0, 0.0);
        assert!((el - PI).abs() < 1e-12);
        let (_, el) = transform(mode, 1.0, FRAC_PI_2);
        assert!((el - FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn path_keeps_time_grid() {
        let info = pass(350.0, 0.0, 45.0, 170.0);
        let nav = Navigator::new(&info);
        let track: Vec<TrackPoint> = [&info.rise, &info.culminations[0], &info.fall]
            .iter()
            .map(|e| TrackPoint { time: e.time, az: e.az, el: e.el })
            .collect();
        let path = nav.path(&track);
        assert_eq!(path.len(), 3);
        for (raw, nav_point) in track.iter().zip(&path) {
            assert_eq!(raw.time, nav_point.time);
            assert!((nav_point.el - (PI - raw.el)).abs() < 1e-12);
        }
    }
}
