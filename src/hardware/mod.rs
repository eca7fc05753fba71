//! Collaborators the pass engine drives: the antenna rotator, the SDR
//! flowgraph and the two stationd band controllers.
//!
//! Each collaborator is a trait so a pass can run against real hardware or
//! against the simulators in [`sim`]. The concrete choice is made once in
//! `main` through the [`Rotator`], [`Radio`] and [`Station`] enums.

mod error;
mod radio;
mod rotator;
pub mod sim;
mod station;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use error::HardwareError;
pub use radio::{rx_frequency, tx_frequency, Flowgraph, Radio};
pub use rotator::{Motion, Mount, Rotator, Rotctld};
pub use station::{Station, Stationd};

pub const PARK: AzEl = AzEl { az: 180.0, el: 90.0 };
pub const SELECTOR_EDL: &str = "edl";
pub const SELECTOR_MORSE: &str = "morse";

/// Rotator position in degrees, the unit rotctld speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AzEl {
    pub az: f64,
    pub el: f64,
}

impl AzEl {
    pub fn new(az: f64, el: f64) -> Self {
        Self { az, el }
    }

    pub fn from_radians(az: f64, el: f64) -> Self {
        Self {
            az: az.to_degrees(),
            el: el.to_degrees(),
        }
    }
}

impl fmt::Display for AzEl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:7.3}°az {:7.3}°el", self.az, self.el)
    }
}

/// Closed interval used for rotator limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub lower: f64,
    pub upper: f64,
}

impl Bound {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn widen(&self, margin: f64) -> Bound {
        Bound::new(self.lower - margin, self.upper + margin)
    }

    pub fn clamp(&self, x: f64) -> f64 {
        x.clamp(self.lower, self.upper)
    }

    pub fn contains(&self, x: f64) -> bool {
        self.lower <= x && x <= self.upper
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.lower, self.upper)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Band {
    LBand,
    Uhf,
}

#[allow(async_fn_in_trait)]
pub trait Antenna {
    /// Starts a move. Returns the target actually commanded after
    /// calibration and clamping.
    async fn go(&mut self, target: AzEl) -> Result<AzEl, HardwareError>;

    async fn position(&mut self) -> Result<AzEl, HardwareError>;

    /// Last commanded position differs from last observed one.
    fn is_moving(&self) -> bool;

    async fn park(&mut self) -> Result<AzEl, HardwareError> {
        self.go(PARK).await
    }

    /// Polls until the antenna stops moving. Two identical readings while
    /// still away from the target mean the rotator is stuck.
    async fn wait_arrival(&mut self, poll: Duration) -> Result<AzEl, HardwareError> {
        let mut last: Option<AzEl> = None;
        loop {
            tokio::time::sleep(poll).await;
            let now = self.position().await?;
            if !self.is_moving() {
                return Ok(now);
            }
            if last == Some(now) {
                return Err(HardwareError::MovementFailed(now));
            }
            log::debug!("Rotator at {}", now);
            last = Some(now);
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait Transceiver {
    /// Retunes receive for the given range velocity (m/s), returns Hz.
    async fn set_rx_frequency(&mut self, range_velocity: f64) -> Result<f64, HardwareError>;

    /// Retunes transmit for the given range velocity (m/s), returns Hz.
    async fn set_tx_frequency(&mut self, range_velocity: f64) -> Result<f64, HardwareError>;

    async fn set_tx_gain(&mut self, gain: i32) -> Result<(), HardwareError>;

    async fn set_tx_selector(&mut self, mode: &str) -> Result<(), HardwareError>;

    /// Sends the morse callsign, returning once it has been transmitted.
    async fn ident(&mut self) -> Result<(), HardwareError>;

    /// Forwards one uplink datagram to the transmitter.
    async fn edl(&mut self, packet: &[u8]) -> Result<(), HardwareError>;
}

#[allow(async_fn_in_trait)]
pub trait StationControl {
    fn band(&self) -> Band;

    async fn pa_on(&mut self) -> Result<(), HardwareError>;
    async fn pa_off(&mut self) -> Result<(), HardwareError>;
    async fn ptt_on(&mut self) -> Result<(), HardwareError>;
    async fn ptt_off(&mut self) -> Result<(), HardwareError>;
    async fn lna_on(&mut self) -> Result<(), HardwareError>;
    async fn lna_off(&mut self) -> Result<(), HardwareError>;
    async fn gettemp(&mut self) -> Result<f64, HardwareError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_names_match_stationd() {
        assert_eq!(Band::LBand.to_string(), "l-band");
        assert_eq!(Band::Uhf.to_string(), "uhf");
    }

    #[test]
    fn bound_clamps_and_shifts() {
        let b = Bound::new(0.0, 180.0);
        assert_eq!(b.clamp(-3.0), 0.0);
        assert_eq!(b.clamp(200.0), 180.0);
        assert!(!b.contains(180.1));
        assert!(b.widen(5.0).contains(-4.0));
        assert_eq!(b.to_string(), "[0,180]");
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_rotator_is_reported() {
        let log = sim::CallLog::default();
        let mut rot = sim::SimRotator::new(log).stuck();
        rot.go(AzEl::new(90.0, 45.0)).await.unwrap();
        let err = rot.wait_arrival(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, HardwareError::MovementFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn moving_rotator_arrives() {
        let log = sim::CallLog::default();
        let mut rot = sim::SimRotator::new(log).with_slew(30.0);
        rot.go(AzEl::new(90.0, 45.0)).await.unwrap();
        let at = rot.wait_arrival(Duration::from_millis(100)).await.unwrap();
        assert_eq!(at, AzEl::new(90.0, 45.0));
    }
}
