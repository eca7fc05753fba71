//! Stand-ins for the rotator, flowgraph and stationd. Used by `--mock` and by
//! the pass tests, every call is written to a shared [`CallLog`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{rx_frequency, tx_frequency, Antenna, AzEl, Band, HardwareError, Motion};
use super::{StationControl, Transceiver, PARK};

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: String) {
        log::debug!("sim: {}", entry);
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }
}

#[derive(Debug, Clone, Default)]
struct Faults(HashSet<&'static str>);

impl Faults {
    fn check(&self, op: &'static str) -> Result<(), HardwareError> {
        if self.0.contains(op) {
            return Err(HardwareError::Simulated(op));
        }
        Ok(())
    }
}

pub struct SimRotator {
    log: CallLog,
    position: AzEl,
    target: AzEl,
    /// Degrees moved per position query, instant when `None`.
    slew: Option<f64>,
    stuck: bool,
    motion: Motion,
    faults: Faults,
}

impl SimRotator {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            position: PARK,
            target: PARK,
            slew: None,
            stuck: false,
            motion: Motion::default(),
            faults: Faults::default(),
        }
    }

    pub fn with_slew(mut self, degrees_per_poll: f64) -> Self {
        self.slew = Some(degrees_per_poll);
        self
    }

    pub fn stuck(mut self) -> Self {
        self.stuck = true;
        self
    }

    pub fn with_fault(mut self, op: &'static str) -> Self {
        self.faults.0.insert(op);
        self
    }
}

fn step_towards(from: f64, to: f64, step: f64) -> f64 {
    if (to - from).abs() <= step {
        to
    } else {
        from + step * (to - from).signum()
    }
}

impl Antenna for SimRotator {
    async fn go(&mut self, target: AzEl) -> Result<AzEl, HardwareError> {
        self.faults.check("go")?;
        self.log.push(format!("rotator go {:.1} {:.1}", target.az, target.el));
        self.target = target;
        self.motion.command(target);
        Ok(target)
    }

    async fn position(&mut self) -> Result<AzEl, HardwareError> {
        self.faults.check("position")?;
        if !self.stuck {
            self.position = match self.slew {
                None => self.target,
                Some(step) => AzEl::new(
                    step_towards(self.position.az, self.target.az, step),
                    step_towards(self.position.el, self.target.el, step),
                ),
            };
        }
        self.motion.observe(self.position);
        Ok(self.position)
    }

    fn is_moving(&self) -> bool {
        self.motion.is_moving()
    }

    async fn park(&mut self) -> Result<AzEl, HardwareError> {
        self.faults.check("park")?;
        self.log.push("rotator park".to_string());
        self.target = PARK;
        self.motion.command(PARK);
        Ok(PARK)
    }
}

pub struct SimRadio {
    log: CallLog,
    tx_center: f64,
    rx_center: f64,
    selector: String,
    morse_delay: Duration,
    faults: Faults,
}

impl SimRadio {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            tx_center: 1_265_000_000.0,
            rx_center: 436_500_000.0,
            selector: super::SELECTOR_EDL.to_string(),
            morse_delay: Duration::ZERO,
            faults: Faults::default(),
        }
    }

    pub fn with_morse_delay(mut self, delay: Duration) -> Self {
        self.morse_delay = delay;
        self
    }

    pub fn with_fault(mut self, op: &'static str) -> Self {
        self.faults.0.insert(op);
        self
    }
}

impl Transceiver for SimRadio {
    async fn set_rx_frequency(&mut self, range_velocity: f64) -> Result<f64, HardwareError> {
        self.faults.check("rx")?;
        let freq = rx_frequency(self.rx_center, range_velocity);
        self.log.push(format!("radio rx {:.0}", freq));
        Ok(freq)
    }

    async fn set_tx_frequency(&mut self, range_velocity: f64) -> Result<f64, HardwareError> {
        self.faults.check("tx")?;
        let freq = tx_frequency(self.tx_center, range_velocity);
        self.log.push(format!("radio tx {:.0}", freq));
        Ok(freq)
    }

    async fn set_tx_gain(&mut self, gain: i32) -> Result<(), HardwareError> {
        self.faults.check("tx_gain")?;
        self.log.push(format!("radio tx_gain {}", gain));
        Ok(())
    }

    async fn set_tx_selector(&mut self, mode: &str) -> Result<(), HardwareError> {
        self.faults.check("selector")?;
        self.log.push(format!("radio selector {}", mode));
        self.selector = mode.to_string();
        Ok(())
    }

    async fn ident(&mut self) -> Result<(), HardwareError> {
        self.faults.check("ident")?;
        self.log.push("radio ident".to_string());
        tokio::time::sleep(self.morse_delay).await;
        Ok(())
    }

    async fn edl(&mut self, packet: &[u8]) -> Result<(), HardwareError> {
        self.faults.check("edl")?;
        self.log.push(format!("radio edl {}", String::from_utf8_lossy(packet)));
        Ok(())
    }
}

pub struct SimStation {
    log: CallLog,
    band: Band,
    temperature: f64,
    faults: Faults,
}

impl SimStation {
    pub fn new(log: CallLog, band: Band) -> Self {
        Self {
            log,
            band,
            temperature: 20.0,
            faults: Faults::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_fault(mut self, op: &'static str) -> Self {
        self.faults.0.insert(op);
        self
    }

    fn record(&self, op: &'static str, what: &str) -> Result<(), HardwareError> {
        self.faults.check(op)?;
        self.log.push(format!("{} {}", self.band, what));
        Ok(())
    }
}

impl StationControl for SimStation {
    fn band(&self) -> Band {
        self.band
    }

    async fn pa_on(&mut self) -> Result<(), HardwareError> {
        self.record("pa_on", "pa on")
    }

    async fn pa_off(&mut self) -> Result<(), HardwareError> {
        self.record("pa_off", "pa off")
    }

    async fn ptt_on(&mut self) -> Result<(), HardwareError> {
        self.record("ptt_on", "ptt on")
    }

    async fn ptt_off(&mut self) -> Result<(), HardwareError> {
        self.record("ptt_off", "ptt off")
    }

    async fn lna_on(&mut self) -> Result<(), HardwareError> {
        self.record("lna_on", "lna on")
    }

    async fn lna_off(&mut self) -> Result<(), HardwareError> {
        self.record("lna_off", "lna off")
    }

    async fn gettemp(&mut self) -> Result<f64, HardwareError> {
        self.record("gettemp", &format!("temp {:.1}", self.temperature))?;
        Ok(self.temperature)
    }
}
