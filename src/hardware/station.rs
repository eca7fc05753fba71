use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

use super::sim::SimStation;
use super::{Band, HardwareError, StationControl};

const DEVICE: &str = "stationd";
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_ATTEMPTS: usize = 5;
// Time for the PTT relay to close, a guess
const PTT_SETTLE: Duration = Duration::from_millis(100);

pub fn is_valid_command(command: &str) -> bool {
    let words: Vec<&str> = command.split(' ').collect();
    let state_ok = |s: &str| matches!(s, "on" | "off" | "status");
    match words.as_slice() {
        ["gettemp"] => true,
        ["rotator", state] => state_ok(state),
        [band, device, state] => {
            matches!(*band, "l-band" | "uhf")
                && matches!(*device, "pa-power" | "rf-ptt" | "lna")
                && state_ok(state)
        }
        _ => false,
    }
}

/// What stationd wants before a command can be retried.
#[derive(Debug, PartialEq)]
pub enum Backoff {
    PttConflict,
    Wait(Duration),
}

pub fn backoff(reply: &str) -> Option<Backoff> {
    if reply.contains("PTT Conflict") {
        return Some(Backoff::PttConflict);
    }
    let rest = &reply[reply.find("Please wait ")? + "Please wait ".len()..];
    let secs: f64 = rest.split_whitespace().next()?.parse().ok()?;
    Some(Backoff::Wait(Duration::from_secs_f64(secs.max(0.0))))
}

pub fn parse_temperature(reply: &str) -> Result<f64, HardwareError> {
    reply
        .trim()
        .strip_prefix("temp:")
        .and_then(|t| t.trim().parse().ok())
        .ok_or_else(|| HardwareError::Malformed {
            device: DEVICE,
            reply: reply.to_string(),
        })
}

/// One band of a uniclogs-stationd instance, spoken to over UDP.
pub struct Stationd {
    socket: UdpSocket,
    band: Band,
    lna_delay: Duration,
    conflict_delay: Duration,
}

impl Stationd {
    /// `lna_delay` is waited after each of the three LNA relay toggles.
    /// `conflict_delay` is how long to wait for the PA to cool after a PTT
    /// conflict before powering it off again.
    pub async fn connect(
        addr: &str,
        band: Band,
        lna_delay: Duration,
        conflict_delay: Duration,
    ) -> Result<Self, HardwareError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(HardwareError::io(DEVICE))?;
        socket.connect(addr).await.map_err(HardwareError::io(DEVICE))?;
        Ok(Self {
            socket,
            band,
            lna_delay,
            conflict_delay,
        })
    }

    async fn command(&self, verb: &str) -> Result<String, HardwareError> {
        if !is_valid_command(verb) {
            return Err(HardwareError::InvalidCommand(verb.to_string()));
        }
        log::info!("Sending command: {}", verb);
        self.socket
            .send(verb.as_bytes())
            .await
            .map_err(HardwareError::io(DEVICE))?;

        let mut buf = vec![0u8; 4096];
        let n = timeout(REPLY_TIMEOUT, self.socket.recv(&mut buf))
            .await
            .map_err(|_| HardwareError::Timeout(DEVICE))?
            .map_err(HardwareError::io(DEVICE))?;
        let reply = String::from_utf8_lossy(&buf[..n]).trim().to_string();
        log::info!("StationD response: {}", reply);
        Ok(reply)
    }

    async fn band_command(&self, device: &str, state: &str) -> Result<String, HardwareError> {
        self.command(&format!("{} {} {}", self.band, device, state)).await
    }

    async fn lna_cycle(&self, states: [&str; 3]) -> Result<(), HardwareError> {
        // The relay may not latch on the first pulse
        for state in states {
            self.band_command("lna", state).await?;
            sleep(self.lna_delay).await;
        }
        Ok(())
    }
}

impl StationControl for Stationd {
    fn band(&self) -> Band {
        self.band
    }

    async fn pa_on(&mut self) -> Result<(), HardwareError> {
        // Sent twice, the first is sometimes lost while stationd wakes up
        self.band_command("pa-power", "on").await?;
        self.band_command("pa-power", "on").await?;
        Ok(())
    }

    async fn pa_off(&mut self) -> Result<(), HardwareError> {
        for _ in 0..MAX_ATTEMPTS {
            let reply = self.band_command("pa-power", "off").await?;
            match backoff(&reply) {
                None => return Ok(()),
                Some(Backoff::PttConflict) => {
                    log::warn!("PTT conflict powering off {}, waiting {:?}", self.band, self.conflict_delay);
                    self.band_command("rf-ptt", "off").await?;
                    sleep(self.conflict_delay).await;
                }
                Some(Backoff::Wait(wait)) => {
                    log::info!("stationd asked to wait {:?}", wait);
                    sleep(wait).await;
                }
            }
        }
        Err(HardwareError::Rejected {
            device: DEVICE,
            command: format!("{} pa-power off", self.band),
            reply: format!("still refused after {} attempts", MAX_ATTEMPTS),
        })
    }

    async fn ptt_on(&mut self) -> Result<(), HardwareError> {
        self.band_command("rf-ptt", "on").await?;
        sleep(PTT_SETTLE).await;
        Ok(())
    }

    async fn ptt_off(&mut self) -> Result<(), HardwareError> {
        self.band_command("rf-ptt", "off").await.map(|_| ())
    }

    async fn lna_on(&mut self) -> Result<(), HardwareError> {
        self.lna_cycle(["on", "off", "on"]).await
    }

    async fn lna_off(&mut self) -> Result<(), HardwareError> {
        self.lna_cycle(["off", "on", "off"]).await
    }

    async fn gettemp(&mut self) -> Result<f64, HardwareError> {
        parse_temperature(&self.command("gettemp").await?)
    }
}

pub enum Station {
    Stationd(Stationd),
    Sim(SimStation),
}

impl StationControl for Station {
    fn band(&self) -> Band {
        match self {
            Station::Stationd(s) => s.band(),
            Station::Sim(s) => s.band(),
        }
    }

    async fn pa_on(&mut self) -> Result<(), HardwareError> {
        match self {
            Station::Stationd(s) => s.pa_on().await,
            Station::Sim(s) => s.pa_on().await,
        }
    }

    async fn pa_off(&mut self) -> Result<(), HardwareError> {
        match self {
            Station::Stationd(s) => s.pa_off().await,
            Station::Sim(s) => s.pa_off().await,
        }
    }

    async fn ptt_on(&mut self) -> Result<(), HardwareError> {
        match self {
            Station::Stationd(s) => s.ptt_on().await,
            Station::Sim(s) => s.ptt_on().await,
        }
    }

    async fn ptt_off(&mut self) -> Result<(), HardwareError> {
        match self {
            Station::Stationd(s) => s.ptt_off().await,
            Station::Sim(s) => s.ptt_off().await,
        }
    }

    async fn lna_on(&mut self) -> Result<(), HardwareError> {
        match self {
            Station::Stationd(s) => s.lna_on().await,
            Station::Sim(s) => s.lna_on().await,
        }
    }

    async fn lna_off(&mut self) -> Result<(), HardwareError> {
        match self {
            Station::Stationd(s) => s.lna_off().await,
            Station::Sim(s) => s.lna_off().await,
        }
    }

    async fn gettemp(&mut self) -> Result<f64, HardwareError> {
        match self {
            Station::Stationd(s) => s.gettemp().await,
            Station::Sim(s) => s.gettemp().await,
        }
    }
}
