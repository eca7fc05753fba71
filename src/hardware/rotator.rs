use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::sim::SimRotator;
use super::{Antenna, AzEl, Bound, HardwareError};

const DEVICE: &str = "rotctld";
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
// Commands past the limits by less than this are clamped, beyond it rejected
const LIMIT_MARGIN_DEG: f64 = 5.0;
pub const DEFAULT_TOLERANCE_DEG: f64 = 1.0;

/// Tracks whether the antenna still has somewhere to go.
#[derive(Debug, Clone, Copy)]
pub struct Motion {
    commanded: Option<AzEl>,
    observed: Option<AzEl>,
    tolerance: f64,
}

impl Default for Motion {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE_DEG)
    }
}

impl Motion {
    pub fn new(tolerance: f64) -> Self {
        Self {
            commanded: None,
            observed: None,
            tolerance,
        }
    }

    pub fn command(&mut self, target: AzEl) {
        self.commanded = Some(target);
    }

    pub fn observe(&mut self, position: AzEl) {
        self.observed = Some(position);
    }

    pub fn is_moving(&self) -> bool {
        match (self.commanded, self.observed) {
            (Some(c), Some(o)) => {
                (c.az - o.az).abs() > self.tolerance || (c.el - o.el).abs() > self.tolerance
            }
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Applies calibration and limits between sky coordinates and what the
/// rotator controller is told.
#[derive(Debug, Clone, Copy)]
pub struct Mount {
    pub cal: AzEl,
    pub az: Bound,
    pub el: Bound,
}

impl Default for Mount {
    fn default() -> Self {
        Self {
            cal: AzEl::default(),
            az: Bound::new(0.0, 360.0),
            el: Bound::new(0.0, 180.0),
        }
    }
}

impl Mount {
    /// Sky target to controller coordinates, clamped into the limits.
    pub fn to_controller(&self, target: AzEl) -> Result<AzEl, HardwareError> {
        let az = limit("az", target.az - self.cal.az, self.az)?;
        let el = limit("el", target.el - self.cal.el, self.el)?;
        Ok(AzEl::new(az, el))
    }

    pub fn to_sky(&self, reported: AzEl) -> AzEl {
        AzEl::new(reported.az + self.cal.az, reported.el + self.cal.el)
    }
}

fn limit(axis: &'static str, value: f64, bound: Bound) -> Result<f64, HardwareError> {
    if !bound.widen(LIMIT_MARGIN_DEG).contains(value) {
        return Err(HardwareError::OutOfRange { axis, value, bound });
    }
    let clamped = bound.clamp(value);
    if clamped != value {
        log::warn!("Clamped {} {:.3}° to {:.3}°", axis, value, clamped);
    }
    Ok(clamped)
}

/// Client for a hamlib `rotctld` daemon.
pub struct Rotctld {
    stream: BufReader<TcpStream>,
    mount: Mount,
    motion: Motion,
}

impl Rotctld {
    pub async fn connect(addr: &str, mount: Mount) -> Result<Self, HardwareError> {
        let stream = timeout(REPLY_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| HardwareError::Timeout(DEVICE))?
            .map_err(HardwareError::io(DEVICE))?;
        log::info!("Connected to rotctld at {}", addr);
        Ok(Self {
            stream: BufReader::new(stream),
            mount,
            motion: Motion::default(),
        })
    }

    async fn request(&mut self, command: &str, lines: usize) -> Result<Vec<String>, HardwareError> {
        log::trace!("rotctld <- {}", command);
        let line = format!("{}\n", command);
        self.stream
            .get_mut()
            .write_all(line.as_bytes())
            .await
            .map_err(HardwareError::io(DEVICE))?;

        let mut reply = Vec::with_capacity(lines);
        while reply.len() < lines {
            let mut buf = String::new();
            let read = timeout(REPLY_TIMEOUT, self.stream.read_line(&mut buf))
                .await
                .map_err(|_| HardwareError::Timeout(DEVICE))?
                .map_err(HardwareError::io(DEVICE))?;
            if read == 0 {
                return Err(HardwareError::Io {
                    device: DEVICE,
                    source: std::io::ErrorKind::UnexpectedEof.into(),
                });
            }
            let buf = buf.trim().to_string();
            log::trace!("rotctld -> {}", buf);
            // An error report replaces whatever was asked for
            if buf.starts_with("RPRT") {
                check_report(command, &buf)?;
                reply.push(buf);
                break;
            }
            reply.push(buf);
        }
        Ok(reply)
    }
}

fn check_report(command: &str, reply: &str) -> Result<(), HardwareError> {
    let code: i32 = reply
        .strip_prefix("RPRT")
        .map(str::trim)
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| HardwareError::Malformed {
            device: DEVICE,
            reply: reply.to_string(),
        })?;
    if code != 0 {
        return Err(HardwareError::Rejected {
            device: DEVICE,
            command: command.to_string(),
            reply: reply.to_string(),
        });
    }
    Ok(())
}

fn parse_position(lines: &[String]) -> Result<AzEl, HardwareError> {
    let malformed = || HardwareError::Malformed {
        device: DEVICE,
        reply: lines.join("\\n"),
    };
    match lines {
        [az, el, ..] => Ok(AzEl::new(
            az.parse().map_err(|_| malformed())?,
            el.parse().map_err(|_| malformed())?,
        )),
        _ => Err(malformed()),
    }
}

impl Antenna for Rotctld {
    async fn go(&mut self, target: AzEl) -> Result<AzEl, HardwareError> {
        let hw = self.mount.to_controller(target)?;
        log::info!("{:<18}{}", "Moving to", target);
        let command = format!("P {:.3} {:.3}", hw.az, hw.el);
        let reply = self.request(&command, 1).await?;
        if !reply.first().is_some_and(|r| r.starts_with("RPRT")) {
            return Err(HardwareError::Malformed {
                device: DEVICE,
                reply: reply.join(" "),
            });
        }
        let commanded = self.mount.to_sky(hw);
        self.motion.command(commanded);
        Ok(commanded)
    }

    async fn position(&mut self) -> Result<AzEl, HardwareError> {
        let reply = self.request("p", 2).await?;
        let position = self.mount.to_sky(parse_position(&reply)?);
        self.motion.observe(position);
        Ok(position)
    }

    fn is_moving(&self) -> bool {
        self.motion.is_moving()
    }
}

pub enum Rotator {
    Rotctld(Rotctld),
    Sim(SimRotator),
}

impl Antenna for Rotator {
    async fn go(&mut self, target: AzEl) -> Result<AzEl, HardwareError> {
        match self {
            Rotator::Rotctld(r) => r.go(target).await,
            Rotator::Sim(r) => r.go(target).await,
        }
    }

    async fn position(&mut self) -> Result<AzEl, HardwareError> {
        match self {
            Rotator::Rotctld(r) => r.position().await,
            Rotator::Sim(r) => r.position().await,
        }
    }

    fn is_moving(&self) -> bool {
        match self {
            Rotator::Rotctld(r) => r.is_moving(),
            Rotator::Sim(r) => r.is_moving(),
        }
    }

    async fn park(&mut self) -> Result<AzEl, HardwareError> {
        match self {
            Rotator::Rotctld(r) => r.park().await,
            Rotator::Sim(r) => r.park().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn motion_tolerance() {
        let mut motion = Motion::default();
        assert!(!motion.is_moving());
        motion.command(AzEl::new(10.0, 10.0));
        assert!(motion.is_moving());
        motion.observe(AzEl::new(9.5, 10.4));
        assert!(!motion.is_moving());
        motion.observe(AzEl::new(8.0, 10.0));
        assert!(motion.is_moving());
    }

    #[test]
    fn mount_applies_cal_and_limits() {
        let mount = Mount {
            cal: AzEl::new(2.0, -1.0),
            ..Mount::default()
        };
        assert_eq!(mount.to_controller(AzEl::new(92.0, 44.0)).unwrap(), AzEl::new(90.0, 45.0));
        assert_eq!(mount.to_sky(AzEl::new(90.0, 45.0)), AzEl::new(92.0, 44.0));
        // Slightly past the end stop is clamped
        assert_eq!(mount.to_controller(AzEl::new(1.0, 0.0)).unwrap(), AzEl::new(0.0, 1.0));
        assert!(matches!(
            mount.to_controller(AzEl::new(90.0, 200.0)),
            Err(HardwareError::OutOfRange { axis: "el", .. })
        ));
    }

    #[test]
    fn parses_reports_and_positions() {
        assert!(check_report("P 1 2", "RPRT 0").is_ok());
        assert!(matches!(
            check_report("P 1 2", "RPRT -1"),
            Err(HardwareError::Rejected { .. })
        ));
        assert!(matches!(
            check_report("P 1 2", "RPRT x"),
            Err(HardwareError::Malformed { .. })
        ));
        let lines = vec!["180.000000".to_string(), "90.000000".to_string()];
        assert_eq!(parse_position(&lines).unwrap(), AzEl::new(180.0, 90.0));
        assert!(parse_position(&lines[..1]).is_err());
    }

    #[tokio::test]
    async fn talks_to_rotctld() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            let command = String::from_utf8_lossy(&buf[..n]).to_string();
            socket.write_all(b"RPRT 0\n").await.unwrap();
            let n = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"p\n");
            socket.write_all(b"90.000000\n45.000000\n").await.unwrap();
            command
        });

        let mut rot = Rotctld::connect(&addr, Mount::default()).await.unwrap();
        rot.go(AzEl::new(90.0, 45.0)).await.unwrap();
        assert!(rot.is_moving());
        assert_eq!(rot.position().await.unwrap(), AzEl::new(90.0, 45.0));
        assert!(!rot.is_moving());
        assert_eq!(server.await.unwrap(), "P 90.000 45.000\n");
    }
}
