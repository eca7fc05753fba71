use std::time::Duration;

use chrono::Utc;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

use super::error::PassError;
use super::plan::PassPlan;
use super::timeline::{until, Due, Replay, Source, TimerQueue};
use crate::hardware::{Antenna, AzEl, HardwareError, StationControl, Transceiver, SELECTOR_EDL};
use crate::predict::{range_velocity_at, DopplerPoint, TrackPoint};

const UPLINK_MTU: usize = 4096;

#[derive(Debug, Clone)]
pub struct PassSettings {
    pub edl_port: u16,
    pub tx_gain: i32,
    pub tx_gain_min: i32,
    pub temperature_limit: f64,
    pub thermal_interval: Duration,
    pub arrival_timeout: Duration,
    pub arrival_poll: Duration,
    pub cooloff: Duration,
}

impl Default for PassSettings {
    fn default() -> Self {
        Self {
            edl_port: 10025,
            tx_gain: 17,
            tx_gain_min: 3,
            temperature_limit: 30.0,
            thermal_interval: Duration::from_secs(30),
            arrival_timeout: Duration::from_secs(180),
            arrival_poll: Duration::from_millis(500),
            cooloff: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Phase {
    Constructed,
    PrePositioning,
    Active,
    Teardown,
    Done,
}

enum Wake {
    Timer,
    Uplink(std::io::Result<usize>),
}

/// Drives the hardware through one pass. Owns every collaborator for the
/// duration of [`SinglePass::work`].
pub struct SinglePass<A, R, S> {
    rotator: A,
    radio: R,
    lband: S,
    uhf: S,
    settings: PassSettings,
    phase: Phase,
}

impl<A: Antenna, R: Transceiver, S: StationControl> SinglePass<A, R, S> {
    pub fn new(rotator: A, radio: R, lband: S, uhf: S, settings: PassSettings) -> Self {
        Self {
            rotator,
            radio,
            lband,
            uhf,
            settings,
            phase: Phase::Constructed,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn settings(&self) -> &PassSettings {
        &self.settings
    }

    /// Temperature of the transmitting station, also checked before a pass.
    pub async fn station_temperature(&mut self) -> Result<f64, HardwareError> {
        self.lband.gettemp().await
    }

    fn enter(&mut self, phase: Phase) {
        log::info!("Pass {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    /// Runs one pass. Teardown runs whatever happened before it, its own
    /// failure is reported only if the pass itself succeeded.
    pub async fn work(&mut self, plan: &PassPlan) -> Result<(), PassError> {
        self.phase = Phase::Constructed;
        let mut uplink = None;

        let outcome = self.execute(plan, &mut uplink).await;
        if let Err(e) = &outcome {
            log::error!("Pass aborted: {}", e);
        }

        let teardown = self.teardown(&mut uplink).await;
        self.enter(Phase::Done);
        outcome.and(teardown)
    }

    async fn execute(
        &mut self,
        plan: &PassPlan,
        uplink: &mut Option<UdpSocket>,
    ) -> Result<(), PassError> {
        let first = plan.path.first().ok_or(PassError::EmptyPlan("rotator path"))?;
        if plan.doppler.is_empty() {
            return Err(PassError::EmptyPlan("doppler series"));
        }

        self.enter(Phase::PrePositioning);
        self.pre_position(AzEl::from_radians(first.az, first.el)).await?;

        self.enter(Phase::Active);
        self.active(plan, uplink).await
    }

    async fn pre_position(&mut self, target: AzEl) -> Result<(), PassError> {
        let commanded = self.rotator.go(target).await?;
        log::info!("Started rotator movement");

        let limit = self.settings.arrival_timeout;
        let at = timeout(limit, self.rotator.wait_arrival(self.settings.arrival_poll))
            .await
            .map_err(|_| PassError::ArrivalTimeout {
                target: commanded,
                timeout: limit,
            })??;

        log::info!("Rotator at initial position {}, enabling pa, lna", at);
        self.radio.set_tx_gain(self.settings.tx_gain).await?;
        self.uhf.lna_on().await?;
        self.lband.pa_on().await?;
        self.ident().await?;
        log::info!("Initial position tasks complete");
        Ok(())
    }

    /// Keys the transmitter around a morse callsign. The key is always
    /// released.
    async fn ident(&mut self) -> Result<(), PassError> {
        log::info!("Sending morse identifier");
        self.lband.ptt_on().await?;
        let sent = self.radio.ident().await;
        let released = self.lband.ptt_off().await;
        sent?;
        released?;
        log::info!("Morse identifier sent");
        Ok(())
    }

    async fn active(
        &mut self,
        plan: &PassPlan,
        uplink: &mut Option<UdpSocket>,
    ) -> Result<(), PassError> {
        match plan.aos {
            Some(aos) => log::info!("AOS: {}", aos),
            None => log::warn!("No AOS, uplink will not be opened"),
        }
        log::info!("LOS: {}", plan.los);

        let mut rotator = Replay::new(&plan.path);
        let mut doppler = Replay::new(&plan.doppler);
        let mut position_log = Replay::new(&plan.raw);

        let mut timers = TimerQueue::default();
        if let Some(aos) = plan.aos {
            timers.schedule(aos, Source::Aos);
        }
        timers.schedule(plan.los, Source::Los);
        for (source, at) in [
            (Source::Rotator, rotator.next_time()),
            (Source::Doppler, doppler.next_time()),
            (Source::PositionLog, position_log.next_time()),
        ] {
            if let Some(at) = at {
                timers.schedule(at, source);
            }
        }
        timers.schedule(Utc::now() + self.settings.thermal_interval, Source::Thermal);

        let mut buf = vec![0u8; UPLINK_MTU];
        while let Some(deadline) = timers.next_deadline() {
            let wake = tokio::select! {
                _ = sleep(until(deadline)) => Wake::Timer,
                received = recv_uplink(uplink.as_ref(), &mut buf) => Wake::Uplink(received),
            };

            let now = match wake {
                Wake::Uplink(received) => {
                    let n = received?;
                    self.on_uplink(&buf[..n], &plan.doppler).await?;
                    continue;
                }
                Wake::Timer => Utc::now(),
            };

            for source in timers.take_due(now) {
                log::trace!("{} fired", source);
                match source {
                    Source::Aos => *uplink = Some(self.on_aos().await?),
                    Source::Los => {
                        self.on_los(uplink).await?;
                        return Ok(());
                    }
                    Source::Rotator => match rotator.advance(now) {
                        Some(due) => {
                            timers.schedule(due.sample.time, source);
                            self.on_rotator(due).await?;
                        }
                        None => log::debug!("Rotator path complete"),
                    },
                    Source::Doppler => match doppler.advance(now) {
                        Some(due) => {
                            timers.schedule(due.sample.time, source);
                            self.on_doppler(due).await?;
                        }
                        None => log::debug!("Doppler series complete"),
                    },
                    Source::PositionLog => {
                        if let Some(due) = position_log.advance(now) {
                            timers.schedule(due.sample.time, source);
                            let at = AzEl::from_radians(due.sample.az, due.sample.el);
                            log::info!("{:<18}{}", "Satellite at", at);
                        }
                    }
                    Source::Thermal => {
                        self.on_thermal().await?;
                        timers.schedule(now + self.settings.thermal_interval, source);
                    }
                }
            }
        }
        Ok(())
    }

    async fn on_aos(&mut self) -> Result<UdpSocket, PassError> {
        log::info!("AOS {}", Utc::now());
        self.radio.set_tx_selector(SELECTOR_EDL).await?;
        self.lband.ptt_on().await?;
        let socket = UdpSocket::bind(("0.0.0.0", self.settings.edl_port)).await?;
        log::info!("EDL socket open on port {}", self.settings.edl_port);
        Ok(socket)
    }

    async fn on_los(&mut self, uplink: &mut Option<UdpSocket>) -> Result<(), PassError> {
        log::info!("LOS {}", Utc::now());
        if uplink.take().is_some() {
            log::info!("EDL socket closed");
        }
        self.ident().await?;
        self.lband.ptt_off().await?;
        Ok(())
    }

    async fn on_rotator(&mut self, due: Due<'_, TrackPoint>) -> Result<(), PassError> {
        if due.skipped > 0 {
            log::debug!("Skipped {} stale rotator positions", due.skipped);
        }
        self.rotator
            .go(AzEl::from_radians(due.sample.az, due.sample.el))
            .await?;
        Ok(())
    }

    async fn on_doppler(&mut self, due: Due<'_, DopplerPoint>) -> Result<(), PassError> {
        if due.skipped > 0 {
            log::debug!("Skipped {} stale doppler samples", due.skipped);
        }
        log::debug!("doppler {:.3} m/s", due.sample.range_velocity);
        self.radio.set_rx_frequency(due.sample.range_velocity).await?;
        Ok(())
    }

    async fn on_uplink(&mut self, packet: &[u8], doppler: &[DopplerPoint]) -> Result<(), PassError> {
        let rv = range_velocity_at(doppler, Utc::now()).ok_or(PassError::EmptyPlan("doppler series"))?;
        let freq = self.radio.set_tx_frequency(rv).await?;
        self.radio.edl(packet).await?;
        log::info!("Sent EDL, {} bytes at {:.1} Hz", packet.len(), freq);
        Ok(())
    }

    async fn on_thermal(&mut self) -> Result<(), PassError> {
        let temperature = self.lband.gettemp().await?;
        let limit = self.settings.temperature_limit;
        log::info!("Station temperature {:.1}°C", temperature);
        if temperature > limit {
            return Err(PassError::ThermalLimit { temperature, limit });
        }
        Ok(())
    }

    async fn teardown(&mut self, uplink: &mut Option<UdpSocket>) -> Result<(), PassError> {
        self.enter(Phase::Teardown);
        log::info!("Pass ending, safing hardware");
        let mut first_error = None;

        keep_first(&mut first_error, "ptt off", self.lband.ptt_off().await);
        if uplink.take().is_some() {
            log::info!("EDL socket closed");
        }
        keep_first(&mut first_error, "lna off", self.uhf.lna_off().await);
        keep_first(
            &mut first_error,
            "tx gain",
            self.radio.set_tx_gain(self.settings.tx_gain_min).await,
        );
        keep_first(&mut first_error, "park", self.rotator.park().await.map(|_| ()));
        log::info!("Parked rotator");

        log::info!("Waiting {:?} for PA to cool", self.settings.cooloff);
        sleep(self.settings.cooloff).await;
        keep_first(&mut first_error, "pa off", self.lband.pa_off().await);

        first_error.map_or(Ok(()), Err)
    }
}

fn keep_first(first: &mut Option<PassError>, step: &str, result: Result<(), HardwareError>) {
    if let Err(e) = result {
        log::error!("Teardown step {} failed: {}", step, e);
        first.get_or_insert(e.into());
    }
}

async fn recv_uplink(socket: Option<&UdpSocket>, buf: &mut [u8]) -> std::io::Result<usize> {
    match socket {
        Some(socket) => socket.recv(buf).await,
        None => std::future::pending().await,
    }
}
