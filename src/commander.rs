use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::sleep;

use crate::hardware::{Antenna, HardwareError, StationControl, Transceiver};
use crate::navigator::Navigator;
use crate::pass::{PassError, PassPlan, SinglePass};
use crate::predict::{
    Ephemeris, EphemerisSource, PassInfo, PassSummary, PredictError, Tracker, Weather,
};

const DRYRUN_MIN_ELEVATION_DEG: f64 = 80.0;
const DRYRUN_LOOKAHEAD_DAYS: i64 = 30;
const DRYRUN_MAX_REJECTED: usize = 10_000;

#[derive(Debug, Error)]
pub enum CommanderError {
    #[error("prediction failed: {0}")]
    Predict(#[from] PredictError),
    #[error("pass failed: {0}")]
    Pass(#[from] PassError),
    #[error("hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("clock check failed: {0}")]
    Clock(String),
}

/// Reports whether the host clock is disciplined by NTP.
#[allow(async_fn_in_trait)]
pub trait ClockSync {
    async fn is_synchronized(&mut self) -> Result<bool, CommanderError>;

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The host clock. `Timedatectl` asks systemd-timedated, `AssumeSynced` is
/// for fully simulated runs where wall time does not matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostClock {
    Timedatectl,
    AssumeSynced,
}

impl ClockSync for HostClock {
    async fn is_synchronized(&mut self) -> Result<bool, CommanderError> {
        if *self == HostClock::AssumeSynced {
            return Ok(true);
        }
        let output = Command::new("timedatectl")
            .args(["show", "--property=NTPSynchronized", "--value"])
            .output()
            .await
            .map_err(|e| CommanderError::Clock(format!("timedatectl: {}", e)))?;
        if !output.status.success() {
            return Err(CommanderError::Clock(format!(
                "timedatectl exited with {}",
                output.status
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ntp_synchronized(&stdout)
            .ok_or_else(|| CommanderError::Clock(format!("unexpected reply {:?}", stdout.trim())))
    }
}

fn parse_ntp_synchronized(reply: &str) -> Option<bool> {
    match reply.trim() {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct CommanderSettings {
    pub satellite: String,
    /// Radians.
    pub min_elevation: f64,
    /// Radians.
    pub flip_threshold: f64,
    pub lookahead: chrono::Duration,
    pub weather: Weather,
    pub temperature_limit: f64,
    pub tle_max_age: chrono::Duration,
    pub clock_poll: Duration,
    /// Longest single sleep while waiting for a rise.
    pub max_sleep: chrono::Duration,
    pub fall_margin: chrono::Duration,
    /// Wait before predicting again after a failed prediction.
    pub retry_delay: Duration,
}

impl Default for CommanderSettings {
    fn default() -> Self {
        Self {
            satellite: String::new(),
            min_elevation: 15.0_f64.to_radians(),
            flip_threshold: crate::navigator::DEFAULT_FLIP_THRESHOLD_DEG.to_radians(),
            lookahead: chrono::Duration::days(3),
            weather: Weather::default(),
            temperature_limit: 30.0,
            tle_max_age: chrono::Duration::days(1),
            clock_poll: Duration::from_secs(60),
            max_sleep: chrono::Duration::days(1),
            fall_margin: chrono::Duration::seconds(1),
            retry_delay: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PassOutcome {
    Worked,
    TooHot(f64),
}

/// Repeats single passes of one satellite.
pub struct Commander<A, R, S, C, L> {
    pass: SinglePass<A, R, S>,
    clock: C,
    tracker: Tracker,
    tles: L,
    settings: CommanderSettings,
}

impl<A, R, S, C, L> Commander<A, R, S, C, L>
where
    A: Antenna,
    R: Transceiver,
    S: StationControl,
    C: ClockSync,
    L: EphemerisSource,
{
    pub fn new(
        pass: SinglePass<A, R, S>,
        clock: C,
        tracker: Tracker,
        tles: L,
        settings: CommanderSettings,
    ) -> Self {
        Self {
            pass,
            clock,
            tracker,
            tles,
            settings,
        }
    }

    /// Blocks until the host clock is NTP synchronized.
    pub async fn require_clock_sync(&mut self) -> Result<(), CommanderError> {
        while !self.clock.is_synchronized().await? {
            log::warn!(
                "System clock is not synchronized. Sleeping {}",
                humantime::format_duration(self.settings.clock_poll)
            );
            sleep(self.settings.clock_poll).await;
        }
        Ok(())
    }

    /// Rereads the TLE sources and builds the configured satellite.
    pub fn load_satellite(&mut self) -> Result<L::Ephemeris, CommanderError> {
        let sat = self.tles.load(&self.settings.satellite)?;
        let age = self.clock.now() - sat.epoch();
        if age > self.settings.tle_max_age {
            log::warn!("TLE for {} is {} days old", sat.name(), age.num_days());
        }
        Ok(sat)
    }

    pub fn find_pass<E: Ephemeris + ?Sized>(
        &self,
        sat: &E,
        after: DateTime<Utc>,
    ) -> Result<PassInfo, CommanderError> {
        let info = self.tracker.next_pass(
            sat,
            after,
            self.settings.min_elevation,
            self.settings.lookahead,
        )?;
        Ok(info)
    }

    pub fn next_pass(&mut self) -> Result<PassSummary, CommanderError> {
        let sat = self.load_satellite()?;
        let info = self.find_pass(&sat, self.clock.now())?;
        Ok(PassSummary::new(sat.name(), &info))
    }

    /// Samples the pass and turns it into a rotator path.
    pub fn plan<E: Ephemeris + ?Sized>(
        &self,
        sat: &E,
        info: &PassInfo,
    ) -> Result<PassPlan, CommanderError> {
        let (raw, doppler) = self.tracker.track(sat, info, self.settings.weather)?;
        let navigator = Navigator::with_flip_threshold(info, self.settings.flip_threshold);
        log::info!("{}", navigator);
        let path = navigator.path(&raw);
        Ok(PassPlan::new(raw, path, doppler, self.settings.min_elevation))
    }

    /// Sleeps until `info` rises, in bounded chunks. A stale TLE is reloaded
    /// after each chunk and the pass predicted again.
    pub async fn sleep_until_rise(
        &mut self,
        mut sat: L::Ephemeris,
        mut info: PassInfo,
    ) -> Result<(L::Ephemeris, PassInfo), CommanderError> {
        let mut slept = false;
        loop {
            let remaining = info.rise.time - self.clock.now();
            if remaining <= chrono::Duration::zero() {
                if !slept {
                    log::info!("In a pass now!");
                }
                return Ok((sat, info));
            }
            log::info!(
                "Sleeping {} until next rise time {} for a {:.2}°el pass",
                humantime::format_duration(remaining.to_std().unwrap_or_default()),
                info.rise.time,
                info.peak().el.to_degrees()
            );
            let chunk = remaining.min(self.settings.max_sleep);
            sleep(chunk.to_std().unwrap_or_default()).await;
            slept = true;

            if self.clock.now() - sat.epoch() > self.settings.tle_max_age {
                log::info!("Refreshing TLE for {}", self.settings.satellite);
                sat = self.load_satellite()?;
                info = self.find_pass(&sat, self.clock.now())?;
            }
        }
    }

    /// Works the plan unless the station is already too hot.
    pub async fn run_pass(&mut self, plan: &PassPlan) -> Result<PassOutcome, CommanderError> {
        let temperature = self.pass.station_temperature().await?;
        let limit = self.settings.temperature_limit;
        if temperature > limit {
            log::warn!(
                "Temperature is too high ({:.1}°C > {:.1}°C). Skipping this pass.",
                temperature,
                limit
            );
            return Ok(PassOutcome::TooHot(temperature));
        }
        self.pass.work(plan).await?;
        Ok(PassOutcome::Worked)
    }

    /// Clock check, prediction and the wait for the rise of the next pass.
    async fn prepare(&mut self) -> Result<(PassInfo, PassPlan), CommanderError> {
        self.require_clock_sync().await?;
        let sat = self.load_satellite()?;
        let info = self.find_pass(&sat, self.clock.now())?;
        let (sat, info) = self.sleep_until_rise(sat, info).await?;
        let plan = self.plan(&sat, &info)?;
        Ok((info, plan))
    }

    /// Works up to `count` passes. Neither a failed prediction nor a failed
    /// pass ends the run, both are logged and the next cycle starts. Worked
    /// and failed passes count, a pass skipped for temperature does not.
    pub async fn autorun(&mut self, count: usize) -> Result<(), CommanderError> {
        log::info!("Running for {} passes", count);
        let mut n = 0;
        while n < count {
            let (info, plan) = match self.prepare().await {
                Ok(prepared) => prepared,
                Err(e) => {
                    log::error!(
                        "No pass to work: {}. Retrying in {}",
                        e,
                        humantime::format_duration(self.settings.retry_delay)
                    );
                    sleep(self.settings.retry_delay).await;
                    continue;
                }
            };
            match self.run_pass(&plan).await {
                Ok(PassOutcome::Worked) => {
                    n += 1;
                    log::info!("Pass {}/{} complete", n, count);
                }
                Ok(PassOutcome::TooHot(_)) => {}
                Err(e) => {
                    n += 1;
                    log::error!("Pass {}/{} failed: {}", n, count, e);
                }
            }

            let over = info.fall.time + self.settings.fall_margin;
            let left = over - self.clock.now();
            if left > chrono::Duration::zero() {
                log::info!("Sleeping until pass is really over at {}", over);
                sleep(left.to_std().unwrap_or_default()).await;
            }
        }
        Ok(())
    }

    /// Finds a high pass within a month and replays it starting now.
    pub async fn dryrun(&mut self) -> Result<(), CommanderError> {
        let sat = self.load_satellite()?;
        let info = self.tracker.clone().with_max_rejected(DRYRUN_MAX_REJECTED).next_pass(
            &sat,
            self.clock.now(),
            DRYRUN_MIN_ELEVATION_DEG.to_radians(),
            chrono::Duration::days(DRYRUN_LOOKAHEAD_DAYS),
        )?;
        log::info!(
            "Rise time: {} Max el: {:.3}",
            info.rise.time,
            info.peak().el.to_degrees()
        );

        let plan = self.plan(&sat, &info)?;
        let offset = self.clock.now() - plan.start().unwrap_or(info.rise.time);
        log::info!("Dryrun offset: {}s", offset.num_seconds());
        let plan = plan.shifted(offset);
        if let Some(end) = plan.end() {
            log::info!("Dry run ends at {}", end);
        }
        self.pass.work(&plan).await?;
        log::info!("Dry run complete");
        Ok(())
    }

    /// Points at the horizon towards a geographic target and keeps the
    /// uplink open until the pass is aborted.
    pub async fn hold(&mut self, latitude_deg: f64, longitude_deg: f64) -> Result<(), CommanderError> {
        let azimuth = self.tracker.station().bearing_to(latitude_deg, longitude_deg);
        log::info!(
            "Holding at {:.1}°az towards {:.4}, {:.4}",
            azimuth.to_degrees(),
            latitude_deg,
            longitude_deg
        );
        self.pass.work(&PassPlan::hold(azimuth, self.clock.now())).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::{CallLog, SimRadio, SimRotator, SimStation};
    use crate::hardware::Band;
    use crate::pass::PassSettings;
    use crate::predict::sky::{epoch, SineSky};
    use crate::predict::tles::ORESAT0;
    use crate::predict::{GroundStation, TleLoader};
    use std::collections::{BTreeMap, VecDeque};

    struct ScriptedClock {
        replies: VecDeque<bool>,
        polls: usize,
    }

    impl ClockSync for ScriptedClock {
        async fn is_synchronized(&mut self) -> Result<bool, CommanderError> {
            self.polls += 1;
            Ok(self.replies.pop_front().unwrap_or(true))
        }
    }

    /// Follows tokio time from `base`, so paused tests can sleep through passes.
    struct SteppedClock {
        base: DateTime<Utc>,
        start: tokio::time::Instant,
    }

    impl SteppedClock {
        fn at(base: DateTime<Utc>) -> Self {
            Self {
                base,
                start: tokio::time::Instant::now(),
            }
        }
    }

    impl ClockSync for SteppedClock {
        async fn is_synchronized(&mut self) -> Result<bool, CommanderError> {
            Ok(true)
        }

        fn now(&self) -> DateTime<Utc> {
            self.base + chrono::Duration::from_std(self.start.elapsed()).unwrap()
        }
    }

    /// Hands out an hourly sine sky, failing the first `failures` loads.
    #[derive(Default)]
    struct SkySource {
        loads: usize,
        failures: usize,
    }

    impl EphemerisSource for SkySource {
        type Ephemeris = SineSky;

        fn load(&mut self, satellite: &str) -> Result<SineSky, PredictError> {
            self.loads += 1;
            if self.failures > 0 {
                self.failures -= 1;
                return Err(PredictError::UnknownSatellite(satellite.to_string()));
            }
            Ok(SineSky {
                epoch: epoch(),
                period_s: 3600.0,
                peak: 1.2,
                offset: 0.0,
            })
        }
    }

    type SimCommander<C, L> = Commander<SimRotator, SimRadio, SimStation, C, L>;

    fn free_port() -> u16 {
        std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn single_pass(
        log: &CallLog,
        rotator: SimRotator,
        lband_temp: f64,
    ) -> SinglePass<SimRotator, SimRadio, SimStation> {
        SinglePass::new(
            rotator,
            SimRadio::new(log.clone()),
            SimStation::new(log.clone(), Band::LBand).with_temperature(lband_temp),
            SimStation::new(log.clone(), Band::Uhf),
            PassSettings {
                edl_port: free_port(),
                arrival_poll: Duration::from_millis(10),
                arrival_timeout: Duration::from_secs(2),
                thermal_interval: Duration::from_millis(300),
                cooloff: Duration::ZERO,
                ..PassSettings::default()
            },
        )
    }

    fn settings() -> CommanderSettings {
        CommanderSettings {
            satellite: "oresat0".to_string(),
            ..CommanderSettings::default()
        }
    }

    fn station() -> GroundStation {
        GroundStation::new(45.509054, -122.681394, 50.0)
    }

    fn commander<C: ClockSync>(
        log: &CallLog,
        lband_temp: f64,
        clock: C,
    ) -> SimCommander<C, TleLoader> {
        let pass = single_pass(log, SimRotator::new(log.clone()), lband_temp);
        let mut cache = BTreeMap::new();
        cache.insert(
            "oresat0".to_string(),
            ORESAT0.iter().map(|s| s.to_string()).collect(),
        );
        let tles = TleLoader::new(None).with_cache(&cache).unwrap();
        Commander::new(pass, clock, Tracker::new(station()), tles, settings())
    }

    /// A commander on the sine sky whose clock starts at `start`.
    fn sky_commander(
        pass: SinglePass<SimRotator, SimRadio, SimStation>,
        start: DateTime<Utc>,
        source: SkySource,
        settings: CommanderSettings,
    ) -> SimCommander<SteppedClock, SkySource> {
        Commander::new(pass, SteppedClock::at(start), Tracker::new(station()), source, settings)
    }

    #[test]
    fn parses_timedatectl() {
        assert_eq!(parse_ntp_synchronized("yes\n"), Some(true));
        assert_eq!(parse_ntp_synchronized("no"), Some(false));
        assert_eq!(parse_ntp_synchronized(""), None);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_clock_sync() {
        let clock = ScriptedClock {
            replies: VecDeque::from([false, false, true]),
            polls: 0,
        };
        let mut commander = commander(&CallLog::default(), 20.0, clock);
        let start = tokio::time::Instant::now();
        commander.require_clock_sync().await.unwrap();
        assert_eq!(commander.clock.polls, 3);
        assert!(start.elapsed() >= Duration::from_secs(120));
    }

    #[test]
    fn loads_satellite_from_cache() {
        let mut commander = commander(&CallLog::default(), 20.0, HostClock::AssumeSynced);
        let sat = commander.load_satellite().unwrap();
        assert_eq!(sat.name(), "ORESAT0");

        commander.settings.satellite = "60525".to_string();
        assert!(matches!(
            commander.load_satellite(),
            Err(CommanderError::Predict(PredictError::UnknownSatellite(_)))
        ));
    }

    #[test]
    fn plan_follows_the_predicted_pass() {
        let commander = commander(&CallLog::default(), 20.0, HostClock::AssumeSynced);
        let sky = SineSky {
            epoch: epoch(),
            period_s: 3600.0,
            peak: 1.2,
            offset: 0.0,
        };
        let info = commander.find_pass(&sky, epoch() - chrono::Duration::minutes(10)).unwrap();
        let plan = commander.plan(&sky, &info).unwrap();

        assert_eq!(plan.raw.len(), plan.path.len());
        assert_eq!(plan.raw.len(), plan.doppler.len());
        assert_eq!(plan.start(), Some(info.rise.time));
        assert_eq!(plan.end(), Some(info.fall.time));
        let (aos, los) = (plan.aos.unwrap(), plan.los);
        assert!(info.rise.time < aos && aos < info.peak().time);
        assert!(info.peak().time < los && los < info.fall.time);
    }

    #[tokio::test]
    async fn hot_station_skips_the_pass() {
        let log = CallLog::default();
        let mut commander = commander(&log, 45.0, HostClock::AssumeSynced);
        let plan = PassPlan::hold(0.0, Utc::now());

        let outcome = commander.run_pass(&plan).await.unwrap();
        assert_eq!(outcome, PassOutcome::TooHot(45.0));
        assert_eq!(log.entries(), vec!["l-band temp 45.0"]);
    }

    #[tokio::test]
    async fn hold_points_at_the_target_until_aborted() {
        let log = CallLog::default();
        let mut commander = commander(&log, 45.0, HostClock::AssumeSynced);

        // Due north of the station, aborted by the thermal check
        let err = commander.hold(60.0, -122.681394).await.unwrap_err();
        assert!(matches!(
            err,
            CommanderError::Pass(PassError::ThermalLimit { .. })
        ));

        let entries = log.entries();
        assert_eq!(entries[0], "rotator go 0.0 0.0");
        assert!(entries.iter().any(|e| e == "radio selector edl"));
        assert_eq!(log.count("rotator park"), 1);
        assert_eq!(entries.last().map(String::as_str), Some("l-band pa off"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_passes_count_and_the_run_continues() {
        let log = CallLog::default();
        let rotator = SimRotator::new(log.clone()).with_fault("go");
        let pass = single_pass(&log, rotator, 20.0);
        let start = epoch() - chrono::Duration::minutes(10);
        let mut commander = sky_commander(pass, start, SkySource::default(), settings());

        commander.autorun(2).await.unwrap();

        // Both passes were tried and torn down
        assert_eq!(log.count("rotator park"), 2);
        assert_eq!(commander.tles.loads, 2);
        // Slept through the fall of the second pass plus the margin
        let second_fall = epoch() + chrono::Duration::seconds(5400);
        assert!(commander.clock.now() >= second_fall);
        assert!(commander.clock.now() < second_fall + chrono::Duration::minutes(1));
    }

    #[tokio::test(start_paused = true)]
    async fn hot_passes_do_not_count() {
        let log = CallLog::default();
        let pass = single_pass(&log, SimRotator::new(log.clone()), 45.0);
        let start = epoch() - chrono::Duration::minutes(10);
        let mut commander = sky_commander(pass, start, SkySource::default(), settings());

        let run = tokio::time::timeout(Duration::from_secs(5 * 3600), commander.autorun(1)).await;
        assert!(run.is_err(), "a skipped pass ended the run");
        assert!(log.count("l-band temp 45.0") >= 4);
        assert_eq!(log.count("rotator park"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn prediction_failure_is_retried() {
        let log = CallLog::default();
        let rotator = SimRotator::new(log.clone()).with_fault("go");
        let pass = single_pass(&log, rotator, 20.0);
        let start = epoch() - chrono::Duration::minutes(30);
        let source = SkySource {
            failures: 1,
            ..SkySource::default()
        };
        let settings = CommanderSettings {
            retry_delay: Duration::from_secs(600),
            ..settings()
        };
        let mut commander = sky_commander(pass, start, source, settings);

        commander.autorun(1).await.unwrap();

        assert_eq!(commander.tles.loads, 2);
        assert_eq!(log.count("rotator park"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_tle_is_reloaded_while_waiting() {
        let log = CallLog::default();
        let pass = single_pass(&log, SimRotator::new(log.clone()), 20.0);
        let start = epoch() + chrono::Duration::minutes(40);
        let settings = CommanderSettings {
            tle_max_age: chrono::Duration::minutes(10),
            max_sleep: chrono::Duration::minutes(10),
            ..settings()
        };
        let mut commander = sky_commander(pass, start, SkySource::default(), settings);

        let sky = commander.load_satellite().unwrap();
        let info = commander.find_pass(&sky, commander.clock.now()).unwrap();
        let (_, info) = commander.sleep_until_rise(sky, info).await.unwrap();

        // One load up front, one after each of the two chunks at least
        assert!(commander.tles.loads >= 3);
        let rise = epoch() + chrono::Duration::hours(1);
        assert!((info.rise.time - rise).num_seconds().abs() <= 1);
        assert!(commander.clock.now() >= info.rise.time);
    }
}
