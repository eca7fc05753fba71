mod commander;
mod config;
mod hardware;
mod navigator;
mod pass;
mod predict;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use crate::commander::{Commander, CommanderError, HostClock};
use crate::config::Config;
use crate::hardware::sim::{CallLog, SimRadio, SimRotator, SimStation};
use crate::hardware::{
    Band, Flowgraph, HardwareError, Radio, Rotator, Rotctld, Station, Stationd,
};
use crate::pass::SinglePass;
use crate::predict::TleLoader;

const STATION_CONFLICT_DELAY: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "pass-commander")]
#[command(about = "Satellite ground station pass automation")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "~/.config/OreSat/pass_commander.yaml")]
    config: String,
    /// Simulate parts of the station, repeatable
    #[arg(short, long, global = true, value_enum)]
    mock: Vec<Mock>,
    /// Satellite to track, overrides the config
    #[arg(short, long, global = true)]
    satellite: Option<String>,
    /// UDP port the EDL uplink is received on
    #[arg(long, global = true)]
    edl_port: Option<u16>,
    /// Transmit gain during a pass
    #[arg(long, global = true)]
    tx_gain: Option<i32>,
    /// More logging, -v for debug, -vv for trace
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Work passes until the pass count is reached
    Run {
        #[arg(short, long, default_value_t = 9999)]
        pass_count: usize,
    },
    /// Replay the next high pass immediately
    Dryrun,
    /// Print the next pass
    NextPass {
        #[arg(long)]
        json: bool,
    },
    /// Point at the horizon towards a location and hold
    Hold {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },
    /// Check the configuration file
    Validate,
    /// Write a configuration template
    Template,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mock {
    /// Flowgraph
    Tx,
    /// Rotator
    Rot,
    /// Stationd
    Con,
    All,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    #[error(transparent)]
    Commander(#[from] CommanderError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

type StationCommander = Commander<Rotator, Radio, Station, HostClock, TleLoader>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => Path::new(&home).join(rest),
        _ => PathBuf::from(path),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let path = expand_home(&cli.config);

    if let Commands::Template = cli.command {
        Config::template(&path)?;
        println!("Wrote template to {}, edit it before use", path.display());
        return Ok(());
    }

    let mut config = Config::from_file(&path)?;
    if let Some(satellite) = &cli.satellite {
        config.satellite = satellite.clone();
    }
    if let Some(port) = cli.edl_port {
        config.pass.edl_port = port;
    }
    if let Some(gain) = cli.tx_gain {
        config.pass.tx_gain = gain;
    }

    match cli.command {
        Commands::Validate => {
            println!(
                "Config is valid: {} from {} ({} cached TLEs)",
                config.satellite,
                config.station.name,
                config.tle_cache.len()
            );
        }
        Commands::NextPass { json } => {
            // Prediction only, the hardware is never touched
            let mut commander = build(&config, &[Mock::All]).await?;
            let summary = commander.next_pass()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "{}: rise {} {:.1}°az, culmination {} {:.1}°el, fall {} {:.1}°az",
                    summary.satellite,
                    summary.rise,
                    summary.rise_azimuth_deg,
                    summary.culmination,
                    summary.max_elevation_deg,
                    summary.fall,
                    summary.fall_azimuth_deg
                );
            }
        }
        Commands::Run { pass_count } => {
            build(&config, &cli.mock).await?.autorun(pass_count).await?;
        }
        Commands::Dryrun => build(&config, &cli.mock).await?.dryrun().await?,
        Commands::Hold { lat, lon } => build(&config, &cli.mock).await?.hold(lat, lon).await?,
        Commands::Template => {}
    }
    Ok(())
}

async fn build(config: &Config, mocks: &[Mock]) -> Result<StationCommander, CliError> {
    let mocked = |part: Mock| mocks.contains(&part) || mocks.contains(&Mock::All);
    let log = CallLog::default();
    let hosts = &config.hosts;

    let rotator = if mocked(Mock::Rot) {
        Rotator::Sim(SimRotator::new(log.clone()).with_slew(5.0))
    } else {
        Rotator::Rotctld(Rotctld::connect(&hosts.rotator, config.mount()).await?)
    };
    let radio = if mocked(Mock::Tx) {
        Radio::Sim(SimRadio::new(log.clone()).with_morse_delay(config.pass.morse_delay))
    } else {
        Radio::Flowgraph(
            Flowgraph::connect(
                &hosts.flowgraph,
                &hosts.edl_dest,
                &config.station.name,
                config.pass.morse_delay,
            )
            .await?,
        )
    };
    let (lband, uhf) = if mocked(Mock::Con) {
        (
            Station::Sim(SimStation::new(log.clone(), Band::LBand)),
            Station::Sim(SimStation::new(log, Band::Uhf)),
        )
    } else {
        (
            Station::Stationd(connect_station(config, Band::LBand).await?),
            Station::Stationd(connect_station(config, Band::Uhf).await?),
        )
    };

    // Simulated runs follow the wall clock as is
    let clock = if mocked(Mock::Rot) && mocked(Mock::Tx) && mocked(Mock::Con) {
        HostClock::AssumeSynced
    } else {
        HostClock::Timedatectl
    };

    let pass = SinglePass::new(rotator, radio, lband, uhf, config.pass_settings());
    Ok(Commander::new(
        pass,
        clock,
        config.tracker(),
        config.tle_loader()?,
        config.commander_settings(),
    ))
}

async fn connect_station(config: &Config, band: Band) -> Result<Stationd, HardwareError> {
    Stationd::connect(
        &config.hosts.station,
        band,
        config.pass.lna_delay,
        STATION_CONFLICT_DELAY,
    )
    .await
}
