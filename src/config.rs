use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::commander::CommanderSettings;
use crate::hardware::{AzEl, Mount};
use crate::pass::PassSettings;
use crate::predict::{
    GroundStation, PredictError, TleLoader, Tracker, Weather, DEFAULT_SAMPLE_INTERVAL,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("replace the <template text> in '{0}'")]
    TemplateText(String),
    #[error("{key} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        key: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("tle_cache: {0}")]
    Tle(#[from] PredictError),
    #[error("{0} already exists, not overwriting")]
    Exists(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// NORAD id, international designator or name.
    pub satellite: String,
    #[serde(default)]
    pub tle_cache: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub tle_dir: Option<PathBuf>,
    pub station: StationConfig,
    #[serde(default)]
    pub hosts: HostsConfig,
    #[serde(default)]
    pub pass: PassConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StationConfig {
    /// Callsign sent in the morse ident.
    pub name: String,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    #[serde(default)]
    pub altitude_m: f64,
    #[serde(default = "default_temperature")]
    pub temperature_c: f64,
    #[serde(default = "default_pressure")]
    pub pressure_mbar: f64,
    #[serde(default = "default_temperature_limit")]
    pub temperature_limit_c: f64,
    #[serde(default)]
    pub cal: AzEl,
}

fn default_temperature() -> f64 {
    25.0
}

fn default_pressure() -> f64 {
    1010.0
}

fn default_temperature_limit() -> f64 {
    30.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HostsConfig {
    pub rotator: String,
    pub station: String,
    pub flowgraph: String,
    pub edl_dest: String,
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self {
            rotator: "127.0.0.1:4533".to_string(),
            station: "127.0.0.1:5005".to_string(),
            flowgraph: "127.0.0.1:10080".to_string(),
            edl_dest: "127.0.0.1:10025".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PassConfig {
    pub min_elevation_deg: f64,
    pub edl_port: u16,
    pub tx_gain: i32,
    pub tx_gain_min: i32,
    #[serde(deserialize_with = "humantime_duration")]
    pub morse_delay: Duration,
    #[serde(deserialize_with = "humantime_duration")]
    pub lna_delay: Duration,
    #[serde(deserialize_with = "humantime_duration")]
    pub cooloff_delay: Duration,
    #[serde(deserialize_with = "humantime_duration")]
    pub thermal_interval: Duration,
    #[serde(deserialize_with = "humantime_duration")]
    pub arrival_timeout: Duration,
    pub flip_threshold_deg: f64,
    #[serde(deserialize_with = "humantime_duration")]
    pub sample_interval: Duration,
    pub max_rejected_passes: usize,
    #[serde(deserialize_with = "humantime_duration")]
    pub lookahead: Duration,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            min_elevation_deg: 15.0,
            edl_port: 10025,
            tx_gain: 17,
            tx_gain_min: 3,
            morse_delay: Duration::from_secs(4),
            lna_delay: Duration::from_secs(1),
            cooloff_delay: Duration::from_secs(120),
            thermal_interval: Duration::from_secs(30),
            arrival_timeout: Duration::from_secs(180),
            flip_threshold_deg: 78.0,
            sample_interval: Duration::from_secs(2),
            max_rejected_passes: 100,
            lookahead: Duration::from_secs(3 * 86400),
        }
    }
}

fn humantime_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom)
}

const TEMPLATE: &str = r#"# Be sure to replace all <hint text> including angle brackets
satellite: "<NORAD ID, international designator or name>"

# Optional, TLEs keyed by any name. 2 or 3 lines each.
# tle_cache:
#   oresat0:
#     - "<TLE title>"
#     - "<TLE line 1>"
#     - "<TLE line 2>"
# tle_dir: "<directory of .tle files>"

station:
  # These values are for the Portland evb1 station
  name: "<station name or callsign>"
  latitude_deg: 45.509054
  longitude_deg: -122.681394
  altitude_m: 50
  # temperature_limit_c: 30
  # cal: { az: 0, el: 0 }

hosts:
  rotator: "127.0.0.1:4533"
  station: "127.0.0.1:5005"
  flowgraph: "127.0.0.1:10080"
  edl_dest: "127.0.0.1:10025"

pass:
  edl_port: 10025
  tx_gain: 17
  # min_elevation_deg: 15
  # cooloff_delay: 2m
  # lookahead: 3days
"#;

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let raw: serde_yaml::Value = serde_yaml::from_str(content)?;
        if let Some(key) = find_template_text(&raw, "") {
            return Err(ConfigError::TemplateText(key));
        }
        let config: Config = serde_yaml::from_value(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        in_range("station.latitude_deg", self.station.latitude_deg, -90.0, 90.0)?;
        in_range("station.longitude_deg", self.station.longitude_deg, -180.0, 180.0)?;
        in_range("pass.min_elevation_deg", self.pass.min_elevation_deg, 0.0, 90.0)?;
        in_range("pass.flip_threshold_deg", self.pass.flip_threshold_deg, 0.0, 90.0)?;

        let loader = TleLoader::new(None).with_cache(&self.tle_cache)?;
        for id in self.tle_cache.keys() {
            loader.satellite(id)?;
        }
        if self.pass.tx_gain < self.pass.tx_gain_min {
            log::warn!(
                "tx_gain {} is below tx_gain_min {}",
                self.pass.tx_gain,
                self.pass.tx_gain_min
            );
        }
        Ok(())
    }

    /// Writes a fresh template to `path`, refusing to overwrite.
    pub fn template(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Err(ConfigError::Exists(path.display().to_string()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, TEMPLATE)?;
        Ok(())
    }

    pub fn ground_station(&self) -> GroundStation {
        GroundStation::new(
            self.station.latitude_deg,
            self.station.longitude_deg,
            self.station.altitude_m,
        )
    }

    pub fn weather(&self) -> Weather {
        Weather {
            temperature_c: self.station.temperature_c,
            pressure_mbar: self.station.pressure_mbar,
        }
    }

    pub fn mount(&self) -> Mount {
        Mount {
            cal: self.station.cal,
            ..Mount::default()
        }
    }

    pub fn tle_loader(&self) -> Result<TleLoader, ConfigError> {
        let mut loader = TleLoader::new(self.tle_dir.clone()).with_cache(&self.tle_cache)?;
        loader.load_all()?;
        Ok(loader)
    }

    pub fn tracker(&self) -> Tracker {
        let interval = chrono::Duration::from_std(self.pass.sample_interval)
            .unwrap_or(DEFAULT_SAMPLE_INTERVAL);
        Tracker::new(self.ground_station())
            .with_max_rejected(self.pass.max_rejected_passes)
            .with_sample_interval(interval)
    }

    pub fn commander_settings(&self) -> CommanderSettings {
        CommanderSettings {
            satellite: self.satellite.clone(),
            min_elevation: self.pass.min_elevation_deg.to_radians(),
            flip_threshold: self.pass.flip_threshold_deg.to_radians(),
            lookahead: chrono::Duration::from_std(self.pass.lookahead)
                .unwrap_or_else(|_| chrono::Duration::days(3)),
            weather: self.weather(),
            temperature_limit: self.station.temperature_limit_c,
            ..CommanderSettings::default()
        }
    }

    pub fn pass_settings(&self) -> PassSettings {
        PassSettings {
            edl_port: self.pass.edl_port,
            tx_gain: self.pass.tx_gain,
            tx_gain_min: self.pass.tx_gain_min,
            temperature_limit: self.station.temperature_limit_c,
            thermal_interval: self.pass.thermal_interval,
            arrival_timeout: self.pass.arrival_timeout,
            cooloff: self.pass.cooloff_delay,
            ..PassSettings::default()
        }
    }
}

fn in_range(key: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if !(min..=max).contains(&value) {
        return Err(ConfigError::OutOfRange {
            key,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Dotted path of the first string still holding `<template text>`.
fn find_template_text(value: &serde_yaml::Value, path: &str) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) if s.contains('<') => Some(path.to_string()),
        serde_yaml::Value::Mapping(map) => map.iter().find_map(|(k, v)| {
            let key = k.as_str().map(String::from).unwrap_or_else(|| format!("{:?}", k));
            let child = if path.is_empty() {
                key
            } else {
                format!("{}.{}", path, key)
            };
            find_template_text(v, &child)
        }),
        serde_yaml::Value::Sequence(seq) => seq
            .iter()
            .enumerate()
            .find_map(|(i, v)| find_template_text(v, &format!("{}[{}]", path, i))),
        serde_yaml::Value::Tagged(tagged) => find_template_text(&tagged.value, path),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::tles::ORESAT0;

    fn minimal() -> String {
        format!(
            r#"
satellite: oresat0
tle_cache:
  oresat0:
    - "{}"
    - "{}"
    - "{}"
station:
  name: W7XYZ
  latitude_deg: 45.509054
  longitude_deg: -122.681394
  altitude_m: 50
pass:
  tx_gain: 40
  cooloff_delay: 2m
  lookahead: 2days
"#,
            ORESAT0[0], ORESAT0[1], ORESAT0[2]
        )
    }

    #[test]
    fn parses_with_defaults() {
        let config = Config::parse(&minimal()).unwrap();
        assert_eq!(config.satellite, "oresat0");
        assert_eq!(config.pass.tx_gain, 40);
        assert_eq!(config.pass.tx_gain_min, 3);
        assert_eq!(config.pass.edl_port, 10025);
        assert_eq!(config.pass.cooloff_delay, Duration::from_secs(120));
        assert_eq!(config.pass.lookahead, Duration::from_secs(2 * 86400));
        assert_eq!(config.pass.morse_delay, Duration::from_secs(4));
        assert_eq!(config.station.temperature_limit_c, 30.0);
        assert_eq!(config.hosts.rotator, "127.0.0.1:4533");
        assert_eq!(config.weather(), Weather::default());

        let settings = config.pass_settings();
        assert_eq!(settings.tx_gain, 40);
        assert_eq!(settings.cooloff, Duration::from_secs(120));
    }

    #[test]
    fn rejects_template_text() {
        let err = Config::parse(TEMPLATE).unwrap_err();
        assert!(matches!(err, ConfigError::TemplateText(ref k) if k == "satellite"), "{err}");

        let edited = minimal().replace("W7XYZ", "<callsign>");
        let err = Config::parse(&edited).unwrap_err();
        assert!(matches!(err, ConfigError::TemplateText(ref k) if k == "station.name"), "{err}");
    }

    #[test]
    fn rejects_bad_coordinates() {
        let err = Config::parse(&minimal().replace("45.509054", "95.0")).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { key: "station.latitude_deg", .. }));
        let err = Config::parse(&minimal().replace("-122.681394", "-190")).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { key: "station.longitude_deg", .. }));
    }

    #[test]
    fn rejects_broken_tle_and_unknown_keys() {
        let broken = minimal()
            .replace(&format!("    - \"{}\"\n", ORESAT0[1]), "")
            .replace(&format!("    - \"{}\"\n", ORESAT0[2]), "");
        assert!(matches!(Config::parse(&broken), Err(ConfigError::Tle(_))));

        let unknown = minimal().replace("  altitude_m: 50", "  altitude_m: 50\n  elevation: 3");
        assert!(matches!(Config::parse(&unknown), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn bad_duration_is_a_yaml_error() {
        let bad = minimal().replace("cooloff_delay: 2m", "cooloff_delay: soon");
        assert!(matches!(Config::parse(&bad), Err(ConfigError::Yaml(_))));
    }
}
