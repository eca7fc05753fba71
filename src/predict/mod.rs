mod ephemeris;
mod error;
mod ground_station;
mod pass_finder;
mod tle_loader;
mod tracker;
mod types;

pub use ephemeris::{Ephemeris, EphemerisSource, Satellite};
pub use error::PredictError;
pub use ground_station::GroundStation;
pub use tle_loader::TleLoader;
pub use tracker::{Tracker, DEFAULT_SAMPLE_INTERVAL};
pub use types::{range_velocity_at, DopplerPoint, PassEvent, PassInfo, PassSummary, TrackPoint, Weather};

#[cfg(test)]
pub(crate) use pass_finder::tests as sky;
#[cfg(test)]
pub(crate) use tle_loader::tests as tles;
