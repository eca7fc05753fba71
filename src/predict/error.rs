use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("TLE directory not found: {0}")]
    DirectoryNotFound(String),
    #[error("TLE file read error: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Invalid TLE for {name}: {message}")]
    InvalidTle { name: String, message: String },
    #[error("No TLE available for satellite {0}")]
    UnknownSatellite(String),
    #[error("Propagation error: {0}")]
    Propagation(String),
    #[error("No horizon crossings for {satellite} between {start} and {end}, the TLE or station location is fishy")]
    NoEvents {
        satellite: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("No pass of {satellite} reaching {min_elevation_deg:.1}° el before {end}")]
    NoPass {
        satellite: String,
        min_elevation_deg: f64,
        end: DateTime<Utc>,
    },
    #[error("Rejected {rejected} candidate passes of {satellite} below {min_elevation_deg:.1}° el")]
    CandidateLimit {
        satellite: String,
        rejected: usize,
        min_elevation_deg: f64,
    },
}
