use thiserror::Error;

use super::AzEl;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("{device} I/O error: {source}")]
    Io {
        device: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} did not answer in time")]
    Timeout(&'static str),
    #[error("malformed reply from {device}: {reply:?}")]
    Malformed { device: &'static str, reply: String },
    #[error("{device} rejected {command:?}: {reply}")]
    Rejected {
        device: &'static str,
        command: String,
        reply: String,
    },
    #[error("rotator movement failed, stuck at {0}")]
    MovementFailed(AzEl),
    #[error("{axis} {value:.1}° outside rotator limits {bound}")]
    OutOfRange {
        axis: &'static str,
        value: f64,
        bound: super::Bound,
    },
    #[error("flowgraph fault: {0}")]
    Rpc(String),
    #[error("flowgraph HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("simulated {0} failure")]
    Simulated(&'static str),
}

impl HardwareError {
    pub fn io(device: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| HardwareError::Io { device, source }
    }
}
