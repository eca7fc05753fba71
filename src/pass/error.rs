use std::time::Duration;

use thiserror::Error;

use crate::hardware::{AzEl, HardwareError};

#[derive(Debug, Error)]
pub enum PassError {
    #[error("hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("station temperature {temperature:.1}°C over limit {limit:.1}°C")]
    ThermalLimit { temperature: f64, limit: f64 },
    #[error("rotator did not reach {target} within {timeout:?}")]
    ArrivalTimeout { target: AzEl, timeout: Duration },
    #[error("uplink socket error: {0}")]
    Uplink(#[from] std::io::Error),
    #[error("pass has an empty {0}")]
    EmptyPlan(&'static str),
}
