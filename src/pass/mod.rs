mod error;
mod plan;
mod single_pass;
mod timeline;

pub use error::PassError;
pub use plan::PassPlan;
pub use single_pass::{PassSettings, SinglePass};
