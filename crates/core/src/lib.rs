pub mod config;
pub mod error;
pub mod types;

pub use config::{SchedulerConfig, ThreadingMode};
pub use error::*;
pub use types::*;
