use thiserror::Error;

/// Errors reported synchronously by the scheduler and its configuration layer.
///
/// Task failures are not errors: they travel as a `Failed(code)` outcome
/// through `synchronize`.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("scheduler is not initialized")]
    NotInitialized,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("null pointer: {0}")]
    NullPointer(&'static str),

    #[error("null or out-of-range sync handle")]
    NullHandle,

    #[error("memory allocation failed: {0}")]
    MemoryAllocation(String),

    #[error("undefined behavior: {0}")]
    UndefinedBehavior(String),

    #[error("invalid task parameters: {0}")]
    InvalidParam(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}
