use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str) -> Option<T> {
    let raw = profiled_env_opt(profile, key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}

// ── Scheduler config ──────────────────────────────────────────

/// How the scheduler executes tasks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadingMode {
    /// Background worker pool.
    #[default]
    MultiThreaded,
    /// No background threads: callers run ready tasks inside `synchronize`.
    SingleThreaded,
}

impl std::str::FromStr for ThreadingMode {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "multi_threaded" | "multi" => Ok(ThreadingMode::MultiThreaded),
            "single_threaded" | "single" => Ok(ThreadingMode::SingleThreaded),
            other => Err(SchedulerError::Config(format!(
                "invalid threading mode '{other}', expected 'multi_threaded' or 'single_threaded'"
            ))),
        }
    }
}

/// Scheduler configuration, typically parsed from TOML or the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker threads. Defaults to the available parallelism (at least 2).
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default)]
    pub mode: ThreadingMode,
    /// How many workers (counted from index 0) may run dedicated tasks.
    #[serde(default = "default_dedicated_threads")]
    pub dedicated_threads: usize,
    /// Maximum number of live tasks.
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,
    /// Maximum number of input or output tokens per task.
    #[serde(default = "default_max_dependencies")]
    pub max_dependencies: usize,
    /// How long a busy task stays on hold before it is retried.
    #[serde(default = "default_busy_wait_ms")]
    pub busy_wait_ms: u64,
    /// Per-handle wait slice used by `wait_for_all`.
    #[serde(default = "default_wait_for_all_slice_ms")]
    pub wait_for_all_slice_ms: u64,
    /// Period of the hardware listener thread.
    #[serde(default = "default_hw_poll_interval_ms")]
    pub hw_poll_interval_ms: u64,
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
    /// Worker stack size in bytes (platform default when unset).
    #[serde(default)]
    pub stack_size: Option<usize>,
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .max(2)
}
fn default_dedicated_threads() -> usize { 1 }
fn default_pool_capacity() -> usize { 1024 }
fn default_max_dependencies() -> usize { 4 }
fn default_busy_wait_ms() -> u64 { 1 }
fn default_wait_for_all_slice_ms() -> u64 { 5 }
fn default_hw_poll_interval_ms() -> u64 { 1000 }
fn default_thread_name_prefix() -> String { "codecflow-worker".to_string() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            mode: ThreadingMode::default(),
            dedicated_threads: default_dedicated_threads(),
            pool_capacity: default_pool_capacity(),
            max_dependencies: default_max_dependencies(),
            busy_wait_ms: default_busy_wait_ms(),
            wait_for_all_slice_ms: default_wait_for_all_slice_ms(),
            hw_poll_interval_ms: default_hw_poll_interval_ms(),
            thread_name_prefix: default_thread_name_prefix(),
            stack_size: None,
        }
    }
}

impl SchedulerConfig {
    /// Multi-threaded config with an explicit worker count.
    pub fn with_threads(worker_threads: usize) -> Self {
        Self {
            worker_threads,
            ..Self::default()
        }
    }

    /// Config for single-threaded mode.
    pub fn single_threaded() -> Self {
        Self {
            mode: ThreadingMode::SingleThreaded,
            ..Self::default()
        }
    }

    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, SchedulerError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Build config from environment variables (call `load_dotenv()` first).
    ///
    /// Profile is read from `CODECFLOW_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, SchedulerError> {
        let profile = env_opt("CODECFLOW_PROFILE").unwrap_or_default().to_uppercase();
        let mut config = Self::default();
        config.apply_profiled_env(&profile)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CODECFLOW_*` environment overrides on top of file values.
    ///
    /// - `CODECFLOW_WORKER_THREADS` -> `worker_threads`
    /// - `CODECFLOW_DEDICATED_THREADS` -> `dedicated_threads`
    /// - `CODECFLOW_POOL_CAPACITY` -> `pool_capacity`
    /// - `CODECFLOW_MAX_DEPENDENCIES` -> `max_dependencies`
    /// - `CODECFLOW_BUSY_WAIT_MS` -> `busy_wait_ms`
    /// - `CODECFLOW_WAIT_FOR_ALL_SLICE_MS` -> `wait_for_all_slice_ms`
    /// - `CODECFLOW_HW_POLL_INTERVAL_MS` -> `hw_poll_interval_ms`
    /// - `CODECFLOW_THREAD_NAME_PREFIX` -> `thread_name_prefix`
    /// - `CODECFLOW_MODE` -> `mode`
    ///
    /// Unparseable values are logged and keep the file setting.
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_profiled_env_lenient("");
    }

    fn apply_profiled_env_lenient(&mut self, profile: &str) {
        if let Err(e) = self.apply_profiled_env(profile) {
            tracing::warn!("Ignoring environment override: {}", e);
        }
    }

    fn apply_profiled_env(&mut self, profile: &str) -> Result<(), SchedulerError> {
        if let Some(v) = profiled_env_parse(profile, "CODECFLOW_WORKER_THREADS") {
            self.worker_threads = v;
        }
        if let Some(v) = profiled_env_parse(profile, "CODECFLOW_DEDICATED_THREADS") {
            self.dedicated_threads = v;
        }
        if let Some(v) = profiled_env_parse(profile, "CODECFLOW_POOL_CAPACITY") {
            self.pool_capacity = v;
        }
        if let Some(v) = profiled_env_parse(profile, "CODECFLOW_MAX_DEPENDENCIES") {
            self.max_dependencies = v;
        }
        if let Some(v) = profiled_env_parse(profile, "CODECFLOW_BUSY_WAIT_MS") {
            self.busy_wait_ms = v;
        }
        if let Some(v) = profiled_env_parse(profile, "CODECFLOW_WAIT_FOR_ALL_SLICE_MS") {
            self.wait_for_all_slice_ms = v;
        }
        if let Some(v) = profiled_env_parse(profile, "CODECFLOW_HW_POLL_INTERVAL_MS") {
            self.hw_poll_interval_ms = v;
        }
        if let Some(v) = profiled_env_opt(profile, "CODECFLOW_THREAD_NAME_PREFIX") {
            self.thread_name_prefix = v;
        }
        if let Some(v) = profiled_env_opt(profile, "CODECFLOW_MODE") {
            self.mode = v.parse()?;
        }
        Ok(())
    }

    /// Validate structural settings.
    ///
    /// Worker counts are checked by the scheduler at initialization, since
    /// an unusable count there is reported as `Unsupported`.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.pool_capacity == 0 {
            return Err(SchedulerError::Config(
                "pool_capacity must be at least 1".to_string(),
            ));
        }
        if self.pool_capacity > u32::MAX as usize {
            return Err(SchedulerError::Config(format!(
                "pool_capacity {} exceeds the slot index range",
                self.pool_capacity
            )));
        }
        if self.max_dependencies == 0 {
            return Err(SchedulerError::Config(
                "max_dependencies must be at least 1".to_string(),
            ));
        }
        if self.wait_for_all_slice_ms == 0 {
            return Err(SchedulerError::Config(
                "wait_for_all_slice_ms must be positive".to_string(),
            ));
        }
        if self.hw_poll_interval_ms == 0 {
            return Err(SchedulerError::Config(
                "hw_poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of threads that cooperate on work: the pool size, or 1 when
    /// the caller runs tasks itself.
    pub fn effective_threads(&self) -> usize {
        match self.mode {
            ThreadingMode::MultiThreaded => self.worker_threads,
            ThreadingMode::SingleThreaded => 1,
        }
    }

    pub fn busy_wait(&self) -> Duration {
        Duration::from_millis(self.busy_wait_ms)
    }

    pub fn wait_for_all_slice(&self) -> Duration {
        Duration::from_millis(self.wait_for_all_slice_ms)
    }

    pub fn hw_poll_interval(&self) -> Duration {
        Duration::from_millis(self.hw_poll_interval_ms)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Scheduler config:");
        tracing::info!("  mode:        {:?}", self.mode);
        tracing::info!(
            "  workers:     {} ({} dedicated-capable)",
            self.worker_threads,
            self.dedicated_threads
        );
        tracing::info!(
            "  pool:        capacity={}, max_dependencies={}",
            self.pool_capacity,
            self.max_dependencies
        );
        tracing::info!(
            "  timing:      busy_wait={}ms, wait_for_all_slice={}ms, hw_poll={}ms",
            self.busy_wait_ms,
            self.wait_for_all_slice_ms,
            self.hw_poll_interval_ms
        );
    }
}
