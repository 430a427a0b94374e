use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TempoError;
use crate::handle::DEFAULT_HANDLE_LENGTH;

/// Shortest generated handle we accept; below this the random padding gets too thin.
pub const MIN_HANDLE_LENGTH: usize = 12;
/// Longest generated handle we accept.
pub const MAX_HANDLE_LENGTH: usize = 32;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
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

// ── Executor selection ────────────────────────────────────────

/// Which execution strategy runs dispatched task bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    /// One fresh thread per task.
    #[default]
    Thread,
    /// Bounded worker pool (`worker_threads` workers).
    Pool,
    /// Run on the scheduler thread itself. Tests only.
    Inline,
}

impl ExecutorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorKind::Thread => "thread",
            ExecutorKind::Pool => "pool",
            ExecutorKind::Inline => "inline",
        }
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutorKind {
    type Err = TempoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread" => Ok(ExecutorKind::Thread),
            "pool" => Ok(ExecutorKind::Pool),
            "inline" => Ok(ExecutorKind::Inline),
            other => Err(TempoError::Config(format!("unknown executor kind '{other}'"))),
        }
    }
}

// ── Scheduler config ──────────────────────────────────────────

/// Scheduler configuration, parsed from TOML and/or environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How long the loop sleeps when nothing is queued, in milliseconds.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Length of generated task handles.
    #[serde(default = "default_handle_length")]
    pub handle_length: usize,
    /// Execution strategy for task bodies.
    #[serde(default)]
    pub executor: ExecutorKind,
    /// Pool size for [`ExecutorKind::Pool`]. 0 = available parallelism.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Name of the scheduler loop thread; worker threads get a `-worker` suffix.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

fn default_idle_timeout_ms() -> u64 { 3000 }
fn default_handle_length() -> usize { DEFAULT_HANDLE_LENGTH }
fn default_worker_threads() -> usize { 0 }
fn default_thread_name() -> String { "tempo-scheduler".into() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            handle_length: default_handle_length(),
            executor: ExecutorKind::default(),
            worker_threads: default_worker_threads(),
            thread_name: default_thread_name(),
        }
    }
}

impl SchedulerConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, TempoError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TempoError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Build config from the environment (call sites need not load `.env` first).
    ///
    /// `TEMPO_CONFIG` names an optional TOML file used as the base. Profile is read
    /// from `TEMPO_PROFILE`; when set (e.g. `PROD`), every key is first looked up as
    /// `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, TempoError> {
        load_dotenv();
        let mut config = match env_opt("TEMPO_CONFIG") {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            None => Self::default(),
        };
        let profile = env_or("TEMPO_PROFILE", "").to_uppercase();
        config.apply_overrides(|key| profiled_env_opt(&profile, key));
        config.validate()?;
        Ok(config)
    }

    /// Apply `TEMPO_*` overrides fetched through `lookup`.
    ///
    /// Convention: `TEMPO_KEY` overrides `key`. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("TEMPO_IDLE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.idle_timeout_ms = v;
        }
        if let Some(v) = lookup("TEMPO_HANDLE_LENGTH").and_then(|v| v.parse().ok()) {
            self.handle_length = v;
        }
        if let Some(v) = lookup("TEMPO_EXECUTOR") {
            match v.parse() {
                Ok(kind) => self.executor = kind,
                Err(e) => tracing::warn!(error = %e, "ignoring TEMPO_EXECUTOR override"),
            }
        }
        if let Some(v) = lookup("TEMPO_WORKER_THREADS").and_then(|v| v.parse().ok()) {
            self.worker_threads = v;
        }
        if let Some(v) = lookup("TEMPO_THREAD_NAME") {
            self.thread_name = v;
        }
    }

    /// Validate field ranges.
    pub fn validate(&self) -> Result<(), TempoError> {
        if self.idle_timeout_ms == 0 {
            return Err(TempoError::Config("idle_timeout_ms must be greater than zero".into()));
        }
        if !(MIN_HANDLE_LENGTH..=MAX_HANDLE_LENGTH).contains(&self.handle_length) {
            return Err(TempoError::Config(format!(
                "handle_length must be between {MIN_HANDLE_LENGTH} and {MAX_HANDLE_LENGTH}, got {}",
                self.handle_length
            )));
        }
        if self.thread_name.trim().is_empty() {
            return Err(TempoError::Config("thread_name must not be empty".into()));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }

    pub fn worker_thread_name(&self) -> String {
        format!("{}-worker", self.thread_name)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Scheduler config:");
        tracing::info!("  idle_timeout:  {}ms", self.idle_timeout_ms);
        tracing::info!("  handle_length: {}", self.handle_length);
        tracing::info!("  executor:      {}", self.executor);
        if self.executor == ExecutorKind::Pool {
            tracing::info!("  workers:       {}", self.resolved_worker_threads());
        }
        tracing::info!("  thread_name:   {}", self.thread_name);
    }
}
