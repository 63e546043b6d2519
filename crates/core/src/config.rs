//! Framework configuration.
//!
//! Parsed from TOML, then overridden from `EVENTIDE_*` environment variables,
//! then validated. Binaries call [`load_dotenv`] first so a local `.env` can
//! supply the overrides.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::flags::ConcurrencyFlags;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameworkConfig {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub data: DataSection,

    /// Per-algorithm overrides keyed by algorithm name.
    #[serde(default)]
    pub algorithms: HashMap<String, AlgorithmOverride>,
}

// ── Section configs ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Worker threads for synchronous algorithms. 0 = available parallelism.
    #[serde(default)]
    pub worker_threads: usize,

    /// Number of events processed concurrently.
    #[serde(default = "default_event_slots")]
    pub event_slots: usize,

    /// Executor threads for asynchronous algorithms.
    #[serde(default = "default_async_threads")]
    pub async_threads: usize,

    /// Fail graph construction when an input has no producer.
    #[serde(default)]
    pub strict_data_dependencies: bool,

    /// Data products put into the store by the admitting caller.
    #[serde(default)]
    pub preloaded: Vec<String>,
}

fn default_event_slots() -> usize {
    4
}

fn default_async_threads() -> usize {
    2
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            event_slots: default_event_slots(),
            async_threads: default_async_threads(),
            strict_data_dependencies: false,
            preloaded: Vec::new(),
        }
    }
}

impl SchedulerSection {
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

    /// The process-wide flags a job running this scheduler should carry.
    pub fn concurrency_flags(&self) -> ConcurrencyFlags {
        ConcurrencyFlags {
            num_threads: self.resolved_worker_threads(),
            num_concurrent_events: self.event_slots,
            num_processes: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSection {
    /// Root-in-store prefix applied by path fixing. Empty disables it.
    #[serde(default)]
    pub root_in_store: String,

    /// Canonical root of the event store.
    #[serde(default = "default_root_name")]
    pub root_name: String,
}

fn default_root_name() -> String {
    "/Event".into()
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            root_in_store: String::new(),
            root_name: default_root_name(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmOverride {
    /// Replaces the cardinality declared by the algorithm.
    pub cardinality: Option<usize>,

    /// Replaces the shared resources declared by the algorithm.
    pub resources: Option<Vec<String>>,
}

// ── Loading ───────────────────────────────────────────────────

impl FrameworkConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, CoreError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Override for one algorithm, if configured.
    pub fn algorithm(&self, name: &str) -> Option<&AlgorithmOverride> {
        self.algorithms.get(name)
    }

    /// Apply environment variable overrides.
    ///
    /// - `EVENTIDE_WORKER_THREADS` -> `scheduler.worker_threads`
    /// - `EVENTIDE_EVENT_SLOTS` -> `scheduler.event_slots`
    /// - `EVENTIDE_ASYNC_THREADS` -> `scheduler.async_threads`
    /// - `EVENTIDE_ROOT_IN_STORE` -> `data.root_in_store`
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_usize("EVENTIDE_WORKER_THREADS") {
            self.scheduler.worker_threads = v;
        }
        if let Some(v) = env_usize("EVENTIDE_EVENT_SLOTS") {
            self.scheduler.event_slots = v;
        }
        if let Some(v) = env_usize("EVENTIDE_ASYNC_THREADS") {
            self.scheduler.async_threads = v;
        }
        if let Ok(v) = std::env::var("EVENTIDE_ROOT_IN_STORE") {
            self.data.root_in_store = v;
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.scheduler.event_slots == 0 {
            return Err(CoreError::Config(
                "scheduler.event_slots must be at least 1".into(),
            ));
        }
        if self.scheduler.async_threads == 0 {
            return Err(CoreError::Config(
                "scheduler.async_threads must be at least 1".into(),
            ));
        }
        if !self.data.root_name.starts_with('/') {
            return Err(CoreError::Config(format!(
                "data.root_name '{}' must be an absolute path",
                self.data.root_name
            )));
        }
        for (name, alg) in &self.algorithms {
            if let Some(resources) = &alg.resources {
                if resources.iter().any(|r| r.trim().is_empty()) {
                    return Err(CoreError::Config(format!(
                        "algorithm '{name}' declares an empty resource name"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  scheduler:   workers={}, slots={}, async={}, strict={}",
            self.scheduler.resolved_worker_threads(),
            self.scheduler.event_slots,
            self.scheduler.async_threads,
            self.scheduler.strict_data_dependencies
        );
        tracing::info!(
            "  data:        root={}, root_in_store={:?}",
            self.data.root_name,
            self.data.root_in_store
        );
        tracing::info!("  algorithms:  {} override(s)", self.algorithms.len());
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
