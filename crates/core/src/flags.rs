//! Process-wide concurrency settings, written once at startup.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

static FLAGS: OnceLock<ConcurrencyFlags> = OnceLock::new();

/// Thread, concurrent-event and process counts the job was started with.
///
/// All zeros (the default) means a serial job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyFlags {
    pub num_threads: usize,
    pub num_concurrent_events: usize,
    pub num_processes: usize,
}

impl ConcurrencyFlags {
    /// Install the process-wide flags. Only the first call succeeds.
    pub fn install(flags: ConcurrencyFlags) -> Result<(), CoreError> {
        FLAGS.set(flags).map_err(|_| CoreError::FlagsAlreadySet)?;
        tracing::info!(
            threads = flags.num_threads,
            concurrent_events = flags.num_concurrent_events,
            processes = flags.num_processes,
            "concurrency flags installed"
        );
        Ok(())
    }

    /// The installed flags, or the serial defaults if none were installed.
    pub fn global() -> ConcurrencyFlags {
        FLAGS.get().copied().unwrap_or_default()
    }

    pub fn is_installed() -> bool {
        FLAGS.get().is_some()
    }

    pub fn concurrent(&self) -> bool {
        self.num_threads > 0 || self.num_processes > 0
    }
}
