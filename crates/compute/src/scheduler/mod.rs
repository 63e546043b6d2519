//! Event scheduler: admits events into a fixed number of slots, runs each
//! event's algorithms in data-flow order on a worker pool, and hands the
//! finished events back.
//!
//! Synchronous algorithms run on a `rayon` pool; asynchronous ones run as
//! tasks on a `tokio` runtime wrapped in [`crate::suspend::WithContext`].
//! All per-event bookkeeping lives on one dispatcher thread that receives
//! admissions, view requests and completions as messages.

pub mod metrics;
pub mod occupancy;
pub mod plan;
pub mod runner;
pub(crate) mod slots;
pub mod types;

pub use metrics::SchedulerMetrics;
pub use occupancy::{OccupancyCallback, OccupancySnapshot, SlotOccupancy, SlotState};
pub use plan::ExecutionPlan;
pub use runner::{Scheduler, ViewScheduler};
pub use types::{EventStatus, FinishedEvent, SchedulerError};
