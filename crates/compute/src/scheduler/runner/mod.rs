//! Event scheduler runner.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, constructor, lifecycle and accessor methods
//! - `admission`: pushing new events and popping finished ones
//! - `views`: scheduling nested views of a running event
//! - `execution`: the dispatcher thread that runs algorithms and retires events
//! - `queue`: finished events waiting to be popped

mod admission;
mod core;
mod execution;
mod queue;
mod views;

pub use self::core::Scheduler;
pub use self::views::ViewScheduler;
