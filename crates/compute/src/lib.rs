//! Algorithm execution for eventide: the resource pool that hands out
//! algorithm instances and shared resources, the event scheduler, and the
//! suspension helpers for asynchronous algorithms.

pub mod algorithm;
pub mod pool;
pub mod scheduler;
pub mod suspend;

pub use algorithm::{Algorithm, AlgorithmError, AsyncAlgorithm, Component, Instance};
pub use pool::{AlgorithmSpec, PoolError, ResourcePool, Sequence};
pub use scheduler::{
    EventStatus, ExecutionPlan, FinishedEvent, OccupancySnapshot, Scheduler, SchedulerError,
    SchedulerMetrics, SlotOccupancy, SlotState, ViewScheduler,
};
pub use suspend::{InContext, SavedContext, SuspendError, WithContext};
