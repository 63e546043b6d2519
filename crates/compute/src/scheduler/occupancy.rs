//! Slot occupancy snapshots and the sampler that decides when to take one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotState {
    Free,
    /// Admitted and still processing.
    Busy,
    /// Finished, waiting to be popped.
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotOccupancy {
    pub slot: usize,
    pub event: Option<u64>,
    pub state: SlotState,
    pub waiting: usize,
    pub running: usize,
    pub done: usize,
    /// Views opened for the event so far.
    pub views: usize,
}

impl SlotOccupancy {
    pub fn free(slot: usize) -> Self {
        Self {
            slot,
            event: None,
            state: SlotState::Free,
            waiting: 0,
            running: 0,
            done: 0,
            views: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OccupancySnapshot {
    pub time: DateTime<Utc>,
    pub slots: Vec<SlotOccupancy>,
}

impl OccupancySnapshot {
    pub fn busy_slots(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state != SlotState::Free)
            .count()
    }

    pub fn running_algorithms(&self) -> usize {
        self.slots.iter().map(|s| s.running).sum()
    }
}

pub type OccupancyCallback = Arc<dyn Fn(OccupancySnapshot) + Send + Sync>;

/// Decides, on each scheduler state change, whether a snapshot is due.
pub(crate) struct OccupancySampler {
    period: Duration,
    last: Option<Instant>,
    callback: OccupancyCallback,
}

impl OccupancySampler {
    /// `period_ms == 0` samples on every change; a negative period disables
    /// sampling.
    pub fn new(period_ms: i64, callback: OccupancyCallback) -> Option<Self> {
        let period = u64::try_from(period_ms).ok()?;
        Some(Self {
            period: Duration::from_millis(period),
            last: None,
            callback,
        })
    }

    pub fn due(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.period => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn callback(&self) -> OccupancyCallback {
        Arc::clone(&self.callback)
    }
}
