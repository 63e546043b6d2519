use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::EventStatus;

/// Scheduler operational metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Successful executions by algorithm name.
    pub algorithms_executed: HashMap<String, u64>,
    /// Failed executions by algorithm name.
    pub algorithms_failed: HashMap<String, u64>,
    /// Average execution duration by algorithm name.
    pub avg_algorithm_duration: HashMap<String, Duration>,
    /// Last completion time by algorithm name.
    pub last_run: HashMap<String, DateTime<Utc>>,
    pub events_admitted: u64,
    pub events_succeeded: u64,
    pub events_failed: u64,
    pub views_scheduled: u64,
    /// Busy worker threads over pool size at the last update (0.0 - 1.0).
    pub worker_utilization: f64,
}

impl SchedulerMetrics {
    /// Record one successful algorithm execution.
    pub fn record_execution(&mut self, algorithm: &str, duration: Duration) {
        *self.algorithms_executed.entry(algorithm.to_string()).or_default() += 1;
        self.last_run.insert(algorithm.to_string(), Utc::now());

        let count = self.algorithms_executed[algorithm];
        let prev_avg = self
            .avg_algorithm_duration
            .get(algorithm)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_algorithm_duration.insert(algorithm.to_string(), new_avg);
    }

    pub fn record_failure(&mut self, algorithm: &str) {
        *self.algorithms_failed.entry(algorithm.to_string()).or_default() += 1;
        self.last_run.insert(algorithm.to_string(), Utc::now());
    }

    pub fn record_event(&mut self, status: &EventStatus) {
        if status.is_success() {
            self.events_succeeded += 1;
        } else {
            self.events_failed += 1;
        }
    }

    /// Events admitted but not yet finished.
    pub fn events_in_progress(&self) -> u64 {
        self.events_admitted
            .saturating_sub(self.events_succeeded + self.events_failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_single_execution() {
        let mut m = SchedulerMetrics::default();
        m.record_execution("Tracker", Duration::from_millis(100));

        assert_eq!(m.algorithms_executed["Tracker"], 1);
        assert!(m.last_run.contains_key("Tracker"));
        assert_eq!(m.avg_algorithm_duration["Tracker"], Duration::from_millis(100));
    }

    #[test]
    fn record_multiple_executions_averages() {
        let mut m = SchedulerMetrics::default();
        m.record_execution("Tracker", Duration::from_millis(100));
        m.record_execution("Tracker", Duration::from_millis(200));

        assert_eq!(m.algorithms_executed["Tracker"], 2);
        let avg = m.avg_algorithm_duration["Tracker"].as_millis();
        assert!((140..=160).contains(&avg), "expected ~150ms, got {}ms", avg);
    }

    #[test]
    fn event_counters() {
        let mut m = SchedulerMetrics {
            events_admitted: 3,
            ..Default::default()
        };
        m.record_event(&EventStatus::Success);
        m.record_event(&EventStatus::Failed {
            algorithm: "A".into(),
            reason: "boom".into(),
        });
        m.record_failure("A");
        assert_eq!(m.events_succeeded, 1);
        assert_eq!(m.events_failed, 1);
        assert_eq!(m.events_in_progress(), 1);
        assert_eq!(m.algorithms_failed["A"], 1);
        assert!(!m.algorithms_executed.contains_key("A"));
    }

    #[test]
    fn default_metrics() {
        let m = SchedulerMetrics::default();
        assert_eq!(m.worker_utilization, 0.0);
        assert!(m.algorithms_executed.is_empty());
        assert_eq!(m.events_in_progress(), 0);
    }
}
