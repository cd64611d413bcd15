use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use codecflow_core::Priority;

use crate::types::TaskOutcome;

/// Scheduler operational metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Entry-point calls made, by task name.
    pub calls_executed: HashMap<String, u64>,
    /// Tasks that finished successfully, by task name.
    pub tasks_completed: HashMap<String, u64>,
    /// Tasks that finished with a failure code, by task name.
    pub tasks_failed: HashMap<String, u64>,
    /// Queued tasks per priority, filled when the metrics are read.
    pub tasks_pending: HashMap<Priority, usize>,
    /// Share of worker threads inside an entry point (0.0 - 1.0), filled when read.
    pub worker_utilization: f64,
    /// Average entry-point call duration by task name.
    pub avg_call_duration: HashMap<String, Duration>,
    /// Last completion time by task name.
    pub last_completed: HashMap<String, DateTime<Utc>>,
}

impl SchedulerMetrics {
    /// Record one entry-point call.
    pub fn record_call(&mut self, task_name: &str, duration: Duration) {
        *self.calls_executed.entry(task_name.to_string()).or_default() += 1;

        let count = self.calls_executed[task_name];
        let prev_avg = self
            .avg_call_duration
            .get(task_name)
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

        self.avg_call_duration.insert(task_name.to_string(), new_avg);
    }

    /// Record a task reaching its final outcome.
    pub fn record_outcome(&mut self, task_name: &str, outcome: TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Done => &mut self.tasks_completed,
            TaskOutcome::Failed(_) => &mut self.tasks_failed,
            TaskOutcome::InProgress => return,
        };
        *counter.entry(task_name.to_string()).or_default() += 1;
        self.last_completed.insert(task_name.to_string(), Utc::now());
    }

    pub fn total_completed(&self) -> u64 {
        self.tasks_completed.values().sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.tasks_failed.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_single_call() {
        let mut m = SchedulerMetrics::default();
        m.record_call("decode", Duration::from_millis(100));

        assert_eq!(m.calls_executed["decode"], 1);
        assert_eq!(m.avg_call_duration["decode"], Duration::from_millis(100));
    }

    #[test]
    fn record_multiple_calls_averages() {
        let mut m = SchedulerMetrics::default();
        m.record_call("encode", Duration::from_millis(100));
        m.record_call("encode", Duration::from_millis(200));

        assert_eq!(m.calls_executed["encode"], 2);
        let avg = m.avg_call_duration["encode"].as_millis();
        assert!((140..=160).contains(&avg), "expected ~150ms, got {}ms", avg);
    }

    #[test]
    fn outcomes_counted_separately() {
        let mut m = SchedulerMetrics::default();
        m.record_outcome("vpp", TaskOutcome::Done);
        m.record_outcome("vpp", TaskOutcome::Done);
        m.record_outcome("vpp", TaskOutcome::Failed(-3));
        m.record_outcome("vpp", TaskOutcome::InProgress);

        assert_eq!(m.tasks_completed["vpp"], 2);
        assert_eq!(m.tasks_failed["vpp"], 1);
        assert_eq!(m.total_completed(), 2);
        assert_eq!(m.total_failed(), 1);
        assert!(m.last_completed.contains_key("vpp"));
    }

    #[test]
    fn default_metrics() {
        let m = SchedulerMetrics::default();
        assert_eq!(m.worker_utilization, 0.0);
        assert!(m.calls_executed.is_empty());
        assert!(m.tasks_pending.is_empty());
    }
}
