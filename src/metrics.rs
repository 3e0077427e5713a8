//! Metrics collection for poll cycles
//!
//! Tracks timing and error history for account lookups and usage fetches.
//! Used for diagnostics; the binary logs a summary on shutdown.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Maximum number of completed cycles to retain in history
const MAX_CYCLE_HISTORY: usize = 50;

/// Maximum number of errors to retain in history
const MAX_ERROR_HISTORY: usize = 20;

/// Metrics for a finished poll cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleMetrics {
    pub cycle_id: String,
    /// Unix timestamp when the cycle started (seconds)
    pub started_at: u64,
    /// Account lookup time, when the organization was not cached
    pub identity_duration_ms: Option<u64>,
    pub total_cycle_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Summary statistics across all recorded cycles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_cycles: u64,
    pub successful_cycles: u64,
    pub failed_cycles: u64,
    /// Average total cycle time (ms) across successful cycles
    pub avg_total_cycle_ms: u64,
    pub last_error: Option<ErrorRecord>,
}

/// Record of an error that ended a cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Unix timestamp when the error occurred (seconds)
    pub timestamp: u64,
    /// Category of error (e.g. "auth", "network")
    pub error_type: String,
    pub message: String,
    pub cycle_id: Option<String>,
}

struct CycleInProgress {
    cycle_id: Uuid,
    started_at: Instant,
    started_at_unix: u64,
    identity_duration: Option<Duration>,
}

impl CycleInProgress {
    fn new(cycle_id: Uuid) -> Self {
        Self {
            cycle_id,
            started_at: Instant::now(),
            started_at_unix: unix_now(),
            identity_duration: None,
        }
    }

    fn to_metrics(&self, success: bool, error_message: Option<String>) -> CycleMetrics {
        CycleMetrics {
            cycle_id: self.cycle_id.to_string(),
            started_at: self.started_at_unix,
            identity_duration_ms: self.identity_duration.map(|d| d.as_millis() as u64),
            total_cycle_ms: self.started_at.elapsed().as_millis() as u64,
            success,
            error_message,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Collects and stores metrics for poll cycles
pub struct MetricsCollector {
    /// History of finished cycles (newest first)
    history: VecDeque<CycleMetrics>,
    /// History of errors (newest first)
    errors: VecDeque<ErrorRecord>,
    current_cycle: Option<CycleInProgress>,
    total_cycles: u64,
    successful_cycles: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(MAX_CYCLE_HISTORY),
            errors: VecDeque::with_capacity(MAX_ERROR_HISTORY),
            current_cycle: None,
            total_cycles: 0,
            successful_cycles: 0,
        }
    }

    /// Start tracking a new cycle.
    ///
    /// An unfinished previous cycle was superseded (refresh or credential
    /// change) and is dropped without being counted.
    pub fn start_cycle(&mut self, cycle_id: Uuid) {
        if let Some(old_cycle) = self.current_cycle.take() {
            log::debug!(
                "Metrics: cycle {} superseded by {}",
                old_cycle.cycle_id,
                cycle_id
            );
            self.total_cycles = self.total_cycles.saturating_sub(1);
        }

        log::debug!("Metrics: starting cycle {}", cycle_id);
        self.current_cycle = Some(CycleInProgress::new(cycle_id));
        self.total_cycles += 1;
    }

    /// Mark that the account lookup finished for the current cycle
    pub fn identity_resolved(&mut self) {
        if let Some(ref mut cycle) = self.current_cycle {
            cycle.identity_duration = Some(cycle.started_at.elapsed());
        }
    }

    /// Mark the current cycle as successfully completed
    pub fn cycle_completed(&mut self) {
        if let Some(cycle) = self.current_cycle.take() {
            let metrics = cycle.to_metrics(true, None);
            log::debug!(
                "Metrics: cycle {} completed in {}ms",
                metrics.cycle_id,
                metrics.total_cycle_ms
            );
            self.add_to_history(metrics);
            self.successful_cycles += 1;
        }
    }

    /// Mark the current cycle as failed
    pub fn cycle_failed(&mut self, error_type: &str, error: String) {
        let cycle_id = self.current_cycle.as_ref().map(|c| c.cycle_id.to_string());

        if let Some(cycle) = self.current_cycle.take() {
            let metrics = cycle.to_metrics(false, Some(error.clone()));
            log::debug!(
                "Metrics: cycle {} failed after {}ms - {}",
                metrics.cycle_id,
                metrics.total_cycle_ms,
                error
            );
            self.add_to_history(metrics);
        }

        self.record_error(error_type.to_string(), error, cycle_id);
    }

    /// Record an error (not necessarily tied to a cycle)
    pub fn record_error(&mut self, error_type: String, message: String, cycle_id: Option<String>) {
        let error = ErrorRecord {
            timestamp: unix_now(),
            error_type,
            message,
            cycle_id,
        };

        self.errors.push_front(error);
        while self.errors.len() > MAX_ERROR_HISTORY {
            self.errors.pop_back();
        }
    }

    pub fn get_summary(&self) -> MetricsSummary {
        let successful: Vec<_> = self.history.iter().filter(|c| c.success).collect();
        let count = successful.len() as u64;
        let avg_total = if count > 0 {
            successful.iter().map(|c| c.total_cycle_ms).sum::<u64>() / count
        } else {
            0
        };

        // The in-flight cycle is counted in total but is neither success nor failure yet.
        let in_flight = u64::from(self.current_cycle.is_some());

        MetricsSummary {
            total_cycles: self.total_cycles,
            successful_cycles: self.successful_cycles,
            failed_cycles: self
                .total_cycles
                .saturating_sub(self.successful_cycles)
                .saturating_sub(in_flight),
            avg_total_cycle_ms: avg_total,
            last_error: self.errors.front().cloned(),
        }
    }

    /// Cycle history (newest first)
    pub fn get_history(&self) -> Vec<CycleMetrics> {
        self.history.iter().cloned().collect()
    }

    /// Error history (newest first)
    pub fn get_errors(&self) -> Vec<ErrorRecord> {
        self.errors.iter().cloned().collect()
    }

    pub fn is_active_cycle(&self, cycle_id: Uuid) -> bool {
        self.current_cycle
            .as_ref()
            .map(|c| c.cycle_id == cycle_id)
            .unwrap_or(false)
    }

    fn add_to_history(&mut self, metrics: CycleMetrics) {
        self.history.push_front(metrics);
        while self.history.len() > MAX_CYCLE_HISTORY {
            self.history.pop_back();
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_collector_is_empty() {
        let collector = MetricsCollector::new();
        let summary = collector.get_summary();

        assert_eq!(summary.total_cycles, 0);
        assert_eq!(summary.successful_cycles, 0);
        assert_eq!(summary.failed_cycles, 0);
        assert!(collector.get_history().is_empty());
        assert!(collector.get_errors().is_empty());
    }

    #[test]
    fn test_successful_cycle_tracking() {
        let mut collector = MetricsCollector::new();
        let cycle_id = Uuid::new_v4();

        collector.start_cycle(cycle_id);
        assert!(collector.is_active_cycle(cycle_id));
        std::thread::sleep(std::time::Duration::from_millis(10));
        collector.identity_resolved();
        collector.cycle_completed();

        let summary = collector.get_summary();
        assert_eq!(summary.total_cycles, 1);
        assert_eq!(summary.successful_cycles, 1);
        assert_eq!(summary.failed_cycles, 0);

        let history = collector.get_history();
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
        assert!(history[0].identity_duration_ms.unwrap() >= 10);
        assert!(!collector.is_active_cycle(cycle_id));
    }

    #[test]
    fn test_failed_cycle_tracking() {
        let mut collector = MetricsCollector::new();
        collector.start_cycle(Uuid::new_v4());
        collector.cycle_failed("auth", "Authentication failed".to_string());

        let summary = collector.get_summary();
        assert_eq!(summary.total_cycles, 1);
        assert_eq!(summary.failed_cycles, 1);
        let last_error = summary.last_error.unwrap();
        assert_eq!(last_error.error_type, "auth");
        assert_eq!(last_error.message, "Authentication failed");

        let history = collector.get_history();
        assert!(!history[0].success);
        assert!(history[0].identity_duration_ms.is_none());
    }

    #[test]
    fn test_superseded_cycle_not_counted() {
        let mut collector = MetricsCollector::new();
        collector.start_cycle(Uuid::new_v4());
        let second = Uuid::new_v4();
        collector.start_cycle(second);
        collector.cycle_completed();

        let summary = collector.get_summary();
        assert_eq!(summary.total_cycles, 1);
        assert_eq!(summary.successful_cycles, 1);
        assert_eq!(collector.get_history().len(), 1);
    }

    #[test]
    fn test_in_flight_cycle_is_not_a_failure() {
        let mut collector = MetricsCollector::new();
        collector.start_cycle(Uuid::new_v4());
        assert_eq!(collector.get_summary().failed_cycles, 0);
    }

    #[test]
    fn test_history_limit() {
        let mut collector = MetricsCollector::new();

        for _ in 0..(MAX_CYCLE_HISTORY + 10) {
            collector.start_cycle(Uuid::new_v4());
            collector.cycle_completed();
        }
        for i in 0..(MAX_ERROR_HISTORY + 5) {
            collector.start_cycle(Uuid::new_v4());
            collector.cycle_failed("network", format!("error {}", i));
        }

        assert_eq!(collector.get_history().len(), MAX_CYCLE_HISTORY);
        let errors = collector.get_errors();
        assert_eq!(errors.len(), MAX_ERROR_HISTORY);
        assert_eq!(errors[0].message, format!("error {}", MAX_ERROR_HISTORY + 4));
    }
}
