use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// Number of recent successful processing durations kept for the
/// average-time figure.
const PROCESSING_TIME_WINDOW: usize = 100;

/// Snapshot exposed on the operations surface.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerStats {
    pub is_running: bool,
    pub total_processed: u64,
    pub total_successful: u64,
    pub total_failed: u64,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub average_processing_time_ms: f64,
}

/// Mutable counters owned by the consumer. Every delivery ends in exactly
/// one of the success or failure buckets, so
/// `total_processed == total_successful + total_failed` always holds.
#[derive(Debug, Default)]
pub(super) struct StatsInner {
    total_processed: u64,
    total_successful: u64,
    total_failed: u64,
    last_processed_at: Option<DateTime<Utc>>,
    durations_ms: VecDeque<f64>,
}

impl StatsInner {
    pub fn record_success(&mut self, duration_ms: f64) {
        self.total_processed += 1;
        self.total_successful += 1;
        self.last_processed_at = Some(Utc::now());

        if self.durations_ms.len() == PROCESSING_TIME_WINDOW {
            self.durations_ms.pop_front();
        }
        self.durations_ms.push_back(duration_ms);
    }

    pub fn record_failure(&mut self) {
        self.total_processed += 1;
        self.total_failed += 1;
        self.last_processed_at = Some(Utc::now());
    }

    pub fn reset(&mut self) {
        *self = StatsInner::default();
    }

    pub fn snapshot(&self, is_running: bool) -> ConsumerStats {
        let average_processing_time_ms = if self.durations_ms.is_empty() {
            0.0
        } else {
            self.durations_ms.iter().sum::<f64>() / self.durations_ms.len() as f64
        };

        ConsumerStats {
            is_running,
            total_processed: self.total_processed,
            total_successful: self.total_successful,
            total_failed: self.total_failed,
            last_processed_at: self.last_processed_at,
            average_processing_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_always_add_up() {
        let mut stats = StatsInner::default();
        stats.record_success(10.0);
        stats.record_success(20.0);
        stats.record_failure();

        let snapshot = stats.snapshot(true);
        assert_eq!(snapshot.total_processed, 3);
        assert_eq!(snapshot.total_successful, 2);
        assert_eq!(snapshot.total_failed, 1);
        assert_eq!(
            snapshot.total_processed,
            snapshot.total_successful + snapshot.total_failed
        );
        assert!(snapshot.last_processed_at.is_some());
    }

    #[test]
    fn average_is_over_successful_durations_only() {
        let mut stats = StatsInner::default();
        stats.record_success(10.0);
        stats.record_failure();
        stats.record_success(30.0);

        let snapshot = stats.snapshot(true);
        assert!((snapshot.average_processing_time_ms - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn window_keeps_only_the_most_recent_hundred() {
        let mut stats = StatsInner::default();

        // 100 slow samples, then 100 fast ones: the slow ones age out.
        for _ in 0..100 {
            stats.record_success(1000.0);
        }
        for _ in 0..100 {
            stats.record_success(10.0);
        }

        let snapshot = stats.snapshot(true);
        assert!((snapshot.average_processing_time_ms - 10.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.total_successful, 200);
    }

    #[test]
    fn reset_clears_everything() {
        let mut stats = StatsInner::default();
        stats.record_success(5.0);
        stats.record_failure();
        stats.reset();

        let snapshot = stats.snapshot(false);
        assert_eq!(snapshot.total_processed, 0);
        assert_eq!(snapshot.average_processing_time_ms, 0.0);
        assert!(snapshot.last_processed_at.is_none());
    }
}
