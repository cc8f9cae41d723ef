//! Per-job progress counters.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Live counters for a crawl job.
///
/// `total` grows as links are discovered (counted at enqueue time);
/// `completed + failed <= total` and `pending` never underflows. Each URL
/// moves out of `pending` exactly once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub pending: u64,
    pub current_url: Option<String>,
    pub percentage: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
}

impl Progress {
    pub fn start(&mut self, at: DateTime<Utc>) {
        self.started_at = Some(at);
    }

    /// Count `n` newly enqueued URLs into the job.
    pub fn add_discovered(&mut self, n: u64) {
        self.total += n;
        self.pending += n;
        self.recompute();
    }

    pub fn record_success(&mut self) {
        self.completed += 1;
        self.pending = self.pending.saturating_sub(1);
        self.recompute();
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
        self.pending = self.pending.saturating_sub(1);
        self.recompute();
    }

    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Terminal-readiness check: nothing pending and every counted URL
    /// accounted for.
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.processed() >= self.total
    }

    fn recompute(&mut self) {
        self.percentage = if self.total == 0 {
            0.0
        } else {
            ((self.processed() as f64 / self.total as f64) * 100.0).clamp(0.0, 100.0)
        };
        self.estimated_completion = self.estimate_completion(Utc::now());
    }

    /// Projects completion from the mean per-URL latency so far.
    fn estimate_completion(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let started = self.started_at?;
        let processed = self.processed();
        if processed == 0 || self.total == 0 {
            return None;
        }
        let elapsed = now.signed_duration_since(started);
        let avg_ms = elapsed.num_milliseconds() / processed as i64;
        let remaining = self.total.saturating_sub(processed) as i64;
        Some(now + ChronoDuration::milliseconds(avg_ms.max(0) * remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_stay_consistent() {
        let mut progress = Progress::default();
        progress.add_discovered(3);
        assert_eq!(progress.total, 3);
        assert_eq!(progress.pending, 3);

        progress.record_success();
        progress.record_failure();
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.pending, 1);
        assert!(!progress.is_drained());

        progress.record_success();
        assert!(progress.is_drained());
        assert!((progress.percentage - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn pending_never_underflows() {
        let mut progress = Progress::default();
        progress.record_failure();
        assert_eq!(progress.pending, 0);
    }

    #[test]
    fn percentage_bounded() {
        let mut progress = Progress::default();
        progress.recompute();
        assert_eq!(progress.percentage, 0.0);
        progress.add_discovered(2);
        progress.record_success();
        assert!(progress.percentage > 0.0 && progress.percentage <= 100.0);
    }

    #[test]
    fn serde_roundtrip() {
        let mut progress = Progress::default();
        progress.start(Utc::now());
        progress.add_discovered(5);
        progress.record_success();
        progress.current_url = Some("https://example.com/a".into());

        let json = serde_json::to_string(&progress).unwrap();
        let back: Progress = serde_json::from_str(&json).unwrap();
        assert_eq!(progress, back);
    }

    #[test]
    fn eta_requires_history() {
        let progress = Progress::default();
        assert!(progress.estimate_completion(Utc::now()).is_none());
    }
}
