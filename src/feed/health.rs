use chrono::{DateTime, Utc};
use serde::Serialize;

/// Observable outcome of background polling. Store failures during ticks are
/// never returned to an observer; this is where they surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollHealth {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub documents_delivered: u64,
    /// Documents that fell in a polled window beyond the page size.
    pub documents_dropped: u64,
    pub consecutive_failures: u32,
    pub last_tick: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl PollHealth {
    pub fn record_success(&mut self, at: DateTime<Utc>, delivered: usize, dropped: u64) {
        self.ticks += 1;
        self.last_tick = Some(at);
        self.last_success = Some(at);
        self.consecutive_failures = 0;
        self.documents_delivered += delivered as u64;
        self.documents_dropped += dropped;
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>, error: String) {
        self.ticks += 1;
        self.last_tick = Some(at);
        self.consecutive_failures += 1;
        self.last_error = Some(error);
    }

    pub fn record_skip(&mut self) {
        self.skipped_ticks += 1;
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_then_success_resets_streak() {
        let mut health = PollHealth::default();
        let now = Utc::now();

        health.record_failure(now, "connection refused".to_string());
        health.record_failure(now, "connection refused".to_string());
        assert_eq!(health.consecutive_failures, 2);
        assert!(!health.is_healthy());

        health.record_success(now, 3, 0);
        assert!(health.is_healthy());
        assert_eq!(health.ticks, 3);
        assert_eq!(health.documents_delivered, 3);
        assert_eq!(health.last_error.as_deref(), Some("connection refused"));
    }
}
