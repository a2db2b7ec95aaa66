use std::sync::Mutex;

/// Point-in-time view of the session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub volumes_received: usize,
    pub results_served: usize,
    pub connection_errors: usize,
}

/// Counters fed by the scan receiver and results server threads.
pub struct SessionMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    pub fn record_volume(&self) {
        if let Ok(mut counters) = self.inner.lock() {
            counters.volumes_received += 1;
        }
    }

    pub fn record_result_served(&self) {
        if let Ok(mut counters) = self.inner.lock() {
            counters.results_served += 1;
        }
    }

    pub fn record_error(&self) {
        if let Ok(mut counters) = self.inner.lock() {
            counters.connection_errors += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(counters) = self.inner.lock() {
            *counters
        } else {
            MetricsSnapshot::default()
        }
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let metrics = SessionMetrics::new();
        metrics.record_volume();
        metrics.record_volume();
        metrics.record_result_served();
        metrics.record_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.volumes_received, 2);
        assert_eq!(snapshot.results_served, 1);
        assert_eq!(snapshot.connection_errors, 1);
    }
}
