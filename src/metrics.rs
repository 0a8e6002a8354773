use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::Lazy;

/// Global runtime metrics for the feed collector.
///
/// Purpose:
/// - Track open feed sessions
/// - Track inbound frame throughput
/// - Track subscribe traffic and failures
/// - Track auth endpoint activity
///
/// Design:
/// - Lock-free (Atomics)
/// - Cheap to update
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // Session level
    pub sessions_open: AtomicUsize,
    pub connect_failures: AtomicUsize,

    // Inbound
    pub frames_received: AtomicUsize,

    // Subscribe traffic
    pub subscriptions_sent: AtomicUsize,
    pub subscription_errors: AtomicUsize,
    pub unsubscribes_sent: AtomicUsize,

    // Auth endpoints
    pub token_fetches: AtomicUsize,
    pub approval_key_fetches: AtomicUsize,
    pub auth_failures: AtomicUsize,
}

impl RuntimeMetrics {
    /// Renders the one-line periodic report emitted by main.
    pub fn report_line(&self) -> String {
        format!(
            "sessions={} connect_err={} frames={} sub_sent={} sub_err={} unsub={} tokens={} approvals={} auth_err={}",
            self.sessions_open.load(Ordering::Relaxed),
            self.connect_failures.load(Ordering::Relaxed),
            self.frames_received.load(Ordering::Relaxed),
            self.subscriptions_sent.load(Ordering::Relaxed),
            self.subscription_errors.load(Ordering::Relaxed),
            self.unsubscribes_sent.load(Ordering::Relaxed),
            self.token_fetches.load(Ordering::Relaxed),
            self.approval_key_fetches.load(Ordering::Relaxed),
            self.auth_failures.load(Ordering::Relaxed),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> = Lazy::new(|| Arc::new(RuntimeMetrics::default()));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_line_reflects_counters() {
        let m = RuntimeMetrics::default();
        m.sessions_open.fetch_add(2, Ordering::Relaxed);
        m.subscriptions_sent.fetch_add(41, Ordering::Relaxed);

        let line = m.report_line();
        assert!(line.contains("sessions=2"));
        assert!(line.contains("sub_sent=41"));
    }
}
