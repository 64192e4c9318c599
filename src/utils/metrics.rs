//! Per-session counters.
//!
//! Each [`Session`](crate::session::Session) owns one `SessionMetrics`; there
//! is no process-wide instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

#[derive(Debug)]
pub struct SessionMetrics {
    /// Frames written to the socket
    pub messages_sent: AtomicU64,
    /// Frames decoded by the receiver
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    /// Envelopes that failed authentication
    pub decryption_failures: AtomicU64,
    /// Notifications handed to the callback
    pub notifications: AtomicU64,
    pub handshakes_total: AtomicU64,
    pub handshakes_failed: AtomicU64,
    /// Fatal receiver or transport errors
    pub connection_errors: AtomicU64,
    start_time: Instant,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            decryption_failures: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn message_sent(&self, byte_count: u64) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn message_received(&self, byte_count: u64) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn decryption_failure(&self) {
        self.decryption_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            decryption_failures: self.decryption_failures.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    pub fn log_metrics(&self) {
        let s = self.snapshot();
        info!(
            messages_sent = s.messages_sent,
            messages_received = s.messages_received,
            bytes_sent = s.bytes_sent,
            bytes_received = s.bytes_received,
            decryption_failures = s.decryption_failures,
            notifications = s.notifications,
            handshakes_total = s.handshakes_total,
            handshakes_failed = s.handshakes_failed,
            connection_errors = s.connection_errors,
            uptime_seconds = s.uptime_seconds,
            "Session metrics snapshot"
        );
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub decryption_failures: u64,
    pub notifications: u64,
    pub handshakes_total: u64,
    pub handshakes_failed: u64,
    pub connection_errors: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let m = SessionMetrics::new();
        m.message_sent(32);
        m.message_sent(16);
        m.message_received(8);
        m.decryption_failure();

        let s = m.snapshot();
        assert_eq!(s.messages_sent, 2);
        assert_eq!(s.bytes_sent, 48);
        assert_eq!(s.bytes_received, 8);
        assert_eq!(s.decryption_failures, 1);
        assert_eq!(s.connection_errors, 0);
    }
}
