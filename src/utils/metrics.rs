//! Observability and Metrics
//!
//! Per-dispatcher counters for monitoring RPC traffic and failures.
//!
//! Uses atomic counters so the receive path can record through `&self`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for one dispatcher
#[derive(Debug)]
pub struct Metrics {
    /// Messages handed to the transport
    pub messages_sent: AtomicU64,
    /// Messages taken off the transport or looped back
    pub messages_received: AtomicU64,
    /// Bytes handed to the transport
    pub bytes_sent: AtomicU64,
    /// Bytes received
    pub bytes_received: AtomicU64,
    /// Messages delivered in-process
    pub loopback_deliveries: AtomicU64,
    /// Handler invocations that completed
    pub handlers_invoked: AtomicU64,
    /// Messages or arguments that failed to decode
    pub decode_errors: AtomicU64,
    /// Dispatches with no registered module or method
    pub lookup_errors: AtomicU64,
    /// Handlers that returned an error or panicked
    pub invocation_errors: AtomicU64,
    /// Sends rejected by the transport
    pub transport_errors: AtomicU64,
    /// Messages over the size limit, in either direction
    pub oversized_messages: AtomicU64,
    /// Messages ignored because the sender is not a session member
    pub dropped_messages: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            loopback_deliveries: AtomicU64::new(0),
            handlers_invoked: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            lookup_errors: AtomicU64::new(0),
            invocation_errors: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            oversized_messages: AtomicU64::new(0),
            dropped_messages: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a message sent
    pub fn message_sent(&self, byte_count: u64) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a message received
    pub fn message_received(&self, byte_count: u64) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn loopback_delivery(&self) {
        self.loopback_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_invoked(&self) {
        self.handlers_invoked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lookup_error(&self) {
        self.lookup_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invocation_error(&self) {
        self.invocation_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn oversized_message(&self) {
        self.oversized_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_message(&self) {
        self.dropped_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            loopback_deliveries: self.loopback_deliveries.load(Ordering::Relaxed),
            handlers_invoked: self.handlers_invoked.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            lookup_errors: self.lookup_errors.load(Ordering::Relaxed),
            invocation_errors: self.invocation_errors.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            oversized_messages: self.oversized_messages.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            messages_sent = snapshot.messages_sent,
            messages_received = snapshot.messages_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            loopback_deliveries = snapshot.loopback_deliveries,
            handlers_invoked = snapshot.handlers_invoked,
            decode_errors = snapshot.decode_errors,
            lookup_errors = snapshot.lookup_errors,
            invocation_errors = snapshot.invocation_errors,
            transport_errors = snapshot.transport_errors,
            oversized_messages = snapshot.oversized_messages,
            dropped_messages = snapshot.dropped_messages,
            uptime_seconds = snapshot.uptime_seconds,
            "RPC metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub loopback_deliveries: u64,
    pub handlers_invoked: u64,
    pub decode_errors: u64,
    pub lookup_errors: u64,
    pub invocation_errors: u64,
    pub transport_errors: u64,
    pub oversized_messages: u64,
    pub dropped_messages: u64,
    pub uptime_seconds: u64,
}
