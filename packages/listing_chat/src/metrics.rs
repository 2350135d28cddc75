//! Server metrics for observability
//!
//! Runtime counters for the chat gateway and its broadcast fan-out.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::ws::registry::BroadcastReport;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently active WebSocket connections
    pub active_connections: AtomicU64,
    /// Total admitted connections since server start
    pub total_connections: AtomicU64,
    /// Upgrade attempts refused during admission
    pub rejected_connections: AtomicU64,

    // Chat metrics
    /// Messages persisted by the dispatcher
    pub messages_persisted: AtomicU64,
    /// Read receipts that changed at least one row and were broadcast
    pub read_receipts: AtomicU64,
    /// Frames handed to connection outbound queues by broadcasts
    pub frames_delivered: AtomicU64,
    /// Connections dropped because their outbound queue was full or closed
    pub receivers_evicted: AtomicU64,

    // Error metrics
    /// Inbound frames rejected by content validation
    pub validation_errors: AtomicU64,
    /// Inbound frames that could not be decoded
    pub malformed_frames: AtomicU64,
    /// Unexpected failures reported back as a generic error frame
    pub internal_errors: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    // Chat tracking
    pub fn message_persisted(&self) {
        self.messages_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read_receipt(&self) {
        self.read_receipts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast(&self, report: &BroadcastReport) {
        self.frames_delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.receivers_evicted
            .fetch_add(report.evicted as u64, Ordering::Relaxed);
    }

    // Error tracking
    pub fn validation_error(&self) {
        self.validation_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn internal_error(&self) {
        self.internal_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
                rejected: self.rejected_connections.load(Ordering::Relaxed),
            },
            chat: ChatMetrics {
                messages_persisted: self.messages_persisted.load(Ordering::Relaxed),
                read_receipts: self.read_receipts.load(Ordering::Relaxed),
                frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
                receivers_evicted: self.receivers_evicted.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                validation: self.validation_errors.load(Ordering::Relaxed),
                malformed: self.malformed_frames.load(Ordering::Relaxed),
                internal: self.internal_errors.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub chat: ChatMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMetrics {
    pub messages_persisted: u64,
    pub read_receipts: u64,
    pub frames_delivered: u64,
    pub receivers_evicted: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub validation: u64,
    pub malformed: u64,
    pub internal: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub connections: u64,
    /// Conversations with at least one live connection
    pub conversations: u64,
    pub messages_persisted: u64,
    pub uptime_secs: u64,
}
