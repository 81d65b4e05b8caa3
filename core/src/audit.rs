use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Audit severity. `High` and `Critical` exist above `Error` so policy
/// tooling can separate "operator should look" from "consensus is at risk".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Error,
    High,
    Critical,
}

/// A single structured audit record. `event_type` values are stable names
/// (`vote_submitted`, `period_transitioned`, `validator_absence`, ...) that
/// downstream sinks key on; never rename one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: String,
    pub severity: Severity,
    pub source: String,
    pub details: serde_json::Value,
    /// Unix milliseconds at emission.
    pub timestamp_ms: i64,
}

/// Process-wide audit sink.
///
/// Events go through a bounded broadcast ring: emission never blocks the
/// consensus path, and an observer that falls more than `capacity` events
/// behind loses the oldest records, not the newest.
pub struct AuditSink {
    tx: broadcast::Sender<AuditEvent>,
    emitted: AtomicU64,
}

impl AuditSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            emitted: AtomicU64::new(0),
        }
    }

    /// Attach an observer. Each observer gets an independent cursor.
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.tx.subscribe()
    }

    pub fn log_event(
        &self,
        event_type: &str,
        severity: Severity,
        source: &str,
        details: serde_json::Value,
    ) {
        let event = AuditEvent {
            event_type: event_type.to_string(),
            severity,
            source: source.to_string(),
            details,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        };

        match severity {
            Severity::Info => log::debug!("audit {} [{}]", event.event_type, source),
            Severity::Warn => log::warn!("audit {} [{}]", event.event_type, source),
            Severity::Error | Severity::High => {
                log::error!("audit {} [{}]: {}", event.event_type, source, event.details)
            }
            Severity::Critical => {
                log::error!(
                    "audit CRITICAL {} [{}]: {}",
                    event.event_type,
                    source,
                    event.details
                )
            }
        }

        self.emitted.fetch_add(1, Ordering::Relaxed);
        // No receivers is fine — the record still hit the log above.
        let _ = self.tx.send(event);
    }

    pub fn events_emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}
