//! Append-only audit trail of external call attempts
//!
//! Every call attempt produces one [`AuditRecord`], written through the
//! [`AuditSink`] seam. The core never reads these back; persistence is an
//! opaque side effect owned by the surrounding application. Records carry a
//! one-way credential fingerprint, never the secret.

use serde::{Deserialize, Serialize};
use tracing::info;

/// One external call attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// One-way hash of the credential secret (see `common::fingerprint`).
    pub credential_fingerprint: String,
    pub subject_id: String,
    /// Endpoint name from [`crate::Endpoint::name`].
    pub endpoint: String,
    /// HTTP status, if the call got far enough to have one.
    pub status: Option<u16>,
    pub latency_ms: u64,
    /// Error display string for failed attempts.
    pub error: Option<String>,
    /// Remaining call budget in the credential's window at record time.
    pub calls_remaining: i64,
}

/// Write-only audit destination.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Sink that emits each record as a structured log line.
///
/// The default sink for deployments where the audit trail is collected from
/// logs; a database-backed sink implements the same trait.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        info!(
            credential = %record.credential_fingerprint,
            subject = %record.subject_id,
            endpoint = %record.endpoint,
            status = record.status,
            latency_ms = record.latency_ms,
            error = record.error.as_deref(),
            calls_remaining = record.calls_remaining,
            "external call"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Sink that captures records for assertions.
    #[derive(Default)]
    struct CapturingSink {
        records: Mutex<Vec<AuditRecord>>,
    }

    impl AuditSink for CapturingSink {
        fn record(&self, record: AuditRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    fn sample_record() -> AuditRecord {
        AuditRecord {
            credential_fingerprint: "fp_abc".into(),
            subject_id: "player-1".into(),
            endpoint: "profile".into(),
            status: Some(200),
            latency_ms: 120,
            error: None,
            calls_remaining: 280,
        }
    }

    #[test]
    fn record_serializes_without_secrets() {
        let json = serde_json::to_string(&sample_record()).unwrap();
        assert!(json.contains("fp_abc"));
        assert!(json.contains("\"calls_remaining\":280"));
        assert!(!json.contains("npsso"));
    }

    #[test]
    fn capturing_sink_appends() {
        let sink = CapturingSink::default();
        sink.record(sample_record());
        sink.record(AuditRecord {
            error: Some("timeout".into()),
            status: None,
            ..sample_record()
        });

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].error.as_deref(), Some("timeout"));
    }

    #[test]
    fn tracing_sink_does_not_panic() {
        TracingAuditSink.record(sample_record());
    }
}
