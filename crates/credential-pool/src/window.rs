//! Per-credential sliding-window call accounting
//!
//! Each completed external call drops one uniquely-named member into the
//! credential's window in the shared store. Counting prunes members older
//! than the window first, so the cardinality after pruning equals the calls
//! actually completed (and not rolled back) in the trailing window.
//!
//! The count is a load-balancing signal, never a hard admission gate:
//! routing prefers less-loaded credentials but the pool always finds some
//! healthy credential rather than blocking on quota.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use coordination::Store;
use uuid::Uuid;

use crate::error::Result;

/// Handle to one recorded call, held for exact rollback.
///
/// Rollback removes precisely this member — never a time range — so
/// concurrent calls recorded in the same instant are untouched.
#[derive(Debug, Clone)]
pub struct CallMarker {
    pub credential_id: String,
    member: String,
}

/// Sliding-window counter over the shared store.
#[derive(Clone)]
pub struct RateWindow {
    store: Arc<dyn Store>,
    window: Duration,
    max_calls: u64,
}

impl RateWindow {
    pub fn new(store: Arc<dyn Store>, window: Duration, max_calls: u64) -> Self {
        Self {
            store,
            window,
            max_calls,
        }
    }

    fn key(credential_id: &str) -> String {
        format!("ratewindow:{credential_id}")
    }

    /// Record one call, returning the marker needed to roll it back.
    pub async fn record(&self, credential_id: &str) -> Result<CallMarker> {
        let member = Uuid::new_v4().simple().to_string();
        self.store
            .window_add(&Self::key(credential_id), &member, now_ms())
            .await?;
        Ok(CallMarker {
            credential_id: credential_id.to_string(),
            member,
        })
    }

    /// Remove exactly the recorded call. Returns whether it was present
    /// (it may have aged out of the window already).
    pub async fn rollback(&self, marker: &CallMarker) -> Result<bool> {
        Ok(self
            .store
            .window_remove(&Self::key(&marker.credential_id), &marker.member)
            .await?)
    }

    /// Prune entries older than the window, then count the remainder.
    pub async fn count(&self, credential_id: &str) -> Result<u64> {
        let min_ts = now_ms().saturating_sub(self.window.as_millis() as u64);
        Ok(self
            .store
            .window_count(&Self::key(credential_id), min_ts)
            .await?)
    }

    /// Remaining budget in the window. Negative when the credential has
    /// overshot — still only a signal, not a gate.
    pub async fn remaining(&self, credential_id: &str) -> Result<i64> {
        let used = self.count(credential_id).await?;
        Ok(self.max_calls as i64 - used as i64)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
