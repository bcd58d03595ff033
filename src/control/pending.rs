//! Correlation table for outbound control requests.
//!
//! Each entry owns the single-assignment completion slot of one request.
//! Entries leave the table on response, timeout, or session close; a given
//! id is live at most once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tracing::debug;

use crate::{Result, SdkError};

/// One in-flight outbound request.
#[derive(Debug)]
struct PendingRequest {
    subtype: &'static str,
    created_at: Instant,
    timeout: Duration,
    slot: oneshot::Sender<Result<Value>>,
}

/// Live pending-request entries keyed by correlation id.
#[derive(Debug, Clone, Default)]
pub struct PendingRequests {
    entries: Arc<Mutex<HashMap<String, PendingRequest>>>,
    counter: Arc<AtomicU64>,
}

impl PendingRequests {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a correlation id that is never reused in this table's
    /// lifetime: a monotonic counter plus a random suffix.
    #[must_use]
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("req_{n}_{}", &suffix[..8])
    }

    /// Register `request_id` and return the receiving half of its slot.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::InvalidState` if the id is already live.
    pub async fn register(
        &self,
        request_id: &str,
        subtype: &'static str,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<Result<Value>>> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.lock().await;
        if entries.contains_key(request_id) {
            return Err(SdkError::InvalidState(format!(
                "request id '{request_id}' is already pending"
            )));
        }
        entries.insert(
            request_id.to_owned(),
            PendingRequest {
                subtype,
                created_at: Instant::now(),
                timeout,
                slot: tx,
            },
        );
        Ok(rx)
    }

    /// Resolve and remove `request_id`. Returns `false` for unknown or
    /// already-resolved ids.
    pub async fn resolve(&self, request_id: &str, outcome: Result<Value>) -> bool {
        let entry = self.entries.lock().await.remove(request_id);
        let Some(entry) = entry else {
            return false;
        };
        debug!(
            request_id,
            subtype = entry.subtype,
            elapsed_ms = u64::try_from(entry.created_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            timeout_ms = u64::try_from(entry.timeout.as_millis()).unwrap_or(u64::MAX),
            "control response resolved"
        );
        // The waiter may already have given up.
        let _ = entry.slot.send(outcome);
        true
    }

    /// Remove `request_id` without resolving it.
    pub async fn remove(&self, request_id: &str) -> bool {
        self.entries.lock().await.remove(request_id).is_some()
    }

    /// Fail every live entry with `error` and empty the table.
    pub async fn fail_all(&self, error: &SdkError) -> usize {
        let drained: Vec<_> = self.entries.lock().await.drain().collect();
        let count = drained.len();
        for (request_id, entry) in drained {
            debug!(request_id, subtype = entry.subtype, %error, "failing pending control request");
            let _ = entry.slot.send(Err(error.clone()));
        }
        count
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether no entries are live.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
