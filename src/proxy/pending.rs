//! Tracking table for domain approval requests awaiting a user decision.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::sandbox::DomainDecision;

/// Shared table of in-flight domain approval requests. The proxy inserts a
/// oneshot sender keyed by a fresh request id (tagged with the session it
/// belongs to), then awaits the receiver (with a timeout); the User Channel
/// resolves it by request id once the user answers, or denies every request
/// tagged with a session whose channel disconnected mid-turn.
#[derive(Clone, Default)]
pub struct PendingApprovals {
    inner: Arc<Mutex<HashMap<String, (String, oneshot::Sender<DomainDecision>)>>>,
}

impl PendingApprovals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending approval for `session_id` and return its receiver.
    pub async fn register(&self, session_id: String, request_id: String) -> oneshot::Receiver<DomainDecision> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(request_id, (session_id, tx));
        rx
    }

    /// Resolve a pending approval with the user's decision. Returns `false`
    /// if no such request is outstanding (already resolved or timed out).
    pub async fn resolve(&self, request_id: &str, decision: DomainDecision) -> bool {
        if let Some((_, tx)) = self.inner.lock().await.remove(request_id) {
            tx.send(decision).is_ok()
        } else {
            false
        }
    }

    /// Deny every pending approval belonging to `session_id`, without
    /// needing to know individual request ids. Called when that session's
    /// channel disconnects mid-turn, so its outstanding approvals resolve
    /// immediately instead of waiting out the full approval timeout.
    pub async fn deny_session(&self, session_id: &str) {
        let mut pending = self.inner.lock().await;
        let matching: Vec<String> =
            pending.iter().filter(|(_, (sid, _))| sid == session_id).map(|(request_id, _)| request_id.clone()).collect();
        for request_id in matching {
            if let Some((_, tx)) = pending.remove(&request_id) {
                let _ = tx.send(DomainDecision::Deny);
            }
        }
    }

    pub async fn remove(&self, request_id: &str) {
        self.inner.lock().await.remove(request_id);
    }
}
