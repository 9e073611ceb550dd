//! Session Orchestrator: per-session turn serialization plus the agent loop
//! and built-in tool catalog.

mod agent_loop;
mod tools;
mod turn;

pub use agent_loop::{build_system_prompt, builtin_tools};
pub use tools::{execute_tool, ToolContext, ToolOutcome};
pub use turn::{run_agent_turn, ApprovalRequest, ApprovalResolver, ToolCallObserver, TurnOutcome};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

/// A session's serialization lock, held while that session's turn runs, and
/// a ref-count of how many live channel connections reference it.
struct LockEntry {
    lock: Arc<Mutex<()>>,
    refs: usize,
}

/// Ensures at most one turn runs per session at a time, across however many
/// channel connections are currently attached to it. A connection "checks
/// out" the session's shared lock handle on attach and hands it back on
/// disconnect; the entry itself is dropped once the last connection releases
/// it, mirroring the reference implementation's per-session `asyncio.Lock`
/// ref-counting. The handle itself is locked and unlocked per turn by the
/// channel layer, not held for the connection's whole lifetime.
#[derive(Default)]
pub struct SessionLocks {
    entries: Mutex<HashMap<String, LockEntry>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to `session_id`, bumping its ref count and returning its lock.
    pub async fn attach(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(session_id.to_string()).or_insert_with(|| LockEntry {
            lock: Arc::new(Mutex::new(())),
            refs: 0,
        });
        entry.refs += 1;
        Arc::clone(&entry.lock)
    }

    /// Detach from `session_id`; drops the tracking entry once no
    /// connection references it any more.
    pub async fn detach(&self, session_id: &str) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(session_id) {
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs == 0 {
                entries.remove(session_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_session_shares_one_lock() {
        let locks = SessionLocks::new();
        let a = locks.attach("s1").await;
        let b = locks.attach("s1").await;
        assert!(Arc::ptr_eq(&a, &b));

        locks.detach("s1").await;
        locks.detach("s1").await;
        assert_eq!(locks.entries.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn distinct_sessions_get_distinct_locks() {
        let locks = SessionLocks::new();
        let a = locks.attach("s1").await;
        let b = locks.attach("s2").await;
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
