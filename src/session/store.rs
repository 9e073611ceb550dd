//! Per-session directory persistence: `state.yaml`, `history.json`,
//! `events.json`, and `usage.json` under `<data_dir>/sessions/<id>/`.
//!
//! Grounded on the original reference implementation's `SessionManager`:
//! session ids are 12 lowercase hex characters (half a UUID4), and
//! `list_sessions` is ordered by the session directory's modification time,
//! most recent first.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::model::{HistoryEvent, SessionState, UsageTracker};

pub struct SessionStore {
    data_dir: PathBuf,
}

impl SessionStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.data_dir.join("sessions").join(session_id)
    }

    /// Mint a fresh 12-hex-character session id and create its on-disk state.
    pub async fn create_session(&self, channel_type: &str, channel_ref: &str) -> std::io::Result<SessionState> {
        let full_hex = Uuid::new_v4().simple().to_string();
        let session_id = full_hex[..12].to_string();
        let state = SessionState::new(session_id.clone(), channel_type.to_string(), channel_ref.to_string());

        let dir = self.session_dir(&session_id);
        tokio::fs::create_dir_all(&dir).await?;
        self.save_state(&state).await?;
        self.save_history(&session_id, &[]).await?;

        Ok(state)
    }

    pub async fn load_state(&self, session_id: &str) -> std::io::Result<Option<SessionState>> {
        let path = self.session_dir(session_id).join("state.yaml");
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let state = serde_yaml::from_str(&content)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn save_state(&self, state: &SessionState) -> std::io::Result<()> {
        let dir = self.session_dir(&state.session_id);
        tokio::fs::create_dir_all(&dir).await?;
        let content = serde_yaml::to_string(state).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(dir.join("state.yaml"), content).await
    }

    /// Resume a session, bumping `last_active` and persisting it.
    pub async fn resume_session(&self, session_id: &str) -> std::io::Result<Option<SessionState>> {
        let Some(mut state) = self.load_state(session_id).await? else {
            return Ok(None);
        };
        state.last_active = chrono::Utc::now();
        self.save_state(&state).await?;
        Ok(Some(state))
    }

    pub async fn delete_session(&self, session_id: &str) -> std::io::Result<()> {
        let dir = self.session_dir(session_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// List every session directory under `sessions/`, most recently
    /// modified first.
    pub async fn list_sessions(&self) -> std::io::Result<Vec<SessionState>> {
        let sessions_dir = self.data_dir.join("sessions");
        if !sessions_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries_with_mtime = Vec::new();
        let mut entries = tokio::fs::read_dir(&sessions_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let mtime = entry.metadata().await?.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            let session_id = entry.file_name().to_string_lossy().into_owned();
            entries_with_mtime.push((mtime, session_id));
        }

        entries_with_mtime.sort_by(|a, b| b.0.cmp(&a.0));

        let mut states = Vec::new();
        for (_, session_id) in entries_with_mtime {
            if let Some(state) = self.load_state(&session_id).await? {
                states.push(state);
            }
        }
        Ok(states)
    }

    pub async fn load_history(&self, session_id: &str) -> std::io::Result<Vec<HistoryEvent>> {
        let path = self.session_dir(session_id).join("history.json");
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub async fn save_history(&self, session_id: &str, history: &[HistoryEvent]) -> std::io::Result<()> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;
        let content = serde_json::to_string_pretty(history)?;
        tokio::fs::write(dir.join("history.json"), content).await
    }

    pub async fn load_usage(&self, session_id: &str) -> std::io::Result<UsageTracker> {
        let path = self.session_dir(session_id).join("usage.json");
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UsageTracker::default()),
            Err(e) => Err(e),
        }
    }

    pub async fn save_usage(&self, session_id: &str, usage: &UsageTracker) -> std::io::Result<()> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;
        let content = serde_json::to_string_pretty(usage)?;
        tokio::fs::write(dir.join("usage.json"), content).await
    }

    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id)
    }

    /// Path confinement helper shared by tools that read/write inside a
    /// session's data (e.g. workspace files): resolves `relative` against
    /// `base` and rejects any result that escapes `base`.
    pub fn resolve_confined(base: &Path, relative: &str) -> Result<PathBuf, String> {
        let candidate = base.join(relative);
        let normalized = normalize(&candidate);
        let base_normalized = normalize(base);
        if !normalized.starts_with(&base_normalized) {
            return Err(format!("path '{relative}' escapes the allowed directory"));
        }
        Ok(normalized)
    }
}

/// Lexically normalize a path (resolve `.`/`..` components) without
/// touching the filesystem, since the target may not exist yet.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn create_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());

        let state = store.create_session("cli", "").await.unwrap();
        assert_eq!(state.session_id.len(), 12);

        let loaded = store.load_state(&state.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.session_id, state.session_id);
    }

    #[tokio::test]
    async fn list_sessions_orders_by_mtime_desc() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());

        let first = store.create_session("cli", "").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let second = store.create_session("cli", "").await.unwrap();

        let listed = store.list_sessions().await.unwrap();
        assert_eq!(listed[0].session_id, second.session_id);
        assert_eq!(listed[1].session_id, first.session_id);
    }

    #[test]
    fn resolve_confined_rejects_escape() {
        let base = Path::new("/data/sessions/abc");
        assert!(SessionStore::resolve_confined(base, "../../etc/passwd").is_err());
        assert!(SessionStore::resolve_confined(base, "notes/todo.md").is_ok());
    }
}
