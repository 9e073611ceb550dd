//! The Sandbox Manager: owns every session's container, its domain
//! allowlist, and the mapping from container IP back to session id.
//!
//! Grounded on the original reference implementation's `SandboxManager`:
//! `ensure_session` reuses a running container or atomically recreates one;
//! `exec_command` retries exactly once if the container has gone away
//! mid-command; skill activation copies files from the shared skill tree
//! into the session's own `skills/` mount and optionally builds a venv-style
//! dependency install in an ephemeral build container.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::SandboxConfig;
use crate::error::SandboxError;

use super::allowlist::DomainAllowlist;
use super::runtime::{ContainerConfig, ContainerRuntime, ExecResult, Mount};

/// Everything the manager tracks for one live session container.
pub struct SessionContainer {
    pub session_id: String,
    pub container_name: String,
    pub ip: String,
    pub last_active: Instant,
    /// Set while an `exec_command` is in flight, so a second concurrent
    /// exec against the same session is rejected rather than interleaved.
    pub exec_in_flight: bool,
    /// Bearer credential this session's container presents to the Egress
    /// Proxy via `Proxy-Authorization: Basic base64(token:)`.
    pub proxy_token: String,
    /// The shell command string currently running via `exec_command`, if
    /// any. The Egress Proxy reads this to annotate a domain approval
    /// request with the command that triggered it.
    pub current_command: Option<String>,
}

struct SessionEntry {
    container: SessionContainer,
    allowlist: DomainAllowlist,
}

pub struct SandboxManager {
    runtime: Arc<dyn ContainerRuntime>,
    config: SandboxConfig,
    data_dir: PathBuf,
    skills_dir: PathBuf,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    ip_to_session: Mutex<HashMap<String, String>>,
    token_to_session: Mutex<HashMap<String, String>>,
}

impl SandboxManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: SandboxConfig, data_dir: PathBuf) -> Self {
        let skills_dir = data_dir.join("skills");
        Self {
            runtime,
            config,
            data_dir,
            skills_dir,
            sessions: Mutex::new(HashMap::new()),
            ip_to_session: Mutex::new(HashMap::new()),
            token_to_session: Mutex::new(HashMap::new()),
        }
    }

    fn container_name(&self, session_id: &str) -> String {
        format!("carapace-session-{session_id}")
    }

    fn build_mounts(&self, session_id: &str) -> Vec<Mount> {
        let session_dir = self.data_dir.join("sessions").join(session_id);
        let workspace_files = ["AGENTS.md", "SOUL.md", "USER.md"];

        let mut mounts: Vec<Mount> = workspace_files
            .iter()
            .filter(|name| self.data_dir.join(name).exists())
            .map(|name| Mount {
                source: self.data_dir.join(name).to_string_lossy().into_owned(),
                target: format!("/workspace/{name}"),
                read_only: true,
            })
            .collect();

        mounts.push(Mount {
            source: self.data_dir.join("memory").to_string_lossy().into_owned(),
            target: "/workspace/memory".to_string(),
            read_only: true,
        });
        mounts.push(Mount {
            source: session_dir.join("skills").to_string_lossy().into_owned(),
            target: "/workspace/skills".to_string(),
            read_only: false,
        });
        mounts.push(Mount {
            source: session_dir.join("tmp").to_string_lossy().into_owned(),
            target: "/workspace/tmp".to_string(),
            read_only: false,
        });

        mounts
    }

    /// Ensure a running, network-attached container exists for `session_id`,
    /// reusing it if already running and recreating it otherwise. Recreation
    /// rolls back the session's tracking entries atomically on failure so
    /// the session never ends up partially registered.
    pub async fn ensure_session(&self, session_id: &str) -> Result<String, SandboxError> {
        let container_name = self.container_name(session_id);

        if self.runtime.is_running(&container_name).await.unwrap_or(false) {
            let mut sessions = self.sessions.lock().await;
            if let Some(entry) = sessions.get_mut(session_id) {
                entry.container.last_active = Instant::now();
                return Ok(entry.container.ip.clone());
            }
        }

        let session_dir = self.data_dir.join("sessions").join(session_id);
        tokio::fs::create_dir_all(session_dir.join("skills")).await?;
        tokio::fs::create_dir_all(session_dir.join("tmp")).await?;

        let mut labels = HashMap::new();
        labels.insert("carapace.session".to_string(), session_id.to_string());

        let proxy_token = uuid::Uuid::new_v4().simple().to_string();
        let mut environment = HashMap::new();
        environment.insert("CARAPACE_PROXY_TOKEN".to_string(), proxy_token.clone());
        environment.insert(
            "http_proxy".to_string(),
            format!("http://{proxy_token}@host.docker.internal:{}", self.config.proxy_port),
        );
        environment.insert("https_proxy".to_string(), environment["http_proxy"].clone());

        let config = ContainerConfig {
            image: self.config.base_image.clone(),
            name: container_name.clone(),
            labels,
            mounts: self.build_mounts(session_id),
            network: Some(self.config.network_name.clone()),
            command: None,
            environment,
        };

        self.runtime.create(config).await?;

        let ip = match self.runtime.get_ip(&container_name, &self.config.network_name).await {
            Ok(ip) => ip,
            Err(e) => {
                // Roll back: don't leave a half-registered session behind.
                let _ = self.runtime.remove(&container_name).await;
                return Err(e);
            }
        };

        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            session_id.to_string(),
            SessionEntry {
                container: SessionContainer {
                    session_id: session_id.to_string(),
                    container_name: container_name.clone(),
                    ip: ip.clone(),
                    last_active: Instant::now(),
                    exec_in_flight: false,
                    proxy_token: proxy_token.clone(),
                    current_command: None,
                },
                allowlist: DomainAllowlist::new(),
            },
        );
        drop(sessions);

        let mut ip_map = self.ip_to_session.lock().await;
        ip_map.insert(ip.clone(), session_id.to_string());
        drop(ip_map);

        let mut token_map = self.token_to_session.lock().await;
        token_map.insert(proxy_token, session_id.to_string());

        Ok(ip)
    }

    /// Resolve a session id from the proxy token presented in a
    /// `Proxy-Authorization` header.
    pub async fn session_by_proxy_token(&self, token: &str) -> Option<String> {
        self.token_to_session.lock().await.get(token).cloned()
    }

    /// Run `command` inside the session's container, retrying exactly once
    /// (via a fresh `ensure_session`) if the container has disappeared.
    ///
    /// Installs `command` into the session's `current_command` slot (so the
    /// Egress Proxy can annotate any domain approval this run triggers) and
    /// starts it with a fresh, empty `exec_temp` allowlist; both are cleared
    /// again on return no matter how the exec turned out.
    pub async fn exec_command(
        &self,
        session_id: &str,
        command: Vec<String>,
        timeout_secs: u64,
    ) -> Result<ExecResult, SandboxError> {
        self.ensure_session(session_id).await?;
        self.begin_exec(session_id, &command).await;

        let outcome = match self.runtime.exec(&self.container_name(session_id), &command, timeout_secs).await {
            Ok(result) => Ok(result),
            Err(SandboxError::ContainerGone(_)) => {
                self.forget_session(session_id).await;
                match self.ensure_session(session_id).await {
                    Ok(_) => {
                        self.begin_exec(session_id, &command).await;
                        self.runtime.exec(&self.container_name(session_id), &command, timeout_secs).await
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };

        self.end_exec(session_id).await;
        outcome
    }

    /// Read the command string currently running for `session_id`, if any.
    pub async fn current_command(&self, session_id: &str) -> Option<String> {
        let sessions = self.sessions.lock().await;
        sessions.get(session_id).and_then(|entry| entry.container.current_command.clone())
    }

    async fn begin_exec(&self, session_id: &str, command: &[String]) {
        let mut sessions = self.sessions.lock().await;
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.container.current_command = Some(command.join(" "));
            entry.allowlist.clear_exec_temp();
        }
    }

    async fn end_exec(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.container.current_command = None;
            entry.allowlist.clear_exec_temp();
        }
    }

    async fn forget_session(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(entry) = sessions.remove(session_id) {
            let mut ip_map = self.ip_to_session.lock().await;
            ip_map.remove(&entry.container.ip);
            drop(ip_map);

            let mut token_map = self.token_to_session.lock().await;
            token_map.remove(&entry.container.proxy_token);
        }
    }

    /// Copy a skill from the shared master tree into the session's own
    /// `skills/` mount, optionally building its dependencies in an ephemeral
    /// build container if it carries a `pyproject.toml`-equivalent manifest.
    pub async fn activate_skill(&self, session_id: &str, skill_name: &str) -> Result<(), SandboxError> {
        let master_dir = self.skills_dir.join(skill_name);
        if !master_dir.exists() {
            return Err(SandboxError::SkillNotFound(skill_name.to_string()));
        }

        let session_skill_dir = self.data_dir.join("sessions").join(session_id).join("skills").join(skill_name);
        copy_dir_excluding(&master_dir, &session_skill_dir, &[".venv", "__pycache__"]).await?;

        if session_skill_dir.join("pyproject.toml").exists() {
            self.build_skill_env(session_id, skill_name).await?;
        }

        Ok(())
    }

    async fn build_skill_env(&self, session_id: &str, skill_name: &str) -> Result<(), SandboxError> {
        let build_name = format!("carapace-skillbuild-{session_id}-{skill_name}");
        let session_skill_dir = self.data_dir.join("sessions").join(session_id).join("skills").join(skill_name);

        let config = ContainerConfig {
            image: self.config.base_image.clone(),
            name: build_name.clone(),
            labels: HashMap::new(),
            mounts: vec![Mount {
                source: session_skill_dir.to_string_lossy().into_owned(),
                target: "/skill".to_string(),
                read_only: false,
            }],
            network: None,
            command: Some(vec!["true".to_string()]),
            environment: HashMap::new(),
        };

        self.runtime.create(config).await.map_err(|e| SandboxError::SkillBuildFailed(e.to_string()))?;
        let result = self
            .runtime
            .exec(&build_name, &["sh".to_string(), "-c".to_string(), "cd /skill && (uv sync || pip install -e .)".to_string()], 120)
            .await;
        let _ = self.runtime.remove(&build_name).await;

        match result {
            Ok(r) if r.exit_code == 0 => Ok(()),
            Ok(r) => Err(SandboxError::SkillBuildFailed(r.output)),
            Err(e) => Err(SandboxError::SkillBuildFailed(e.to_string())),
        }
    }

    /// Copy a session's working copy of a skill back into the shared master
    /// tree, excluding build artifacts.
    pub async fn save_skill(&self, session_id: &str, skill_name: &str) -> Result<(), SandboxError> {
        let session_skill_dir = self.data_dir.join("sessions").join(session_id).join("skills").join(skill_name);
        let master_dir = self.skills_dir.join(skill_name);
        copy_dir_excluding(&session_skill_dir, &master_dir, &[".venv", "__pycache__"]).await
    }

    pub async fn cleanup_session(&self, session_id: &str) -> Result<(), SandboxError> {
        let container_name = self.container_name(session_id);
        self.runtime.remove(&container_name).await?;
        self.forget_session(session_id).await;
        Ok(())
    }

    /// Remove containers idle longer than the configured timeout.
    pub async fn cleanup_idle(&self) -> Result<(), SandboxError> {
        let cutoff = Duration::from_secs(self.config.idle_timeout_minutes * 60);
        let idle_sessions: Vec<String> = {
            let mut sessions = self.sessions.lock().await;
            for entry in sessions.values_mut() {
                entry.allowlist.sweep_expired();
            }
            sessions
                .iter()
                .filter(|(_, entry)| entry.container.last_active.elapsed() > cutoff)
                .map(|(id, _)| id.clone())
                .collect()
        };

        for session_id in idle_sessions {
            self.cleanup_session(&session_id).await?;
        }
        Ok(())
    }

    pub async fn cleanup_all(&self) -> Result<(), SandboxError> {
        let session_ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        for session_id in session_ids {
            self.cleanup_session(&session_id).await?;
        }
        Ok(())
    }

    pub async fn get_session_by_ip(&self, ip: &str) -> Option<String> {
        self.ip_to_session.lock().await.get(ip).cloned()
    }

    /// Authorize `domain` for `session_id` per the given decision, updating
    /// that session's allowlist bucket. Called by the Egress Proxy after a
    /// user resolves a domain approval prompt.
    pub async fn authorize_domain(&self, session_id: &str, domain: &str, decision: super::allowlist::DomainDecision) {
        let mut sessions = self.sessions.lock().await;
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.allowlist.apply_decision(domain, decision);
        }
    }

    /// `true` if `domain` is currently allowed for `session_id`.
    pub async fn is_domain_allowed(&self, session_id: &str, domain: &str) -> bool {
        let sessions = self.sessions.lock().await;
        sessions.get(session_id).map(|entry| entry.allowlist.is_allowed(domain)).unwrap_or(false)
    }
}

async fn copy_dir_excluding(from: &Path, to: &Path, exclude: &[&str]) -> Result<(), SandboxError> {
    if !from.exists() {
        return Ok(());
    }
    tokio::fs::create_dir_all(to).await?;

    let mut entries = tokio::fs::read_dir(from).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if exclude.iter().any(|excluded| *excluded == name_str) {
            continue;
        }

        let src = entry.path();
        let dst = to.join(&name);
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            Box::pin(copy_dir_excluding(&src, &dst, exclude)).await?;
        } else {
            tokio::fs::copy(&src, &dst).await?;
        }
    }
    Ok(())
}
