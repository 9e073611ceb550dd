//! Bootstrap sequence: construct every subsystem in dependency order and
//! start the idle-sweep background task.
//!
//! Grounded on the original reference implementation's `lifespan`:
//! data dir → config → rules → session store → skill registry → agent
//! model → container runtime → sandbox manager → proxy → token → idle
//! cleanup loop. Teardown (on shutdown) reverses this order.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::ai::{HttpJsonProvider, LLMProvider};
use crate::channel::ChannelRegistry;
use crate::config::{self, AppConfig};
use crate::gate::Evaluator;
use crate::memory::MemoryStore;
use crate::model::{Rule, RulesConfig};
use crate::orchestrator::{SessionLocks, ToolContext};
use crate::proxy::{PendingApprovals, ProxyServer};
use crate::sandbox::{self, SandboxManager, SkillRegistry};
use crate::session::SessionStore;

/// Everything a request handler needs, assembled once at startup.
#[derive(Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: Arc<AppConfig>,
    pub rules: Arc<Vec<Rule>>,
    pub sessions: Arc<SessionStore>,
    pub skills: Arc<SkillRegistry>,
    pub sandbox: Arc<SandboxManager>,
    pub memory: Arc<MemoryStore>,
    pub main_provider: Arc<dyn LLMProvider>,
    pub classifier_provider: Arc<dyn LLMProvider>,
    pub evaluator: Arc<Evaluator>,
    pub channel_registry: ChannelRegistry,
    pub session_locks: Arc<SessionLocks>,
    pub pending_approvals: PendingApprovals,
    pub token: String,
}

impl AppState {
    pub fn tool_context(&self, session_id: &str) -> ToolContext {
        ToolContext {
            session_id: session_id.to_string(),
            data_dir: self.data_dir.clone(),
            classifier_provider: Arc::clone(&self.classifier_provider),
            evaluator: Arc::clone(&self.evaluator),
            rules: Arc::clone(&self.rules),
            sandbox: Arc::clone(&self.sandbox),
            skills: Arc::clone(&self.skills),
            memory: Arc::clone(&self.memory),
            sessions: Arc::clone(&self.sessions),
        }
    }
}

/// Load config/rules, construct every subsystem, and start background
/// tasks. Returns the assembled [`AppState`] plus a handle to the running
/// Egress Proxy so the caller can await its accept loop alongside the HTTP
/// server.
pub async fn bootstrap(data_dir: PathBuf) -> Result<(AppState, Arc<ProxyServer>), String> {
    tokio::fs::create_dir_all(&data_dir).await.map_err(|e| e.to_string())?;

    let config = config::load_default_config(&data_dir);
    let config = Arc::new(config);

    let rules_path = data_dir.join("rules.yaml");
    let rules = match tokio::fs::read_to_string(&rules_path).await {
        Ok(content) => serde_yaml::from_str::<RulesConfig>(&content).map_err(|e| e.to_string())?.rules,
        Err(_) => Vec::new(),
    };
    let rules = Arc::new(rules);

    let sessions = Arc::new(SessionStore::new(data_dir.clone()));
    let skills = Arc::new(SkillRegistry::new(data_dir.join("skills")));
    let memory = Arc::new(MemoryStore::new(data_dir.clone()));

    let runtime = sandbox::detect_runtime().map_err(|e| e.to_string())?;
    let sandbox_manager = Arc::new(SandboxManager::new(runtime, config.sandbox.clone(), data_dir.clone()));

    let main_provider: Arc<dyn LLMProvider> =
        Arc::new(HttpJsonProvider::new("main", config.agent.model.clone(), "https://api.openai.com/v1"));
    let classifier_provider: Arc<dyn LLMProvider> = Arc::new(HttpJsonProvider::new(
        "classifier",
        config.agent.classifier_model.clone(),
        "https://api.openai.com/v1",
    ));
    let evaluator = Arc::new(Evaluator::new(Arc::clone(&classifier_provider)));

    let channel_registry = ChannelRegistry::new();
    let proxy_bind = format!("0.0.0.0:{}", config.sandbox.proxy_port);
    let proxy = Arc::new(ProxyServer::new(Arc::clone(&sandbox_manager), Arc::new(channel_registry.clone()), proxy_bind));
    let pending_approvals = proxy.pending_approvals();

    let token = crate::gateway::ensure_token(&data_dir).await.map_err(|e| e.to_string())?;

    let state = AppState {
        data_dir: data_dir.clone(),
        config,
        rules,
        sessions,
        skills,
        sandbox: sandbox_manager,
        memory,
        main_provider,
        classifier_provider,
        evaluator,
        channel_registry,
        session_locks: Arc::new(SessionLocks::new()),
        pending_approvals,
        token,
    };

    spawn_idle_cleanup(Arc::clone(&state.sandbox));

    Ok((state, proxy))
}

fn spawn_idle_cleanup(sandbox: Arc<SandboxManager>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            if let Err(e) = sandbox.cleanup_idle().await {
                tracing::warn!(error = %e, "idle sandbox cleanup failed");
            }
        }
    });
}
