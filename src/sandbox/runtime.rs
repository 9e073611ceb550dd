//! The Container Runtime Iface: the trait boundary between the Sandbox
//! Manager and whatever container engine is actually installed.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::SandboxError;

#[derive(Debug, Clone)]
pub struct Mount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub image: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    pub mounts: Vec<Mount>,
    pub network: Option<String>,
    pub command: Option<Vec<String>>,
    pub environment: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub output: String,
}

/// Backend-agnostic container lifecycle operations, implemented once per
/// supported engine (Docker, Podman).
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create(&self, config: ContainerConfig) -> Result<(), SandboxError>;

    async fn exec(
        &self,
        container_name: &str,
        command: &[String],
        timeout_secs: u64,
    ) -> Result<ExecResult, SandboxError>;

    async fn remove(&self, container_name: &str) -> Result<(), SandboxError>;

    async fn is_running(&self, container_name: &str) -> Result<bool, SandboxError>;

    async fn get_ip(&self, container_name: &str, network: &str) -> Result<String, SandboxError>;

    /// Resolve the name by which other containers on `network` can reach us.
    async fn resolve_self_network_name(&self, network: &str) -> Result<String, SandboxError>;

    /// The host-reachable address sandboxed containers should use to dial
    /// back out to the Egress Proxy running on the host.
    async fn get_host_ip(&self, network: &str) -> Result<String, SandboxError>;
}
