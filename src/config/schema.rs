//! Layered application configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarapaceSection {
    pub log_level: String,
}

impl Default for CarapaceSection {
    fn default() -> Self {
        Self { log_level: "info".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8787 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    pub classifier_model: String,
    pub max_iterations: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "openai:gpt-4o-mini".to_string(),
            classifier_model: "openai:gpt-4o-mini".to_string(),
            max_iterations: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub backend: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self { backend: "mock".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub base_image: String,
    pub idle_timeout_minutes: u64,
    pub default_network: bool,
    pub network_name: String,
    pub proxy_port: u16,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            base_image: "alpine:3.19".to_string(),
            idle_timeout_minutes: 15,
            default_network: false,
            network_name: "carapace-sandbox".to_string(),
            proxy_port: 3128,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub history_retention_days: u32,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self { history_retention_days: 90 }
    }
}

/// Root application configuration, loaded from `<data_dir>/config.toml`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub carapace: CarapaceSection,
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub credentials: CredentialsConfig,
    pub sandbox: SandboxConfig,
    pub sessions: SessionsConfig,
}
