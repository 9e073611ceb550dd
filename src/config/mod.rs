//! Layered application configuration: schema, loading, and env overrides.

mod loader;
mod schema;

pub use loader::{data_dir, default_config_path, load_config, load_default_config, save_config};
pub use schema::{
    AgentConfig, AppConfig, CarapaceSection, CredentialsConfig, SandboxConfig, ServerConfig,
    SessionsConfig,
};
