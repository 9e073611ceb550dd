//! Top-level error types for subsystems with a reportable failure surface.
//!
//! Leaf helpers (path resolution, pattern matching, small parsers) return
//! `Result<T, String>` instead, matching the teacher's mixed convention.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    #[error("container gone for session {0}")]
    ContainerGone(String),
    #[error("container runtime error: {0}")]
    Runtime(String),
    #[error("exec timed out after {0}s")]
    Timeout(u64),
    #[error("skill '{0}' not found")]
    SkillNotFound(String),
    #[error("skill dependency install failed: {0}")]
    SkillBuildFailed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("malformed request")]
    BadRequest,
    #[error("no valid session token")]
    Unauthorized,
    #[error("domain blocked by proxy policy")]
    DomainBlocked,
    #[error("origin unreachable: {0}")]
    BadGateway(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("classifier failed: {0}")]
    ClassifierFailed(String),
}
