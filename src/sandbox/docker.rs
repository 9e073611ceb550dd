//! [`ContainerRuntime`] backed by the `docker` CLI.
//!
//! Shells out rather than linking a Docker Engine SDK, mirroring how the
//! original Python implementation's `docker` package itself talks to the
//! daemon over its local socket — we get the same behavior with a much
//! smaller dependency footprint.

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::SandboxError;

use super::runtime::{ContainerConfig, ContainerRuntime, ExecResult};

pub struct DockerRuntime {
    binary: String,
}

impl DockerRuntime {
    pub fn new() -> Result<Self, SandboxError> {
        let binary = which::which("docker")
            .map_err(|_| SandboxError::RuntimeUnavailable("docker binary not found on PATH".to_string()))?
            .to_string_lossy()
            .into_owned();
        Ok(Self { binary })
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, config: ContainerConfig) -> Result<(), SandboxError> {
        // Remove any stale container with the same name first.
        let _ = self.command().args(["rm", "-f", &config.name]).output().await;

        let mut cmd = self.command();
        cmd.arg("run").arg("-d").args(["--name", &config.name]);

        for (key, value) in &config.labels {
            cmd.arg("--label").arg(format!("{key}={value}"));
        }
        for mount in &config.mounts {
            let mode = if mount.read_only { "ro" } else { "rw" };
            cmd.arg("-v").arg(format!("{}:{}:{mode}", mount.source, mount.target));
        }
        if let Some(network) = &config.network {
            cmd.arg("--network").arg(network);
        }
        for (key, value) in &config.environment {
            cmd.arg("-e").arg(format!("{key}={value}"));
        }

        cmd.arg(&config.image);
        if let Some(command) = &config.command {
            cmd.args(command);
        }

        let output = cmd.output().await.map_err(SandboxError::Io)?;
        if !output.status.success() {
            return Err(SandboxError::Runtime(String::from_utf8_lossy(&output.stderr).into_owned()));
        }
        Ok(())
    }

    async fn exec(
        &self,
        container_name: &str,
        command: &[String],
        timeout_secs: u64,
    ) -> Result<ExecResult, SandboxError> {
        let mut cmd = self.command();
        cmd.arg("exec").arg(container_name).args(command);

        let fut = cmd.output();
        let output = match timeout(Duration::from_secs(timeout_secs), fut).await {
            Ok(result) => result.map_err(SandboxError::Io)?,
            Err(_) => {
                return Ok(ExecResult {
                    exit_code: -1,
                    output: format!("Error: command timed out after {timeout_secs}s"),
                });
            }
        };

        if is_container_gone(&output.stderr) {
            return Err(SandboxError::ContainerGone(container_name.to_string()));
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            text.push_str("\n[stderr] ");
            text.push_str(stderr.trim());
        }

        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code != 0 {
            text.push_str(&format!("\n[exit code: {exit_code}]"));
        }

        Ok(ExecResult { exit_code, output: text })
    }

    async fn remove(&self, container_name: &str) -> Result<(), SandboxError> {
        let output = self
            .command()
            .args(["rm", "-f", container_name])
            .output()
            .await
            .map_err(SandboxError::Io)?;
        if !output.status.success() && !is_container_gone(&output.stderr) {
            return Err(SandboxError::Runtime(String::from_utf8_lossy(&output.stderr).into_owned()));
        }
        Ok(())
    }

    async fn is_running(&self, container_name: &str) -> Result<bool, SandboxError> {
        let output = self
            .command()
            .args(["inspect", "-f", "{{.State.Running}}", container_name])
            .output()
            .await
            .map_err(SandboxError::Io)?;
        if !output.status.success() {
            return Ok(false);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    async fn get_ip(&self, container_name: &str, network: &str) -> Result<String, SandboxError> {
        let format = format!("{{{{.NetworkSettings.Networks.{network}.IPAddress}}}}");
        let output = self
            .command()
            .args(["inspect", "-f", &format, container_name])
            .output()
            .await
            .map_err(SandboxError::Io)?;
        if !output.status.success() {
            return Err(SandboxError::Runtime(String::from_utf8_lossy(&output.stderr).into_owned()));
        }
        let ip = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if ip.is_empty() {
            return Err(SandboxError::Runtime(format!("no IP for {container_name} on {network}")));
        }
        Ok(ip)
    }

    async fn resolve_self_network_name(&self, _network: &str) -> Result<String, SandboxError> {
        let output = self.command().args(["info", "--format", "{{.Name}}"]).output().await.map_err(SandboxError::Io)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn get_host_ip(&self, network: &str) -> Result<String, SandboxError> {
        let format = "{{range .IPAM.Config}}{{.Gateway}}{{end}}".to_string();
        let output = self
            .command()
            .args(["network", "inspect", network, "-f", &format])
            .output()
            .await
            .map_err(SandboxError::Io)?;
        if !output.status.success() {
            return Err(SandboxError::Runtime(String::from_utf8_lossy(&output.stderr).into_owned()));
        }
        let ip = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if ip.is_empty() {
            return Err(SandboxError::Runtime(format!("no gateway IP for network {network}")));
        }
        Ok(ip)
    }
}

fn is_container_gone(stderr: &[u8]) -> bool {
    let text = String::from_utf8_lossy(stderr);
    text.contains("No such container") || text.contains("is not running")
}
