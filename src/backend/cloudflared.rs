use crate::backend::process::{ChildProcess, spawn_error, spawn_tunnel_process};
use crate::backend::{TunnelProcess, TunnelTool};
use crate::constants::CLOUDFLARED_BINARY;
use crate::errors::{self, Result, TunnelError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

pub struct Cloudflared {
    binary_path: PathBuf,
}

impl Default for Cloudflared {
    fn default() -> Self {
        Self::new(PathBuf::from(CLOUDFLARED_BINARY))
    }
}

impl Cloudflared {
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    async fn run_command(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.binary_path);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: cloudflared {}", args.join(" "));

        let output = cmd
            .output()
            .await
            .map_err(|e| spawn_error(&self.binary_path, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TunnelError::CommandFailed(errors::process::exited_with(
                &args.join(" "),
                output.status.code(),
                &stderr,
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl TunnelTool for Cloudflared {
    async fn login(&self) -> Result<()> {
        tracing::info!("No origin certificate found, running `cloudflared tunnel login`");

        // Login prints a URL and waits for the browser flow, so it keeps the terminal.
        let status = Command::new(&self.binary_path)
            .args(["tunnel", "login"])
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| spawn_error(&self.binary_path, e))?;

        if !status.success() {
            return Err(TunnelError::CommandFailed(errors::process::exited_with(
                "tunnel login",
                status.code(),
                "",
            )));
        }
        Ok(())
    }

    async fn list(&self) -> Result<String> {
        self.run_command(&["tunnel", "list"]).await
    }

    async fn create(&self, name: &str) -> Result<()> {
        self.run_command(&["tunnel", "create", name]).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.run_command(&["tunnel", "delete", id]).await?;
        Ok(())
    }

    async fn route_dns(&self, name: &str, hostname: &str) -> Result<()> {
        self.run_command(&["tunnel", "route", "dns", name, hostname]).await?;
        Ok(())
    }

    async fn run(&self, name: &str, config_path: &Path) -> Result<Box<dyn TunnelProcess>> {
        let config_arg = config_path.display().to_string();
        let child = spawn_tunnel_process(
            &self.binary_path,
            &["tunnel", "--config", &config_arg, "run", name],
        )?;
        Ok(Box::new(ChildProcess::new(child)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_reports_path() {
        let tool = Cloudflared::new(PathBuf::from("/nonexistent/bin/cloudflared"));
        let err = tool.list().await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("cloudflared binary not found"), "got: {}", msg);
        assert!(msg.contains("/nonexistent/bin/cloudflared"), "got: {}", msg);
    }

    #[test]
    fn test_default_uses_path_lookup() {
        let tool = Cloudflared::default();
        assert_eq!(tool.binary_path, PathBuf::from("cloudflared"));
    }
}
