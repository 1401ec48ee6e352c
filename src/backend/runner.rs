use crate::backend::descriptor;
use crate::backend::dns::DnsReconciler;
use crate::backend::process::SupervisedProcess;
use crate::backend::shutdown::{
    ShutdownCoordinator, ShutdownReason, ShutdownReport, listen_for_signals, watch_process_exit,
};
use crate::backend::tunnels::{self, TunnelReconciler};
use crate::backend::types::{ReconcileMode, RemoteTunnelHandle, TunnelSpec};
use crate::backend::{DnsApi, TunnelTool};
use crate::constants::{ORIGIN_CERT_FILE, SHUTDOWN_GRACE_PERIOD};
use crate::errors::{Result, TunnelError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionedTunnel {
    pub handle: RemoteTunnelHandle,
    pub config_path: PathBuf,
}

pub struct TunnelRunner {
    tool: Arc<dyn TunnelTool>,
    dns: Arc<dyn DnsApi>,
    grace_period: Duration,
}

impl TunnelRunner {
    pub fn new(tool: Arc<dyn TunnelTool>, dns: Arc<dyn DnsApi>) -> Self {
        Self {
            tool,
            dns,
            grace_period: SHUTDOWN_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub async fn ensure_login(&self, spec: &TunnelSpec) -> Result<()> {
        let cert = spec.credentials_dir.join(ORIGIN_CERT_FILE);
        if tokio::fs::try_exists(&cert).await.unwrap_or(false) {
            tracing::debug!("Found origin certificate at {}", cert.display());
            return Ok(());
        }
        self.tool.login().await
    }

    pub async fn provision(&self, spec: &TunnelSpec) -> Result<ProvisionedTunnel> {
        self.ensure_login(spec).await?;

        tracing::info!(
            "Running {} reconciliation for tunnel '{}'",
            ReconcileMode::Preflight,
            spec.name
        );
        let dns = DnsReconciler::new(self.dns.as_ref());
        let tunnels = TunnelReconciler::new(self.tool.as_ref(), &spec.credentials_dir);

        // Detect every conflict before removing anything.
        let stale_records = dns.inspect(&spec.ingress, spec.remove_existing_dns).await?;
        let stale_tunnel = tunnels.inspect(spec).await?;

        dns.remove(&stale_records).await?;
        if let Some(stale_tunnel) = stale_tunnel {
            tunnels.remove(&stale_tunnel).await?;
        }

        let handle = tunnels::provision(self.tool.as_ref(), spec).await?;
        let config_path = descriptor::write(spec, &handle).await?;

        Ok(ProvisionedTunnel {
            handle,
            config_path,
        })
    }

    pub async fn launch(
        &self,
        spec: &TunnelSpec,
        provisioned: &ProvisionedTunnel,
    ) -> Result<Arc<ShutdownCoordinator>> {
        tracing::info!(
            "Starting tunnel '{}' ({})",
            spec.name,
            provisioned.handle.id
        );
        let process = self.tool.run(&spec.name, &provisioned.config_path).await?;

        Ok(Arc::new(
            ShutdownCoordinator::new(
                spec.clone(),
                self.tool.clone(),
                self.dns.clone(),
                SupervisedProcess::start(process),
            )
            .with_grace_period(self.grace_period),
        ))
    }

    pub async fn run(&self, spec: &TunnelSpec) -> Result<ShutdownReport> {
        let provisioned = self.provision(spec).await?;
        let coordinator = self.launch(spec, &provisioned).await?;

        let signals = listen_for_signals(coordinator.clone());
        self.supervise(coordinator, signals).await
    }

    async fn supervise(
        &self,
        coordinator: Arc<ShutdownCoordinator>,
        signals: std::io::Result<JoinHandle<()>>,
    ) -> Result<ShutdownReport> {
        // Everything is provisioned at this point, so tear it down before bailing.
        let signals = match signals {
            Ok(signals) => signals,
            Err(e) => {
                tracing::error!("Failed to install signal handlers: {}", e);
                coordinator.shutdown(ShutdownReason::Terminate).await;
                return Err(e.into());
            }
        };

        let exit_watcher = watch_process_exit(coordinator.clone());
        tracing::info!("Tunnel is running. Press Ctrl+C to stop.");

        let report = coordinator.wait_for_completion().await;
        signals.abort();
        exit_watcher.abort();

        report.ok_or_else(|| {
            TunnelError::CommandFailed("shutdown ended without a report".to_string())
        })
    }
}
