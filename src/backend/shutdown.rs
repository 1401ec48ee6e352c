use crate::backend::descriptor;
use crate::backend::dns::DnsReconciler;
use crate::backend::process::SupervisedProcess;
use crate::backend::tunnels::TunnelReconciler;
use crate::backend::types::TunnelSpec;
use crate::backend::{DnsApi, TunnelTool};
use crate::constants::SHUTDOWN_GRACE_PERIOD;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    ProcessExited { code: Option<i32> },
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "interrupt signal"),
            Self::Terminate => write!(f, "termination signal"),
            Self::ProcessExited { code: Some(code) } => {
                write!(f, "tunnel process exited with code {}", code)
            }
            Self::ProcessExited { code: None } => write!(f, "tunnel process was killed"),
        }
    }
}

#[derive(Debug, Default)]
pub struct ShutdownState {
    triggered: AtomicBool,
    reason: OnceLock<ShutdownReason>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let won = self
            .triggered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            let _ = self.reason.set(reason);
        }
        won
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownReport {
    pub reason: ShutdownReason,
    pub warnings: Vec<String>,
}

pub struct ShutdownCoordinator {
    state: ShutdownState,
    spec: TunnelSpec,
    tool: Arc<dyn TunnelTool>,
    dns: Arc<dyn DnsApi>,
    process: SupervisedProcess,
    grace_period: Duration,
    done_tx: watch::Sender<Option<ShutdownReport>>,
}

impl ShutdownCoordinator {
    pub fn new(
        spec: TunnelSpec,
        tool: Arc<dyn TunnelTool>,
        dns: Arc<dyn DnsApi>,
        process: SupervisedProcess,
    ) -> Self {
        let (done_tx, _) = watch::channel(None);
        Self {
            state: ShutdownState::new(),
            spec,
            tool,
            dns,
            process,
            grace_period: SHUTDOWN_GRACE_PERIOD,
            done_tx,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn state(&self) -> &ShutdownState {
        &self.state
    }

    pub fn process(&self) -> &SupervisedProcess {
        &self.process
    }

    /// Run the cleanup sequence if no one else has. Later callers get `None`
    /// straight away and can use [`Self::wait_for_completion`] for the report.
    pub async fn shutdown(&self, reason: ShutdownReason) -> Option<ShutdownReport> {
        if !self.state.trigger(reason) {
            tracing::debug!(
                "Shutdown already in progress, ignoring {} ({:?} came first)",
                reason,
                self.state.reason()
            );
            return None;
        }

        tracing::info!("Shutting down tunnel '{}': {}", self.spec.name, reason);
        let mut warnings = Vec::new();

        if !self.process.has_exited() {
            let pid = self
                .process
                .pid()
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            tracing::info!(
                "Stopping tunnel process {} (running since {})",
                pid,
                self.process.started_at()
            );
            if !self.process.terminate(self.grace_period).await {
                warnings.push(format!(
                    "Tunnel process {} did not exit within {} and was killed",
                    pid,
                    humantime::format_duration(self.grace_period)
                ));
            }
        }

        warnings.extend(
            DnsReconciler::new(self.dns.as_ref())
                .teardown(&self.spec.ingress)
                .await,
        );
        warnings.extend(
            TunnelReconciler::new(self.tool.as_ref(), &self.spec.credentials_dir)
                .teardown(&self.spec.name)
                .await,
        );
        warnings.extend(descriptor::remove(&self.spec.config_path()).await);

        if warnings.is_empty() {
            tracing::info!("Cleanup of tunnel '{}' complete", self.spec.name);
        } else {
            tracing::warn!(
                "Cleanup of tunnel '{}' finished with {} warning(s)",
                self.spec.name,
                warnings.len()
            );
        }

        let report = ShutdownReport { reason, warnings };
        self.done_tx.send_replace(Some(report.clone()));
        Some(report)
    }

    pub async fn wait_for_completion(&self) -> Option<ShutdownReport> {
        let mut rx = self.done_tx.subscribe();
        let report = rx.wait_for(Option::is_some).await.ok()?;
        report.clone()
    }
}

#[cfg(unix)]
pub fn listen_for_signals(
    coordinator: Arc<ShutdownCoordinator>,
) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        let reason = tokio::select! {
            _ = interrupt.recv() => ShutdownReason::Interrupt,
            _ = terminate.recv() => ShutdownReason::Terminate,
        };
        tracing::info!("Received {}", reason);
        coordinator.shutdown(reason).await;
    }))
}

#[cfg(not(unix))]
pub fn listen_for_signals(
    coordinator: Arc<ShutdownCoordinator>,
) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Received {}", ShutdownReason::Interrupt);
        coordinator.shutdown(ShutdownReason::Interrupt).await;
    }))
}

pub fn watch_process_exit(coordinator: Arc<ShutdownCoordinator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(exit) = coordinator.process().wait_for_exit().await else {
            return;
        };
        coordinator
            .shutdown(ShutdownReason::ProcessExited { code: exit.code })
            .await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{CallLog, MockDnsApi, MockProcess, MockTunnelTool};
    use crate::backend::types::IngressRule;
    use tempfile::TempDir;

    fn coordinator(dir: &TempDir, log: &CallLog) -> ShutdownCoordinator {
        let spec = TunnelSpec {
            name: "t1".to_string(),
            credentials_dir: dir.path().to_path_buf(),
            auth_token: "tok".to_string(),
            ingress: vec![IngressRule::new("a.example.com", "http://localhost:3000")],
            remove_existing_tunnel: false,
            remove_existing_dns: false,
        };
        let tool = MockTunnelTool::new(log.clone()).with_tunnel("id-1", "t1");
        let dns = MockDnsApi::new(log.clone())
            .with_zone("example.com", "zone-1")
            .with_record("zone-1", "a.example.com", "rec-1");
        let (process, _control) = MockProcess::new(7, log.clone());

        ShutdownCoordinator::new(
            spec,
            Arc::new(tool),
            Arc::new(dns),
            SupervisedProcess::start(Box::new(process)),
        )
        .with_grace_period(Duration::from_millis(200))
    }

    #[test]
    fn test_state_triggers_once() {
        let state = ShutdownState::new();
        assert!(!state.is_triggered());
        assert!(state.trigger(ShutdownReason::Terminate));
        assert!(!state.trigger(ShutdownReason::Interrupt));
        assert!(state.is_triggered());
        assert_eq!(state.reason(), Some(ShutdownReason::Terminate));
    }

    #[test]
    fn test_state_single_winner_across_threads() {
        let state = Arc::new(ShutdownState::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || state.trigger(ShutdownReason::Interrupt))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(ShutdownReason::Interrupt.to_string(), "interrupt signal");
        assert_eq!(
            ShutdownReason::ProcessExited { code: Some(3) }.to_string(),
            "tunnel process exited with code 3"
        );
    }

    #[tokio::test]
    async fn test_cleanup_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.yml"), "tunnel: t1\n").unwrap();
        std::fs::write(dir.path().join("id-1.json"), "{}").unwrap();
        let log = CallLog::default();
        let coordinator = coordinator(&dir, &log);

        let report = coordinator.shutdown(ShutdownReason::Interrupt).await.unwrap();

        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(
            log.entries(),
            vec![
                "process interrupt",
                "zone lookup example.com",
                "dns lookup a.example.com",
                "dns delete rec-1",
                "tunnel list",
                "tunnel delete id-1",
            ]
        );
        assert!(!dir.path().join("config.yml").exists());
        assert!(!dir.path().join("id-1.json").exists());
    }

    #[tokio::test]
    async fn test_concurrent_triggers_run_cleanup_once() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.yml"), "tunnel: t1\n").unwrap();
        let log = CallLog::default();
        let coordinator = coordinator(&dir, &log);

        let (first, second) = tokio::join!(
            coordinator.shutdown(ShutdownReason::Interrupt),
            coordinator.shutdown(ShutdownReason::Terminate),
        );

        assert_eq!(first.is_some() as u8 + second.is_some() as u8, 1);
        assert_eq!(log.count("process interrupt"), 1);
        assert_eq!(log.count("tunnel delete"), 1);
        assert_eq!(log.count("dns delete"), 1);

        let report = coordinator.wait_for_completion().await.unwrap();
        assert_eq!(report.reason, ShutdownReason::Interrupt);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert!(!dir.path().join("config.yml").exists());
    }

    #[tokio::test]
    async fn test_process_exit_triggers_shutdown() {
        let dir = TempDir::new().unwrap();
        let log = CallLog::default();
        let tool = Arc::new(MockTunnelTool::new(log.clone()));
        let dns = Arc::new(MockDnsApi::new(log.clone()));
        let (process, control) = MockProcess::new(9, log.clone());
        let spec = TunnelSpec {
            name: "t1".to_string(),
            credentials_dir: dir.path().to_path_buf(),
            auth_token: "tok".to_string(),
            ingress: vec![IngressRule::new("a.example.com", "http://localhost:3000")],
            remove_existing_tunnel: false,
            remove_existing_dns: false,
        };
        let coordinator = Arc::new(ShutdownCoordinator::new(
            spec,
            tool,
            dns,
            SupervisedProcess::start(Box::new(process)),
        ));

        let watcher = watch_process_exit(coordinator.clone());
        control.exit(Some(1));

        let report = coordinator.wait_for_completion().await.unwrap();
        watcher.await.unwrap();

        assert_eq!(report.reason, ShutdownReason::ProcessExited { code: Some(1) });
        assert!(!log.contains("process interrupt"));
        assert!(coordinator.shutdown(ShutdownReason::Interrupt).await.is_none());
    }
}
