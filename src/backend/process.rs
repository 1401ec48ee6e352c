use crate::backend::TunnelProcess;
use crate::backend::types::{ProcessId, Timestamp};
use crate::errors::{self, Result, TunnelError};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn spawn_tunnel_process(binary_path: &Path, args: &[&str]) -> Result<Child> {
    tracing::info!(
        "Spawning tunnel process: {} {}",
        binary_path.display(),
        args.join(" ")
    );

    let mut command = Command::new(binary_path);
    command
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    command
        .spawn()
        .map_err(|e| spawn_error(binary_path, e))
}

pub(crate) fn spawn_error(binary_path: &Path, e: std::io::Error) -> TunnelError {
    let path = binary_path.display().to_string();
    match e.kind() {
        std::io::ErrorKind::NotFound => {
            TunnelError::CommandFailed(errors::binary::not_found(&path))
        }
        std::io::ErrorKind::PermissionDenied => {
            TunnelError::CommandFailed(errors::binary::permission_denied(&path))
        }
        _ => TunnelError::CommandFailed(errors::process::spawn_failed(&e.to_string())),
    }
}

pub struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

#[async_trait]
impl TunnelProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    #[cfg(unix)]
    fn interrupt(&mut self) -> Result<()> {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        // Already reaped; nothing to signal.
        let Some(pid) = self.child.id() else {
            return Ok(());
        };

        signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT).map_err(|e| {
            TunnelError::CommandFailed(errors::process::interrupt_failed(
                &pid.to_string(),
                &e.to_string(),
            ))
        })
    }

    #[cfg(not(unix))]
    fn interrupt(&mut self) -> Result<()> {
        self.child.start_kill()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
}

pub struct SupervisedProcess {
    pid: Option<ProcessId>,
    started_at: Timestamp,
    interrupt_token: CancellationToken,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl SupervisedProcess {
    pub fn start(mut process: Box<dyn TunnelProcess>) -> Self {
        let pid = process.id().map(ProcessId::from);
        let interrupt_token = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(None);

        let monitor_token = interrupt_token.clone();
        let monitor_task = tokio::spawn(async move {
            let mut interrupted = false;
            loop {
                tokio::select! {
                    _ = monitor_token.cancelled(), if !interrupted => {
                        interrupted = true;
                        tracing::info!("Sending interrupt to tunnel process {:?}", pid);
                        if let Err(e) = process.interrupt() {
                            tracing::warn!("{}", e);
                        }
                    }
                    result = process.wait() => {
                        let code = match result {
                            Ok(code) => code,
                            Err(e) => {
                                tracing::error!(
                                    "Error waiting for tunnel process {:?}: {}",
                                    pid,
                                    e
                                );
                                None
                            }
                        };
                        tracing::info!("Tunnel process {:?} exited (code: {:?})", pid, code);
                        exit_tx.send_replace(Some(ProcessExit { code }));
                        break;
                    }
                }
            }
        });

        if let Some(pid) = pid {
            tracing::info!("Started tunnel process with PID {}", pid);
        }

        Self {
            pid,
            started_at: Timestamp::now(),
            interrupt_token,
            exit_rx,
            monitor_task: Mutex::new(Some(monitor_task)),
        }
    }

    pub fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    pub async fn wait_for_exit(&self) -> Option<ProcessExit> {
        let mut rx = self.exit_rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(exit) => *exit,
            Err(_) => None,
        }
    }

    /// Interrupt the process if it is still running and give it up to
    /// `grace_period` to exit. Returns whether it exited in time; if it did
    /// not, the monitor is aborted, which kills the child on drop.
    pub async fn terminate(&self, grace_period: Duration) -> bool {
        if self.has_exited() {
            return true;
        }

        self.interrupt_token.cancel();

        match tokio::time::timeout(grace_period, self.wait_for_exit()).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(
                    "Tunnel process {:?} did not exit within {}, forcing kill",
                    self.pid,
                    humantime::format_duration(grace_period)
                );
                if let Ok(mut task) = self.monitor_task.lock()
                    && let Some(task) = task.take()
                {
                    task.abort();
                }
                false
            }
        }
    }
}

impl Drop for SupervisedProcess {
    fn drop(&mut self) {
        if let Ok(mut task) = self.monitor_task.lock()
            && let Some(task) = task.take()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{CallLog, MockProcess};

    #[tokio::test]
    async fn test_unsolicited_exit_is_published() {
        let log = CallLog::default();
        let (process, control) = MockProcess::new(4242, log.clone());
        let supervised = SupervisedProcess::start(Box::new(process));

        assert_eq!(supervised.pid(), Some(ProcessId::from(4242)));
        assert!(!supervised.has_exited());

        control.exit(Some(1));
        let exit = supervised.wait_for_exit().await;
        assert_eq!(exit, Some(ProcessExit { code: Some(1) }));
        assert!(supervised.has_exited());
        assert!(!log.contains("process interrupt"));
    }

    #[tokio::test]
    async fn test_terminate_interrupts_running_process() {
        let log = CallLog::default();
        let (process, _control) = MockProcess::new(1, log.clone());
        let supervised = SupervisedProcess::start(Box::new(process));

        assert!(supervised.terminate(Duration::from_secs(1)).await);
        assert!(supervised.has_exited());
        assert_eq!(log.count("process interrupt"), 1);
    }

    #[tokio::test]
    async fn test_terminate_after_exit_is_noop() {
        let log = CallLog::default();
        let (process, control) = MockProcess::new(1, log.clone());
        let supervised = SupervisedProcess::start(Box::new(process));

        control.exit(Some(0));
        supervised.wait_for_exit().await;

        assert!(supervised.terminate(Duration::from_secs(1)).await);
        assert!(!log.contains("process interrupt"));
    }

    #[tokio::test]
    async fn test_terminate_gives_up_after_grace_period() {
        let log = CallLog::default();
        let (process, _control) = MockProcess::stubborn(1, log.clone());
        let supervised = SupervisedProcess::start(Box::new(process));

        assert!(!supervised.terminate(Duration::from_millis(20)).await);
        assert_eq!(log.count("process interrupt"), 1);
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_maps_error() {
        let err = spawn_tunnel_process(Path::new("/nonexistent/cloudflared"), &["tunnel"])
            .unwrap_err();
        assert!(err.to_string().contains("cloudflared binary not found"));
    }
}
