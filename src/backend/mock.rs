use crate::backend::process::ProcessExit;
use crate::backend::{DnsApi, TunnelProcess, TunnelTool};
use crate::errors::{Result, TunnelError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn record(&self, entry: impl Into<String>) {
        let entry = entry.into();
        tracing::debug!("MOCK: {}", entry);
        lock(&self.0).push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.0)
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.count(prefix) > 0
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        lock(&self.0).iter().position(|e| e.starts_with(prefix))
    }
}

#[derive(Default)]
struct ToolState {
    tunnels: Vec<(String, String)>,
    next_id: u32,
    fail_create: bool,
    fail_list: bool,
    fail_delete: bool,
    failing_routes: HashSet<String>,
    processes: Vec<ProcessControl>,
}

pub struct MockTunnelTool {
    log: CallLog,
    state: Mutex<ToolState>,
}

impl MockTunnelTool {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            state: Mutex::new(ToolState::default()),
        }
    }

    pub fn with_tunnel(self, id: &str, name: &str) -> Self {
        lock(&self.state)
            .tunnels
            .push((id.to_string(), name.to_string()));
        self
    }

    pub fn failing_create(self) -> Self {
        lock(&self.state).fail_create = true;
        self
    }

    pub fn failing_route(self, hostname: &str) -> Self {
        lock(&self.state).failing_routes.insert(hostname.to_string());
        self
    }

    pub fn failing_list(self) -> Self {
        lock(&self.state).fail_list = true;
        self
    }

    pub fn failing_delete(self) -> Self {
        lock(&self.state).fail_delete = true;
        self
    }

    pub fn tunnel_names(&self) -> Vec<String> {
        lock(&self.state)
            .tunnels
            .iter()
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn last_process(&self) -> Option<ProcessControl> {
        lock(&self.state).processes.last().cloned()
    }
}

#[async_trait]
impl TunnelTool for MockTunnelTool {
    async fn login(&self) -> Result<()> {
        self.log.record("tunnel login");
        Ok(())
    }

    async fn list(&self) -> Result<String> {
        self.log.record("tunnel list");
        let state = lock(&self.state);
        if state.fail_list {
            return Err(TunnelError::CommandFailed("mock list failure".to_string()));
        }

        let mut listing = String::from("ID NAME CREATED CONNECTIONS\n");
        for (id, name) in &state.tunnels {
            listing.push_str(&format!("{} {} 2024-01-01T00:00:00Z\n", id, name));
        }
        Ok(listing)
    }

    async fn create(&self, name: &str) -> Result<()> {
        self.log.record(format!("tunnel create {}", name));
        let mut state = lock(&self.state);
        if state.fail_create {
            return Err(TunnelError::CommandFailed("mock create failure".to_string()));
        }
        if state.tunnels.iter().any(|(_, n)| n == name) {
            return Err(TunnelError::CommandFailed(format!(
                "tunnel with name {} already exists",
                name
            )));
        }

        state.next_id += 1;
        let id = format!("mock-{:04}", state.next_id);
        state.tunnels.push((id, name.to_string()));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.log.record(format!("tunnel delete {}", id));
        let mut state = lock(&self.state);
        if state.fail_delete {
            return Err(TunnelError::CommandFailed("mock delete failure".to_string()));
        }

        let before = state.tunnels.len();
        state.tunnels.retain(|(tunnel_id, _)| tunnel_id != id);
        if state.tunnels.len() == before {
            return Err(TunnelError::CommandFailed(format!("no tunnel with id {}", id)));
        }
        Ok(())
    }

    async fn route_dns(&self, name: &str, hostname: &str) -> Result<()> {
        self.log.record(format!("tunnel route dns {} {}", name, hostname));
        if lock(&self.state).failing_routes.contains(hostname) {
            return Err(TunnelError::CommandFailed(format!(
                "mock route failure for {}",
                hostname
            )));
        }
        Ok(())
    }

    async fn run(&self, name: &str, _config_path: &Path) -> Result<Box<dyn TunnelProcess>> {
        self.log.record(format!("tunnel run {}", name));
        let mut state = lock(&self.state);
        let pid = 10_000 + state.processes.len() as u32;
        let (process, control) = MockProcess::new(pid, self.log.clone());
        state.processes.push(control);
        Ok(Box::new(process))
    }
}

#[derive(Debug, Clone)]
pub struct ProcessControl {
    exit_tx: Arc<watch::Sender<Option<ProcessExit>>>,
}

impl ProcessControl {
    pub fn exit(&self, code: Option<i32>) {
        self.exit_tx.send_replace(Some(ProcessExit { code }));
    }
}

pub struct MockProcess {
    pid: u32,
    log: CallLog,
    honors_interrupt: bool,
    exit_tx: Arc<watch::Sender<Option<ProcessExit>>>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

impl MockProcess {
    pub fn new(pid: u32, log: CallLog) -> (Self, ProcessControl) {
        Self::build(pid, log, true)
    }

    pub fn stubborn(pid: u32, log: CallLog) -> (Self, ProcessControl) {
        Self::build(pid, log, false)
    }

    fn build(pid: u32, log: CallLog, honors_interrupt: bool) -> (Self, ProcessControl) {
        let (exit_tx, exit_rx) = watch::channel(None);
        let exit_tx = Arc::new(exit_tx);
        let control = ProcessControl {
            exit_tx: exit_tx.clone(),
        };
        (
            Self {
                pid,
                log,
                honors_interrupt,
                exit_tx,
                exit_rx,
            },
            control,
        )
    }
}

#[async_trait]
impl TunnelProcess for MockProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        match self.exit_rx.wait_for(Option::is_some).await {
            Ok(exit) => Ok((*exit).and_then(|e| e.code)),
            Err(_) => Ok(None),
        }
    }

    fn interrupt(&mut self) -> Result<()> {
        self.log.record("process interrupt");
        if self.honors_interrupt {
            self.exit_tx.send_replace(Some(ProcessExit { code: Some(0) }));
        }
        Ok(())
    }
}

#[derive(Default)]
struct DnsState {
    zones: HashMap<String, String>,
    records: Vec<(String, String, String)>,
    failing_lookups: HashSet<String>,
    failing_deletes: HashSet<String>,
}

pub struct MockDnsApi {
    log: CallLog,
    state: Mutex<DnsState>,
}

impl MockDnsApi {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            state: Mutex::new(DnsState::default()),
        }
    }

    pub fn with_zone(self, domain: &str, zone_id: &str) -> Self {
        lock(&self.state)
            .zones
            .insert(domain.to_string(), zone_id.to_string());
        self
    }

    pub fn with_record(self, zone_id: &str, hostname: &str, record_id: &str) -> Self {
        lock(&self.state).records.push((
            zone_id.to_string(),
            hostname.to_string(),
            record_id.to_string(),
        ));
        self
    }

    pub fn failing_lookup(self, hostname: &str) -> Self {
        lock(&self.state)
            .failing_lookups
            .insert(hostname.to_string());
        self
    }

    pub fn failing_delete(self, record_id: &str) -> Self {
        lock(&self.state)
            .failing_deletes
            .insert(record_id.to_string());
        self
    }

    pub fn record_ids(&self) -> Vec<String> {
        lock(&self.state)
            .records
            .iter()
            .map(|(_, _, id)| id.clone())
            .collect()
    }
}

#[async_trait]
impl DnsApi for MockDnsApi {
    async fn find_zone_id(&self, domain: &str) -> Result<Option<String>> {
        self.log.record(format!("zone lookup {}", domain));
        Ok(lock(&self.state).zones.get(domain).cloned())
    }

    async fn find_record_id(&self, zone_id: &str, hostname: &str) -> Result<Option<String>> {
        self.log.record(format!("dns lookup {}", hostname));
        let state = lock(&self.state);
        if state.failing_lookups.contains(hostname) {
            return Err(TunnelError::Api(format!("mock lookup failure for {}", hostname)));
        }
        Ok(state
            .records
            .iter()
            .find(|(zone, host, _)| zone == zone_id && host == hostname)
            .map(|(_, _, id)| id.clone()))
    }

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<()> {
        self.log.record(format!("dns delete {}", record_id));
        let mut state = lock(&self.state);
        if state.failing_deletes.contains(record_id) {
            return Err(TunnelError::Api(format!("mock delete failure for {}", record_id)));
        }
        state
            .records
            .retain(|(zone, _, id)| !(zone == zone_id && id == record_id));
        Ok(())
    }
}
