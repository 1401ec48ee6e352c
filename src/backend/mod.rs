pub mod cloudflare;
pub mod cloudflared;
pub mod config;
pub mod descriptor;
pub mod dns;
pub mod mock;
pub mod process;
pub mod runner;
pub mod shutdown;
pub mod tunnels;
pub mod types;

use crate::errors::Result;
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait TunnelTool: Send + Sync {
    async fn login(&self) -> Result<()>;

    async fn list(&self) -> Result<String>;

    async fn create(&self, name: &str) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;

    async fn route_dns(&self, name: &str, hostname: &str) -> Result<()>;

    async fn run(&self, name: &str, config_path: &Path) -> Result<Box<dyn TunnelProcess>>;
}

#[async_trait]
pub trait DnsApi: Send + Sync {
    async fn find_zone_id(&self, domain: &str) -> Result<Option<String>>;

    async fn find_record_id(&self, zone_id: &str, hostname: &str) -> Result<Option<String>>;

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<()>;
}

/// A running tunnel process.
///
/// `wait` must be cancel-safe: the supervisor drops and re-polls it when an
/// interrupt request arrives.
#[async_trait]
pub trait TunnelProcess: Send {
    fn id(&self) -> Option<u32>;

    async fn wait(&mut self) -> Result<Option<i32>>;

    fn interrupt(&mut self) -> Result<()>;
}
