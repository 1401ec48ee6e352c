// cf-tunnel
// Entry point: load the tunnel config, provision, run cloudflared, clean up.

use anyhow::{Context, Result};
use cf_tunnel::backend::cloudflare::CloudflareApi;
use cf_tunnel::backend::cloudflared::Cloudflared;
use cf_tunnel::backend::config::{discover_config_file, load_tunnel_file};
use cf_tunnel::backend::dns::registrable_domain;
use cf_tunnel::backend::mock::{CallLog, MockDnsApi, MockTunnelTool};
use cf_tunnel::backend::runner::TunnelRunner;
use cf_tunnel::backend::types::TunnelSpec;
use cf_tunnel::backend::{DnsApi, TunnelTool};
use cf_tunnel::constants::{
    APP_TITLE, CLOUDFLARED_BINARY, MOCK_ENV_VAR, TOKEN_ENV_VAR, default_log_directory,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "cf-tunnel", version)]
#[command(about = "Provision a Cloudflare tunnel, run cloudflared, and tear it down on exit")]
struct Args {
    #[arg(short, long, help = "Path to the tunnel config file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Path to the cloudflared binary")]
    cloudflared_path: Option<PathBuf>,

    #[arg(long, help = "Write JSON logs to stdout")]
    json_logs: bool,
}

fn setup_tracing(json_logs: bool) -> Result<()> {
    let log_directory = default_log_directory();
    std::fs::create_dir_all(&log_directory).context("Failed to create log directory")?;

    let file_appender = tracing_appender::rolling::daily(&log_directory, "cf-tunnel.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(non_blocking).json())
            .with(fmt::layer().json().with_writer(std::io::stdout))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(non_blocking).json())
            .with(fmt::layer().pretty().with_writer(std::io::stdout))
            .init();
    }

    std::mem::forget(_guard);

    Ok(())
}

fn mock_backends(spec: &TunnelSpec) -> (Arc<dyn TunnelTool>, Arc<dyn DnsApi>) {
    let log = CallLog::default();
    let mut dns = MockDnsApi::new(log.clone());
    for (index, rule) in spec.ingress.iter().enumerate() {
        dns = dns.with_zone(
            &registrable_domain(&rule.hostname),
            &format!("mock-zone-{}", index),
        );
    }
    (Arc::new(MockTunnelTool::new(log)), Arc::new(dns))
}

fn main() -> Result<()> {
    let args = Args::parse();

    setup_tracing(args.json_logs).context("Failed to initialize tracing")?;

    tracing::info!("{} starting", APP_TITLE);

    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    let working_dir = std::env::current_dir().context("Failed to read working directory")?;
    let config_path = discover_config_file(&working_dir, args.config.as_deref())?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    let file_config = runtime.block_on(load_tunnel_file(&config_path))?;
    let mut spec = file_config
        .resolve(std::env::var(TOKEN_ENV_VAR).ok())
        .with_context(|| format!("Invalid tunnel config {}", config_path.display()))?;

    let use_mock = std::env::var(MOCK_ENV_VAR).is_ok();

    let (tool, dns): (Arc<dyn TunnelTool>, Arc<dyn DnsApi>) = if use_mock {
        tracing::info!("Running in MOCK mode - no processes spawned, no API calls made");
        spec.credentials_dir = std::env::temp_dir().join("cf-tunnel-mock");
        mock_backends(&spec)
    } else {
        let binary_path = args
            .cloudflared_path
            .unwrap_or_else(|| PathBuf::from(CLOUDFLARED_BINARY));
        tracing::info!("cloudflared: {}", binary_path.display());
        (
            Arc::new(Cloudflared::new(binary_path)),
            Arc::new(CloudflareApi::new(spec.auth_token.clone())?),
        )
    };

    tracing::info!(
        "Tunnel '{}' with {} ingress rule(s), credentials in {}",
        spec.name,
        spec.ingress.len(),
        spec.credentials_dir.display()
    );

    let runner = TunnelRunner::new(tool, dns);
    let report = runtime.block_on(runner.run(&spec)).map_err(|e| {
        tracing::error!("{}", e);
        e
    })?;

    tracing::info!("Tunnel '{}' stopped after {}", spec.name, report.reason);
    for warning in &report.warnings {
        tracing::warn!("Cleanup warning: {}", warning);
    }

    Ok(())
}
