use std::path::PathBuf;
use std::time::Duration;

pub const APP_TITLE: &str = "cf-tunnel";

pub const CLOUDFLARED_BINARY: &str = "cloudflared";
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";
pub const API_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const TOKEN_ENV_VAR: &str = "CF_TOKEN";
pub const MOCK_ENV_VAR: &str = "CF_TUNNEL_MOCK";

pub const TUNNEL_CONFIG_FILE: &str = "config.yml";
pub const ORIGIN_CERT_FILE: &str = "cert.pem";
pub const CATCH_ALL_SERVICE: &str = "http_status:404";

pub const CONFIG_FILE_CANDIDATES: &[&str] = &[
    "tunnel.config.yml",
    "tunnel.config.yaml",
    "tunnel.config.json",
];

/// How long cloudflared gets to close its edge connections before teardown
/// starts deleting the tunnel underneath it.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(2);

pub fn default_log_directory() -> PathBuf {
    PathBuf::from(".").join("logs")
}

/// Where cloudflared keeps `cert.pem` and per-tunnel credentials on this OS.
pub fn default_credentials_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    if cfg!(target_os = "windows") {
        home.join("AppData").join("Local").join("cloudflared")
    } else if cfg!(target_os = "macos") {
        home.join("Library")
            .join("Application Support")
            .join("cloudflared")
    } else {
        home.join(".cloudflared")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_credentials_dir_ends_with_cloudflared() {
        let dir = default_credentials_dir();
        let last = dir.file_name().and_then(|s| s.to_str()).unwrap();
        assert!(last == "cloudflared" || last == ".cloudflared");
    }
}
