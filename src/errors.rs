use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Tunnel config missing: {0}")]
    Configuration(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Provision(String),

    #[error("cloudflared command failed: {0}")]
    CommandFailed(String),

    #[error("Cloudflare API error: {0}")]
    Api(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, TunnelError::Conflict(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, TunnelError::Configuration(_))
    }

    pub fn is_provision(&self) -> bool {
        matches!(self, TunnelError::Provision(_))
    }
}

pub type Result<T> = std::result::Result<T, TunnelError>;

pub mod tunnel {
    pub fn already_exists(name: &str) -> String {
        format!(
            "Tunnel \"{}\" already exists. Set removeExistingTunnel: true to replace it.",
            name
        )
    }

    pub fn create_failed(name: &str, error: &str) -> String {
        format!("Failed to create tunnel \"{}\": {}", name, error)
    }

    pub fn id_not_resolved(name: &str) -> String {
        format!(
            "Tunnel \"{}\" was created but does not appear in `cloudflared tunnel list`",
            name
        )
    }

    pub fn delete_failed(id: &str, error: &str) -> String {
        format!("Failed to delete tunnel {}: {}", id, error)
    }

    pub fn lookup_failed(name: &str, error: &str) -> String {
        format!("Failed to look up tunnel \"{}\": {}", name, error)
    }

    pub fn credentials_not_removed(path: &str, error: &str) -> String {
        format!("Failed to remove tunnel credentials {}: {}", path, error)
    }
}

pub mod dns {
    pub fn already_exists(hostname: &str) -> String {
        format!(
            "DNS record for \"{}\" already exists. Set removeExistingDns: true to replace it.",
            hostname
        )
    }

    /// The tunnel itself stays registered; nothing rolls it back.
    pub fn route_failed(name: &str, hostname: &str, error: &str) -> String {
        format!(
            "Failed to route {} to tunnel \"{}\": {}. The tunnel was left in place; remove it with `cloudflared tunnel delete {}`.",
            hostname, name, error, name
        )
    }

    pub fn zone_not_found(domain: &str, hostname: &str) -> String {
        format!("No zone found for {}, skipping DNS for {}", domain, hostname)
    }

    pub fn lookup_failed(hostname: &str, error: &str) -> String {
        format!("Failed to look up DNS record for {}: {}", hostname, error)
    }

    pub fn delete_failed(hostname: &str, error: &str) -> String {
        format!("Failed to delete DNS record for {}: {}", hostname, error)
    }
}

pub mod config {
    pub const MISSING_TOKEN: &str = "cfToken";
    pub const MISSING_NAME: &str = "tunnelName";
    pub const MISSING_INGRESS: &str = "ingress";

    pub fn missing_hostname(index: usize) -> String {
        format!("ingress[{}].hostname", index)
    }

    pub fn missing_service(index: usize) -> String {
        format!("ingress[{}].service", index)
    }

    pub fn unsupported_format(ext: &str) -> String {
        format!("Unsupported config file type: {}", ext)
    }

    pub fn not_found(path: &str) -> String {
        format!("Config file {} does not exist", path)
    }

    pub fn no_candidates(candidates: &[&str]) -> String {
        format!("No config file found. Looked for: {}", candidates.join(", "))
    }

    pub fn failed_to_read(path: &str) -> String {
        format!("Failed to read config from {}", path)
    }

    pub fn failed_to_parse(path: &str) -> String {
        format!("Failed to parse config at {}", path)
    }

    pub fn failed_to_remove(path: &str, error: &str) -> String {
        format!("Failed to remove {}: {}", path, error)
    }
}

pub mod binary {
    pub fn not_found(path: &str) -> String {
        format!(
            "cloudflared binary not found at {}. Install cloudflared or use the --cloudflared-path flag.",
            path
        )
    }

    pub fn permission_denied(path: &str) -> String {
        format!(
            "Permission denied executing cloudflared at {}. Check file permissions.",
            path
        )
    }
}

pub mod process {
    pub fn spawn_failed(error: &str) -> String {
        format!("Failed to spawn cloudflared: {}", error)
    }

    pub fn exited_with(args: &str, code: Option<i32>, stderr: &str) -> String {
        match code {
            Some(code) => format!(
                "`cloudflared {}` exited with {}: {}",
                args,
                code,
                stderr.trim()
            ),
            None => format!("`cloudflared {}` was terminated: {}", args, stderr.trim()),
        }
    }

    pub fn interrupt_failed(pid: &str, error: &str) -> String {
        format!("Failed to interrupt cloudflared (pid {}): {}", pid, error)
    }
}
