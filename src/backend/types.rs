use crate::constants::{CATCH_ALL_SERVICE, TUNNEL_CONFIG_FILE, default_credentials_dir};
use crate::errors::{self, Result, TunnelError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(u32);

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(SystemTime);

impl Timestamp {
    pub fn now() -> Self {
        Self(SystemTime::now())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", humantime::format_rfc3339_seconds(self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngressRule {
    pub hostname: String,
    pub service: String,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

impl IngressRule {
    pub fn new(hostname: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            service: service.into(),
            extra: serde_yaml::Mapping::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelFileConfig {
    #[serde(default)]
    pub cf_token: Option<String>,

    #[serde(default)]
    pub tunnel_name: Option<String>,

    #[serde(default)]
    pub cloudflared_config_dir: Option<PathBuf>,

    #[serde(default)]
    pub ingress: Vec<RawIngressRule>,

    #[serde(default)]
    pub remove_existing_tunnel: Option<bool>,

    #[serde(default)]
    pub remove_existing_dns: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawIngressRule {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

impl TunnelFileConfig {
    pub fn resolve(self, env_token: Option<String>) -> Result<TunnelSpec> {
        let auth_token = non_empty(self.cf_token)
            .or_else(|| non_empty(env_token))
            .ok_or_else(|| {
                TunnelError::Configuration(errors::config::MISSING_TOKEN.to_string())
            })?;

        let name = non_empty(self.tunnel_name).ok_or_else(|| {
            TunnelError::Configuration(errors::config::MISSING_NAME.to_string())
        })?;

        if self.ingress.is_empty() {
            return Err(TunnelError::Configuration(
                errors::config::MISSING_INGRESS.to_string(),
            ));
        }

        let ingress = self
            .ingress
            .into_iter()
            .enumerate()
            .map(|(index, raw)| {
                let hostname = non_empty(raw.hostname).ok_or_else(|| {
                    TunnelError::Configuration(errors::config::missing_hostname(index))
                })?;
                let service = non_empty(raw.service).ok_or_else(|| {
                    TunnelError::Configuration(errors::config::missing_service(index))
                })?;
                Ok(IngressRule {
                    hostname,
                    service,
                    extra: raw.extra,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(TunnelSpec {
            name,
            credentials_dir: self
                .cloudflared_config_dir
                .unwrap_or_else(default_credentials_dir),
            auth_token,
            ingress,
            remove_existing_tunnel: self.remove_existing_tunnel.unwrap_or(false),
            remove_existing_dns: self.remove_existing_dns.unwrap_or(false),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq)]
pub struct TunnelSpec {
    pub name: String,
    pub credentials_dir: PathBuf,
    pub auth_token: String,
    pub ingress: Vec<IngressRule>,
    pub remove_existing_tunnel: bool,
    pub remove_existing_dns: bool,
}

impl TunnelSpec {
    pub fn credentials_file(&self, tunnel_id: &str) -> PathBuf {
        credentials_file(&self.credentials_dir, tunnel_id)
    }

    pub fn config_path(&self) -> PathBuf {
        self.credentials_dir.join(TUNNEL_CONFIG_FILE)
    }
}

pub fn credentials_file(credentials_dir: &Path, tunnel_id: &str) -> PathBuf {
    credentials_dir.join(format!("{}.json", tunnel_id))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTunnelHandle {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecordHandle {
    pub zone_id: String,
    pub record_id: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ReconcileMode {
    #[strum(to_string = "pre-flight")]
    Preflight,
    #[strum(to_string = "forced")]
    Forced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelDescriptor {
    pub tunnel: String,
    #[serde(rename = "credentials-file")]
    pub credentials_file: PathBuf,
    pub ingress: Vec<DescriptorRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub service: String,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

impl DescriptorRule {
    pub fn catch_all() -> Self {
        Self {
            hostname: None,
            service: CATCH_ALL_SERVICE.to_string(),
            extra: serde_yaml::Mapping::new(),
        }
    }

    pub fn is_catch_all(&self) -> bool {
        self.hostname.is_none() && self.service == CATCH_ALL_SERVICE
    }
}

impl From<&IngressRule> for DescriptorRule {
    fn from(rule: &IngressRule) -> Self {
        Self {
            hostname: Some(rule.hostname.clone()),
            service: rule.service.clone(),
            extra: rule.extra.clone(),
        }
    }
}
