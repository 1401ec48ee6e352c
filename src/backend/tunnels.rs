use crate::backend::TunnelTool;
use crate::backend::types::{ReconcileMode, RemoteTunnelHandle, TunnelSpec, credentials_file};
use crate::errors::{self, Result, TunnelError};
use std::path::Path;

/// Find a tunnel id in `cloudflared tunnel list` output.
///
/// The first line that contains `name` anywhere wins and its first
/// whitespace-separated token is the id. This is a substring match, so a
/// tunnel named `api` also matches a line for `api-staging` that comes first.
pub fn find_tunnel_id(listing: &str, name: &str) -> Option<String> {
    listing
        .lines()
        .find(|line| line.contains(name))
        .and_then(|line| line.split_whitespace().next())
        .map(str::to_string)
}

pub struct TunnelReconciler<'a> {
    tool: &'a dyn TunnelTool,
    credentials_dir: &'a Path,
}

impl<'a> TunnelReconciler<'a> {
    pub fn new(tool: &'a dyn TunnelTool, credentials_dir: &'a Path) -> Self {
        Self {
            tool,
            credentials_dir,
        }
    }

    pub async fn lookup(&self, name: &str) -> Result<Option<RemoteTunnelHandle>> {
        let listing = self.tool.list().await?;
        Ok(find_tunnel_id(&listing, name).map(|id| RemoteTunnelHandle {
            id,
            name: name.to_string(),
        }))
    }

    pub async fn inspect(&self, spec: &TunnelSpec) -> Result<Option<RemoteTunnelHandle>> {
        let Some(existing) = self.lookup(&spec.name).await? else {
            tracing::debug!("No existing tunnel named '{}'", spec.name);
            return Ok(None);
        };

        if !spec.remove_existing_tunnel {
            return Err(TunnelError::Conflict(errors::tunnel::already_exists(
                &spec.name,
            )));
        }

        tracing::info!(
            "Tunnel '{}' already exists ({}), it will be replaced",
            existing.name,
            existing.id
        );
        Ok(Some(existing))
    }

    pub async fn remove(&self, handle: &RemoteTunnelHandle) -> Result<Vec<String>> {
        tracing::info!("Deleting tunnel '{}' ({})", handle.name, handle.id);
        self.tool.delete(&handle.id).await?;
        Ok(self.remove_credentials(&handle.id).await.into_iter().collect())
    }

    async fn remove_credentials(&self, tunnel_id: &str) -> Option<String> {
        let path = credentials_file(self.credentials_dir, tunnel_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!("Removed tunnel credentials {}", path.display());
                None
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                let warning = errors::tunnel::credentials_not_removed(
                    &path.display().to_string(),
                    &e.to_string(),
                );
                tracing::warn!("{}", warning);
                Some(warning)
            }
        }
    }

    pub async fn teardown(&self, name: &str) -> Vec<String> {
        let mode = ReconcileMode::Forced;
        let existing = match self.lookup(name).await {
            Ok(Some(existing)) => existing,
            Ok(None) => {
                tracing::debug!("{} teardown: tunnel '{}' already gone", mode, name);
                return Vec::new();
            }
            Err(e) => {
                let warning = errors::tunnel::lookup_failed(name, &e.to_string());
                tracing::warn!("{}", warning);
                return vec![warning];
            }
        };

        match self.remove(&existing).await {
            Ok(warnings) => warnings,
            Err(e) => {
                let warning = errors::tunnel::delete_failed(&existing.id, &e.to_string());
                tracing::warn!("{}", warning);
                vec![warning]
            }
        }
    }
}

pub async fn provision(tool: &dyn TunnelTool, spec: &TunnelSpec) -> Result<RemoteTunnelHandle> {
    tracing::info!("Creating tunnel '{}'", spec.name);
    tool.create(&spec.name).await.map_err(|e| {
        TunnelError::Provision(errors::tunnel::create_failed(&spec.name, &e.to_string()))
    })?;

    for rule in &spec.ingress {
        tracing::info!("Routing {} to tunnel '{}'", rule.hostname, spec.name);
        tool.route_dns(&spec.name, &rule.hostname)
            .await
            .map_err(|e| {
                TunnelError::Provision(errors::dns::route_failed(
                    &spec.name,
                    &rule.hostname,
                    &e.to_string(),
                ))
            })?;
    }

    let listing = tool.list().await.map_err(|e| {
        TunnelError::Provision(errors::tunnel::lookup_failed(&spec.name, &e.to_string()))
    })?;
    let id = find_tunnel_id(&listing, &spec.name)
        .ok_or_else(|| TunnelError::Provision(errors::tunnel::id_not_resolved(&spec.name)))?;

    tracing::info!("Tunnel '{}' has id {}", spec.name, id);
    Ok(RemoteTunnelHandle {
        id,
        name: spec.name.clone(),
    })
}
