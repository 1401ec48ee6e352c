use crate::backend::config::write_atomic;
use crate::backend::types::{DescriptorRule, RemoteTunnelHandle, TunnelDescriptor, TunnelSpec};
use crate::errors::{self, Result};
use std::path::{Path, PathBuf};

pub fn render(spec: &TunnelSpec, handle: &RemoteTunnelHandle) -> TunnelDescriptor {
    let mut ingress: Vec<DescriptorRule> = spec.ingress.iter().map(DescriptorRule::from).collect();
    ingress.push(DescriptorRule::catch_all());

    TunnelDescriptor {
        tunnel: spec.name.clone(),
        credentials_file: spec.credentials_file(&handle.id),
        ingress,
    }
}

pub async fn write(spec: &TunnelSpec, handle: &RemoteTunnelHandle) -> Result<PathBuf> {
    let descriptor = render(spec, handle);
    let yaml = serde_yaml::to_string(&descriptor)?;

    let path = spec.config_path();
    write_atomic(&path, yaml.as_bytes()).await?;

    tracing::info!(
        "Wrote tunnel config {} ({} ingress rules)",
        path.display(),
        descriptor.ingress.len()
    );
    Ok(path)
}

pub async fn remove(path: &Path) -> Option<String> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::info!("Removed tunnel config {}", path.display());
            None
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            let warning =
                errors::config::failed_to_remove(&path.display().to_string(), &e.to_string());
            tracing::warn!("{}", warning);
            Some(warning)
        }
    }
}
