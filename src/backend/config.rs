use crate::backend::types::TunnelFileConfig;
use crate::constants::CONFIG_FILE_CANDIDATES;
use crate::errors;
use anyhow::{Context, bail};
use std::path::{Path, PathBuf};
use tokio::fs;

pub fn discover_config_file(
    working_dir: &Path,
    explicit: Option<&Path>,
) -> anyhow::Result<PathBuf> {
    if let Some(explicit) = explicit {
        let path = if explicit.is_absolute() {
            explicit.to_path_buf()
        } else {
            working_dir.join(explicit)
        };
        if !path.is_file() {
            bail!(errors::config::not_found(&path.display().to_string()));
        }
        return Ok(path);
    }

    CONFIG_FILE_CANDIDATES
        .iter()
        .map(|name| working_dir.join(name))
        .find(|path| path.is_file())
        .with_context(|| errors::config::no_candidates(CONFIG_FILE_CANDIDATES))
}

pub fn parse_tunnel_file(contents: &str, extension: &str) -> anyhow::Result<TunnelFileConfig> {
    match extension {
        "yml" | "yaml" => Ok(serde_yaml::from_str(contents)?),
        "json" => Ok(serde_json::from_str(contents)?),
        other => bail!(errors::config::unsupported_format(other)),
    }
}

pub async fn load_tunnel_file(path: &Path) -> anyhow::Result<TunnelFileConfig> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    // Reject before reading so a stray `.js` config gets the format error.
    if !matches!(extension.as_str(), "yml" | "yaml" | "json") {
        bail!(errors::config::unsupported_format(&extension));
    }

    let contents = fs::read_to_string(path)
        .await
        .with_context(|| errors::config::failed_to_read(&path.display().to_string()))?;

    let config = parse_tunnel_file(&contents, &extension)
        .with_context(|| errors::config::failed_to_parse(&path.display().to_string()))?;

    tracing::info!("Loaded tunnel config from {}", path.display());
    Ok(config)
}

// Atomic write with temp file
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await?;

    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents).await?;

    #[cfg(unix)]
    {
        let file = fs::OpenOptions::new().write(true).open(&tmp_path).await?;
        file.sync_all().await?;
    }

    fs::rename(&tmp_path, path).await
}
