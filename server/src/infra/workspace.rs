//! Filesystem infrastructure: implements `WorkspaceProvisioner`.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::application::ports::WorkspaceProvisioner;

/// Writes workspaces to the local filesystem with `tokio::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsWorkspaceProvisioner;

#[async_trait]
impl WorkspaceProvisioner for FsWorkspaceProvisioner {
    async fn provision(&self, path: &Path, files: &BTreeMap<String, String>) -> Result<()> {
        // Validate every target before touching the old tree.
        let planned = files
            .iter()
            .map(|(relative, content)| Ok((resolve(path, relative)?, content)))
            .collect::<Result<Vec<_>>>()?;

        clear(path).await?;
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("creating workspace {}", path.display()))?;

        for (target, content) in planned {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating directory {}", parent.display()))?;
            }
            tokio::fs::write(&target, content)
                .await
                .with_context(|| format!("writing file {}", target.display()))?;
        }

        tracing::debug!(path = %path.display(), files = files.len(), "workspace provisioned");
        Ok(())
    }
}

/// Join `relative` under `root`, rejecting anything that could escape it.
fn resolve(root: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    let normal = rel.components().all(|c| matches!(c, Component::Normal(_)));
    if relative.is_empty() || !normal {
        anyhow::bail!("invalid workspace file path '{relative}'");
    }
    Ok(root.join(rel))
}

/// Remove whatever is at `path`; absence is fine.
async fn clear(path: &Path) -> Result<()> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(e).with_context(|| format!("inspecting workspace {}", path.display()));
        }
    };
    let removed = if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match removed {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("clearing workspace {}", path.display())),
    }
}
