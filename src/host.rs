use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::PatchError;

/// Chromium cache directories the app keeps under its support directory.
pub const CACHE_DIRS: &[&str] = &[
    "Code Cache",
    "Cache",
    "GPUCache",
    "DawnGraphiteCache",
    "DawnWebGPUCache",
];

/// Default support directory of the app: `~/Library/Application Support/Codex`.
pub fn default_support_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join("Library").join("Application Support").join("Codex"))
}

/// Ad-hoc re-sign the bundle so the modified resources pass Gatekeeper.
pub async fn codesign(app: &Path) -> Result<(), PatchError> {
    let output = tokio::process::Command::new("codesign")
        .args(["--force", "--deep", "--sign", "-"])
        .arg(app)
        .output()
        .await
        .map_err(|e| PatchError::ExternalTool(format!("failed to run codesign: {}", e)))?;

    if !output.status.success() {
        return Err(PatchError::ExternalTool(format!(
            "codesign exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Remove each known cache directory under `support_dir`. Returns the number
/// of files removed. Removal failures are logged and ignored.
pub async fn clear_cache(support_dir: &Path) -> Result<usize> {
    let mut tasks = tokio::task::JoinSet::new();
    for name in CACHE_DIRS {
        let dir = support_dir.join(name);
        tasks.spawn(async move { remove_cache_dir(&dir).await });
    }

    let mut removed = 0;
    while let Some(result) = tasks.join_next().await {
        removed += result.context("Cache removal task panicked")??;
    }
    Ok(removed)
}

async fn remove_cache_dir(dir: &Path) -> Result<usize> {
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(0);
    }

    let walk_root = dir.to_path_buf();
    let files = tokio::task::spawn_blocking(move || count_files(&walk_root))
        .await
        .context("Cache scan task panicked")?;

    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            debug!("[cache] removed {} ({} files)", dir.display(), files);
            Ok(files)
        }
        Err(e) => {
            info!("[cache] could not remove {}: {}", dir.display(), e);
            Ok(0)
        }
    }
}

fn count_files(root: &Path) -> usize {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}
