use anyhow::{bail, Context, Result};
use memmap2::Mmap;
use std::path::{Path, PathBuf};

use crate::error::PatchError;

/// Memory-map a file for read-only access.
///
/// # Safety
/// The mapping is read-only. Callers must not concurrently truncate or replace
/// the underlying file while the `Mmap` is live.
pub fn mmap_file(path: &Path) -> crate::error::Result<Mmap> {
    let file = std::fs::File::open(path).map_err(|e| PatchError::io(path, e))?;
    // SAFETY: We only read from this mapping; dry runs never write the archive.
    unsafe { Mmap::map(&file).map_err(|e| PatchError::io(path, e)) }
}

/// Stream-hash a file using BLAKE3.
/// Uses a 256 KB BufReader to reduce syscall overhead vs the default 8 KB.
pub fn hash_file_streaming(path: &Path) -> Result<blake3::Hash> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;
    let mut reader = std::io::BufReader::with_capacity(256 * 1024, file);
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut reader, &mut hasher)
        .with_context(|| format!("Failed to hash file: {}", path.display()))?;
    Ok(hasher.finalize())
}

/// Local timestamp used in backup file names.
pub fn now_stamp() -> String {
    chrono::Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// `<path>.bak.<stamp>`, keeping the original extension in front.
pub fn backup_path(path: &Path, stamp: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".bak.{}", stamp));
    PathBuf::from(name)
}

/// Copy `path` next to itself as a timestamped backup and check the copy
/// hashes the same as the source.
pub fn backup_file(path: &Path, stamp: &str) -> Result<PathBuf> {
    let backup = backup_path(path, stamp);
    std::fs::copy(path, &backup).with_context(|| {
        format!(
            "Failed to back up {} to {}",
            path.display(),
            backup.display()
        )
    })?;

    if hash_file_streaming(path)? != hash_file_streaming(&backup)? {
        bail!("Backup verification failed: {}", backup.display());
    }
    Ok(backup)
}
