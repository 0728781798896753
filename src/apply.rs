use std::fs::OpenOptions;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::asar;
use crate::engine::{HitCounts, PatchSession};
use crate::error::{PatchError, Result};
use crate::manifest::{self, Manifest};
use crate::rules::ReplacementRule;
use crate::util;

/// Files touched by a run.
#[derive(Debug, Clone)]
pub struct PatchTarget {
    pub archive: PathBuf,
    pub manifest: PathBuf,
}

impl PatchTarget {
    /// Standard macOS bundle layout.
    pub fn for_app(app: &Path) -> Self {
        Self {
            archive: app.join("Contents").join("Resources").join("app.asar"),
            manifest: app.join("Contents").join("Info.plist"),
        }
    }

    pub fn check_exists(&self) -> Result<()> {
        if !self.archive.exists() {
            return Err(PatchError::ArchiveStructure(format!(
                "missing asar: {}",
                self.archive.display()
            )));
        }
        if !self.manifest.exists() {
            return Err(PatchError::ArchiveStructure(format!(
                "missing plist: {}",
                self.manifest.display()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PatchOptions {
    pub suffixes: Vec<String>,
    pub min_total_replacements: usize,
}

#[derive(Debug)]
pub struct DryRunSummary {
    pub hits: HitCounts,
    pub rules_total: usize,
    pub entries_scanned: usize,
}

#[derive(Debug)]
pub struct ApplySummary {
    pub hits: HitCounts,
    pub changed_paths: Vec<String>,
    pub header_hash: String,
}

impl ApplySummary {
    pub fn total_replacements(&self) -> usize {
        self.hits.total()
    }

    /// The minimum-hit gate of a mutating run. It runs after the archive has
    /// been written, so a dry run is the only way to catch a mismatch early.
    pub fn enforce_minimum(&self, min: usize) -> Result<()> {
        let total = self.total_replacements();
        if min > 0 && total < min {
            return Err(PatchError::LowHitCount { total, min });
        }
        Ok(())
    }
}

/// Count matches against a read-only mapping of the archive.
pub fn dry_run(
    target: &PatchTarget,
    rules: &[ReplacementRule],
    options: &PatchOptions,
) -> Result<DryRunSummary> {
    target.check_exists()?;

    let mut reader = Cursor::new(util::mmap_file(&target.archive)?);
    let mut session = PatchSession::open(&mut reader, &target.archive, rules, &options.suffixes)?;
    let entries_scanned = session.entries().len();
    debug!("[scan] {} eligible entries", entries_scanned);

    let outcome = session
        .dry_run(&mut reader, options.min_total_replacements)
        .map(|_| ());
    let hits = session.hits().clone();
    if outcome.is_err() {
        info!(
            "[dry-run] total hits: {}, matched rules: {}/{}",
            hits.total(),
            hits.matched(),
            rules.len()
        );
    }
    outcome?;

    Ok(DryRunSummary {
        hits,
        rules_total: rules.len(),
        entries_scanned,
    })
}

/// Patch the archive in place, then record the new header hash in the manifest.
///
/// Every entry rewrite and the new header are computed and validated, and the
/// manifest shape is checked, before the first byte is written.
pub fn apply_patch(
    target: &PatchTarget,
    rules: &[ReplacementRule],
    options: &PatchOptions,
) -> Result<ApplySummary> {
    target.check_exists()?;

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&target.archive)
        .map_err(|e| PatchError::io(&target.archive, e))?;

    let session = PatchSession::open(&mut file, &target.archive, rules, &options.suffixes)?;
    debug!("[scan] {} eligible entries", session.entries().len());
    let prepared = session.prepare(&mut file)?;
    let mut manifest = Manifest::load(&target.manifest)?;

    prepared.commit(&mut file)?;
    file.sync_all()
        .map_err(|e| PatchError::io(&target.archive, e))?;
    drop(file);
    info!(
        "[patch] wrote {} entries and header of {} bytes",
        prepared.writes.len(),
        prepared.header_bytes.len()
    );

    // Hash what is on disk now, not what we meant to write.
    let mut reader = std::fs::File::open(&target.archive)
        .map_err(|e| PatchError::io(&target.archive, e))?;
    let (_, header_bytes) = asar::read_raw(&mut reader)?;
    let header_hash = manifest::header_hash(&header_bytes);
    debug!("[plist] previous hash = {}", manifest.header_hash()?);
    manifest.set_header_hash(&header_hash)?;
    manifest.save()?;
    info!("[plist] {} hash = {}", manifest::ARCHIVE_KEY, header_hash);

    Ok(ApplySummary {
        changed_paths: prepared.changed_paths(),
        hits: prepared.hits,
        header_hash,
    })
}
