//! Length-preserving patch engine.
//!
//! Patching runs in two phases. [`PatchSession::prepare`] reads every eligible
//! entry, applies the rules in memory, recomputes integrity metadata and
//! re-serializes the header, checking every length invariant on the way.
//! [`PreparedPatch::commit`] then performs the writes. Nothing touches the
//! archive until the whole patch has been validated.

use memchr::memmem;
use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::asar::{ArchiveHeader, PROLOGUE_LEN};
use crate::error::{PatchError, Result};
use crate::integrity::IntegrityBlock;
use crate::locate::{locate_entries, Entry};
use crate::rules::ReplacementRule;

/// Replacement counts keyed by rule label.
#[derive(Debug, Clone, Default)]
pub struct HitCounts {
    counts: BTreeMap<String, usize>,
}

impl HitCounts {
    pub fn new(rules: &[ReplacementRule]) -> Self {
        Self {
            counts: rules.iter().map(|r| (r.label.clone(), 0)).collect(),
        }
    }

    /// Fold one entry's per-rule counts (indexed like `rules`) into the totals.
    pub fn absorb(&mut self, rules: &[ReplacementRule], hits: &[usize]) {
        for (rule, &n) in rules.iter().zip(hits) {
            *self.counts.entry(rule.label.clone()).or_default() += n;
        }
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Number of labels with at least one hit.
    pub fn matched(&self) -> usize {
        self.counts.values().filter(|&&n| n > 0).count()
    }

    /// Labels with hits, most hits first.
    pub fn ranked(&self) -> Vec<(&str, usize)> {
        let mut ranked: Vec<(&str, usize)> = self
            .counts
            .iter()
            .filter(|(_, &n)| n > 0)
            .map(|(label, &n)| (label.as_str(), n))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }
}

/// Non-overlapping occurrences of each rule's `old` bytes in `data`.
pub fn count_matches(data: &[u8], rules: &[ReplacementRule]) -> Vec<usize> {
    rules
        .iter()
        .map(|rule| memmem::find_iter(data, &rule.old).count())
        .collect()
}

/// Result of running the rules over one entry.
#[derive(Debug)]
pub struct Replaced {
    pub bytes: Vec<u8>,
    pub hits: Vec<usize>,
}

impl Replaced {
    pub fn changed(&self) -> bool {
        self.hits.iter().any(|&n| n > 0)
    }
}

/// Apply `rules` in order. Each rule sees the output of the previous one.
pub fn replace_all(data: &[u8], rules: &[ReplacementRule]) -> Replaced {
    let mut bytes = data.to_vec();
    let mut hits = Vec::with_capacity(rules.len());

    for rule in rules {
        let positions: Vec<usize> = memmem::find_iter(&bytes, &rule.old).collect();
        for &pos in &positions {
            bytes[pos..pos + rule.new.len()].copy_from_slice(&rule.new);
        }
        hits.push(positions.len());
    }

    Replaced { bytes, hits }
}

/// New content for one entry, to be written at `offset`.
#[derive(Debug)]
pub struct EntryWrite {
    pub path: String,
    pub offset: u64,
    pub bytes: Vec<u8>,
}

/// A fully validated patch, ready to be written.
#[derive(Debug)]
pub struct PreparedPatch {
    archive: PathBuf,
    pub writes: Vec<EntryWrite>,
    pub header_bytes: Vec<u8>,
    pub hits: HitCounts,
}

impl PreparedPatch {
    pub fn changed_paths(&self) -> Vec<String> {
        self.writes.iter().map(|w| w.path.clone()).collect()
    }

    /// Write every changed entry in place, then the header right after the prologue.
    pub fn commit<W: Write + Seek>(&self, out: &mut W) -> Result<()> {
        let io = |e| PatchError::io(&self.archive, e);

        for write in &self.writes {
            out.seek(SeekFrom::Start(write.offset)).map_err(io)?;
            out.write_all(&write.bytes).map_err(io)?;
        }
        out.seek(SeekFrom::Start(PROLOGUE_LEN as u64)).map_err(io)?;
        out.write_all(&self.header_bytes).map_err(io)?;
        out.flush().map_err(io)?;
        Ok(())
    }
}

/// State of one patch run over an archive.
pub struct PatchSession<'a> {
    archive: PathBuf,
    header: ArchiveHeader,
    entries: Vec<Entry>,
    rules: &'a [ReplacementRule],
    hits: HitCounts,
}

impl<'a> PatchSession<'a> {
    /// Parse the header of `reader` and locate the entries to patch.
    /// `archive` only names the source in errors.
    pub fn open<R: Read + Seek>(
        reader: &mut R,
        archive: &Path,
        rules: &'a [ReplacementRule],
        suffixes: &[String],
    ) -> Result<Self> {
        let header = ArchiveHeader::read_from(reader)?;
        let file_len = reader
            .seek(SeekFrom::End(0))
            .map_err(|e| PatchError::io(archive, e))?;

        let entries = locate_entries(&header, suffixes)?;
        for entry in &entries {
            if entry.offset.saturating_add(entry.size) > file_len {
                return Err(PatchError::ArchiveStructure(format!(
                    "entry {} ({} bytes at {}) extends past end of archive ({} bytes)",
                    entry.path, entry.size, entry.offset, file_len
                )));
            }
        }

        Ok(Self {
            archive: archive.to_path_buf(),
            header,
            entries,
            rules,
            hits: HitCounts::new(rules),
        })
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn hits(&self) -> &HitCounts {
        &self.hits
    }

    fn read_entry<R: Read + Seek>(&self, reader: &mut R, entry: &Entry) -> Result<Vec<u8>> {
        let mut data = vec![0u8; entry.size as usize];
        reader
            .seek(SeekFrom::Start(entry.offset))
            .and_then(|_| reader.read_exact(&mut data))
            .map_err(|e| PatchError::io(&self.archive, e))?;
        Ok(data)
    }

    /// Count matches without modifying anything. Fails with
    /// [`PatchError::LowHitCount`] when `min_total` is set and not reached.
    pub fn dry_run<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        min_total: usize,
    ) -> Result<&HitCounts> {
        for entry in &self.entries {
            let data = self.read_entry(reader, entry)?;
            let hits = count_matches(&data, self.rules);
            for (rule, &n) in self.rules.iter().zip(&hits) {
                if n > 0 {
                    debug!("[hit] {} | {} x{}", entry.path, rule.label, n);
                }
            }
            self.hits.absorb(self.rules, &hits);
        }

        let total = self.hits.total();
        if min_total > 0 && total < min_total {
            return Err(PatchError::LowHitCount {
                total,
                min: min_total,
            });
        }
        Ok(&self.hits)
    }

    /// Phase one: compute every entry rewrite and the new header, validating
    /// all length invariants. Reads only.
    pub fn prepare<R: Read + Seek>(mut self, reader: &mut R) -> Result<PreparedPatch> {
        let mut writes = Vec::new();

        for entry in &self.entries {
            let data = self.read_entry(reader, entry)?;
            let replaced = replace_all(&data, self.rules);
            self.hits.absorb(self.rules, &replaced.hits);
            if !replaced.changed() {
                continue;
            }
            if replaced.bytes.len() != data.len() {
                return Err(PatchError::InvariantViolation(format!(
                    "file size changed unexpectedly: {} ({} -> {})",
                    entry.path,
                    data.len(),
                    replaced.bytes.len()
                )));
            }

            let integrity = IntegrityBlock::compute(&replaced.bytes);
            let node = self.header.entry_mut(&entry.path).ok_or_else(|| {
                PatchError::ArchiveStructure(format!("entry {} vanished from header", entry.path))
            })?;
            node.insert("integrity".to_string(), integrity.to_value());

            debug!("[patch] {} ({} bytes)", entry.path, replaced.bytes.len());
            writes.push(EntryWrite {
                path: entry.path.clone(),
                offset: entry.offset,
                bytes: replaced.bytes,
            });
        }

        let header_bytes = self.header.serialize_in_place()?;

        Ok(PreparedPatch {
            archive: self.archive,
            writes,
            header_bytes,
            hits: self.hits,
        })
    }
}
