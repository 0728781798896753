use plist::{Dictionary, Value};
use std::path::{Path, PathBuf};

use crate::error::{PatchError, Result};
use crate::integrity::sha256_hex;

/// Info.plist table holding the header hash of each packaged archive.
pub const INTEGRITY_KEY: &str = "ElectronAsarIntegrity";
/// Archive path within `Contents/`, as used for the integrity table key.
pub const ARCHIVE_KEY: &str = "Resources/app.asar";

/// The app's Info.plist, checked on load to carry
/// `ElectronAsarIntegrity / Resources/app.asar / hash`.
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    root: Value,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PatchError::ArchiveStructure(format!("missing plist: {}", path.display())));
        }
        let root = Value::from_file(path)
            .map_err(|e| PatchError::ArchiveStructure(format!("{}: {}", path.display(), e)))?;
        let mut manifest = Self {
            path: path.to_path_buf(),
            root,
        };
        manifest.archive_entry()?;
        Ok(manifest)
    }

    fn archive_entry(&mut self) -> Result<&mut Dictionary> {
        let entry = self
            .root
            .as_dictionary_mut()
            .and_then(|d| d.get_mut(INTEGRITY_KEY))
            .and_then(Value::as_dictionary_mut)
            .and_then(|d| d.get_mut(ARCHIVE_KEY))
            .and_then(Value::as_dictionary_mut)
            .ok_or_else(|| {
                PatchError::IntegrityShape(format!(
                    "{} / {} not found in {}",
                    INTEGRITY_KEY,
                    ARCHIVE_KEY,
                    self.path.display()
                ))
            })?;
        if entry.get("hash").and_then(Value::as_string).is_none() {
            return Err(PatchError::IntegrityShape(format!(
                "{} / {} has no hash string",
                INTEGRITY_KEY, ARCHIVE_KEY
            )));
        }
        Ok(entry)
    }

    pub fn header_hash(&mut self) -> Result<String> {
        let entry = self.archive_entry()?;
        Ok(entry
            .get("hash")
            .and_then(Value::as_string)
            .unwrap_or_default()
            .to_string())
    }

    pub fn set_header_hash(&mut self, hash: &str) -> Result<()> {
        let entry = self.archive_entry()?;
        entry.insert("hash".to_string(), Value::String(hash.to_string()));
        Ok(())
    }

    /// Write back as an XML plist.
    pub fn save(&self) -> Result<()> {
        self.root
            .to_file_xml(&self.path)
            .map_err(|e| PatchError::io(&self.path, std::io::Error::other(e.to_string())))
    }
}

/// Hash recorded for an archive header: SHA-256 of the raw header JSON bytes.
pub fn header_hash(header_bytes: &[u8]) -> String {
    sha256_hex(header_bytes)
}
