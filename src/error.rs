use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PatchError>;

/// Fatal outcomes of a patch run. Each kind maps to its own process exit code.
#[derive(Debug, Error)]
pub enum PatchError {
    /// Patch map missing, unreadable or malformed.
    #[error("patch map error: {0}")]
    Config(String),

    /// A translation is longer than its original and strict mode is on.
    #[error("translation too long: {0}")]
    LengthOverflow(String),

    /// Every rule was skipped; nothing to apply.
    #[error("no valid replacements to apply ({skipped} skipped)")]
    NoEligibleRules { skipped: usize },

    /// Archive or manifest missing, or the archive layout is not what we expect.
    #[error("archive structure error: {0}")]
    ArchiveStructure(String),

    /// A write would have changed an entry or header length.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The manifest does not carry the expected integrity table.
    #[error("manifest integrity table missing: {0}")]
    IntegrityShape(String),

    /// Fewer replacements than the patch map expects; usually an unsupported app version.
    #[error("replacements too low ({total} < {min}); maybe unsupported app version")]
    LowHitCount { total: usize, min: usize },

    /// An external tool (codesign) failed after the patch was written.
    #[error("external tool failed: {0}")]
    ExternalTool(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PatchError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit code reported for this failure kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io { .. } => 1,
            Self::NoEligibleRules { .. } => 2,
            Self::LowHitCount { .. } => 3,
            Self::Config(_) => 4,
            Self::LengthOverflow(_) => 5,
            Self::ArchiveStructure(_) => 6,
            Self::InvariantViolation(_) => 7,
            Self::IntegrityShape(_) => 8,
            Self::ExternalTool(_) => 9,
        }
    }
}
