use serde::Deserialize;
use std::path::Path;

use crate::error::{PatchError, Result};

/// A message replacement addressed by its i18n id. Matched as the
/// `id:"<id>",defaultMessage:"<from>"` token in bundled JS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntlPair {
    pub id: String,
    pub from: String,
    pub to: String,
}

/// A replacement matched verbatim.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LiteralPair {
    pub from: String,
    pub to: String,
}

/// Patch map as loaded from JSON.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchMap {
    /// Informational, logged at startup.
    #[serde(default)]
    pub name: Option<String>,
    /// App version the map was built against. Informational.
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub intl_replacements: Vec<IntlPair>,
    #[serde(default)]
    pub literal_replacements: Vec<LiteralPair>,
    /// Minimum total hits expected over the whole archive. 0 disables the gate.
    #[serde(default)]
    pub min_total_replacements: usize,
    #[serde(default)]
    pub strict_length: bool,
}

impl PatchMap {
    #[cfg(test)]
    pub fn from_json(text: &str) -> Result<Self> {
        Self::parse(text).map_err(PatchError::Config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PatchError::Config(format!(
                "patch map not found: {}",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| PatchError::Config(format!("{}: {}", path.display(), e)))?;
        Self::parse(&text).map_err(|e| PatchError::Config(format!("{}: {}", path.display(), e)))
    }

    fn parse(text: &str) -> std::result::Result<Self, String> {
        let map: PatchMap = serde_json::from_str(text).map_err(|e| e.to_string())?;

        for (i, pair) in map.intl_replacements.iter().enumerate() {
            if pair.id.is_empty() {
                return Err(format!("intl_replacements[{}]: empty id", i));
            }
            if pair.from.is_empty() {
                return Err(format!("intl_replacements[{}] ({}): empty `from`", i, pair.id));
            }
        }
        for (i, pair) in map.literal_replacements.iter().enumerate() {
            if pair.from.is_empty() {
                return Err(format!("literal_replacements[{}]: empty `from`", i));
            }
        }
        Ok(map)
    }
}
