use crate::config::PatchMap;
use crate::error::{PatchError, Result};

/// Number of characters of a literal's source text used in its label.
const LITERAL_LABEL_CHARS: usize = 40;

/// A byte-level replacement. `old` and `new` always have the same length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementRule {
    pub label: String,
    pub old: Vec<u8>,
    pub new: Vec<u8>,
}

impl ReplacementRule {
    /// Returns `None` when the two sides differ in length.
    pub fn new(label: impl Into<String>, old: Vec<u8>, new: Vec<u8>) -> Option<Self> {
        if old.len() != new.len() || old.is_empty() {
            return None;
        }
        Some(Self {
            label: label.into(),
            old,
            new,
        })
    }
}

/// Rules in application order plus the reasons for every skipped pair.
#[derive(Debug, Default)]
pub struct RuleSet {
    pub rules: Vec<ReplacementRule>,
    pub skipped: Vec<String>,
}

/// Pad `to` with trailing ASCII spaces up to the UTF-8 length of `from`.
/// Returns `None` if `to` is longer than `from`.
pub fn pad_to_length(to: &str, from: &str) -> Option<String> {
    let pad = from.len().checked_sub(to.len())?;
    let mut padded = String::with_capacity(from.len());
    padded.push_str(to);
    padded.extend(std::iter::repeat(' ').take(pad));
    Some(padded)
}

/// The JS token an i18n message compiles to.
pub fn intl_token(id: &str, message: &str) -> String {
    format!("id:\"{}\",defaultMessage:\"{}\"", id, message)
}

/// Build replacement rules from a patch map: i18n pairs first, then literals,
/// each in declaration order.
///
/// A pair whose translation does not fit is skipped, or fails the whole build
/// with [`PatchError::LengthOverflow`] when `strict` is set. An empty result
/// is [`PatchError::NoEligibleRules`].
pub fn build_rules(map: &PatchMap, strict: bool) -> Result<RuleSet> {
    let mut set = RuleSet::default();

    for pair in &map.intl_replacements {
        let Some(padded) = pad_to_length(&pair.to, &pair.from) else {
            let reason = format!(
                "intl too long: {} | from={:?} to={:?}",
                pair.id, pair.from, pair.to
            );
            set.skip(reason, strict)?;
            continue;
        };
        let old = intl_token(&pair.id, &pair.from).into_bytes();
        let new = intl_token(&pair.id, &padded).into_bytes();
        set.push(format!("intl:{}", pair.id), old, new)?;
    }

    for pair in &map.literal_replacements {
        let Some(padded) = pad_to_length(&pair.to, &pair.from) else {
            let reason = format!("literal too long: from={:?} to={:?}", pair.from, pair.to);
            set.skip(reason, strict)?;
            continue;
        };
        let label: String = pair.from.chars().take(LITERAL_LABEL_CHARS).collect();
        set.push(
            format!("literal:{}", label),
            pair.from.clone().into_bytes(),
            padded.into_bytes(),
        )?;
    }

    if set.rules.is_empty() {
        return Err(PatchError::NoEligibleRules {
            skipped: set.skipped.len(),
        });
    }
    Ok(set)
}

impl RuleSet {
    fn skip(&mut self, reason: String, strict: bool) -> Result<()> {
        if strict {
            return Err(PatchError::LengthOverflow(reason));
        }
        self.skipped.push(reason);
        Ok(())
    }

    fn push(&mut self, label: String, old: Vec<u8>, new: Vec<u8>) -> Result<()> {
        let rule = ReplacementRule::new(label.clone(), old, new).ok_or_else(|| {
            PatchError::InvariantViolation(format!("rule {} is not length-preserving", label))
        })?;
        self.rules.push(rule);
        Ok(())
    }
}
