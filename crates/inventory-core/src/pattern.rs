use regex::Regex;

use crate::error::InventoryError;

/// A whole-string regular expression.
///
/// `web` matches only `web`, never `webservers`; use `web.*` for a prefix.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    /// `None` matches every name.
    regex: Option<Regex>,
}

impl Pattern {
    /// Compile `source`, anchored at both ends.
    pub fn new(source: &str) -> Result<Self, InventoryError> {
        let regex = Regex::new(&format!("^(?:{})$", source)).map_err(|e| {
            InventoryError::Validation(format!("Invalid pattern '{}': {}", source, e))
        })?;
        Ok(Self {
            source: source.to_string(),
            regex: Some(regex),
        })
    }

    /// Matches every name.
    pub fn any() -> Self {
        Self {
            source: ".*".to_string(),
            regex: None,
        }
    }

    /// Compile an optional pattern, defaulting to [`Pattern::any`].
    pub fn or_any(source: Option<&str>) -> Result<Self, InventoryError> {
        source.map_or_else(|| Ok(Self::any()), Self::new)
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.as_ref().is_none_or(|r| r.is_match(candidate))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Self::any()
    }
}
