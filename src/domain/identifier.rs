//! Validated formula identifiers.
//!
//! A formula identifier names a descriptor file inside the configured
//! formula directory. Validation rejects path traversal before any
//! filesystem access; a trailing extension supplied by the caller is
//! stripped to the filename stem.

use std::fmt;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentifierError {
    #[error("formula identifier is empty")]
    Empty,
    #[error("formula identifier must not contain path separators or parent segments")]
    Traversal,
}

/// A formula identifier that is safe to join onto a storage directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormulaId(String);

impl FormulaId {
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if trimmed.contains('/') || trimmed.contains('\\') || trimmed.contains("..") {
            return Err(IdentifierError::Traversal);
        }

        let stem = Path::new(trimmed)
            .file_stem()
            .and_then(|value| value.to_str())
            .ok_or(IdentifierError::Empty)?;
        if stem.is_empty() {
            return Err(IdentifierError::Empty);
        }

        Ok(Self(stem.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormulaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
