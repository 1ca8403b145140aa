//! Filesystem-backed descriptor loading.

use std::io::ErrorKind;
use std::path::PathBuf;

use thiserror::Error;
use tokio::fs;

use crate::domain::{
    descriptor::{DescriptorFormat, DescriptorParseError, FormulaDescriptor, parse},
    identifier::FormulaId,
};

#[derive(Debug, Error)]
pub enum DescriptorStoreError {
    #[error("formula descriptor not found")]
    NotFound,
    #[error("failed to read formula descriptor: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] DescriptorParseError),
}

/// Read-only store of formula descriptor files. The `.ini` key/value
/// format takes precedence over the legacy `.xml` line format when both
/// exist for an identifier.
#[derive(Debug, Clone)]
pub struct DescriptorStore {
    root: PathBuf,
}

impl DescriptorStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn load(&self, id: &FormulaId) -> Result<FormulaDescriptor, DescriptorStoreError> {
        match fs::read_to_string(self.entry_path(id, "ini")).await {
            Ok(content) => return Ok(parse(&content, DescriptorFormat::KeyValue)?),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        match fs::read_to_string(self.entry_path(id, "xml")).await {
            Ok(content) => Ok(parse(&content, DescriptorFormat::LegacyLines)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(DescriptorStoreError::NotFound),
            Err(err) => Err(err.into()),
        }
    }

    fn entry_path(&self, id: &FormulaId, extension: &str) -> PathBuf {
        self.root.join(format!("{id}.{extension}"))
    }
}
