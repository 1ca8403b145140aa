//! The external rendering collaborator.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::application::params::RenderParameters;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render request timed out after {0:?}")]
    Timeout(Duration),
    #[error("render endpoint returned status {status}")]
    Status { status: u16 },
    #[error("render transport failed: {0}")]
    Transport(#[source] Box<dyn StdError + Send + Sync>),
}

/// Opaque boundary to the rendering service: parameters in, PNG bytes out.
/// The production implementation lives in [`crate::infra::renderer`]; tests
/// substitute counting or failing fakes.
#[async_trait]
pub trait FormulaRenderer: Send + Sync {
    async fn render(&self, params: &RenderParameters) -> Result<Bytes, RenderError>;
}
