//! Disk cache for rendered formula images.
//!
//! Artifacts are keyed by formula identifier, created lazily on the first
//! override-free request and never evicted here; invalidation is an
//! operational concern. Persisting goes through a temp file and an atomic
//! rename so a concurrent reader never observes a partial write. Inline
//! previews share a single reusable slot: concurrent preview requests race
//! on it and the last writer wins. Deployments that cannot accept that
//! race can opt into per-request slots via [`PreviewSlot::PerRequest`].

use std::io;
use std::path::PathBuf;

use bytes::Bytes;
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use crate::{config::PreviewSlot, domain::identifier::FormulaId};

const PREVIEW_SLOT_NAME: &str = "preview.png";

#[derive(Debug, Clone)]
pub struct ImageCache {
    dir: PathBuf,
    preview_slot: PreviewSlot,
}

impl ImageCache {
    /// Initialise the cache rooted at the provided directory, creating it
    /// if necessary.
    pub fn new(dir: PathBuf, preview_slot: PreviewSlot) -> io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, preview_slot })
    }

    /// Return the cached artifact for an identifier, if present. A read
    /// failure other than absence is logged and treated as a miss so the
    /// request falls back to rendering.
    pub async fn read(&self, id: &FormulaId) -> Option<Bytes> {
        let path = self.entry_path(id);
        match fs::read(&path).await {
            Ok(bytes) => Some(Bytes::from(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(
                    target = "infra::cache",
                    op = "cache::read",
                    path = %path.display(),
                    error = %err,
                    "failed to read cached formula image; re-rendering"
                );
                None
            }
        }
    }

    /// Persist a rendered artifact under its identifier. Writes to a temp
    /// file in the cache directory and renames into place; last writer
    /// wins when two requests race on the same never-before-seen key.
    pub async fn store(&self, id: &FormulaId, bytes: &Bytes) -> io::Result<()> {
        self.write_atomic(self.entry_path(id), bytes).await
    }

    /// Overwrite the preview slot with a freshly rendered inline formula
    /// and return the slot path. In `PerRequest` mode each call gets its
    /// own file instead of the shared slot.
    pub async fn store_preview(&self, bytes: &Bytes) -> io::Result<PathBuf> {
        match self.preview_slot {
            PreviewSlot::Shared => {
                let slot = self.dir.join(PREVIEW_SLOT_NAME);
                self.write_atomic(slot.clone(), bytes).await?;
                Ok(slot)
            }
            PreviewSlot::PerRequest => {
                let slot = self.dir.join(format!("preview-{}.png", Uuid::new_v4()));
                fs::write(&slot, bytes).await?;
                Ok(slot)
            }
        }
    }

    pub fn entry_path(&self, id: &FormulaId) -> PathBuf {
        self.dir.join(format!("{id}.png"))
    }

    async fn write_atomic(&self, path: PathBuf, bytes: &Bytes) -> io::Result<()> {
        let staging = self.dir.join(format!(".stage-{}", Uuid::new_v4()));
        fs::write(&staging, bytes).await?;
        match fs::rename(&staging, &path).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(&staging).await;
                Err(err)
            }
        }
    }
}
