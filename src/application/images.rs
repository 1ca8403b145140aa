//! The formula-image pipeline: descriptor lookup, parameter building,
//! cache consultation and rendering.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    application::{
        params::{CallerOverrides, RenderParameters, build_render_parameters},
        renderer::{FormulaRenderer, RenderError},
    },
    domain::identifier::FormulaId,
    infra::{
        cache::ImageCache,
        descriptors::{DescriptorStore, DescriptorStoreError},
    },
};

#[derive(Debug, Error)]
pub enum ImageError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorStoreError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// A rendered (or cache-served) formula image.
#[derive(Debug, Clone)]
pub struct FormulaImage {
    pub bytes: Bytes,
    /// Whether the response may be cached downstream; false whenever the
    /// request carried ad-hoc rendering overrides or an inline payload.
    pub cacheable: bool,
}

/// Per-request pipeline over explicitly constructed collaborators. No
/// shared mutable state beyond the disk cache itself.
pub struct ImageService {
    descriptors: DescriptorStore,
    cache: ImageCache,
    renderer: Arc<dyn FormulaRenderer>,
}

impl ImageService {
    pub fn new(
        descriptors: DescriptorStore,
        cache: ImageCache,
        renderer: Arc<dyn FormulaRenderer>,
    ) -> Self {
        Self {
            descriptors,
            cache,
            renderer,
        }
    }

    /// Serve a stored formula. A request without overrides is keyed by the
    /// identifier alone: once rendered, the same artifact is served for
    /// every later request. Any override parameter bypasses the cache in
    /// both directions and forces a fresh render.
    pub async fn formula_image(
        &self,
        id: &FormulaId,
        overrides: &CallerOverrides,
    ) -> Result<FormulaImage, ImageError> {
        let started_at = Instant::now();
        let descriptor = self.descriptors.load(id).await?;
        let params = build_render_parameters(&descriptor, overrides, true);
        let cacheable = overrides.is_empty();

        if cacheable {
            if let Some(bytes) = self.cache.read(id).await {
                counter!("formella_cache_hit_total").increment(1);
                info!(
                    target = "application::images",
                    op = "formula_image",
                    result = "cache_hit",
                    formula = %id,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    image_bytes = bytes.len(),
                    "formula image served from cache"
                );
                return Ok(FormulaImage { bytes, cacheable });
            }
            counter!("formella_cache_miss_total").increment(1);
        }

        let bytes = self.render(&params).await?;

        if cacheable {
            if let Err(err) = self.cache.store(id, &bytes).await {
                counter!("formella_cache_write_error_total").increment(1);
                warn!(
                    target = "application::images",
                    op = "formula_image",
                    result = "cache_write_error",
                    formula = %id,
                    error = %err,
                    "failed to persist rendered formula image; serving rendered bytes"
                );
            }
        }

        info!(
            target = "application::images",
            op = "formula_image",
            result = if cacheable { "rendered" } else { "rendered_uncached" },
            formula = %id,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            image_bytes = bytes.len(),
            "formula image rendered"
        );

        Ok(FormulaImage { bytes, cacheable })
    }

    /// Serve an inline MathML payload through the single preview slot:
    /// always re-rendered, the slot overwritten before serving.
    pub async fn preview_image(&self, mathml: &str) -> Result<FormulaImage, ImageError> {
        let started_at = Instant::now();
        let params = RenderParameters::new(mathml);
        let bytes = self.render(&params).await?;

        match self.cache.store_preview(&bytes).await {
            Ok(slot) => {
                info!(
                    target = "application::images",
                    op = "preview_image",
                    result = "rendered",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    image_bytes = bytes.len(),
                    slot = %slot.display(),
                    "inline formula rendered"
                );
            }
            Err(err) => {
                counter!("formella_cache_write_error_total").increment(1);
                warn!(
                    target = "application::images",
                    op = "preview_image",
                    result = "slot_write_error",
                    error = %err,
                    "failed to overwrite preview slot; serving rendered bytes"
                );
            }
        }

        Ok(FormulaImage {
            bytes,
            cacheable: false,
        })
    }

    /// Render a stored formula without consulting or populating the cache.
    /// Used by the command-line render path.
    pub async fn render_fresh(&self, id: &FormulaId) -> Result<Bytes, ImageError> {
        let descriptor = self.descriptors.load(id).await?;
        let params = build_render_parameters(&descriptor, &CallerOverrides::default(), false);
        Ok(self.render(&params).await?)
    }

    async fn render(&self, params: &RenderParameters) -> Result<Bytes, RenderError> {
        let render_started_at = Instant::now();
        let result = self.renderer.render(params).await;
        histogram!("formella_render_ms")
            .record(render_started_at.elapsed().as_millis() as f64);
        if result.is_err() {
            counter!("formella_render_error_total").increment(1);
        }
        result
    }
}
