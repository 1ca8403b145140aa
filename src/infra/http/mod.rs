mod middleware;
mod render;

pub use render::{AppState, build_router};

use axum::http::StatusCode;

use crate::{
    application::{error::HttpError, images::ImageError, renderer::RenderError},
    infra::descriptors::DescriptorStoreError,
};

/// Map a pipeline error to a consistent HTTP error response.
pub fn image_error_to_http(source: &'static str, err: ImageError) -> HttpError {
    match err {
        ImageError::Descriptor(DescriptorStoreError::NotFound) => HttpError::new(
            source,
            StatusCode::NOT_FOUND,
            "Formula not found",
            "no descriptor file exists for the requested identifier",
        ),
        ImageError::Descriptor(DescriptorStoreError::Parse(err)) => HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Formula descriptor is malformed",
            &err,
        ),
        ImageError::Descriptor(DescriptorStoreError::Io(err)) => HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to read formula descriptor",
            &err,
        ),
        ImageError::Render(err @ RenderError::Timeout(_)) => HttpError::from_error(
            source,
            StatusCode::GATEWAY_TIMEOUT,
            "Formula rendering timed out",
            &err,
        ),
        ImageError::Render(err) => HttpError::from_error(
            source,
            StatusCode::BAD_GATEWAY,
            "Formula rendering failed",
            &err,
        ),
    }
}
