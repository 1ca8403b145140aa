use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Query, State},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::application::{
    error::HttpError,
    images::{FormulaImage, ImageService},
    params::CallerOverrides,
};
use crate::domain::identifier::FormulaId;

use super::{
    image_error_to_http,
    middleware::{log_responses, set_request_context},
};

#[derive(Clone)]
pub struct AppState {
    pub images: Arc<ImageService>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/image", get(formula_image))
        .route("/_health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

/// `GET /image?formula=<id>[&overrides...]` serves a stored formula,
/// `GET /image?mml=<payload>` renders an inline payload through the
/// preview slot. `formula` wins when both are supplied.
async fn formula_image(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    const SOURCE: &str = "infra::http::formula_image";

    if let Some(raw_id) = first_value(&params, "formula") {
        let id = match FormulaId::parse(raw_id) {
            Ok(id) => id,
            Err(err) => {
                return HttpError::new(
                    SOURCE,
                    StatusCode::BAD_REQUEST,
                    "Invalid formula identifier",
                    err.to_string(),
                )
                .into_response();
            }
        };

        let overrides = CallerOverrides::from_query(&params);
        return match state.images.formula_image(&id, &overrides).await {
            Ok(image) => png_response(image),
            Err(err) => image_error_to_http(SOURCE, err).into_response(),
        };
    }

    if let Some(mathml) = first_value(&params, "mml") {
        return match state.images.preview_image(mathml).await {
            Ok(image) => png_response(image),
            Err(err) => image_error_to_http(SOURCE, err).into_response(),
        };
    }

    HttpError::new(
        SOURCE,
        StatusCode::BAD_REQUEST,
        "Missing formula or mml parameter",
        "request supplied neither a stored formula identifier nor an inline MathML payload",
    )
    .into_response()
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

fn first_value<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn png_response(image: FormulaImage) -> Response {
    let FormulaImage { bytes, cacheable } = image;

    let mut response = Response::new(Body::from(bytes.clone()));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
    if let Ok(value) = HeaderValue::from_str(&bytes.len().to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    let cache_control = if cacheable {
        HeaderValue::from_static("public, max-age=31536000, immutable")
    } else {
        HeaderValue::from_static("no-store")
    };
    headers.insert(CACHE_CONTROL, cache_control);

    response
}
