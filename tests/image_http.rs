//! Router-level tests for the formula image endpoint, driving the axum
//! service with an in-process renderer fake.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{
        Request, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
};
use bytes::Bytes;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use formella::{
    application::{
        images::ImageService,
        params::RenderParameters,
        renderer::{FormulaRenderer, RenderError},
    },
    config::PreviewSlot,
    infra::{
        cache::ImageCache,
        descriptors::DescriptorStore,
        http::{AppState, build_router},
    },
};

const MATHML: &str = "<math><mn>1</mn></math>";

struct CountingRenderer {
    calls: AtomicUsize,
}

impl CountingRenderer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FormulaRenderer for CountingRenderer {
    async fn render(&self, params: &RenderParameters) -> Result<Bytes, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut payload = b"PNG:".to_vec();
        payload.extend_from_slice(params.get("mml").unwrap_or_default().as_bytes());
        Ok(Bytes::from(payload))
    }
}

struct TimingOutRenderer;

#[async_trait]
impl FormulaRenderer for TimingOutRenderer {
    async fn render(&self, _params: &RenderParameters) -> Result<Bytes, RenderError> {
        Err(RenderError::Timeout(Duration::from_secs(5)))
    }
}

struct Harness {
    router: Router,
    formulas: TempDir,
    cache: TempDir,
}

fn harness(renderer: Arc<dyn FormulaRenderer>) -> Harness {
    let formulas = TempDir::new().expect("formula dir");
    let cache = TempDir::new().expect("cache dir");

    let service = ImageService::new(
        DescriptorStore::new(formulas.path().to_path_buf()),
        ImageCache::new(cache.path().to_path_buf(), PreviewSlot::Shared).expect("cache"),
        renderer,
    );
    let router = build_router(AppState {
        images: Arc::new(service),
    });

    Harness {
        router,
        formulas,
        cache,
    }
}

fn write_descriptor(harness: &Harness, name: &str, content: &str) {
    std::fs::write(harness.formulas.path().join(name), content).expect("write descriptor");
}

async fn get(router: &Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Bytes) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    (status, headers, body)
}

fn encode(pairs: &[(&str, &str)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in pairs {
        serializer.append_pair(name, value);
    }
    serializer.finish()
}

#[tokio::test]
async fn cacheable_request_renders_once_then_serves_cache() {
    let renderer = CountingRenderer::new();
    let h = harness(renderer.clone());
    write_descriptor(&h, "eq1.ini", &format!("mml={MATHML}\nfontsize=12\n"));

    let (status, headers, first) = get(&h.router, "/image?formula=eq1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "image/png");
    assert_eq!(
        headers.get(CACHE_CONTROL).unwrap(),
        "public, max-age=31536000, immutable"
    );
    assert!(h.cache.path().join("eq1.png").exists());

    let (status, _, second) = get(&h.router, "/image?formula=eq1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test]
async fn override_request_bypasses_cache_in_both_directions() {
    let renderer = CountingRenderer::new();
    let h = harness(renderer.clone());
    write_descriptor(&h, "eq1.ini", &format!("mml={MATHML}\nfontsize=12\n"));

    for expected_calls in 1..=2 {
        let (status, headers, _) = get(&h.router, "/image?formula=eq1&fontsize=20").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(CACHE_CONTROL).unwrap(), "no-store");
        assert_eq!(renderer.calls(), expected_calls);
    }

    assert!(!h.cache.path().join("eq1.png").exists());

    // A pre-populated cache entry must also be ignored by override requests.
    std::fs::write(h.cache.path().join("eq1.png"), b"stale").expect("seed cache");
    let (_, _, body) = get(&h.router, "/image?formula=eq1&fontsize=20").await;
    assert_ne!(&body[..], b"stale");
    assert_eq!(renderer.calls(), 3);
}

#[tokio::test]
async fn traversal_identifier_is_rejected_before_any_render() {
    let renderer = CountingRenderer::new();
    let h = harness(renderer.clone());

    let query = encode(&[("formula", "../secret")]);
    let (status, _, _) = get(&h.router, &format!("/image?{query}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = get(&h.router, "/image?formula=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(renderer.calls(), 0);
}

#[tokio::test]
async fn inline_mml_always_renders_and_never_touches_the_formula_cache() {
    let renderer = CountingRenderer::new();
    let h = harness(renderer.clone());

    let query = encode(&[("mml", MATHML)]);
    for expected_calls in 1..=2 {
        let (status, headers, body) = get(&h.router, &format!("/image?{query}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(CACHE_CONTROL).unwrap(), "no-store");
        assert_eq!(&body[..4], b"PNG:");
        assert_eq!(renderer.calls(), expected_calls);
    }

    // Only the preview slot may exist in the cache directory.
    let entries: Vec<String> = std::fs::read_dir(h.cache.path())
        .expect("read cache dir")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec!["preview.png".to_string()]);
}

#[tokio::test]
async fn missing_parameters_is_a_client_error() {
    let renderer = CountingRenderer::new();
    let h = harness(renderer.clone());

    let (status, _, body) = get(&h.router, "/image").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(&body[..], b"Missing formula or mml parameter");
    assert_eq!(renderer.calls(), 0);
}

#[tokio::test]
async fn unknown_formula_is_not_found() {
    let renderer = CountingRenderer::new();
    let h = harness(renderer.clone());

    let (status, _, _) = get(&h.router, "/image?formula=nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(renderer.calls(), 0);
}

#[tokio::test]
async fn render_timeout_maps_to_gateway_timeout() {
    let h = harness(Arc::new(TimingOutRenderer));
    write_descriptor(&h, "eq1.ini", &format!("mml={MATHML}\n"));

    let (status, _, _) = get(&h.router, "/image?formula=eq1").await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert!(!h.cache.path().join("eq1.png").exists());
}

#[tokio::test]
async fn legacy_line_descriptor_serves_through_the_same_pipeline() {
    let renderer = CountingRenderer::new();
    let h = harness(renderer.clone());
    write_descriptor(&h, "eq2.xml", &format!("{MATHML}\n#ffffff\n"));

    let (status, _, body) = get(&h.router, "/image?formula=eq2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], format!("PNG:{MATHML}").as_bytes());
}

#[tokio::test]
async fn health_endpoint_reports_no_content() {
    let h = harness(CountingRenderer::new());

    let (status, _, _) = get(&h.router, "/_health").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}
