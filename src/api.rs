use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::debug;

use crate::cache::ByteCache;
use crate::client::{DynTransport, Endpoints, ReqwestTransport, SourceClient};
use crate::config::ResolverConfig;
use crate::contact::{generic_failure_message, ContactSubmission, SubmissionOrchestrator, SubmitError};
use crate::fallback::FallbackStore;
use crate::image::ImageProxy;
use crate::locale::{bypasses_gate, gate_path, is_prefetch, Locale, PathGate};
use crate::resolver::{ContentRequest, ContentResult, Resolver};
use crate::sources::{ContentKind, SourceTable};

pub const CONTENT_SOURCE_HEADER: &str = "x-content-source";
pub const IMAGE_CACHE_HEADER: &str = "x-image-cache";

#[derive(Clone)]
pub struct AppState {
    resolver: Arc<Resolver>,
    images: Arc<ImageProxy>,
    contact: Arc<SubmissionOrchestrator>,
}

impl AppState {
    /// Production wiring: reqwest transport, configured endpoints.
    pub fn from_config(cfg: &ResolverConfig) -> anyhow::Result<Self> {
        let transport: DynTransport = Arc::new(ReqwestTransport::new()?);
        Self::with_transport(cfg, transport)
    }

    pub fn with_transport(cfg: &ResolverConfig, transport: DynTransport) -> anyhow::Result<Self> {
        let endpoints = Endpoints::from_config(cfg)?;
        let client = SourceClient::new(transport, endpoints.rewriter());

        let resolver = Resolver::new(
            client.clone(),
            SourceTable::from_config(cfg),
            FallbackStore::bundled(),
            endpoints.api_base.as_str(),
            endpoints.mock_base.as_str(),
        );
        let images = ImageProxy::new(
            client.clone(),
            Arc::new(ByteCache::new(cfg.image_cache_ttl())),
            endpoints.server_origin.as_str(),
            cfg.image_fetch_timeout(),
        );
        let contact = SubmissionOrchestrator::new(
            client,
            &endpoints.api_base,
            &endpoints.failover_api_base,
            cfg.contact_timeout(),
        );

        Ok(Self {
            resolver: Arc::new(resolver),
            images: Arc::new(images),
            contact: Arc::new(contact),
        })
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn images(&self) -> &ImageProxy {
        &self.images
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/content/{slug}", get(content))
        .route("/api/content/{slug}/{item}", get(content_item))
        .route("/api/image-proxy", get(image_proxy))
        .route("/api/contact", post(submit_contact));

    #[cfg(any(debug_assertions, feature = "mock-sources"))]
    let api = api.merge(crate::mock::router());

    api.fallback(not_found)
        .layer(middleware::from_fn(locale_gate))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Redirect page paths without a supported locale prefix. API and asset paths pass.
async fn locale_gate(req: Request, next: Next) -> Response {
    if !matches!(*req.method(), Method::GET | Method::HEAD) || bypasses_gate(req.uri().path()) {
        return next.run(req).await;
    }

    let prefetch = is_prefetch(req.headers());
    match gate_path(req.uri().path(), req.uri().query(), prefetch) {
        PathGate::Proceed(_) => next.run(req).await,
        PathGate::Redirect {
            location,
            cache_control,
        } => {
            debug!(target: "locale", from = %req.uri(), to = %location, prefetch, "locale redirect");
            let mut resp = StatusCode::TEMPORARY_REDIRECT.into_response();
            if let Ok(loc) = HeaderValue::from_str(&location) {
                resp.headers_mut().insert(header::LOCATION, loc);
            }
            resp.headers_mut()
                .insert(header::CACHE_CONTROL, HeaderValue::from_static(cache_control));
            resp
        }
    }
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "detail": "not found" }))).into_response()
}

/// Kind and request built from a content route; `lang` picks the locale and every
/// other query pair is forwarded.
fn content_request(slug: &str, mut q: HashMap<String, String>) -> Option<ContentRequest> {
    let kind = ContentKind::from_slug(slug)?;
    let locale = Locale::negotiate(q.remove("lang").as_deref());
    Some(
        q.into_iter()
            .fold(ContentRequest::new(kind, locale), |req, (k, v)| req.with_param(k, v)),
    )
}

fn content_response(result: ContentResult<Value>) -> Response {
    let source = HeaderValue::from_static(result.source_used().as_str());
    let mut resp = Json(result).into_response();
    resp.headers_mut().insert(CONTENT_SOURCE_HEADER, source);
    resp
}

async fn content(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let Some(req) = content_request(&slug, q) else {
        return not_found().await;
    };
    content_response(state.resolver.resolve(&req).await)
}

async fn content_item(
    State(state): State<AppState>,
    Path((slug, item)): Path<(String, String)>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let Some(req) = content_request(&slug, q) else {
        return not_found().await;
    };
    match state.resolver.resolve_item(&req, &item).await {
        Some(result) => content_response(result),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": format!("{slug} '{item}' not found") })),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct ImageQuery {
    #[serde(default)]
    path: String,
}

async fn image_proxy(State(state): State<AppState>, Query(q): Query<ImageQuery>) -> Response {
    let image = state.images.get_image(&q.path).await;
    let content_type = HeaderValue::from_str(&image.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(crate::image::DEFAULT_IMAGE_CONTENT_TYPE));
    let cache_control = image.cache_control();
    let origin = image.origin.header_value();
    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, HeaderValue::from_static(cache_control)),
        ],
        [(IMAGE_CACHE_HEADER, origin)],
        image.bytes,
    )
        .into_response()
}

#[derive(Deserialize)]
struct ContactQuery {
    lang: Option<String>,
}

fn request_locale(query: Option<&str>, headers: &HeaderMap) -> Locale {
    if let Some(raw) = query {
        return Locale::negotiate(Some(raw));
    }
    headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
        .map(Locale::from_accept_language)
        .unwrap_or(Locale::DEFAULT)
}

async fn submit_contact(
    State(state): State<AppState>,
    Query(q): Query<ContactQuery>,
    headers: HeaderMap,
    body: Result<Json<ContactSubmission>, JsonRejection>,
) -> Response {
    let locale = request_locale(q.lang.as_deref(), &headers);
    let Json(submission) = match body {
        Ok(b) => b,
        Err(rejection) => {
            debug!(target: "contact", error = %rejection, "unreadable contact body");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "message": rejection.body_text(), "locale": locale })),
            )
                .into_response();
        }
    };

    match state.contact.submit(&submission, locale).await {
        Ok(receipt) => Json(json!({
            "success": true,
            "message": receipt.message,
            "locale": locale,
        }))
        .into_response(),
        Err(SubmitError::Validation(errors)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "errors": errors, "locale": locale })),
        )
            .into_response(),
        Err(SubmitError::Rejected { status, body }) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST);
            let message = body
                .get("message")
                .or_else(|| body.get("detail"))
                .and_then(|m| m.as_str())
                .unwrap_or(generic_failure_message(locale));
            (
                status,
                Json(json!({ "success": false, "message": message, "locale": locale })),
            )
                .into_response()
        }
        Err(SubmitError::Failed { .. }) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "success": false,
                "message": generic_failure_message(locale),
                "locale": locale,
            })),
        )
            .into_response(),
    }
}
