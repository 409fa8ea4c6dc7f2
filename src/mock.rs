//! Simulated CMS for local development. Compiled only in debug builds or with the
//! `mock-sources` feature; release builds carry neither these routes nor Mock sources.
//!
//! Answers are the bundled payloads for the requested kind and locale, in the same
//! envelope-free shape the real CMS returns.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tracing::debug;

use crate::fallback::FallbackStore;
use crate::locale::Locale;
use crate::sources::ContentKind;

pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/api/mock/{slug}", get(mock_content))
        .route("/api/mock/{slug}/{item}", get(mock_item))
}

fn unknown(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "detail": format!("unknown mock resource '{what}'") })),
    )
        .into_response()
}

fn query_locale(q: &HashMap<String, String>) -> Locale {
    Locale::negotiate(q.get("lang").or_else(|| q.get("language")).map(String::as_str))
}

async fn mock_content(
    Path(slug): Path<String>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let Some(kind) = ContentKind::from_slug(slug.trim_end_matches('/')) else {
        return unknown(&slug);
    };
    let locale = query_locale(&q);
    debug!(target: "resolver", %kind, %locale, "serving simulated CMS payload");
    Json(FallbackStore::bundled().payload(kind, locale)).into_response()
}

async fn mock_item(
    Path((slug, item)): Path<(String, String)>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let key = item.trim_end_matches('/');
    let found = ContentKind::from_slug(&slug)
        .filter(|kind| kind.has_items())
        .and_then(|kind| FallbackStore::bundled().item(kind, query_locale(&q), key));
    match found {
        Some(entry) => Json(entry).into_response(),
        None => unknown(&format!("{slug}/{key}")),
    }
}
