// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod contact;
pub mod fallback;
pub mod image;
pub mod locale;
pub mod metrics;
pub mod resolver;
pub mod sources;

#[cfg(any(debug_assertions, feature = "mock-sources"))]
pub mod mock;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::client::{DynTransport, FetchError, RawResponse, Transport};
pub use crate::config::ResolverConfig;
pub use crate::locale::Locale;
pub use crate::resolver::{ContentRequest, ContentResult, Resolver};
pub use crate::sources::{ContentKind, SourceType};

use axum::Router;

/// Build the in-process router from the process configuration (file + env),
/// with the production reqwest transport.
pub async fn app() -> anyhow::Result<Router> {
    let cfg = ResolverConfig::load()?;
    crate::metrics::ensure_described();
    Ok(router(AppState::from_config(&cfg)?))
}

/// Same as [`app`] but over a caller-supplied transport.
pub fn app_with_transport(cfg: &ResolverConfig, transport: DynTransport) -> anyhow::Result<Router> {
    Ok(router(AppState::with_transport(cfg, transport)?))
}
