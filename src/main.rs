//! Content Resolver binary entrypoint.
//! Boots the Axum HTTP server: configuration, tracing, metrics and the resolver routes.

use content_resolver::{api, metrics::Metrics, ResolverConfig};
use shuttle_axum::ShuttleAxum;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default, JSON lines with `LOG_FORMAT=json`.
/// A subscriber installed by the runtime takes precedence.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("content_resolver=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let cfg = ResolverConfig::load().map_err(shuttle_runtime::Error::Custom)?;
    info!(
        internal = %cfg.cms_internal_url,
        public = %cfg.cms_public_url,
        force_public = cfg.force_public_url,
        use_mock = cfg.use_mock_api,
        "resolver configuration loaded"
    );

    let state = api::AppState::from_config(&cfg).map_err(shuttle_runtime::Error::Custom)?;
    let mut router = api::router(state);

    match Metrics::init(cfg.image_cache_ttl_secs) {
        Ok(m) => router = router.merge(m.router()),
        Err(e) => warn!(error = ?e, "metrics disabled"),
    }

    Ok(router.into())
}
