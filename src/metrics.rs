use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{describe_counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "content_resolve_total",
            "Content requests answered, by kind and the source that answered."
        );
        describe_counter!(
            "content_source_failures_total",
            "Live sources that failed inside a fallback chain."
        );
        describe_counter!(
            "image_proxy_requests_total",
            "Image proxy responses by outcome (cache, network, stale, placeholder)."
        );
        describe_counter!(
            "contact_submissions_total",
            "Contact form submissions by outcome."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and expose the image cache TTL as a static gauge.
    pub fn init(image_cache_ttl_secs: u64) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        ensure_described();
        gauge!("image_cache_ttl_seconds").set(image_cache_ttl_secs as f64);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
