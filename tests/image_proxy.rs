// tests/image_proxy.rs
//
// Image proxy over a scripted transport, with tokio's paused clock driving the TTL.
//
// Covered:
// - Different spellings of one image share a cache entry (second call: zero network)
// - Expired entry + failing refetch -> stale bytes, not the placeholder
// - Expired entry + working refetch -> new bytes
// - Nothing cached + failing upstream -> placeholder
// - Missing upstream Content-Type -> image/jpeg
// - Concurrent misses for one key -> one upstream call

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{client_over, Reply, ScriptedTransport, INTERNAL, PUBLIC};
use content_resolver::cache::ByteCache;
use content_resolver::image::{ImageOrigin, ImageProxy, IMAGE_CACHE_CONTROL, PLACEHOLDER_CACHE_CONTROL};

const TTL: Duration = Duration::from_secs(3600);

fn proxy_over(t: &Arc<ScriptedTransport>) -> ImageProxy {
    ImageProxy::new(
        client_over(t.clone()),
        Arc::new(ByteCache::new(TTL)),
        INTERNAL,
        Duration::from_secs(5),
    )
}

#[tokio::test(start_paused = true)]
async fn spellings_share_one_entry_and_second_call_is_cached() {
    let t = ScriptedTransport::new().on(
        &format!("{INTERNAL}/media/x.jpg"),
        Reply::image(Some("image/png"), b"png-bytes"),
    );
    let proxy = proxy_over(&t);

    let first = proxy.get_image("backend:8000/media/x.jpg").await;
    assert_eq!(first.origin, ImageOrigin::Network);
    assert_eq!(first.content_type, "image/png");
    assert_eq!(first.cache_control(), IMAGE_CACHE_CONTROL);

    let second = proxy.get_image("/media/x.jpg").await;
    assert_eq!(second.origin, ImageOrigin::Cache);
    assert_eq!(second.bytes, first.bytes);

    assert_eq!(
        proxy.cache_key("backend:8000/media/x.jpg"),
        proxy.cache_key("/media/x.jpg")
    );
    assert_eq!(
        proxy.cache_key("/media/x.jpg").as_deref(),
        Some(format!("{PUBLIC}/media/x.jpg").as_str())
    );
    assert_eq!(t.calls().len(), 1, "second call must not touch the network");
}

#[tokio::test(start_paused = true)]
async fn expired_entry_is_served_stale_when_refetch_fails() {
    let t = ScriptedTransport::new().on_seq(
        &format!("{INTERNAL}/media/hero.jpg"),
        vec![Reply::image(Some("image/jpeg"), b"hero-v1"), Reply::status(503)],
    );
    let proxy = proxy_over(&t);

    let fresh = proxy.get_image("/media/hero.jpg").await;
    assert_eq!(fresh.origin, ImageOrigin::Network);

    tokio::time::advance(TTL + Duration::from_secs(1)).await;

    let stale = proxy.get_image("/media/hero.jpg").await;
    assert_eq!(stale.origin, ImageOrigin::StaleCache);
    assert_eq!(stale.bytes.as_ref(), b"hero-v1");
    assert_eq!(t.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn expired_entry_is_replaced_by_successful_refetch() {
    let t = ScriptedTransport::new().on_seq(
        &format!("{INTERNAL}/media/logo.png"),
        vec![
            Reply::image(Some("image/png"), b"v1"),
            Reply::image(Some("image/png"), b"v2"),
        ],
    );
    let proxy = proxy_over(&t);

    proxy.get_image("/media/logo.png").await;
    tokio::time::advance(TTL * 2).await;

    let refreshed = proxy.get_image("/media/logo.png").await;
    assert_eq!(refreshed.origin, ImageOrigin::Network);
    assert_eq!(refreshed.bytes.as_ref(), b"v2");

    let cached = proxy.get_image("/media/logo.png").await;
    assert_eq!(cached.origin, ImageOrigin::Cache);
    assert_eq!(cached.bytes.as_ref(), b"v2");
}

#[tokio::test(start_paused = true)]
async fn cold_miss_with_dead_upstream_serves_placeholder() {
    let t = ScriptedTransport::new().on(&format!("{INTERNAL}/media/"), Reply::Hang);
    let proxy = proxy_over(&t);

    let img = proxy.get_image("/media/missing.jpg").await;
    assert_eq!(img.origin, ImageOrigin::Placeholder);
    assert_eq!(img.content_type, "image/svg+xml");
    assert_eq!(img.cache_control(), PLACEHOLDER_CACHE_CONTROL);
    assert!(proxy.cache().is_empty(), "failures are never cached");
}

#[tokio::test]
async fn empty_path_is_placeholder_without_network() {
    let t = ScriptedTransport::new();
    let proxy = proxy_over(&t);
    assert_eq!(proxy.get_image("   ").await.origin, ImageOrigin::Placeholder);
    assert!(t.calls().is_empty());
}

#[tokio::test]
async fn missing_content_type_defaults_to_jpeg() {
    let t = ScriptedTransport::new().on(
        &format!("{INTERNAL}/media/raw"),
        Reply::image(None, b"\xff\xd8\xff"),
    );
    let proxy = proxy_over(&t);
    let img = proxy.get_image("media/raw").await;
    assert_eq!(img.content_type, "image/jpeg");
}

#[tokio::test(start_paused = true)]
async fn concurrent_misses_share_one_upstream_call() {
    let t = ScriptedTransport::new().on(
        &format!("{INTERNAL}/media/big.jpg"),
        Reply::Delayed(
            Duration::from_millis(500),
            Box::new(Reply::image(Some("image/jpeg"), b"big")),
        ),
    );
    let proxy = Arc::new(proxy_over(&t));

    let mut tasks = Vec::new();
    for raw in [
        "/media/big.jpg",
        "backend:8000/media/big.jpg",
        "http://localhost:8000/media/big.jpg",
        "media//big.jpg",
    ] {
        let proxy = Arc::clone(&proxy);
        tasks.push(tokio::spawn(async move { proxy.get_image(raw).await }));
    }
    for task in tasks {
        let img = task.await.expect("task");
        assert_eq!(img.bytes.as_ref(), b"big");
        assert_ne!(img.origin, ImageOrigin::Placeholder);
    }
    assert_eq!(t.calls().len(), 1);
}
