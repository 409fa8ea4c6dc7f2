//! # Image proxy
//! Same-origin image passthrough in front of the CMS media store.
//!
//! Lookup order is fresh cache hit, network fetch, stale cache hit, bundled placeholder.
//! Image failures are cosmetic: nothing here ever returns an error to the caller.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{ByteCache, CacheEntry, Lookup};
use crate::client::SourceClient;

pub const PLACEHOLDER_SVG: &[u8] = include_bytes!("../assets/placeholder.svg");
pub const PLACEHOLDER_CONTENT_TYPE: &str = "image/svg+xml";
pub const DEFAULT_IMAGE_CONTENT_TYPE: &str = "image/jpeg";
pub const IMAGE_CACHE_CONTROL: &str = "public, max-age=86400";
pub const PLACEHOLDER_CACHE_CONTROL: &str = "public, max-age=60";

static MULTI_SLASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"/{2,}").expect("static regex"));

/// Where the returned bytes came from; rendered as the `X-Image-Cache` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOrigin {
    Network,
    Cache,
    StaleCache,
    Placeholder,
}

impl ImageOrigin {
    pub fn header_value(self) -> &'static str {
        match self {
            ImageOrigin::Network => "MISS",
            ImageOrigin::Cache => "HIT",
            ImageOrigin::StaleCache => "STALE",
            ImageOrigin::Placeholder => "PLACEHOLDER",
        }
    }

    fn metric_label(self) -> &'static str {
        match self {
            ImageOrigin::Network => "network",
            ImageOrigin::Cache => "cache",
            ImageOrigin::StaleCache => "stale",
            ImageOrigin::Placeholder => "placeholder",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageResponse {
    pub bytes: Bytes,
    pub content_type: String,
    pub origin: ImageOrigin,
}

impl ImageResponse {
    pub fn placeholder() -> Self {
        Self {
            bytes: Bytes::from_static(PLACEHOLDER_SVG),
            content_type: PLACEHOLDER_CONTENT_TYPE.to_string(),
            origin: ImageOrigin::Placeholder,
        }
    }

    fn from_entry(entry: CacheEntry, origin: ImageOrigin) -> Self {
        Self {
            bytes: entry.bytes,
            content_type: entry.content_type,
            origin,
        }
    }

    pub fn cache_control(&self) -> &'static str {
        match self.origin {
            ImageOrigin::Placeholder => PLACEHOLDER_CACHE_CONTROL,
            _ => IMAGE_CACHE_CONTROL,
        }
    }
}

/// Reduce any accepted spelling of an image reference to a path (plus query) on the CMS.
///
/// Accepts absolute URLs, `host:port/...` with a known backend authority, and
/// relative paths with or without the leading slash. `None` for blank input.
pub fn normalize_image_path(raw: &str, backend_authorities: &[String]) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let mut path = match Url::parse(raw) {
        Ok(url) if url.has_host() => match url.query() {
            Some(q) => format!("{}?{q}", url.path()),
            None => url.path().to_string(),
        },
        _ => raw.to_string(),
    };

    for authority in backend_authorities {
        if let Some(rest) = path.strip_prefix(authority.as_str()) {
            if rest.is_empty() || rest.starts_with('/') {
                path = rest.to_string();
                break;
            }
        }
    }

    let (p, q) = match path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path.as_str(), None),
    };
    let mut out = MULTI_SLASH.replace_all(p, "/").into_owned();
    if !out.starts_with('/') {
        out.insert(0, '/');
    }
    if out == "/" {
        return None;
    }
    if let Some(q) = q {
        out.push('?');
        out.push_str(q);
    }
    Some(out)
}

pub struct ImageProxy {
    client: SourceClient,
    cache: Arc<ByteCache>,
    /// Origin the server fetches from.
    fetch_origin: String,
    /// Origin used to build cache keys, so every spelling of one image shares an entry.
    key_origin: String,
    fetch_timeout: Duration,
}

impl ImageProxy {
    pub fn new(
        client: SourceClient,
        cache: Arc<ByteCache>,
        fetch_origin: impl Into<String>,
        fetch_timeout: Duration,
    ) -> Self {
        let key_origin = client.rewriter().public_origin().to_string();
        Self {
            client,
            cache,
            fetch_origin: fetch_origin.into().trim_end_matches('/').to_string(),
            key_origin,
            fetch_timeout,
        }
    }

    pub fn cache(&self) -> &ByteCache {
        &self.cache
    }

    /// Cache key for a raw reference, if it normalizes to anything.
    pub fn cache_key(&self, raw: &str) -> Option<String> {
        let path = normalize_image_path(raw, &self.client.rewriter().backend_authorities())?;
        Some(format!("{}{path}", self.key_origin))
    }

    pub async fn get_image(&self, raw_path: &str) -> ImageResponse {
        let resp = self.lookup(raw_path).await;
        counter!("image_proxy_requests_total", "outcome" => resp.origin.metric_label()).increment(1);
        resp
    }

    async fn lookup(&self, raw_path: &str) -> ImageResponse {
        let Some(path) =
            normalize_image_path(raw_path, &self.client.rewriter().backend_authorities())
        else {
            debug!(target: "image_proxy", raw = raw_path, "empty image path; serving placeholder");
            return ImageResponse::placeholder();
        };
        let key = format!("{}{path}", self.key_origin);

        let stale = match self.cache.lookup(&key) {
            Lookup::Fresh(entry) => return ImageResponse::from_entry(entry, ImageOrigin::Cache),
            Lookup::Stale(entry) => Some(entry),
            Lookup::Miss => None,
        };

        let url = format!("{}{path}", self.fetch_origin);
        let client = self.client.clone();
        let timeout = self.fetch_timeout;
        let entry_key = key.clone();
        let fetched = self
            .cache
            .fetch_coalesced(&key, move || async move {
                let raw = client.fetch_bytes(&url, timeout).await?;
                let content_type = raw
                    .content_type
                    .filter(|ct| !ct.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_IMAGE_CONTENT_TYPE.to_string());
                Ok(CacheEntry::new(entry_key, raw.body, content_type))
            })
            .await;

        match (fetched, stale) {
            (Ok(entry), _) => ImageResponse::from_entry(entry, ImageOrigin::Network),
            (Err(e), Some(entry)) => {
                warn!(target: "image_proxy", %key, error = %e, "upstream failed; serving stale entry");
                ImageResponse::from_entry(entry, ImageOrigin::StaleCache)
            }
            (Err(e), None) => {
                warn!(target: "image_proxy", %key, error = %e, "upstream failed; serving placeholder");
                ImageResponse::placeholder()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authorities() -> Vec<String> {
        vec!["backend:8000".to_string(), "localhost:8000".to_string()]
    }

    #[test]
    fn equivalent_spellings_normalize_to_one_path() {
        let a = authorities();
        let want = Some("/media/team/x.jpg".to_string());
        assert_eq!(normalize_image_path("backend:8000/media/team/x.jpg", &a), want);
        assert_eq!(normalize_image_path("/media/team/x.jpg", &a), want);
        assert_eq!(normalize_image_path("media//team/x.jpg", &a), want);
        assert_eq!(normalize_image_path("http://backend:8000/media/team/x.jpg", &a), want);
        assert_eq!(normalize_image_path("  http://localhost:8000//media/team/x.jpg ", &a), want);
    }

    #[test]
    fn query_is_kept_and_not_collapsed() {
        let a = authorities();
        assert_eq!(
            normalize_image_path("http://backend:8000/media/x.jpg?w=300&u=a//b", &a).as_deref(),
            Some("/media/x.jpg?w=300&u=a//b")
        );
    }

    #[test]
    fn blank_or_root_is_none() {
        let a = authorities();
        assert_eq!(normalize_image_path("", &a), None);
        assert_eq!(normalize_image_path("   ", &a), None);
        assert_eq!(normalize_image_path("backend:8000", &a), None);
        assert_eq!(normalize_image_path("//", &a), None);
    }

    #[test]
    fn unknown_authority_is_left_as_path() {
        let a = authorities();
        assert_eq!(
            normalize_image_path("backend:80001/x.jpg", &a).as_deref(),
            Some("/backend:80001/x.jpg")
        );
    }

    #[test]
    fn placeholder_has_short_cache_lifetime() {
        let p = ImageResponse::placeholder();
        assert_eq!(p.origin.header_value(), "PLACEHOLDER");
        assert_eq!(p.cache_control(), PLACEHOLDER_CACHE_CONTROL);
        assert!(std::str::from_utf8(&p.bytes).unwrap().contains("<svg"));
    }
}
