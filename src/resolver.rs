//! # Fallback Chain Resolver
//! One parameterized resolver for every content kind.
//!
//! For a [`ContentRequest`] the kind's chain is walked strictly in declared order; each
//! live source gets its own timeout and its answer must match the kind's [`Shape`].
//! The first usable answer wins. When every live source fails the bundled static
//! default is returned unmodified. `resolve` never fails.
//!
//! There is no automatic retry: a caller-visible "try again" simply calls `resolve`
//! again, which restarts from `Primary`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::{FetchError, SourceClient};
use crate::fallback::FallbackStore;
use crate::locale::Locale;
use crate::sources::{ContentKind, Shape, SourceSpec, SourceTable, SourceType};

/// Immutable description of what to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRequest {
    kind: ContentKind,
    locale: Locale,
    params: BTreeMap<String, String>,
}

impl ContentRequest {
    pub fn new(kind: ContentKind, locale: Locale) -> Self {
        Self {
            kind,
            locale,
            params: BTreeMap::new(),
        }
    }

    /// Extra query parameter forwarded to live sources.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }
}

/// Resolved content plus its provenance. `is_fallback` is true iff the source was not `Primary`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentResult<T = Value> {
    data: T,
    is_fallback: bool,
    source_used: SourceType,
    fetched_at: DateTime<Utc>,
}

impl<T> ContentResult<T> {
    pub fn new(data: T, source_used: SourceType) -> Self {
        Self {
            data,
            is_fallback: source_used != SourceType::Primary,
            source_used,
            fetched_at: Utc::now(),
        }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    pub fn is_fallback(&self) -> bool {
        self.is_fallback
    }

    pub fn source_used(&self) -> SourceType {
        self.source_used
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ContentResult<U> {
        ContentResult {
            data: f(self.data),
            is_fallback: self.is_fallback,
            source_used: self.source_used,
            fetched_at: self.fetched_at,
        }
    }
}

impl ContentResult<Value> {
    /// Deserialize the opaque payload into a caller-side type.
    pub fn decode<T: DeserializeOwned>(self) -> Result<ContentResult<T>, serde_json::Error> {
        let data = serde_json::from_value(self.data)?;
        Ok(ContentResult {
            data,
            is_fallback: self.is_fallback,
            source_used: self.source_used,
            fetched_at: self.fetched_at,
        })
    }
}

/// Why one source in a chain was skipped. Never surfaced past the resolver.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("expected a {expected:?} payload")]
    ShapeMismatch { expected: Shape },
    #[error("invalid source url '{0}'")]
    BadUrl(String),
}

impl SourceFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            SourceFailure::Fetch(e) => e.reason(),
            SourceFailure::ShapeMismatch { .. } => "shape_mismatch",
            SourceFailure::BadUrl(_) => "bad_url",
        }
    }
}

/// Validate (and lightly normalize) a payload against the expected shape.
///
/// A DRF paginated envelope `{ "results": [...] }` counts as a list.
pub fn check_shape(shape: Shape, value: Value) -> Result<Value, SourceFailure> {
    match (shape, value) {
        (Shape::Object, v @ Value::Object(_)) => Ok(v),
        (Shape::List, v @ Value::Array(_)) => Ok(v),
        (Shape::List, Value::Object(mut map)) => match map.remove("results") {
            Some(v @ Value::Array(_)) => Ok(v),
            _ => Err(SourceFailure::ShapeMismatch { expected: shape }),
        },
        _ => Err(SourceFailure::ShapeMismatch { expected: shape }),
    }
}

pub struct Resolver {
    client: SourceClient,
    table: Arc<SourceTable>,
    fallbacks: Arc<FallbackStore>,
    api_base: String,
    mock_base: String,
}

impl Resolver {
    pub fn new(
        client: SourceClient,
        table: SourceTable,
        fallbacks: Arc<FallbackStore>,
        api_base: impl Into<String>,
        mock_base: impl Into<String>,
    ) -> Self {
        Self {
            client,
            table: Arc::new(table),
            fallbacks,
            api_base: api_base.into(),
            mock_base: mock_base.into(),
        }
    }

    pub fn table(&self) -> &SourceTable {
        &self.table
    }

    pub async fn resolve(&self, req: &ContentRequest) -> ContentResult<Value> {
        let kind = req.kind();
        if let Some((data, source)) = self.first_live(req, None).await {
            return ContentResult::new(data, source);
        }

        counter!("content_resolve_total", "kind" => kind.slug(), "source" => SourceType::StaticDefault.as_str())
            .increment(1);
        info!(target: "resolver", %kind, locale = %req.locale(), "all live sources failed; serving bundled default");
        ContentResult::new(
            self.fallbacks.payload(kind, req.locale()),
            SourceType::StaticDefault,
        )
    }

    /// Resolve one entry of a list kind by id or slug.
    ///
    /// Walks the same chain as [`Resolver::resolve`], addressing each live source's
    /// item route. Once the live sources are exhausted the bundled entry with a
    /// matching `id` or `slug` is served. `None` means the kind has no items, the
    /// key is malformed, or nothing anywhere matched.
    pub async fn resolve_item(&self, req: &ContentRequest, key: &str) -> Option<ContentResult<Value>> {
        let kind = req.kind();
        if !kind.has_items() || !is_item_key(key) {
            debug!(target: "resolver", %kind, key, "item lookup not applicable");
            return None;
        }
        if let Some((data, source)) = self.first_live(req, Some(key)).await {
            return Some(ContentResult::new(data, source));
        }

        match self.fallbacks.item(kind, req.locale(), key) {
            Some(data) => {
                counter!("content_resolve_total", "kind" => kind.slug(), "source" => SourceType::StaticDefault.as_str())
                    .increment(1);
                info!(target: "resolver", %kind, key, "all live sources failed; serving bundled entry");
                Some(ContentResult::new(data, SourceType::StaticDefault))
            }
            None => {
                counter!("content_item_not_found_total", "kind" => kind.slug()).increment(1);
                info!(target: "resolver", %kind, key, "no source has this entry");
                None
            }
        }
    }

    /// First live source in chain order with a usable answer.
    async fn first_live(&self, req: &ContentRequest, item: Option<&str>) -> Option<(Value, SourceType)> {
        let kind = req.kind();

        for spec in self.table.chain(kind).iter().filter(|s| s.is_live()) {
            match self.try_source(req, spec, item).await {
                Ok(data) => {
                    counter!("content_resolve_total", "kind" => kind.slug(), "source" => spec.source_type.as_str())
                        .increment(1);
                    if spec.source_type != SourceType::Primary {
                        info!(target: "resolver", %kind, source = %spec.source_type, "served from non-primary source");
                    }
                    return Some((data, spec.source_type));
                }
                Err(failure) => {
                    counter!(
                        "content_source_failures_total",
                        "kind" => kind.slug(),
                        "source" => spec.source_type.as_str(),
                        "reason" => failure.reason()
                    )
                    .increment(1);
                    warn!(target: "resolver", %kind, source = %spec.source_type, error = %failure, "source failed; moving on");
                }
            }
        }
        None
    }

    async fn try_source(
        &self,
        req: &ContentRequest,
        spec: &SourceSpec,
        item: Option<&str>,
    ) -> Result<Value, SourceFailure> {
        let (url, shape) = match item {
            Some(key) => {
                let template = spec.item_template().replace("{item}", key);
                (self.build_url(&template, req)?, Shape::Object)
            }
            None => (self.build_url(&spec.url_template, req)?, req.kind().shape()),
        };
        debug!(target: "resolver", kind = %req.kind(), source = %spec.source_type, %url, "trying source");
        let value = self.client.fetch_json(url.as_str(), spec.timeout).await?;
        check_shape(shape, value)
    }

    /// Expand a template and append the request's extra params.
    ///
    /// Query keys the template already sets (the locale key among them) stay as the
    /// template has them; a request param with the same name is dropped.
    pub fn build_url(&self, template: &str, req: &ContentRequest) -> Result<Url, SourceFailure> {
        let expanded = template
            .replace("{api}", &self.api_base)
            .replace("{mock}", &self.mock_base)
            .replace("{locale}", req.locale().as_str());
        let mut url = Url::parse(&expanded).map_err(|_| SourceFailure::BadUrl(expanded.clone()))?;
        if !req.params().is_empty() {
            let fixed: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
            let mut pairs = url.query_pairs_mut();
            for (k, v) in req.params() {
                if fixed.iter().any(|f| f == k) {
                    debug!(target: "resolver", key = %k, "param already set by source route; ignored");
                    continue;
                }
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }
}

/// A single path segment of letters, digits, `-` or `_`.
fn is_item_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 128
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fallback_flag_follows_source() {
        assert!(!ContentResult::new(json!({}), SourceType::Primary).is_fallback());
        for s in [SourceType::AlternatePath, SourceType::Mock, SourceType::StaticDefault] {
            assert!(ContentResult::new(json!({}), s).is_fallback(), "{s}");
        }
    }

    #[test]
    fn serializes_as_envelope() {
        let r = ContentResult::new(json!([1, 2]), SourceType::AlternatePath);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["data"], json!([1, 2]));
        assert_eq!(v["isFallback"], true);
        assert_eq!(v["sourceUsed"], "alternatePath");
        assert!(v.get("fetchedAt").is_some());
    }

    #[test]
    fn shape_check_unwraps_paginated_lists() {
        let page = json!({"count": 1, "results": [{"id": 1}]});
        assert_eq!(check_shape(Shape::List, page).unwrap(), json!([{"id": 1}]));
        assert!(check_shape(Shape::List, json!({"detail": "not found"})).is_err());
        assert!(check_shape(Shape::Object, json!([])).is_err());
        assert!(check_shape(Shape::List, json!("oops")).is_err());
    }

    #[test]
    fn item_keys_are_single_segments() {
        assert!(is_item_key("42"));
        assert!(is_item_key("placeholder-villa"));
        assert!(is_item_key("p_1"));
        assert!(!is_item_key(""));
        assert!(!is_item_key("../admin"));
        assert!(!is_item_key("a b"));
        assert!(!is_item_key("x?lang=ar"));
    }

    #[test]
    fn decode_into_typed_payload() {
        #[derive(serde::Deserialize)]
        struct Stat {
            value: u32,
        }
        let r = ContentResult::new(json!([{"value": 7}]), SourceType::Primary);
        let typed = r.decode::<Vec<Stat>>().unwrap();
        assert_eq!(typed.data()[0].value, 7);
        assert!(!typed.is_fallback());
    }
}
