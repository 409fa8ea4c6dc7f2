//! # Source Client
//! Thin typed fetch wrapper shared by the resolver, the image proxy and contact submission.
//!
//! - Network I/O sits behind [`Transport`] (reqwest in production, scripted fakes in tests).
//! - Base URLs are resolved once from configuration into [`Endpoints`].
//! - Every JSON payload passes through [`HostRewriter`] so internal CMS hostnames never
//!   reach a browser.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use regex::{Captures, Regex};
use serde_json::Value;
use url::Url;

use crate::config::ResolverConfig;
use crate::locale::Locale;

/// Why a single outbound call failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("upstream returned HTTP {0}")]
    HttpStatus(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("could not parse upstream body: {0}")]
    Parse(String),
}

impl FetchError {
    /// Short label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            FetchError::Timeout => "timeout",
            FetchError::HttpStatus(_) => "http_status",
            FetchError::Network(_) => "network",
            FetchError::Parse(_) => "parse",
        }
    }
}

/// Raw upstream answer, any status.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Low-level HTTP transport. Separated so the same client logic runs against
/// reqwest in production and against scripted fakes in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, accept: &str, timeout: Duration)
        -> Result<RawResponse, FetchError>;

    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        locale: Locale,
        timeout: Duration,
    ) -> Result<RawResponse, FetchError>;
}

pub type DynTransport = Arc<dyn Transport>;

/// Production transport backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("content-resolver/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .build()
            .context("building reqwest client")?;
        Ok(Self { http })
    }

    async fn finish(resp: reqwest::Response) -> Result<RawResponse, FetchError> {
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.bytes().await.map_err(map_reqwest_err)?;
        Ok(RawResponse {
            status,
            content_type,
            body,
        })
    }
}

fn map_reqwest_err(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        accept: &str,
        timeout: Duration,
    ) -> Result<RawResponse, FetchError> {
        let resp = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, accept)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        Self::finish(resp).await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        locale: Locale,
        timeout: Duration,
    ) -> Result<RawResponse, FetchError> {
        let resp = self
            .http
            .post(url)
            .header(reqwest::header::ACCEPT_LANGUAGE, locale.as_str())
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        Self::finish(resp).await
    }
}

/// Base URLs, resolved once from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Origin the server uses to reach the CMS (internal unless forced public).
    pub server_origin: String,
    /// Origin browsers can reach.
    pub public_origin: String,
    pub internal_origin: String,
    /// `server_origin` + versioned prefix.
    pub api_base: String,
    /// Secondary API base for submission failover.
    pub failover_api_base: String,
    pub mock_base: String,
}

impl Endpoints {
    pub fn from_config(cfg: &ResolverConfig) -> Result<Self> {
        let internal = parse_origin(&cfg.cms_internal_url).context("CMS_INTERNAL_URL")?;
        let public = parse_origin(&cfg.cms_public_url).context("CMS_PUBLIC_URL")?;
        let server = if cfg.force_public_url {
            public.clone()
        } else {
            internal.clone()
        };

        let failover = match cfg.failover_url.as_deref() {
            Some(raw) => parse_origin(raw).context("CMS_FAILOVER_URL")?,
            None if server == internal => public.clone(),
            None => internal.clone(),
        };

        let prefix = normalize_prefix(&cfg.api_prefix);
        let mock_base = cfg.mock_api_url.trim_end_matches('/').to_string();
        Url::parse(&mock_base).context("MOCK_API_URL")?;

        Ok(Self {
            api_base: format!("{server}{prefix}"),
            failover_api_base: format!("{failover}{prefix}"),
            server_origin: server,
            public_origin: public,
            internal_origin: internal,
            mock_base,
        })
    }

    pub fn rewriter(&self) -> HostRewriter {
        HostRewriter::new(&self.internal_origin, &self.public_origin)
    }
}

fn parse_origin(raw: &str) -> Result<String> {
    let url = Url::parse(raw.trim()).with_context(|| format!("invalid URL '{raw}'"))?;
    anyhow::ensure!(url.has_host(), "URL '{raw}' has no host");
    Ok(url.origin().ascii_serialization())
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// `host` or `host:port` of an origin string such as `http://backend:8000`.
pub fn authority_of(origin: &str) -> Option<String> {
    let url = Url::parse(origin).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Rewrites internal CMS hostnames (and CMS-relative media paths) inside payloads
/// to the publicly reachable origin.
///
/// The internal authority is only replaced where it is a host token: behind an
/// `http://`/`https://` scheme, or as a bare `host[:port]/...` at the start of the
/// string. Each string is rewritten in a single pass.
#[derive(Debug, Clone)]
pub struct HostRewriter {
    public_origin: String,
    internal_authority: Option<String>,
    public_authority: Option<String>,
    /// `https?://<internal authority>` followed by a URL delimiter or the end.
    internal_url: Option<Regex>,
}

impl HostRewriter {
    pub fn new(internal_origin: &str, public_origin: &str) -> Self {
        let internal_authority = authority_of(internal_origin);
        let public_authority = authority_of(public_origin);
        let internal_url = internal_authority
            .as_ref()
            .filter(|a| Some(*a) != public_authority.as_ref())
            .and_then(|a| {
                Regex::new(&format!(
                    r#"https?://{}(?P<tail>[/?#\s"'<>)]|$)"#,
                    regex::escape(a)
                ))
                .ok()
            });
        Self {
            public_origin: public_origin.trim_end_matches('/').to_string(),
            internal_authority,
            public_authority,
            internal_url,
        }
    }

    pub fn public_origin(&self) -> &str {
        &self.public_origin
    }

    /// Authorities that identify the backend, internal first.
    pub fn backend_authorities(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(2);
        out.extend(self.internal_authority.iter().cloned());
        out.extend(
            self.public_authority
                .iter()
                .filter(|p| Some(*p) != self.internal_authority.as_ref())
                .cloned(),
        );
        out
    }

    pub fn rewrite_str<'a>(&self, s: &'a str) -> Cow<'a, str> {
        if let Some(rest) = s.strip_prefix("/media/") {
            return Cow::Owned(format!("{}/media/{}", self.public_origin, rest));
        }
        if let Some(rest) = s.strip_prefix("media/") {
            return Cow::Owned(format!("{}/media/{}", self.public_origin, rest));
        }
        let (Some(re), Some(internal), Some(public)) = (
            &self.internal_url,
            &self.internal_authority,
            &self.public_authority,
        ) else {
            return Cow::Borrowed(s);
        };

        if let Some(rest) = s.strip_prefix(internal.as_str()) {
            if rest.starts_with('/') {
                return Cow::Owned(format!("{public}{rest}"));
            }
        }
        re.replace_all(s, |caps: &Captures<'_>| {
            format!("{}{}", self.public_origin, &caps["tail"])
        })
    }

    /// Rewrite every string value (not keys) in place.
    pub fn rewrite_value(&self, value: &mut Value) {
        match value {
            Value::String(s) => {
                if let Cow::Owned(new) = self.rewrite_str(s) {
                    *s = new;
                }
            }
            Value::Array(items) => items.iter_mut().for_each(|v| self.rewrite_value(v)),
            Value::Object(map) => map.values_mut().for_each(|v| self.rewrite_value(v)),
            _ => {}
        }
    }
}

/// Typed fetch wrapper over a [`Transport`].
#[derive(Clone)]
pub struct SourceClient {
    transport: DynTransport,
    rewriter: Arc<HostRewriter>,
}

impl SourceClient {
    pub fn new(transport: DynTransport, rewriter: HostRewriter) -> Self {
        Self {
            transport,
            rewriter: Arc::new(rewriter),
        }
    }

    pub fn rewriter(&self) -> &HostRewriter {
        &self.rewriter
    }

    /// GET a JSON document; non-2xx, unparseable bodies and timeouts are errors.
    /// Internal hostnames are rewritten before the value is returned.
    pub async fn fetch_json(&self, url: &str, timeout: Duration) -> Result<Value, FetchError> {
        let raw = within(timeout, self.transport.get(url, "application/json", timeout)).await?;
        if !raw.is_success() {
            return Err(FetchError::HttpStatus(raw.status));
        }
        let mut value: Value =
            serde_json::from_slice(&raw.body).map_err(|e| FetchError::Parse(e.to_string()))?;
        self.rewriter.rewrite_value(&mut value);
        Ok(value)
    }

    /// GET a binary payload (images). Non-2xx is an error.
    pub async fn fetch_bytes(&self, url: &str, timeout: Duration) -> Result<RawResponse, FetchError> {
        let raw = within(timeout, self.transport.get(url, "image/*", timeout)).await?;
        if !raw.is_success() {
            return Err(FetchError::HttpStatus(raw.status));
        }
        Ok(raw)
    }

    /// POST JSON and hand back the raw answer, whatever its status.
    pub async fn post_json(
        &self,
        url: &str,
        body: &Value,
        locale: Locale,
        timeout: Duration,
    ) -> Result<RawResponse, FetchError> {
        within(timeout, self.transport.post_json(url, body, locale, timeout)).await
    }
}

/// Caps a transport call at `timeout`, whatever the transport does with it.
async fn within<F>(timeout: Duration, call: F) -> Result<RawResponse, FetchError>
where
    F: std::future::Future<Output = Result<RawResponse, FetchError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| FetchError::Timeout)?
}
