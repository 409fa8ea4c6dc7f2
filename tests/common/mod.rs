// tests/common/mod.rs
//
// Shared fixtures: a scripted in-memory Transport with a call spy, plus helpers
// to build the resolver pieces over it.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;

use content_resolver::client::{HostRewriter, SourceClient};
use content_resolver::{FetchError, Locale, RawResponse, ResolverConfig, Transport};

pub const INTERNAL: &str = "http://backend:8000";
pub const PUBLIC: &str = "http://localhost:8000";
pub const API: &str = "http://backend:8000/api/v1";
pub const PUBLIC_API: &str = "http://localhost:8000/api/v1";

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(u16, Value),
    Body {
        status: u16,
        content_type: Option<String>,
        body: Bytes,
    },
    /// Fail immediately with `FetchError::Timeout`.
    Timeout,
    /// Sleep for the caller's timeout, then fail with `FetchError::Timeout`.
    Hang,
    Network,
    /// Never answer, whatever timeout the caller passed.
    Stall,
    /// Wait, then answer.
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    pub fn ok(v: Value) -> Self {
        Reply::Json(200, v)
    }

    pub fn image(content_type: Option<&str>, body: &'static [u8]) -> Self {
        Reply::Body {
            status: 200,
            content_type: content_type.map(str::to_string),
            body: Bytes::from_static(body),
        }
    }

    pub fn status(code: u16) -> Self {
        Reply::Json(code, Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: &'static str,
    pub url: String,
    pub body: Option<Value>,
    pub locale: Option<Locale>,
}

struct Route {
    prefix: String,
    queue: VecDeque<Reply>,
    last: Reply,
}

/// Answers by longest matching URL prefix. A route given a sequence plays it in order
/// and then keeps repeating the final reply. Unrouted URLs get a network error.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(self: &Arc<Self>, prefix: &str, reply: Reply) -> Arc<Self> {
        self.on_seq(prefix, vec![reply])
    }

    pub fn on_seq(self: &Arc<Self>, prefix: &str, mut replies: Vec<Reply>) -> Arc<Self> {
        let last = replies.pop().unwrap_or(Reply::Network);
        let mut routes = self.routes.lock();
        routes.retain(|r| r.prefix != prefix);
        routes.push(Route {
            prefix: prefix.to_string(),
            queue: replies.into(),
            last,
        });
        Arc::clone(self)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.url.starts_with(prefix))
            .count()
    }

    fn next_reply(&self, url: &str) -> Reply {
        let mut routes = self.routes.lock();
        let Some(route) = routes
            .iter_mut()
            .filter(|r| url.starts_with(&r.prefix))
            .max_by_key(|r| r.prefix.len())
        else {
            return Reply::Network;
        };
        route.queue.pop_front().unwrap_or_else(|| route.last.clone())
    }

    async fn play(reply: Reply, timeout: Duration) -> Result<RawResponse, FetchError> {
        let mut reply = reply;
        while let Reply::Delayed(d, inner) = reply {
            if d >= timeout {
                tokio::time::sleep(timeout).await;
                return Err(FetchError::Timeout);
            }
            tokio::time::sleep(d).await;
            reply = *inner;
        }
        match reply {
            Reply::Json(status, v) => Ok(RawResponse {
                status,
                content_type: Some("application/json".into()),
                body: Bytes::from(serde_json::to_vec(&v).expect("serialize reply")),
            }),
            Reply::Body {
                status,
                content_type,
                body,
            } => Ok(RawResponse {
                status,
                content_type,
                body,
            }),
            Reply::Timeout => Err(FetchError::Timeout),
            Reply::Hang => {
                tokio::time::sleep(timeout).await;
                Err(FetchError::Timeout)
            }
            Reply::Network => Err(FetchError::Network("connection refused".into())),
            Reply::Stall => std::future::pending().await,
            Reply::Delayed(..) => unreachable!("delays are unwrapped above"),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str, _accept: &str, timeout: Duration) -> Result<RawResponse, FetchError> {
        self.calls.lock().push(Call {
            method: "GET",
            url: url.to_string(),
            body: None,
            locale: None,
        });
        let reply = self.next_reply(url);
        Self::play(reply, timeout).await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        locale: Locale,
        timeout: Duration,
    ) -> Result<RawResponse, FetchError> {
        self.calls.lock().push(Call {
            method: "POST",
            url: url.to_string(),
            body: Some(body.clone()),
            locale: Some(locale),
        });
        let reply = self.next_reply(url);
        Self::play(reply, timeout).await
    }
}

pub fn client_over(transport: Arc<ScriptedTransport>) -> SourceClient {
    SourceClient::new(transport, HostRewriter::new(INTERNAL, PUBLIC))
}

pub fn config() -> ResolverConfig {
    ResolverConfig::default()
}
