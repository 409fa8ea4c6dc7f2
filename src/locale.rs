//! # Locale Gate
//! Validates and normalizes the requested locale before any content fetch.
//!
//! Two entry points:
//! - [`Locale::negotiate`] for API query parameters (unsupported → default, never an error).
//! - [`gate_path`] for page paths: a missing/unsupported first segment redirects to the
//!   same path prefixed with the default locale.
//!
//! Once validated, a [`Locale`] is a plain `Copy` value threaded through all downstream calls.

use std::fmt;
use std::str::FromStr;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

/// Redirect lifetime for speculative prefetches.
pub const PREFETCH_REDIRECT_CACHE: &str = "private, max-age=60";
/// Redirect lifetime for normal navigations.
pub const NAVIGATION_REDIRECT_CACHE: &str = "private, max-age=3600";

/// Supported site locales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    En,
    Ar,
}

/// Text direction of a locale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ltr,
    Rtl,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported locale: '{0}'")]
pub struct UnsupportedLocale(pub String);

impl Locale {
    pub const DEFAULT: Locale = Locale::En;
    pub const ALL: [Locale; 2] = [Locale::En, Locale::Ar];

    pub fn as_str(self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Ar => "ar",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Locale::En => Direction::Ltr,
            Locale::Ar => Direction::Rtl,
        }
    }

    /// Lenient lookup for API callers: anything unsupported or missing becomes the default.
    pub fn negotiate(raw: Option<&str>) -> Locale {
        raw.and_then(|s| s.parse().ok()).unwrap_or(Locale::DEFAULT)
    }

    /// Pick the best supported locale from an `Accept-Language` header value.
    ///
    /// Entries are ranked by their `q` weight (default 1.0); ties keep header order.
    pub fn from_accept_language(header: &str) -> Locale {
        let mut ranked: Vec<(f32, usize, Locale)> = header
            .split(',')
            .enumerate()
            .filter_map(|(idx, part)| {
                let mut pieces = part.split(';');
                let tag = pieces.next()?.trim();
                let q = pieces
                    .find_map(|p| p.trim().strip_prefix("q="))
                    .and_then(|v| v.trim().parse::<f32>().ok())
                    .unwrap_or(1.0);
                let locale = tag.parse::<Locale>().ok()?;
                (q > 0.0).then_some((q, idx, locale))
            })
            .collect();

        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        ranked.first().map(|(_, _, l)| *l).unwrap_or(Locale::DEFAULT)
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Locale {
    type Err = UnsupportedLocale;

    /// Case-insensitive; region-tagged forms (`ar-EG`, `en_US`) match by primary subtag.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let primary = s
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match primary.as_str() {
            "en" => Ok(Locale::En),
            "ar" => Ok(Locale::Ar),
            _ => Err(UnsupportedLocale(s.trim().to_string())),
        }
    }
}

/// Outcome of gating a page path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathGate {
    Proceed(Locale),
    Redirect {
        location: String,
        cache_control: &'static str,
    },
}

/// True when the request is a speculative prefetch rather than a navigation.
pub fn is_prefetch(headers: &HeaderMap) -> bool {
    let has = |name: &str, needle: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains(needle))
    };
    has("purpose", "prefetch")
        || has("sec-purpose", "prefetch")
        || has("x-moz", "prefetch")
        || has("next-router-prefetch", "1")
}

/// Paths the gate never touches: API, health checks and static assets.
pub fn bypasses_gate(path: &str) -> bool {
    let first = path.trim_start_matches('/').split('/').next().unwrap_or("");
    if matches!(first, "api" | "health" | "metrics" | "_next" | "static" | "media") {
        return true;
    }
    path.rsplit('/')
        .next()
        .is_some_and(|last| last.contains('.'))
}

/// Gate a page path on its first segment.
///
/// Only the exact lowercase locale code counts as a locale segment; anything else
/// (including `/`) redirects to the default-locale prefixed path, keeping the query.
pub fn gate_path(path: &str, query: Option<&str>, prefetch: bool) -> PathGate {
    let first = path.trim_start_matches('/').split('/').next().unwrap_or("");
    if let Some(locale) = Locale::ALL.into_iter().find(|l| l.as_str() == first) {
        return PathGate::Proceed(locale);
    }

    let rest = if path.is_empty() || path == "/" {
        String::new()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let mut location = format!("/{}{}", Locale::DEFAULT, rest);
    if let Some(q) = query.filter(|q| !q.is_empty()) {
        location.push('?');
        location.push_str(q);
    }

    PathGate::Redirect {
        location,
        cache_control: if prefetch {
            PREFETCH_REDIRECT_CACHE
        } else {
            NAVIGATION_REDIRECT_CACHE
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_region_tagged_and_mixed_case() {
        assert_eq!("AR".parse::<Locale>(), Ok(Locale::Ar));
        assert_eq!("ar-EG".parse::<Locale>(), Ok(Locale::Ar));
        assert_eq!("en_US".parse::<Locale>(), Ok(Locale::En));
        assert!("fr".parse::<Locale>().is_err());
    }

    #[test]
    fn negotiate_defaults_unsupported_and_missing() {
        assert_eq!(Locale::negotiate(None), Locale::En);
        assert_eq!(Locale::negotiate(Some("de")), Locale::En);
        assert_eq!(Locale::negotiate(Some("ar")), Locale::Ar);
    }

    #[test]
    fn accept_language_respects_q_weights() {
        assert_eq!(Locale::from_accept_language("fr, ar;q=0.8, en;q=0.5"), Locale::Ar);
        assert_eq!(Locale::from_accept_language("en;q=0.2, ar-EG;q=0.9"), Locale::Ar);
        assert_eq!(Locale::from_accept_language("de-DE"), Locale::En);
        assert_eq!(Locale::from_accept_language("ar;q=0"), Locale::En);
    }

    #[test]
    fn arabic_is_rtl() {
        assert_eq!(Locale::Ar.direction(), Direction::Rtl);
        assert_eq!(Locale::En.direction(), Direction::Ltr);
    }

    #[test]
    fn supported_first_segment_proceeds() {
        assert_eq!(gate_path("/ar/about", None, false), PathGate::Proceed(Locale::Ar));
        assert_eq!(gate_path("/en", None, false), PathGate::Proceed(Locale::En));
    }

    #[test]
    fn unsupported_segment_redirects_with_query() {
        let out = gate_path("/about", Some("tab=team"), false);
        assert_eq!(
            out,
            PathGate::Redirect {
                location: "/en/about?tab=team".into(),
                cache_control: NAVIGATION_REDIRECT_CACHE,
            }
        );
        let root = gate_path("/", None, false);
        assert!(matches!(root, PathGate::Redirect { ref location, .. } if location == "/en"));
        let fr = gate_path("/fr/contact", None, false);
        assert!(matches!(fr, PathGate::Redirect { ref location, .. } if location == "/en/fr/contact"));
    }

    #[test]
    fn prefetch_gets_shorter_redirect_lifetime() {
        let mut headers = HeaderMap::new();
        headers.insert("next-router-prefetch", HeaderValue::from_static("1"));
        assert!(is_prefetch(&headers));
        match gate_path("/services", None, is_prefetch(&headers)) {
            PathGate::Redirect { cache_control, .. } => {
                assert_eq!(cache_control, PREFETCH_REDIRECT_CACHE)
            }
            other => panic!("expected redirect, got {other:?}"),
        }

        let mut sec = HeaderMap::new();
        sec.insert("sec-purpose", HeaderValue::from_static("prefetch;prerender"));
        assert!(is_prefetch(&sec));
        assert!(!is_prefetch(&HeaderMap::new()));
    }

    #[test]
    fn api_and_assets_bypass() {
        assert!(bypasses_gate("/api/content/footer"));
        assert!(bypasses_gate("/health"));
        assert!(bypasses_gate("/favicon.ico"));
        assert!(bypasses_gate("/images/logo.png"));
        assert!(!bypasses_gate("/about"));
        assert!(!bypasses_gate("/"));
    }
}
