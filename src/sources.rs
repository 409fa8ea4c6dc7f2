//! # Source table
//! Declarative, per-kind ordered list of content sources.
//!
//! Ordering is fixed by [`SourceType`]: Primary, AlternatePath, Mock, StaticDefault.
//! The table builder appends a `StaticDefault` to every kind, so a chain can never
//! run dry. Mock entries only exist in builds that compile the simulated CMS.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ResolverConfig;

/// Whether this build may carry Mock sources at all.
pub const MOCK_SOURCES_COMPILED: bool = cfg!(any(debug_assertions, feature = "mock-sources"));

/// The fixed set of remote content categories the site renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentKind {
    AboutBundle,
    FooterData,
    ContactInfo,
    FaqCategories,
    TeamMembers,
    Testimonials,
    CompanyStats,
    CompanyHistory,
    ClientLogos,
    Projects,
    Services,
}

/// Expected top-level JSON shape of a kind's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Object,
    List,
}

impl Shape {
    pub fn empty(self) -> Value {
        match self {
            Shape::Object => Value::Object(Default::default()),
            Shape::List => Value::Array(Vec::new()),
        }
    }
}

impl ContentKind {
    pub const ALL: [ContentKind; 11] = [
        ContentKind::AboutBundle,
        ContentKind::FooterData,
        ContentKind::ContactInfo,
        ContentKind::FaqCategories,
        ContentKind::TeamMembers,
        ContentKind::Testimonials,
        ContentKind::CompanyStats,
        ContentKind::CompanyHistory,
        ContentKind::ClientLogos,
        ContentKind::Projects,
        ContentKind::Services,
    ];

    /// Stable URL slug used by inbound routes, mock routes and asset files.
    pub fn slug(self) -> &'static str {
        match self {
            ContentKind::AboutBundle => "about",
            ContentKind::FooterData => "footer",
            ContentKind::ContactInfo => "contact-info",
            ContentKind::FaqCategories => "faq-categories",
            ContentKind::TeamMembers => "team-members",
            ContentKind::Testimonials => "testimonials",
            ContentKind::CompanyStats => "company-stats",
            ContentKind::CompanyHistory => "company-history",
            ContentKind::ClientLogos => "client-logos",
            ContentKind::Projects => "projects",
            ContentKind::Services => "services",
        }
    }

    pub fn from_slug(slug: &str) -> Option<ContentKind> {
        ContentKind::ALL.into_iter().find(|k| k.slug() == slug)
    }

    pub fn shape(self) -> Shape {
        match self {
            ContentKind::AboutBundle | ContentKind::FooterData | ContentKind::ContactInfo => {
                Shape::Object
            }
            _ => Shape::List,
        }
    }

    /// List kinds whose entries can also be fetched one at a time by id or slug.
    pub fn has_items(self) -> bool {
        matches!(self, ContentKind::Projects | ContentKind::Services)
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Where a piece of content came from. Declaration order is trial order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceType {
    Primary,
    AlternatePath,
    Mock,
    StaticDefault,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Primary => "primary",
            SourceType::AlternatePath => "alternatePath",
            SourceType::Mock => "mock",
            SourceType::StaticDefault => "staticDefault",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a fallback chain.
///
/// `url_template` may contain `{api}`, `{mock}` and `{locale}`; it is empty for
/// `StaticDefault`, which is served from the bundled payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub source_type: SourceType,
    pub url_template: String,
    pub timeout: Duration,
}

impl SourceSpec {
    pub fn live(source_type: SourceType, url_template: impl Into<String>, timeout: Duration) -> Self {
        Self {
            source_type,
            url_template: url_template.into(),
            timeout,
        }
    }

    pub fn static_default() -> Self {
        Self {
            source_type: SourceType::StaticDefault,
            url_template: String::new(),
            timeout: Duration::ZERO,
        }
    }

    pub fn is_live(&self) -> bool {
        self.source_type != SourceType::StaticDefault
    }

    /// Template addressing one entry of this source's collection:
    /// `{api}/projects/?lang=x` becomes `{api}/projects/{item}/?lang=x`.
    pub fn item_template(&self) -> String {
        let (path, query) = match self.url_template.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (self.url_template.as_str(), None),
        };
        let mut out = match path.strip_suffix('/') {
            Some(base) => format!("{base}/{{item}}/"),
            None => format!("{path}/{{item}}"),
        };
        if let Some(q) = query {
            out.push('?');
            out.push_str(q);
        }
        out
    }
}

/// Ordered chains for every [`ContentKind`].
#[derive(Debug, Clone)]
pub struct SourceTable {
    chains: HashMap<ContentKind, Vec<SourceSpec>>,
}

impl SourceTable {
    pub fn builder() -> SourceTableBuilder {
        SourceTableBuilder::new()
    }

    /// The site's routing table.
    ///
    /// With `use_mock_api` (honoured only where Mock sources are compiled in) the live part
    /// of each chain is the simulated CMS alone.
    pub fn from_config(cfg: &ResolverConfig) -> Self {
        let mock_only = cfg.use_mock_api && MOCK_SOURCES_COMPILED;
        if cfg.use_mock_api && !MOCK_SOURCES_COMPILED {
            warn!(
                target: "resolver",
                "USE_MOCK_API is set but this build carries no mock sources; ignoring"
            );
        }

        let mut b = SourceTable::builder();
        for &(kind, primary, alternate) in ROUTES {
            if !mock_only {
                b = b.live(kind, SourceType::Primary, primary, cfg.content_timeout());
                if let Some(alt) = alternate {
                    b = b.live(kind, SourceType::AlternatePath, alt, cfg.alternate_timeout());
                }
            }
            let mock = format!("{{mock}}/{}?lang={{locale}}", kind.slug());
            b = b.live(kind, SourceType::Mock, mock, cfg.mock_timeout());
        }
        b.build()
    }

    /// Chain for `kind`, always ending in `StaticDefault`.
    pub fn chain(&self, kind: ContentKind) -> &[SourceSpec] {
        self.chains.get(&kind).map(Vec::as_slice).unwrap_or(STATIC_ONLY)
    }
}

static STATIC_ONLY: &[SourceSpec] = &[SourceSpec {
    source_type: SourceType::StaticDefault,
    url_template: String::new(),
    timeout: Duration::ZERO,
}];

/// (kind, primary, alternate). Alternates exist only where the CMS route naming has
/// historically flipped between underscore and hyphen.
const ROUTES: &[(ContentKind, &str, Option<&str>)] = &[
    (ContentKind::AboutBundle, "{api}/about/combined/?lang={locale}", None),
    (ContentKind::FooterData, "{api}/footer/?lang={locale}", None),
    (
        ContentKind::ContactInfo,
        "{api}/contact-info/?lang={locale}",
        Some("{api}/contact_info/?lang={locale}"),
    ),
    (
        ContentKind::FaqCategories,
        "{api}/faqs/by_category/?language={locale}",
        Some("{api}/faqs/by-category/?language={locale}"),
    ),
    (ContentKind::TeamMembers, "{api}/about/team/?lang={locale}", None),
    (ContentKind::Testimonials, "{api}/testimonials/?lang={locale}", None),
    (ContentKind::CompanyStats, "{api}/about/statistics/?lang={locale}", None),
    (ContentKind::CompanyHistory, "{api}/about/history/?lang={locale}", None),
    (
        ContentKind::ClientLogos,
        "{api}/about/client-logos/?lang={locale}",
        Some("{api}/about/client_logos/?lang={locale}"),
    ),
    (ContentKind::Projects, "{api}/projects/?lang={locale}", None),
    (ContentKind::Services, "{api}/services/?lang={locale}", None),
];

pub struct SourceTableBuilder {
    chains: HashMap<ContentKind, Vec<SourceSpec>>,
    allow_mock: bool,
}

impl SourceTableBuilder {
    fn new() -> Self {
        Self {
            chains: HashMap::new(),
            allow_mock: MOCK_SOURCES_COMPILED,
        }
    }

    /// Override whether Mock entries are kept (defaults to the build setting).
    pub fn allow_mock(mut self, allow: bool) -> Self {
        self.allow_mock = allow;
        self
    }

    /// Add a live source. `StaticDefault` is implicit and ignored here; Mock is
    /// dropped when not allowed.
    pub fn live(
        mut self,
        kind: ContentKind,
        source_type: SourceType,
        url_template: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        match source_type {
            SourceType::StaticDefault => {}
            SourceType::Mock if !self.allow_mock => {
                debug!(target: "resolver", %kind, "mock source excluded from this build");
            }
            _ => self
                .chains
                .entry(kind)
                .or_default()
                .push(SourceSpec::live(source_type, url_template, timeout)),
        }
        self
    }

    pub fn build(mut self) -> SourceTable {
        for kind in ContentKind::ALL {
            let chain = self.chains.entry(kind).or_default();
            chain.sort_by_key(|s| s.source_type);
            chain.push(SourceSpec::static_default());
        }
        SourceTable {
            chains: self.chains,
        }
    }
}
