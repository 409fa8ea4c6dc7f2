//! Bundled static defaults, one JSON document per content kind with a value per locale.
//!
//! Parsed once on first use and read-only afterwards. These are served unmodified when
//! every live source of a chain has failed.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::Value;
use tracing::error;

use crate::locale::Locale;
use crate::sources::ContentKind;

static BUNDLED: Lazy<Arc<FallbackStore>> = Lazy::new(|| Arc::new(FallbackStore::load_bundled()));

fn raw_asset(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::AboutBundle => include_str!("../assets/fallback/about.json"),
        ContentKind::FooterData => include_str!("../assets/fallback/footer.json"),
        ContentKind::ContactInfo => include_str!("../assets/fallback/contact-info.json"),
        ContentKind::FaqCategories => include_str!("../assets/fallback/faq-categories.json"),
        ContentKind::TeamMembers => include_str!("../assets/fallback/team-members.json"),
        ContentKind::Testimonials => include_str!("../assets/fallback/testimonials.json"),
        ContentKind::CompanyStats => include_str!("../assets/fallback/company-stats.json"),
        ContentKind::CompanyHistory => include_str!("../assets/fallback/company-history.json"),
        ContentKind::ClientLogos => include_str!("../assets/fallback/client-logos.json"),
        ContentKind::Projects => include_str!("../assets/fallback/projects.json"),
        ContentKind::Services => include_str!("../assets/fallback/services.json"),
    }
}

#[derive(Debug, Clone, Default)]
pub struct FallbackStore {
    payloads: HashMap<(ContentKind, Locale), Value>,
}

impl FallbackStore {
    /// Process-wide store built from the assets compiled into the binary.
    pub fn bundled() -> Arc<FallbackStore> {
        Arc::clone(&BUNDLED)
    }

    fn load_bundled() -> Self {
        let mut store = FallbackStore::default();
        for kind in ContentKind::ALL {
            match serde_json::from_str::<HashMap<String, Value>>(raw_asset(kind)) {
                Ok(by_locale) => {
                    for (tag, value) in by_locale {
                        match tag.parse::<Locale>() {
                            Ok(locale) => store.insert(kind, locale, value),
                            Err(e) => error!(target: "resolver", %kind, error = %e, "skipping fallback entry"),
                        }
                    }
                }
                Err(e) => {
                    error!(target: "resolver", %kind, error = %e, "bundled fallback payload is not valid JSON");
                }
            }
        }
        store
    }

    pub fn insert(&mut self, kind: ContentKind, locale: Locale, value: Value) {
        self.payloads.insert((kind, locale), value);
    }

    pub fn with_payload(mut self, kind: ContentKind, locale: Locale, value: Value) -> Self {
        self.insert(kind, locale, value);
        self
    }

    /// Payload for `kind` in `locale`; falls back to the default locale, then to an
    /// empty value of the kind's shape.
    pub fn payload(&self, kind: ContentKind, locale: Locale) -> Value {
        self.payloads
            .get(&(kind, locale))
            .or_else(|| self.payloads.get(&(kind, Locale::DEFAULT)))
            .cloned()
            .unwrap_or_else(|| kind.shape().empty())
    }

    /// The bundled entry of a list kind whose `id` or `slug` equals `key`.
    /// Numeric ids compare by their decimal form.
    pub fn item(&self, kind: ContentKind, locale: Locale, key: &str) -> Option<Value> {
        let list = self.payload(kind, locale);
        list.as_array()?
            .iter()
            .find(|entry| ["id", "slug"].iter().any(|field| matches_key(&entry[*field], key)))
            .cloned()
    }
}

fn matches_key(field: &Value, key: &str) -> bool {
    match field {
        Value::String(s) => s == key,
        Value::Number(n) => n.to_string() == key,
        _ => false,
    }
}
