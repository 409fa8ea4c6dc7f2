// src/config/resolver.rs
//! Runtime configuration, read once at process start.
//!
//! Precedence: built-in defaults < TOML file (`$RESOLVER_CONFIG_PATH` or
//! `config/resolver.toml`, optional) < environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};
use tracing::warn;

pub const DEFAULT_RESOLVER_CONFIG_PATH: &str = "config/resolver.toml";
pub const ENV_RESOLVER_CONFIG_PATH: &str = "RESOLVER_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// CMS origin as seen from inside the server network (e.g. a container name).
    pub cms_internal_url: String,
    /// CMS origin reachable by browsers.
    pub cms_public_url: String,
    /// Versioned REST prefix appended to either origin.
    pub api_prefix: String,
    /// Statically known secondary origin for contact submissions.
    /// Defaults to whichever of internal/public is not the primary.
    pub failover_url: Option<String>,
    /// Base URL of the simulated CMS (development builds only).
    pub mock_api_url: String,
    pub use_mock_api: bool,
    /// Reach the CMS by its public origin even from the server.
    pub force_public_url: bool,
    pub image_cache_ttl_secs: u64,
    pub image_fetch_timeout_ms: u64,
    pub content_timeout_ms: u64,
    pub alternate_timeout_ms: u64,
    pub mock_timeout_ms: u64,
    pub contact_timeout_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cms_internal_url: "http://backend:8000".to_string(),
            cms_public_url: "http://localhost:8000".to_string(),
            api_prefix: "/api/v1".to_string(),
            failover_url: None,
            mock_api_url: "http://127.0.0.1:8000/api/mock".to_string(),
            use_mock_api: false,
            force_public_url: false,
            image_cache_ttl_secs: 3600,
            image_fetch_timeout_ms: 5_000,
            content_timeout_ms: 10_000,
            alternate_timeout_ms: 5_000,
            mock_timeout_ms: 3_000,
            contact_timeout_ms: 30_000,
        }
    }
}

impl ResolverConfig {
    /// Defaults, then the optional TOML file, then environment overrides.
    pub fn load() -> Result<Self> {
        let path = env::var(ENV_RESOLVER_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_RESOLVER_CONFIG_PATH));

        let mut cfg = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            Self::default()
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading resolver config from {}", path.display()))?;
        let cfg: ResolverConfig = toml::from_str(&data)
            .with_context(|| format!("parsing resolver config {}", path.display()))?;
        Ok(cfg)
    }

    /// Override fields from the process environment. Unparseable values are logged and ignored.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_string("CMS_INTERNAL_URL") {
            self.cms_internal_url = v;
        }
        if let Some(v) = env_string("CMS_PUBLIC_URL") {
            self.cms_public_url = v;
        }
        if let Some(v) = env_string("CMS_API_PREFIX") {
            self.api_prefix = v;
        }
        if let Some(v) = env_string("CMS_FAILOVER_URL") {
            self.failover_url = Some(v);
        }
        if let Some(v) = env_string("MOCK_API_URL") {
            self.mock_api_url = v;
        }
        if let Some(v) = env_flag("USE_MOCK_API") {
            self.use_mock_api = v;
        }
        if let Some(v) = env_flag("FORCE_PUBLIC_URL") {
            self.force_public_url = v;
        }
        if let Some(v) = env_u64("IMAGE_CACHE_TTL_SECS") {
            self.image_cache_ttl_secs = v;
        }
        if let Some(v) = env_u64("IMAGE_FETCH_TIMEOUT_MS") {
            self.image_fetch_timeout_ms = v;
        }
        if let Some(v) = env_u64("CONTENT_TIMEOUT_MS") {
            self.content_timeout_ms = v;
        }
        if let Some(v) = env_u64("ALTERNATE_TIMEOUT_MS") {
            self.alternate_timeout_ms = v;
        }
        if let Some(v) = env_u64("MOCK_TIMEOUT_MS") {
            self.mock_timeout_ms = v;
        }
        if let Some(v) = env_u64("CONTACT_TIMEOUT_MS") {
            self.contact_timeout_ms = v;
        }
    }

    pub fn image_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.image_cache_ttl_secs)
    }

    pub fn image_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.image_fetch_timeout_ms)
    }

    pub fn content_timeout(&self) -> Duration {
        Duration::from_millis(self.content_timeout_ms)
    }

    pub fn alternate_timeout(&self) -> Duration {
        Duration::from_millis(self.alternate_timeout_ms)
    }

    pub fn mock_timeout(&self) -> Duration {
        Duration::from_millis(self.mock_timeout_ms)
    }

    pub fn contact_timeout(&self) -> Duration {
        Duration::from_millis(self.contact_timeout_ms)
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_flag(name: &str) -> Option<bool> {
    let raw = env_string(name)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            warn!(var = name, value = other, "ignoring unrecognized boolean env value");
            None
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = env_string(name)?;
    match raw.parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring non-numeric env value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    const VARS: &[&str] = &[
        ENV_RESOLVER_CONFIG_PATH,
        "CMS_INTERNAL_URL",
        "CMS_PUBLIC_URL",
        "USE_MOCK_API",
        "FORCE_PUBLIC_URL",
        "IMAGE_CACHE_TTL_SECS",
    ];

    fn clear_env() {
        for v in VARS {
            env::remove_var(v);
        }
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_keys() {
        let cfg: ResolverConfig = toml::from_str(
            r#"
            cms_public_url = "https://cms.example.com"
            image_cache_ttl_secs = 120
            "#,
        )
        .unwrap();
        assert_eq!(cfg.cms_public_url, "https://cms.example.com");
        assert_eq!(cfg.image_cache_ttl(), Duration::from_secs(120));
        assert_eq!(cfg.cms_internal_url, "http://backend:8000");
        assert_eq!(cfg.api_prefix, "/api/v1");
    }

    #[serial_test::serial]
    #[test]
    fn env_overrides_file_values() {
        clear_env();
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("resolver.toml");
        fs::write(
            &path,
            "cms_internal_url = \"http://cms-internal:9000\"\nuse_mock_api = true\n",
        )
        .unwrap();

        env::set_var(ENV_RESOLVER_CONFIG_PATH, path.display().to_string());
        env::set_var("USE_MOCK_API", "false");
        env::set_var("IMAGE_CACHE_TTL_SECS", "not-a-number");

        let cfg = ResolverConfig::load().unwrap();
        assert_eq!(cfg.cms_internal_url, "http://cms-internal:9000");
        assert!(!cfg.use_mock_api, "env must win over file");
        assert_eq!(cfg.image_cache_ttl_secs, 3600, "bad env value is ignored");

        clear_env();
    }

    #[serial_test::serial]
    #[test]
    fn missing_file_falls_back_to_defaults() {
        clear_env();
        env::set_var(ENV_RESOLVER_CONFIG_PATH, "/nonexistent/resolver.toml");
        env::set_var("FORCE_PUBLIC_URL", "yes");
        let cfg = ResolverConfig::load().unwrap();
        assert!(cfg.force_public_url);
        assert_eq!(cfg.cms_public_url, ResolverConfig::default().cms_public_url);
        clear_env();
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.toml");
        fs::write(&path, "image_cache_ttl_secs = \"soon\"").unwrap();
        assert!(ResolverConfig::load_from_file(&path).is_err());
    }
}
