//! Persisted settings and the explicit client configuration derived from them
//!
//! Settings live in `options.json` under the XDG config directory. The API
//! client never reads them directly: callers build a `ClientConfig` and hand
//! it over at construction.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, VWorldError};

/// Host serving every VWorld endpoint
pub const API_HOST: &str = "api.vworld.kr";

/// Per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Number of candidates requested per address search
pub const DEFAULT_SEARCH_SIZE: u32 = 10;

/// Feature limit for WFS requests
pub const DEFAULT_MAX_FEATURES: u32 = 1000;

/// Cache time-to-live in seconds
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Environment variable that overrides the stored API key
pub const API_KEY_ENV: &str = "VWORLD_API_KEY";

/// How requests reach the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    /// Plain HTTP
    Http,
    /// HTTPS with certificate validation
    #[default]
    Https,
    /// HTTPS without certificate validation, for broken certificate chains
    HttpsInsecure,
}

impl Protocol {
    /// URL scheme prefix including `://`
    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Http => "http://",
            Protocol::Https | Protocol::HttpsInsecure => "https://",
        }
    }

    /// Whether TLS certificates are validated
    pub fn verify_tls(self) -> bool {
        !matches!(self, Protocol::HttpsInsecure)
    }

    /// Name used on the command line and in `options.json`
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::HttpsInsecure => "https-insecure",
        }
    }
}

/// User options persisted between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// VWorld API key
    pub api_key: Option<String>,
    /// Call method
    pub protocol: Protocol,
    /// Candidates per address search
    pub search_size: u32,
    /// Feature limit for WFS URLs
    pub max_features: u32,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Cache time-to-live in seconds
    pub cache_ttl_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            protocol: Protocol::default(),
            search_size: DEFAULT_SEARCH_SIZE,
            max_features: DEFAULT_MAX_FEATURES,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }
}

impl Settings {
    /// Default location of `options.json`
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("options.json"))
    }

    /// Loads settings, falling back to defaults when the file is missing or unreadable
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to read settings; using defaults");
                }
                return Self::default();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "invalid settings file; using defaults");
            Self::default()
        })
    }

    /// Writes settings as pretty JSON, creating the parent directory
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| VWorldError::resource(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| VWorldError::resource(path, e))?;
        fs::write(path, json).map_err(|e| VWorldError::resource(path, e))?;
        info!(path = %path.display(), "settings saved");
        Ok(())
    }

    /// Picks the API key: explicit override, then the environment, then the stored key
    ///
    /// Empty strings count as unset.
    pub fn resolve_api_key(&self, explicit: Option<&str>) -> Option<String> {
        let env = std::env::var(API_KEY_ENV).ok();
        [explicit.map(str::to_string), env, self.api_key.clone()]
            .into_iter()
            .flatten()
            .map(|key| key.trim().to_string())
            .find(|key| !key.is_empty())
    }

    /// Cache TTL as a `Duration`
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Directory for recent searches and favorites
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "vworld")
}

/// Everything the API client needs, passed in at construction
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key merged into every request
    pub api_key: Option<String>,
    /// Call method
    pub protocol: Protocol,
    /// Replaces `<scheme><host>` when set (mock servers, proxies)
    pub base_url: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Candidates per address search
    pub search_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            protocol: Protocol::default(),
            base_url: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            search_size: DEFAULT_SEARCH_SIZE,
        }
    }
}

impl ClientConfig {
    /// Builds a config from stored settings and an already-resolved key
    pub fn from_settings(settings: &Settings, api_key: Option<String>) -> Self {
        Self {
            api_key,
            protocol: settings.protocol,
            base_url: None,
            timeout: Duration::from_secs(settings.timeout_secs),
            search_size: settings.search_size,
        }
    }

    /// Sets the API key
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Overrides the base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Overrides the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolved `<scheme><host>` without a trailing slash
    pub fn base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("{}{}", self.protocol.scheme(), API_HOST),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_protocol_schemes_and_verification() {
        assert_eq!(Protocol::Http.scheme(), "http://");
        assert!(Protocol::Http.verify_tls());
        assert_eq!(Protocol::Https.scheme(), "https://");
        assert!(Protocol::Https.verify_tls());
        assert_eq!(Protocol::HttpsInsecure.scheme(), "https://");
        assert!(!Protocol::HttpsInsecure.verify_tls());
    }

    #[test]
    fn test_default_protocol_is_https() {
        assert_eq!(Protocol::default(), Protocol::Https);
        assert_eq!(Settings::default().protocol, Protocol::Https);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load(&temp_dir.path().join("options.json"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_invalid_file_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("options.json");
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(Settings::load(&path), Settings::default());
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("options.json");
        let settings = Settings {
            api_key: Some("ABCDEF".to_string()),
            protocol: Protocol::HttpsInsecure,
            search_size: 5,
            ..Settings::default()
        };

        settings.save(&path).expect("Save should succeed");

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"https-insecure\""));
        assert_eq!(Settings::load(&path), settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("options.json");
        fs::write(&path, r#"{"protocol": "http"}"#).unwrap();

        let settings = Settings::load(&path);
        assert_eq!(settings.protocol, Protocol::Http);
        assert_eq!(settings.search_size, DEFAULT_SEARCH_SIZE);
        assert_eq!(settings.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_explicit_api_key_wins() {
        let settings = Settings {
            api_key: Some("stored".to_string()),
            ..Settings::default()
        };
        assert_eq!(
            settings.resolve_api_key(Some("explicit")),
            Some("explicit".to_string())
        );
    }

    #[test]
    fn test_blank_explicit_key_is_ignored() {
        let settings = Settings {
            api_key: Some("stored".to_string()),
            ..Settings::default()
        };
        // The environment may carry a key on a developer machine.
        let resolved = settings.resolve_api_key(Some("   "));
        assert!(resolved.is_some());
        assert_ne!(resolved.as_deref(), Some(""));
    }

    #[test]
    fn test_base_url_from_protocol() {
        let config = ClientConfig {
            protocol: Protocol::Http,
            ..ClientConfig::default()
        };
        assert_eq!(config.base_url(), "http://api.vworld.kr");
        assert_eq!(ClientConfig::default().base_url(), "https://api.vworld.kr");
    }

    #[test]
    fn test_base_url_override_trims_slash() {
        let config = ClientConfig::default().with_base_url("http://127.0.0.1:8080/");
        assert_eq!(config.base_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_from_settings_copies_fields() {
        let settings = Settings {
            protocol: Protocol::Http,
            timeout_secs: 5,
            search_size: 3,
            ..Settings::default()
        };
        let config = ClientConfig::from_settings(&settings, Some("k".to_string()));
        assert_eq!(config.protocol, Protocol::Http);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.search_size, 3);
        assert_eq!(config.api_key.as_deref(), Some("k"));
    }
}
