//! Configuration for a tracker.
//!
//! # Example
//!
//! ```
//! use beacon_sdk::SdkConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SdkConfig::new("my-app-key", "https://telemetry.example.com");
//! assert_eq!(config.interval_ms, 500);
//! assert_eq!(config.queue_size, 1000);
//!
//! // From TOML
//! let config = SdkConfig::from_toml(r#"
//!     app_key = "my-app-key"
//!     url = "https://telemetry.example.com"
//!     queue_size = 50
//!     fail_timeout_secs = 10
//! "#).unwrap();
//! assert_eq!(config.queue_size, 50);
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

use crate::buffer::truncate::Limits;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Which persistent store to use when no host storage is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageChoice {
    /// Native storage if available, cookie jar otherwise.
    #[default]
    Default,
    /// Native storage only; no cookie fallback.
    LocalStorage,
    /// Always the cookie jar.
    Cookie,
    /// Nothing is persisted.
    None,
}

/// Which transport implementation the dispatcher is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Async fetch-style transport.
    #[default]
    Fetch,
    /// Event-driven transport completing through a callback.
    Callback,
}

/// Configuration for one tracker.
///
/// `app_key` and `url` are required; everything else has a default.
#[derive(Debug, Clone, Deserialize)]
pub struct SdkConfig {
    /// Application key; also the storage namespace segment
    pub app_key: String,

    /// Collection server base URL (no trailing slash needed)
    pub url: String,

    /// Optional logical namespace prefix for storage keys
    #[serde(default)]
    pub namespace: String,

    #[serde(default = "default_app_version")]
    pub app_version: String,
    #[serde(default = "default_sdk_name")]
    pub sdk_name: String,
    #[serde(default = "default_sdk_version")]
    pub sdk_version: String,

    /// Developer-supplied device id
    #[serde(default)]
    pub device_id: Option<String>,
    /// Device id taken from a URL parameter
    #[serde(default)]
    pub url_device_id: Option<String>,
    /// Start with the temporary placeholder id and hold all delivery
    #[serde(default)]
    pub offline_mode: bool,
    /// Drop any stored device id on startup
    #[serde(default)]
    pub clear_stored_id: bool,

    /// Heartbeat delay between ticks
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Max request queue depth
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// Backoff after a failed delivery
    #[serde(default = "default_fail_timeout_secs")]
    pub fail_timeout_secs: u64,
    /// Seconds between automatic session_duration updates
    #[serde(default = "default_session_update_secs")]
    pub session_update_secs: u64,
    #[serde(default = "default_session_cookie_timeout_mins")]
    pub session_cookie_timeout_mins: u64,
    /// Resume a session within its expiry instead of beginning a new one
    #[serde(default = "default_true")]
    pub use_session_cookie: bool,
    /// Heartbeat extends sessions automatically
    #[serde(default = "default_true")]
    pub auto_extend: bool,
    /// Max events folded into one request per tick
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    #[serde(default = "default_max_key_length")]
    pub max_key_length: usize,
    #[serde(default = "default_max_value_size")]
    pub max_value_size: usize,
    #[serde(default = "default_max_segmentation_values")]
    pub max_segmentation_values: usize,

    /// Always POST, regardless of payload length
    #[serde(default)]
    pub force_post: bool,
    /// Static headers applied to every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Shared secret for the checksum256 parameter
    #[serde(default)]
    pub salt: Option<String>,
    /// Per-request network timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub storage: StorageChoice,
    /// SQLite file for native persistent storage.
    ///
    /// Without it, and without host storage, the tracker falls back to the
    /// cookie jar, which lives in process memory: queued events and requests
    /// do not survive a restart.
    #[serde(default)]
    pub native_storage_path: Option<String>,
    #[serde(default)]
    pub transport: TransportKind,

    /// Build requests but never send them
    #[serde(default)]
    pub test_mode: bool,
    /// Leave the event queue alone on ticks
    #[serde(default)]
    pub test_mode_eq: bool,
    /// Start opted out
    #[serde(default)]
    pub ignore_visitor: bool,
    /// Don't spawn the heartbeat loop; the host calls `tick()` itself
    #[serde(default)]
    pub no_heartbeat: bool,

    /// Send location fields; when false requests carry `location=""`
    #[serde(default = "default_true")]
    pub track_location: bool,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Sent as `_ua` inside the metrics parameter
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Accept crash reports from record_error
    #[serde(default)]
    pub tracking_crashes: bool,
    /// Keep a remote-config cache and refetch it on identity change
    #[serde(default)]
    pub remote_config: bool,
}

fn default_app_version() -> String { "0.0".to_string() }
fn default_sdk_name() -> String { "javascript_native_web".to_string() }
fn default_sdk_version() -> String { env!("CARGO_PKG_VERSION").to_string() }
fn default_interval_ms() -> u64 { 500 }
fn default_queue_size() -> usize { 1000 }
fn default_fail_timeout_secs() -> u64 { 60 }
fn default_session_update_secs() -> u64 { 60 }
fn default_session_cookie_timeout_mins() -> u64 { 30 }
fn default_max_events() -> usize { 100 }
fn default_max_key_length() -> usize { 128 }
fn default_max_value_size() -> usize { 256 }
fn default_max_segmentation_values() -> usize { 100 }
fn default_request_timeout_secs() -> u64 { 30 }
fn default_true() -> bool { true }

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            app_key: String::new(),
            url: String::new(),
            namespace: String::new(),
            app_version: default_app_version(),
            sdk_name: default_sdk_name(),
            sdk_version: default_sdk_version(),
            device_id: None,
            url_device_id: None,
            offline_mode: false,
            clear_stored_id: false,
            interval_ms: default_interval_ms(),
            queue_size: default_queue_size(),
            fail_timeout_secs: default_fail_timeout_secs(),
            session_update_secs: default_session_update_secs(),
            session_cookie_timeout_mins: default_session_cookie_timeout_mins(),
            use_session_cookie: true,
            auto_extend: true,
            max_events: default_max_events(),
            max_key_length: default_max_key_length(),
            max_value_size: default_max_value_size(),
            max_segmentation_values: default_max_segmentation_values(),
            force_post: false,
            headers: BTreeMap::new(),
            salt: None,
            request_timeout_secs: default_request_timeout_secs(),
            storage: StorageChoice::default(),
            native_storage_path: None,
            transport: TransportKind::default(),
            test_mode: false,
            test_mode_eq: false,
            ignore_visitor: false,
            no_heartbeat: false,
            track_location: true,
            country_code: None,
            city: None,
            ip_address: None,
            user_agent: None,
            tracking_crashes: false,
            remote_config: false,
        }
    }
}

impl SdkConfig {
    pub fn new(app_key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_key.trim().is_empty() {
            return Err(ConfigError::Invalid("app_key must not be empty".into()));
        }
        if self.url.trim().is_empty() {
            return Err(ConfigError::Invalid("url must not be empty".into()));
        }
        if self.queue_size == 0 {
            return Err(ConfigError::Invalid("queue_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    #[must_use]
    pub fn limits(&self) -> Limits {
        Limits {
            max_key_length: self.max_key_length,
            max_value_size: self.max_value_size,
            max_segmentation_values: self.max_segmentation_values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SdkConfig::default();
        assert_eq!(config.interval_ms, 500);
        assert_eq!(config.queue_size, 1000);
        assert_eq!(config.fail_timeout_secs, 60);
        assert_eq!(config.session_update_secs, 60);
        assert_eq!(config.max_events, 100);
        assert_eq!(config.session_cookie_timeout_mins, 30);
        assert_eq!(config.limits(), Limits::default());
        assert!(config.use_session_cookie);
        assert_eq!(config.storage, StorageChoice::Default);
        assert_eq!(config.transport, TransportKind::Fetch);
    }

    #[test]
    fn test_from_toml_fills_defaults() {
        let config = SdkConfig::from_toml(
            r#"
            app_key = "abc"
            url = "https://example.com/"
            storage = "localstorage"
            transport = "callback"
            salt = "s3cret"

            [headers]
            X-Tenant = "blue"
            "#,
        )
        .unwrap();

        assert_eq!(config.app_key, "abc");
        assert_eq!(config.base_url(), "https://example.com");
        assert_eq!(config.storage, StorageChoice::LocalStorage);
        assert_eq!(config.transport, TransportKind::Callback);
        assert_eq!(config.salt.as_deref(), Some("s3cret"));
        assert_eq!(config.headers.get("X-Tenant").map(String::as_str), Some("blue"));
        assert_eq!(config.queue_size, 1000);
    }

    #[test]
    fn test_from_toml_rejects_missing_app_key() {
        let err = SdkConfig::from_toml(r#"app_key = ""
url = "https://example.com""#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_from_toml_rejects_bad_syntax() {
        assert!(matches!(SdkConfig::from_toml("app_key = "), Err(ConfigError::Parse(_))));
    }
}
