//! Configuration (Component K): connection parameters and tunables,
//! loadable from TOML or assembled programmatically via a builder.

use std::time::Duration;

use serde::Deserialize;

use crate::error::FtpfsError;
use crate::listing::{ListingParser, UnixParser, WindowsParser};
use crate::session::SuppaftpSessionOptions;
use crate::stat::cache::{DEFAULT_CAPACITY, DEFAULT_TTL};

fn default_port() -> u16 {
    21
}

fn default_user() -> String {
    "anonymous".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_TTL.as_secs()
}

/// Stat-cache sizing, mirroring [`crate::stat::StatCache::new`]'s
/// parameters so a config file can tune them without code changes.
#[derive(Debug, Clone, Deserialize)]
pub struct StatCacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl StatCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for StatCacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Top-level configuration for connecting a [`crate::host::HostHandle`].
#[derive(Debug, Clone, Deserialize)]
pub struct FtpfsConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub use_passive_mode: Option<bool>,
    #[serde(default)]
    pub encrypt_data_channel: Option<bool>,
    #[serde(default)]
    pub stat_cache: StatCacheConfig,
    /// Whether a missing path raises `PermanentError` from `lstat` or
    /// returns `None` (spec.md §9's first Open Question).
    #[serde(default = "default_true")]
    pub exception_for_missing_path: bool,
    /// Forces a specific listing dialect (`"unix"` or `"windows"`)
    /// instead of auto-detecting. Unset lets the stat service probe both.
    #[serde(default)]
    pub parser: Option<String>,
}

impl FtpfsConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, FtpfsError> {
        toml::from_str(raw).map_err(|e| FtpfsError::Io(format!("invalid configuration: {e}")))
    }

    pub async fn from_toml_file(path: &std::path::Path) -> Result<Self, FtpfsError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| FtpfsError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn session_options(&self) -> SuppaftpSessionOptions {
        SuppaftpSessionOptions {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            use_passive_mode: self.use_passive_mode,
            encrypt_data_channel: self.encrypt_data_channel,
        }
    }

    /// The caller-forced listing parser, if `parser` names a known dialect.
    pub fn listing_parser_override(&self) -> Option<Box<dyn ListingParser>> {
        match self.parser.as_deref() {
            Some("unix") => Some(Box::new(UnixParser)),
            Some("windows") => Some(Box::new(WindowsParser)),
            _ => None,
        }
    }
}

/// Fluent builder for programmatic construction, as an alternative to
/// parsing TOML.
pub struct FtpfsConfigBuilder {
    config: FtpfsConfig,
}

impl FtpfsConfigBuilder {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            config: FtpfsConfig {
                host: host.into(),
                port: default_port(),
                user: default_user(),
                password: String::new(),
                use_passive_mode: None,
                encrypt_data_channel: None,
                stat_cache: StatCacheConfig::default(),
                exception_for_missing_path: true,
                parser: None,
            },
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.user = user.into();
        self.config.password = password.into();
        self
    }

    pub fn passive_mode(mut self, passive: bool) -> Self {
        self.config.use_passive_mode = Some(passive);
        self
    }

    pub fn encrypt_data_channel(mut self, encrypt: bool) -> Self {
        self.config.encrypt_data_channel = Some(encrypt);
        self
    }

    pub fn stat_cache(mut self, capacity: usize, ttl: Duration) -> Self {
        self.config.stat_cache = StatCacheConfig {
            capacity,
            ttl_secs: ttl.as_secs(),
        };
        self
    }

    pub fn exception_for_missing_path(mut self, value: bool) -> Self {
        self.config.exception_for_missing_path = value;
        self
    }

    pub fn parser(mut self, name: impl Into<String>) -> Self {
        self.config.parser = Some(name.into());
        self
    }

    pub fn build(self) -> FtpfsConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let config = FtpfsConfig::from_toml_str(r#"host = "ftp.example.com""#).unwrap();
        assert_eq!(config.host, "ftp.example.com");
        assert_eq!(config.port, 21);
        assert_eq!(config.user, "anonymous");
        assert!(config.exception_for_missing_path);
        assert_eq!(config.stat_cache.capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn parses_full_toml() {
        let raw = r#"
            host = "ftp.example.com"
            port = 2121
            user = "alice"
            password = "secret"
            use_passive_mode = false
            exception_for_missing_path = false
            parser = "windows"

            [stat_cache]
            capacity = 10
            ttl_secs = 5
        "#;
        let config = FtpfsConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.port, 2121);
        assert_eq!(config.user, "alice");
        assert_eq!(config.use_passive_mode, Some(false));
        assert!(!config.exception_for_missing_path);
        assert_eq!(config.stat_cache.capacity, 10);
        assert_eq!(config.stat_cache.ttl(), Duration::from_secs(5));
        assert!(config.listing_parser_override().is_some());
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(FtpfsConfig::from_toml_str("not valid toml =").is_err());
    }

    #[test]
    fn builder_assembles_equivalent_config() {
        let config = FtpfsConfigBuilder::new("ftp.example.com")
            .port(2121)
            .credentials("alice", "secret")
            .passive_mode(true)
            .stat_cache(10, Duration::from_secs(5))
            .build();
        assert_eq!(config.port, 2121);
        assert_eq!(config.user, "alice");
        assert_eq!(config.use_passive_mode, Some(true));
        assert_eq!(config.stat_cache.capacity, 10);
    }
}
