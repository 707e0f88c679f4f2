//! Environment-backed configuration, loaded once at process start.
//!
//! Follows the one-constant-per-env-var / one-parse-helper-per-field-type
//! shape used across the corpus for config loading: every field has an
//! explicit default, `from_env()` never panics, and `validate()` is a
//! separate step so construction and validation failures are distinguishable.

pub mod error;
pub mod management;

#[cfg(test)]
mod tests;

pub use error::{ConfigError, ConfigResult};
pub use management::ManagementConfig;

use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    CODEX_SYNTH_HUGE_MAX, CODEX_SYNTH_HUGE_MIN, DEFAULT_CODEX_SYNTH_HUGE_BYTES,
    DEFAULT_MAX_BODY_BYTES,
};

/// Process-wide configuration, loaded once in `main()` and shared behind an
/// `Arc` with every background task and request handler.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind_addr: IpAddr,

    /// Directory of one-file-per-credential JSON documents.
    pub auth_dir: PathBuf,
    /// Directory holding the two cache snapshot files.
    pub cache_dir: PathBuf,

    pub response_cache_enabled: bool,
    pub response_cache_max_size: usize,
    pub response_cache_max_bytes: u64,
    pub response_cache_ttl: Duration,
    pub response_cache_exclude_models: Vec<String>,

    pub prompt_cache_max_size: usize,
    pub prompt_cache_max_bytes: u64,
    pub prompt_cache_ttl: Duration,

    pub max_body_bytes: usize,

    /// Local-loopback management password; management routes are mounted iff
    /// this or `management_secret` is set.
    pub management_password: Option<String>,
    pub management_secret: Option<String>,

    pub codex_synth_enable: bool,
    pub codex_synth_huge_bytes: usize,
    pub harness_enabled: bool,

    /// `0` disables the `/keep-alive` idle-shutdown reaper.
    pub keep_alive_idle_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_addr: IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
            auth_dir: PathBuf::from("./.gatehouse/auth"),
            cache_dir: PathBuf::from("./.gatehouse/cache"),
            response_cache_enabled: true,
            response_cache_max_size: 10_000,
            response_cache_max_bytes: 0,
            response_cache_ttl: Duration::from_secs(3600),
            response_cache_exclude_models: Vec::new(),
            prompt_cache_max_size: 5_000,
            prompt_cache_max_bytes: 0,
            prompt_cache_ttl: Duration::from_secs(3600),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            management_password: None,
            management_secret: None,
            codex_synth_enable: true,
            codex_synth_huge_bytes: DEFAULT_CODEX_SYNTH_HUGE_BYTES,
            harness_enabled: false,
            keep_alive_idle_secs: 0,
        }
    }
}

impl Config {
    const ENV_PORT: &'static str = "GATEHOUSE_PORT";
    const ENV_BIND_ADDR: &'static str = "GATEHOUSE_BIND_ADDR";
    const ENV_AUTH_DIR: &'static str = "GATEHOUSE_AUTH_DIR";
    const ENV_CACHE_DIR: &'static str = "GATEHOUSE_CACHE_DIR";
    const ENV_RESPONSE_CACHE_TTL_SECS: &'static str = "GATEHOUSE_RESPONSE_CACHE_TTL_SECS";
    const ENV_PROMPT_CACHE_TTL_SECS: &'static str = "GATEHOUSE_PROMPT_CACHE_TTL_SECS";
    const ENV_MANAGEMENT_PASSWORD: &'static str = "MANAGEMENT_PASSWORD";
    const ENV_MANAGEMENT_SECRET: &'static str = "GATEHOUSE_MANAGEMENT_SECRET";
    const ENV_CODEX_SYNTH_ENABLE: &'static str = "CLIPROXY_CODEX_SYNTH_ENABLE";
    const ENV_CODEX_SYNTH_HUGE_BYTES: &'static str = "CLIPROXY_CODEX_SYNTH_HUGE_BYTES";
    const ENV_HARNESS_ENABLED: &'static str = "CLIPROXY_HARNESS_ENABLED";
    const ENV_KEEP_ALIVE_IDLE_SECS: &'static str = "GATEHOUSE_KEEP_ALIVE_IDLE_SECS";

    pub fn from_env() -> ConfigResult<Self> {
        let defaults = Self::default();

        let port = Self::parse_port_from_env(defaults.port)?;
        let bind_addr = Self::parse_bind_addr_from_env(defaults.bind_addr)?;
        let auth_dir = Self::parse_path_from_env(Self::ENV_AUTH_DIR, defaults.auth_dir);
        let cache_dir = Self::parse_path_from_env(Self::ENV_CACHE_DIR, defaults.cache_dir);

        let response_cache_ttl = Duration::from_secs(Self::parse_u64_from_env(
            Self::ENV_RESPONSE_CACHE_TTL_SECS,
            defaults.response_cache_ttl.as_secs(),
        )?);
        let prompt_cache_ttl = Duration::from_secs(Self::parse_u64_from_env(
            Self::ENV_PROMPT_CACHE_TTL_SECS,
            defaults.prompt_cache_ttl.as_secs(),
        )?);

        let management_password = Self::parse_optional_string_from_env(Self::ENV_MANAGEMENT_PASSWORD);
        let management_secret = Self::parse_optional_string_from_env(Self::ENV_MANAGEMENT_SECRET);

        let codex_synth_enable = Self::parse_bool_from_env(
            Self::ENV_CODEX_SYNTH_ENABLE,
            defaults.codex_synth_enable,
        );
        let codex_synth_huge_bytes = Self::parse_u64_from_env(
            Self::ENV_CODEX_SYNTH_HUGE_BYTES,
            defaults.codex_synth_huge_bytes as u64,
        )? as usize;
        let codex_synth_huge_bytes =
            codex_synth_huge_bytes.clamp(CODEX_SYNTH_HUGE_MIN, CODEX_SYNTH_HUGE_MAX);

        let harness_enabled = Self::parse_bool_from_env(Self::ENV_HARNESS_ENABLED, defaults.harness_enabled);
        let keep_alive_idle_secs =
            Self::parse_u64_from_env(Self::ENV_KEEP_ALIVE_IDLE_SECS, defaults.keep_alive_idle_secs)?;

        Ok(Self {
            port,
            bind_addr,
            auth_dir,
            cache_dir,
            response_cache_ttl,
            prompt_cache_ttl,
            management_password,
            management_secret,
            codex_synth_enable,
            codex_synth_huge_bytes,
            harness_enabled,
            keep_alive_idle_secs,
            ..defaults
        })
    }

    /// Whether the management HTTP surface should be mounted at all.
    pub fn management_enabled(&self) -> bool {
        self.management_password.is_some() || self.management_secret.is_some()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.auth_dir.exists() && !self.auth_dir.is_dir() {
            return Err(ConfigError::NotADirectory {
                path: self.auth_dir.clone(),
            });
        }
        if self.cache_dir.exists() && !self.cache_dir.is_dir() {
            return Err(ConfigError::NotADirectory {
                path: self.cache_dir.clone(),
            });
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn response_snapshot_path(&self) -> PathBuf {
        self.cache_dir.join("response_cache.bin")
    }

    pub fn prompt_snapshot_path(&self) -> PathBuf {
        self.cache_dir.join("prompt_cache.bin")
    }

    /// Path to the hot-patchable YAML config document managed by
    /// [`ManagementConfig`].
    pub fn management_config_path(&self) -> PathBuf {
        self.cache_dir.join("management.yaml")
    }

    fn parse_port_from_env(default: u16) -> ConfigResult<u16> {
        match env::var(Self::ENV_PORT) {
            Ok(value) => {
                let port: u16 = value.parse().map_err(|e| ConfigError::PortParseError {
                    value: value.clone(),
                    source: e,
                })?;
                if port == 0 {
                    return Err(ConfigError::InvalidPort { value });
                }
                Ok(port)
            }
            Err(_) => Ok(default),
        }
    }

    fn parse_bind_addr_from_env(default: IpAddr) -> ConfigResult<IpAddr> {
        match env::var(Self::ENV_BIND_ADDR) {
            Ok(value) => value
                .parse()
                .map_err(|e| ConfigError::InvalidBindAddr { value, source: e }),
            Err(_) => Ok(default),
        }
    }

    fn parse_path_from_env(var_name: &str, default: PathBuf) -> PathBuf {
        env::var(var_name).map(PathBuf::from).unwrap_or(default)
    }

    fn parse_optional_string_from_env(var_name: &str) -> Option<String> {
        env::var(var_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_u64_from_env(var_name: &'static str, default: u64) -> ConfigResult<u64> {
        match env::var(var_name) {
            Ok(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidInteger { name: var_name, value }),
            Err(_) => Ok(default),
        }
    }

    fn parse_bool_from_env(var_name: &str, default: bool) -> bool {
        match env::var(var_name) {
            Ok(value) => !matches!(value.trim(), "0" | "false" | "no" | "off"),
            Err(_) => default,
        }
    }
}
