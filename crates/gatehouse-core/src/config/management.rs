//! Hot-patchable config subset, YAML-backed, layered on top of [`super::Config`]'s
//! env-sourced process-identity fields (port, bind address, directories —
//! those require a restart and are never exposed here).
//!
//! Written by the management API's partial-key-replacement scheme: the
//! on-disk document is parsed into a generic [`serde_yaml::Value`], only the
//! touched key is replaced, and the full document is re-serialized.
//! Comments survive as long as their key isn't touched, but are not
//! otherwise preserved — no crate in reach performs comment-preserving YAML
//! rewriting, so full round-tripping is explicitly out of scope.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;

use super::error::{ConfigError, ConfigResult};

/// Cache limits, exclude patterns, and per-credential priority overrides —
/// the subset of configuration that is safe to hot-patch without a restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagementConfig {
    #[serde(default = "default_response_cache_max_size")]
    pub response_cache_max_size: usize,
    #[serde(default)]
    pub response_cache_max_bytes: u64,
    #[serde(default = "default_response_cache_ttl_secs")]
    pub response_cache_ttl_secs: u64,
    #[serde(default)]
    pub response_cache_exclude_models: Vec<String>,

    #[serde(default = "default_prompt_cache_max_size")]
    pub prompt_cache_max_size: usize,
    #[serde(default)]
    pub prompt_cache_max_bytes: u64,
    #[serde(default = "default_prompt_cache_ttl_secs")]
    pub prompt_cache_ttl_secs: u64,

    /// Credential id -> priority, applied over whatever priority is already
    /// recorded in the credential's own file at pool-load time.
    #[serde(default)]
    pub credential_priorities: HashMap<String, i32>,
}

fn default_response_cache_max_size() -> usize {
    10_000
}

fn default_response_cache_ttl_secs() -> u64 {
    3600
}

fn default_prompt_cache_max_size() -> usize {
    5_000
}

fn default_prompt_cache_ttl_secs() -> u64 {
    3600
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            response_cache_max_size: default_response_cache_max_size(),
            response_cache_max_bytes: 0,
            response_cache_ttl_secs: default_response_cache_ttl_secs(),
            response_cache_exclude_models: Vec::new(),
            prompt_cache_max_size: default_prompt_cache_max_size(),
            prompt_cache_max_bytes: 0,
            prompt_cache_ttl_secs: default_prompt_cache_ttl_secs(),
            credential_priorities: HashMap::new(),
        }
    }
}

impl ManagementConfig {
    /// Loads `path`, falling back to defaults if the file doesn't exist yet
    /// (a fresh deployment has no hot-patch history).
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::ManagementRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::ManagementDecode {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overwrites the whole document with this value, serialized in full.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let text = serde_yaml::to_string(self).map_err(|source| ConfigError::ManagementDecode {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(|source| ConfigError::ManagementWrite {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Replaces one top-level key in the on-disk YAML document (creating it
    /// if absent) and returns the reparsed, patched config. Every other key
    /// in the document is left untouched.
    pub fn patch_key(path: &Path, key: &str, value: YamlValue) -> ConfigResult<Self> {
        let mut doc: YamlValue = if path.exists() {
            let text = fs::read_to_string(path).map_err(|source| ConfigError::ManagementRead {
                path: path.to_path_buf(),
                source,
            })?;
            serde_yaml::from_str(&text).map_err(|source| ConfigError::ManagementDecode {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            YamlValue::Mapping(serde_yaml::Mapping::new())
        };

        let mapping = doc.as_mapping_mut().ok_or(ConfigError::ManagementNotAMapping)?;
        mapping.insert(YamlValue::String(key.to_string()), value);

        let parsed: Self = serde_yaml::from_value(doc.clone()).map_err(|source| ConfigError::ManagementDecode {
            path: path.to_path_buf(),
            source,
        })?;

        let text = serde_yaml::to_string(&doc).map_err(|source| ConfigError::ManagementDecode {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(|source| ConfigError::ManagementWrite {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("management.yaml");
        assert_eq!(ManagementConfig::load(&path).unwrap(), ManagementConfig::default());
    }

    #[test]
    fn patch_key_preserves_other_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("management.yaml");

        ManagementConfig::patch_key(&path, "response_cache_max_size", YamlValue::Number(500.into())).unwrap();
        let patched = ManagementConfig::patch_key(
            &path,
            "prompt_cache_max_size",
            YamlValue::Number(250.into()),
        )
        .unwrap();

        assert_eq!(patched.response_cache_max_size, 500);
        assert_eq!(patched.prompt_cache_max_size, 250);
    }

    #[test]
    fn patch_key_round_trips_exclude_models() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("management.yaml");
        let models = YamlValue::Sequence(vec![YamlValue::String("gpt-4o".to_string())]);
        let patched = ManagementConfig::patch_key(&path, "response_cache_exclude_models", models).unwrap();
        assert_eq!(patched.response_cache_exclude_models, vec!["gpt-4o".to_string()]);

        let reloaded = ManagementConfig::load(&path).unwrap();
        assert_eq!(reloaded, patched);
    }
}
