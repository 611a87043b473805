//! Persistent key/value view over [`AppConfig`].
//!
//! The store owns the config file: it writes the default set on first run,
//! merges partial updates and keeps the effective configuration in memory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::info;

use crate::{AppConfig, ConfigError, ConfigResult, ConfigValidator};

/// Keys accepted by older deployments, mapped to their current location.
const LEGACY_KEYS: &[(&str, &str)] = &[
    ("zkteco_ip", "device.address"),
    ("zkteco_port", "device.port"),
    ("timeout", "device.timeout_seconds"),
    ("api_url", "api.url"),
    ("max_retries", "api.max_retries"),
    ("polling_interval", "service.poll_interval_seconds"),
    ("sync_on_startup", "service.sync_on_startup"),
];

/// A set of `dotted.key = value` updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigPatch {
    entries: BTreeMap<String, String>,
}

impl ConfigPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Parses `key=value` pairs as given on a command line.
    pub fn parse_pairs<S: AsRef<str>>(pairs: &[S]) -> ConfigResult<Self> {
        let mut patch = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ConfigError::Parse(format!("expected key=value, got '{pair}'"))
            })?;
            patch = patch.set(key.trim(), value.trim());
        }
        Ok(patch)
    }

    fn apply_to(&self, config: &AppConfig) -> ConfigResult<AppConfig> {
        let mut tree = serde_json::to_value(config)?;
        for (key, raw) in &self.entries {
            let key = canonical_key(key);
            let slot = key
                .split('.')
                .try_fold(&mut tree, |node, part| node.get_mut(part))
                .ok_or_else(|| ConfigError::Validation(format!("unknown configuration key: {key}")))?;
            *slot = coerce_like(slot, raw);
        }
        Ok(serde_json::from_value(tree)?)
    }
}

fn canonical_key(key: &str) -> &str {
    LEGACY_KEYS
        .iter()
        .find(|(legacy, _)| *legacy == key)
        .map(|(_, current)| *current)
        .unwrap_or(key)
}

/// Interprets `raw` with the JSON type of the value it replaces. Unset slots
/// are optional strings, so an empty value clears them and anything else is
/// kept verbatim.
fn coerce_like(current: &Value, raw: &str) -> Value {
    match current {
        Value::String(_) => Value::String(raw.to_string()),
        Value::Null if raw.is_empty() => Value::Null,
        Value::Null => Value::String(raw.to_string()),
        _ => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}

pub struct ConfigStore {
    path: Option<PathBuf>,
    current: RwLock<AppConfig>,
}

impl ConfigStore {
    /// Opens the config file, writing the default set first if it does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, AppConfig::default().to_toml()?)?;
            info!(path = %path.display(), "Wrote default configuration");
        }

        let config = AppConfig::load(Some(path.as_path()))?;
        Ok(Self {
            path: Some(path),
            current: RwLock::new(config),
        })
    }

    /// A store that never touches the filesystem.
    pub fn in_memory(mut config: AppConfig) -> Self {
        config.sanitize();
        Self {
            path: None,
            current: RwLock::new(config),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn snapshot(&self) -> AppConfig {
        self.current.read().await.clone()
    }

    /// Applies `patch`, falls back to defaults for invalid values, persists
    /// and returns the new effective configuration.
    pub async fn update(&self, patch: &ConfigPatch) -> ConfigResult<AppConfig> {
        let mut current = self.current.write().await;
        let mut updated = patch.apply_to(&current)?;
        updated.sanitize();

        if let Some(path) = &self.path {
            std::fs::write(path, updated.to_toml()?)?;
        }
        *current = updated.clone();
        info!("Configuration updated");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let patch = ConfigPatch::parse_pairs(&["api.url = http://a/b", "device.port=4371"]).unwrap();
        assert_eq!(
            patch,
            ConfigPatch::new()
                .set("api.url", "http://a/b")
                .set("device.port", "4371")
        );
        assert!(ConfigPatch::parse_pairs(&["no-separator"]).is_err());
    }

    #[tokio::test]
    async fn test_open_writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");

        let store = ConfigStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.snapshot().await, AppConfig::load(Some(path.as_path())).unwrap());

        std::fs::write(&path, "[service]\npoll_interval_seconds = 60\n").unwrap();
        let reopened = ConfigStore::open(&path).unwrap();
        assert_eq!(reopened.snapshot().await.service.poll_interval_seconds, 60);
    }

    #[tokio::test]
    async fn test_update_persists_and_coerces_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        let store = ConfigStore::open(&path).unwrap();

        let patch = ConfigPatch::new()
            .set("device.port", "4380")
            .set("api.insecure_skip_verify", "true")
            .set("device.auth_token", "abc123");
        let updated = store.update(&patch).await.unwrap();

        assert_eq!(updated.device.port, 4380);
        assert!(updated.api.insecure_skip_verify);
        assert_eq!(updated.device.auth_token.as_deref(), Some("abc123"));

        let reloaded = AppConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(reloaded.device.port, 4380);
    }

    #[tokio::test]
    async fn test_update_keeps_numeric_token_as_text() {
        let store = ConfigStore::in_memory(AppConfig::default());
        let updated = store
            .update(&ConfigPatch::new().set("device.auth_token", "123456"))
            .await
            .unwrap();
        assert_eq!(updated.device.auth_token.as_deref(), Some("123456"));

        let updated = store
            .update(&ConfigPatch::new().set("device.auth_token", "007"))
            .await
            .unwrap();
        assert_eq!(updated.device.auth_token.as_deref(), Some("007"));
    }

    #[tokio::test]
    async fn test_update_accepts_legacy_keys() {
        let store = ConfigStore::in_memory(AppConfig::default());
        let patch = ConfigPatch::new()
            .set("zkteco_ip", "192.168.43.33")
            .set("polling_interval", "180");
        let updated = store.update(&patch).await.unwrap();

        assert_eq!(updated.device.address, "192.168.43.33");
        assert_eq!(updated.service.poll_interval_seconds, 180);
    }

    #[tokio::test]
    async fn test_update_invalid_value_falls_back() {
        let store = ConfigStore::in_memory(AppConfig::default());
        let updated = store
            .update(&ConfigPatch::new().set("service.poll_interval_seconds", "0"))
            .await
            .unwrap();
        assert_eq!(updated.service.poll_interval_seconds, 300);
    }

    #[tokio::test]
    async fn test_update_rejects_unknown_key() {
        let store = ConfigStore::in_memory(AppConfig::default());
        let result = store.update(&ConfigPatch::new().set("api.password", "x")).await;
        assert!(matches!(result, Err(ConfigError::Validation(_))));
        assert_eq!(store.snapshot().await, AppConfig::default());
    }
}
