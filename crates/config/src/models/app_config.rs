use config::builder::DefaultState;
use config::{Config as ConfigBuilder, ConfigBuilder as LayerBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::warn;

use super::{
    logging::LogConfig,
    relay::{ApiConfig, DeviceConfig, ServiceConfig},
};
use crate::validation::{ConfigValidator, FieldRules};
use crate::{ConfigError, ConfigResult};

/// Environment variables override file values, e.g. `RELAY_API__URL`.
pub const ENV_PREFIX: &str = "RELAY";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub api: ApiConfig,
    pub service: ServiceConfig,
    pub logging: LogConfig,
}

impl AppConfig {
    /// Layers defaults, the TOML file at `config_path` (when present) and the
    /// environment, then replaces invalid values with their defaults.
    pub fn load(config_path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = Self::defaults_layer()?;

        if let Some(path) = config_path {
            if path.exists() {
                builder = builder.add_source(File::new(&path.to_string_lossy(), FileFormat::Toml));
            } else {
                return Err(ConfigError::File(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Self::from_layers(builder.build()?)
    }

    /// Parses a TOML document over the defaults, without the environment.
    pub fn from_toml(toml_str: &str) -> ConfigResult<Self> {
        let layered = Self::defaults_layer()?
            .add_source(File::from_str(toml_str, FileFormat::Toml))
            .build()?;
        Self::from_layers(layered)
    }

    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn defaults_layer() -> ConfigResult<LayerBuilder<DefaultState>> {
        Ok(ConfigBuilder::builder().add_source(ConfigBuilder::try_from(&AppConfig::default())?))
    }

    fn from_layers(layered: ConfigBuilder) -> ConfigResult<Self> {
        let mut config = match layered.clone().try_deserialize::<AppConfig>() {
            Ok(config) => config,
            Err(e) => {
                warn!("Malformed configuration ({e}), falling back per field");
                let raw: Value = layered.try_deserialize()?;
                repair_fields(&raw)?
            }
        };
        config.sanitize();
        Ok(config)
    }
}

/// Rebuilds a config from `raw`, keeping every field that deserializes on its
/// own and leaving the default in place of every other one.
fn repair_fields(raw: &Value) -> ConfigResult<AppConfig> {
    let defaults = serde_json::to_value(AppConfig::default())?;
    let mut repaired = defaults.clone();

    let Value::Object(sections) = &defaults else {
        return Ok(AppConfig::default());
    };
    for (section, fields) in sections {
        let Value::Object(fields) = fields else {
            continue;
        };
        for (key, default) in fields {
            let Some(given) = raw.get(section).and_then(|s| s.get(key)) else {
                continue;
            };
            let mut candidate = repaired.clone();
            candidate[section.as_str()][key.as_str()] = coerce_scalar(default, given);
            if serde_json::from_value::<AppConfig>(candidate.clone()).is_ok() {
                repaired = candidate;
            } else {
                warn!(
                    field = %format!("{section}.{key}"),
                    given = %given,
                    "Unreadable configuration value, using default"
                );
            }
        }
    }

    Ok(serde_json::from_value(repaired)?)
}

/// Environment values arrive as strings when they do not parse; give them a
/// second chance as the JSON type of the default.
fn coerce_scalar(default: &Value, given: &Value) -> Value {
    match (default, given) {
        (Value::Number(_) | Value::Bool(_), Value::String(s)) => {
            serde_json::from_str(s.trim()).unwrap_or_else(|_| given.clone())
        }
        _ => given.clone(),
    }
}

impl ConfigValidator for AppConfig {
    fn check_fields(&mut self, rules: &mut FieldRules) {
        self.device.check_fields(rules);
        self.api.check_fields(rules);
        self.service.check_fields(rules);
    }
}
