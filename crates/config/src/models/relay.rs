use crate::validation::{ConfigValidator, FieldRules, ValidationUtils};
use serde::{Deserialize, Serialize};

/// Time-clock terminal settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub address: String,
    pub port: u16,
    pub timeout_seconds: u64,
    /// Base URL of the terminal's transaction export.
    pub source_url: String,
    pub page_size: u32,
    pub auth_token: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: "192.168.41.155".to_string(),
            port: 4370,
            timeout_seconds: 5,
            source_url: "http://192.168.41.155:80".to_string(),
            page_size: 500,
            auth_token: None,
        }
    }
}

impl ConfigValidator for DeviceConfig {
    fn check_fields(&mut self, rules: &mut FieldRules) {
        let defaults = Self::default();
        rules.check(&mut self.address, defaults.address, "device.address", |v, f| {
            ValidationUtils::validate_not_empty(v, f)
        });
        rules.check(&mut self.port, defaults.port, "device.port", |v, f| {
            ValidationUtils::validate_port(*v, f)
        });
        rules.check(&mut self.timeout_seconds, defaults.timeout_seconds, "device.timeout_seconds", |v, f| {
            ValidationUtils::validate_seconds(*v, f, 300)
        });
        rules.check(&mut self.source_url, defaults.source_url, "device.source_url", |v, f| {
            ValidationUtils::validate_http_url(v, f)
        });
        rules.check(&mut self.page_size, defaults.page_size, "device.page_size", |v, f| {
            ValidationUtils::validate_count(*v, f, 10_000)
        });
    }
}

/// Remote attendance API settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub url: String,
    pub max_retries: u32,
    /// Backoff base: attempt `n` (0-based) waits `retry_delay_seconds * (n + 1)`.
    pub retry_delay_seconds: u64,
    pub request_timeout_seconds: u64,
    pub probe_timeout_seconds: u64,
    /// Disables TLS certificate validation. Only for terminals behind
    /// self-signed gateways; never enable against a public endpoint.
    pub insecure_skip_verify: bool,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000/api/pointages".to_string(),
            max_retries: 3,
            retry_delay_seconds: 10,
            request_timeout_seconds: 30,
            probe_timeout_seconds: 10,
            insecure_skip_verify: false,
            user_agent: concat!("punch-relay/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ConfigValidator for ApiConfig {
    fn check_fields(&mut self, rules: &mut FieldRules) {
        let defaults = Self::default();
        rules.check(&mut self.url, defaults.url, "api.url", |v, f| {
            ValidationUtils::validate_http_url(v, f)
        });
        rules.check(&mut self.max_retries, defaults.max_retries, "api.max_retries", |v, f| {
            ValidationUtils::validate_count(*v, f, 20)
        });
        rules.check(
            &mut self.retry_delay_seconds,
            defaults.retry_delay_seconds,
            "api.retry_delay_seconds",
            |v, f| ValidationUtils::validate_at_most(*v, f, 600),
        );
        rules.check(
            &mut self.request_timeout_seconds,
            defaults.request_timeout_seconds,
            "api.request_timeout_seconds",
            |v, f| ValidationUtils::validate_seconds(*v, f, 600),
        );
        rules.check(
            &mut self.probe_timeout_seconds,
            defaults.probe_timeout_seconds,
            "api.probe_timeout_seconds",
            |v, f| ValidationUtils::validate_seconds(*v, f, 600),
        );
        rules.check(&mut self.user_agent, defaults.user_agent, "api.user_agent", |v, f| {
            ValidationUtils::validate_not_empty(v, f)
        });
    }
}

/// Scheduling and circuit-breaker settings of the sync service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub poll_interval_seconds: u64,
    /// Consecutive failed cycles before the service stops itself.
    pub max_errors: u32,
    pub shutdown_grace_seconds: u64,
    /// Fetch window used until the first successful delivery.
    pub initial_lookback_hours: u32,
    /// Fire the first cycle immediately on start instead of after one interval.
    pub sync_on_startup: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 300,
            max_errors: 5,
            shutdown_grace_seconds: 10,
            initial_lookback_hours: 24,
            sync_on_startup: true,
        }
    }
}

impl ConfigValidator for ServiceConfig {
    fn check_fields(&mut self, rules: &mut FieldRules) {
        let defaults = Self::default();
        rules.check(
            &mut self.poll_interval_seconds,
            defaults.poll_interval_seconds,
            "service.poll_interval_seconds",
            |v, f| ValidationUtils::validate_seconds(*v, f, 86_400),
        );
        rules.check(&mut self.max_errors, defaults.max_errors, "service.max_errors", |v, f| {
            ValidationUtils::validate_count(*v, f, 1_000)
        });
        rules.check(
            &mut self.shutdown_grace_seconds,
            defaults.shutdown_grace_seconds,
            "service.shutdown_grace_seconds",
            |v, f| ValidationUtils::validate_seconds(*v, f, 300),
        );
        rules.check(
            &mut self.initial_lookback_hours,
            defaults.initial_lookback_hours,
            "service.initial_lookback_hours",
            |v, f| ValidationUtils::validate_count(*v, f, 24 * 366),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(DeviceConfig::default().sanitize().is_empty());
        assert!(ApiConfig::default().sanitize().is_empty());
        assert!(ServiceConfig::default().sanitize().is_empty());
    }

    #[test]
    fn test_api_config_sanitize() {
        let mut invalid = ApiConfig {
            url: "localhost:8000".to_string(),
            max_retries: 0,
            retry_delay_seconds: 0,
            ..ApiConfig::default()
        };
        assert_eq!(
            invalid.sanitize(),
            vec!["api.url".to_string(), "api.max_retries".to_string()]
        );
        assert_eq!(invalid.url, "http://localhost:8000/api/pointages");
        assert_eq!(invalid.max_retries, 3);
        assert_eq!(invalid.retry_delay_seconds, 0);

        let mut slow = ApiConfig {
            retry_delay_seconds: 601,
            ..ApiConfig::default()
        };
        assert_eq!(slow.sanitize(), vec!["api.retry_delay_seconds".to_string()]);
        assert_eq!(slow.retry_delay_seconds, 10);
    }

    #[test]
    fn test_service_sanitize_falls_back_per_field() {
        let mut config = ServiceConfig {
            poll_interval_seconds: 0,
            max_errors: 3,
            shutdown_grace_seconds: 10_000,
            initial_lookback_hours: 48,
            sync_on_startup: false,
        };
        let replaced = config.sanitize();

        assert_eq!(config.poll_interval_seconds, 300);
        assert_eq!(config.max_errors, 3);
        assert_eq!(config.shutdown_grace_seconds, 10);
        assert_eq!(config.initial_lookback_hours, 48);
        assert!(!config.sync_on_startup);
        assert_eq!(
            replaced,
            vec![
                "service.poll_interval_seconds".to_string(),
                "service.shutdown_grace_seconds".to_string()
            ]
        );
    }

    #[test]
    fn test_device_sanitize_keeps_valid_values() {
        let mut config = DeviceConfig {
            address: "10.0.0.20".to_string(),
            port: 0,
            ..DeviceConfig::default()
        };
        let replaced = config.sanitize();

        assert_eq!(config.address, "10.0.0.20");
        assert_eq!(config.port, 4370);
        assert_eq!(replaced, vec!["device.port".to_string()]);
    }
}
