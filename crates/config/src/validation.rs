use tracing::warn;

use crate::ConfigResult;

/// A configuration section whose fields each carry one validation rule.
pub trait ConfigValidator {
    /// Runs the rule of every field through `rules`.
    fn check_fields(&mut self, rules: &mut FieldRules);

    /// Replaces every invalid field with its default; returns the replaced field names.
    fn sanitize(&mut self) -> Vec<String> {
        let mut rules = FieldRules::default();
        self.check_fields(&mut rules);
        rules.replaced
    }
}

/// Collects the fields a sanitize pass had to reset.
#[derive(Debug, Default)]
pub struct FieldRules {
    replaced: Vec<String>,
}

impl FieldRules {
    /// Resets `value` to `default` when `rule` rejects it.
    pub fn check<T>(
        &mut self,
        value: &mut T,
        default: T,
        field_name: &str,
        rule: impl FnOnce(&T, &str) -> ConfigResult<()>,
    ) {
        if let Err(e) = rule(value, field_name) {
            warn!(field = field_name, "{e}, using default");
            *value = default;
            self.replaced.push(field_name.to_string());
        }
    }
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Validate that a port number is valid
    pub fn validate_port(port: u16, field_name: &str) -> ConfigResult<()> {
        if port == 0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} cannot be 0"
            )));
        }
        Ok(())
    }

    /// Validate that a duration in seconds lies in `1..=max`
    pub fn validate_seconds(value: u64, field_name: &str, max: u64) -> ConfigResult<()> {
        if value == 0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if value > max {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be less than or equal to {max}"
            )));
        }
        Ok(())
    }

    /// Validate that a count lies in `1..=max`
    pub fn validate_count(count: u32, field_name: &str, max: u32) -> ConfigResult<()> {
        if count == 0 || count > max {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be between 1 and {max}"
            )));
        }
        Ok(())
    }

    /// Validate an http(s) URL
    pub fn validate_http_url(value: &str, field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(value, field_name)?;
        if !(value.starts_with("http://") || value.starts_with("https://")) {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must start with http:// or https://"
            )));
        }
        Ok(())
    }

    /// Validate that a value does not exceed `max`; zero is allowed
    pub fn validate_at_most(value: u64, field_name: &str, max: u64) -> ConfigResult<()> {
        if value > max {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be less than or equal to {max}"
            )));
        }
        Ok(())
    }
}
