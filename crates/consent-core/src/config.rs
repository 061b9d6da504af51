//! Consent engine configuration.
//!
//! Parsed from TOML (or built programmatically) and validated before the
//! orchestrator accepts it. Validation is fail-closed: an unknown
//! consent-source strategy name is rejected here rather than silently
//! treated as "no detection".

use serde::{Deserialize, Serialize};

/// Strategy name for live IAB framework detection.
pub const SOURCE_IAB: &str = "iab";

/// Strategy name for partner-supplied static consent data.
pub const SOURCE_STATIC: &str = "static";

/// Consent resolution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentConfig {
    /// Detection strategy: [`SOURCE_IAB`] (live detection) or
    /// [`SOURCE_STATIC`] (caller-supplied data). Any other value fails
    /// validation and makes `refresh` reject.
    #[serde(default = "default_consent_source")]
    pub consent_source: String,

    /// Caller-supplied static consent object, consulted only by the
    /// static strategy. Its shape selects the framework it represents.
    #[serde(default)]
    pub static_data: Option<serde_json::Value>,

    /// Treat storage as allowed even when no consent framework answered.
    /// Feeds rule 1 of the grant decision.
    #[serde(default)]
    pub allow_local_storage_without_consent_api: bool,

    /// Debug override: bypass the grant decision entirely.
    #[serde(default)]
    pub debug_bypass_consent: bool,

    /// Debug override: skip detection altogether and resolve a
    /// forced-by-config [`crate::ConsentData`].
    #[serde(default)]
    pub force_consent_grant: bool,

    /// When using the static strategy, also run live detection in the
    /// background purely to emit a comparison telemetry record. Never
    /// affects the resolved data.
    #[serde(default)]
    pub detection_comparison_telemetry: bool,
}

fn default_consent_source() -> String {
    SOURCE_IAB.to_string()
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            consent_source: default_consent_source(),
            static_data: None,
            allow_local_storage_without_consent_api: false,
            debug_bypass_consent: false,
            force_consent_grant: false,
            detection_comparison_telemetry: false,
        }
    }
}

impl ConsentConfig {
    /// Parses a configuration from a TOML string and validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if:
    /// - `consent_source` is neither `"iab"` nor `"static"`;
    /// - the static strategy is selected without `static_data`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.consent_source.as_str() {
            SOURCE_IAB => Ok(()),
            SOURCE_STATIC if self.static_data.is_none() => Err(ConfigError::Validation(
                "consent_source = \"static\" requires static_data".to_string(),
            )),
            SOURCE_STATIC => Ok(()),
            other => Err(ConfigError::Validation(format!(
                "unknown consent_source '{other}': expected '{SOURCE_IAB}' or '{SOURCE_STATIC}'"
            ))),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_live_detection() {
        let config = ConsentConfig::default();
        assert_eq!(config.consent_source, SOURCE_IAB);
        assert!(config.validate().is_ok());
        assert!(!config.force_consent_grant);
    }

    #[test]
    fn parse_minimal() {
        let config = ConsentConfig::from_toml("").unwrap();
        assert_eq!(config.consent_source, SOURCE_IAB);
    }

    #[test]
    fn parse_static_with_data() {
        let toml = r#"
            consent_source = "static"

            [static_data.getTCData]
            gdprApplies = true
            tcString = "COtest"
        "#;
        let config = ConsentConfig::from_toml(toml).unwrap();
        assert_eq!(config.consent_source, SOURCE_STATIC);
        assert!(config.static_data.is_some());
    }

    #[test]
    fn reject_static_without_data() {
        let result = ConsentConfig::from_toml(r#"consent_source = "static""#);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn reject_unknown_source() {
        let result = ConsentConfig::from_toml(r#"consent_source = "prebid""#);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("prebid"), "got: {err}");
    }

    #[test]
    fn parse_override_flags() {
        let toml = r"
            debug_bypass_consent = true
            allow_local_storage_without_consent_api = true
        ";
        let config = ConsentConfig::from_toml(toml).unwrap();
        assert!(config.debug_bypass_consent);
        assert!(config.allow_local_storage_without_consent_api);
    }
}
