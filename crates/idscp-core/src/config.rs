//! Configuration management

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Remote attestation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttestationConfig {
    /// Prover mechanisms this peer can run, in preference order
    pub supported_rat_suite: Vec<String>,
    /// Verifier mechanisms this peer accepts from the remote, in preference order
    pub expected_rat_suite: Vec<String>,
    /// Interval after which an established connection re-attests its peer
    pub rat_timeout_secs: u64,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            supported_rat_suite: vec!["Dummy".to_string()],
            expected_rat_suite: vec!["Dummy".to_string()],
            rat_timeout_secs: 600,
        }
    }
}

impl AttestationConfig {
    pub fn rat_timeout(&self) -> Duration {
        Duration::from_secs(self.rat_timeout_secs)
    }
}

/// Per-connection IDSCP2 configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Idscp2Configuration {
    pub attestation: AttestationConfig,
    pub handshake_timeout_ms: u64,
    pub prover_handshake_timeout_ms: u64,
    pub verifier_handshake_timeout_ms: u64,
    /// Delay granted to the peer to deliver a fresh DAT after ours expired
    pub dat_expired_handshake_delay_ms: u64,
}

impl Default for Idscp2Configuration {
    fn default() -> Self {
        Self {
            attestation: AttestationConfig::default(),
            handshake_timeout_ms: 5_000,
            prover_handshake_timeout_ms: 5_000,
            verifier_handshake_timeout_ms: 5_000,
            dat_expired_handshake_delay_ms: 5_000,
        }
    }
}

impl Idscp2Configuration {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attestation.supported_rat_suite.is_empty() {
            return Err(ConfigError::Invalid(
                "attestation.supported_rat_suite must not be empty".to_string(),
            ));
        }

        if self.attestation.expected_rat_suite.is_empty() {
            return Err(ConfigError::Invalid(
                "attestation.expected_rat_suite must not be empty".to_string(),
            ));
        }

        if self.attestation.rat_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "attestation.rat_timeout_secs must be > 0".to_string(),
            ));
        }

        for (name, value) in [
            ("handshake_timeout_ms", self.handshake_timeout_ms),
            ("prover_handshake_timeout_ms", self.prover_handshake_timeout_ms),
            ("verifier_handshake_timeout_ms", self.verifier_handshake_timeout_ms),
            ("dat_expired_handshake_delay_ms", self.dat_expired_handshake_delay_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be > 0", name)));
            }
        }

        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn prover_handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.prover_handshake_timeout_ms)
    }

    pub fn verifier_handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.verifier_handshake_timeout_ms)
    }

    pub fn dat_expired_handshake_delay(&self) -> Duration {
        Duration::from_millis(self.dat_expired_handshake_delay_ms)
    }

    pub fn rat_timeout(&self) -> Duration {
        self.attestation.rat_timeout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Idscp2Configuration::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.handshake_timeout(), Duration::from_secs(5));
        assert_eq!(config.rat_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Idscp2Configuration::from_toml_str(
            r#"
            handshake_timeout_ms = 2500

            [attestation]
            supported_rat_suite = ["TPM2d", "Dummy"]
            rat_timeout_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.handshake_timeout(), Duration::from_millis(2500));
        assert_eq!(config.attestation.supported_rat_suite, vec!["TPM2d", "Dummy"]);
        assert_eq!(config.attestation.expected_rat_suite, vec!["Dummy"]);
        assert_eq!(config.rat_timeout(), Duration::from_secs(60));
        assert_eq!(config.verifier_handshake_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_empty_suite_rejected() {
        let err = Idscp2Configuration::from_toml_str(
            r#"
            [attestation]
            expected_rat_suite = []
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = Idscp2Configuration {
            prover_handshake_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml() {
        let err = Idscp2Configuration::from_toml_str("handshake_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = Idscp2Configuration::load("/nonexistent/idscp2.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
