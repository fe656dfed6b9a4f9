//! Error types shared across the workspace.

/// Errors raised while reading or validating environment configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Errors raised while parsing or validating a sampling-policy document.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("malformed policy document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid duration {value:?} for {field}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("sampling rate {rate} for {subject} is outside [0.0, 1.0]")]
    RateOutOfRange { subject: String, rate: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::InvalidValue {
            name: "HEALTH_PORT",
            value: "not-a-port".to_string(),
        };
        assert_eq!(err.to_string(), "invalid value for HEALTH_PORT: not-a-port");
    }

    #[test]
    fn policy_error_display() {
        let err = PolicyError::RateOutOfRange {
            subject: "base_rates.INFO".to_string(),
            rate: 1.5,
        };
        assert!(err.to_string().contains("outside [0.0, 1.0]"));
    }
}
