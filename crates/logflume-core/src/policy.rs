//! Sampling-policy document model and content-hash versioning.
//!
//! The config service serves the document as opaque bytes; agents parse it
//! here. Versions are the first 8 bytes of the SHA-256 of the raw bytes in
//! hex, so a document's version changes if and only if its content does.
//! Clients treat versions as opaque equality tokens.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::PolicyError;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_secs(10);
pub const DEFAULT_BATCH_MAX_ENTRIES: usize = 100;
pub const DEFAULT_BATCH_SIZE_KB: usize = 256;

/// Stamps a document with its content-hash version (16 hex chars).
pub fn version_of(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// One content override: the first rule whose `pattern` is a substring of
/// the message replaces the base rate.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRule {
    pub pattern: String,
    pub rate: f64,
}

/// Immutable snapshot of the live agent policy.
///
/// The config poller builds a fresh snapshot off-path and publishes it with
/// an atomic swap; samplers take a cheap reference per entry and never hold
/// a lock across the random draw.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingPolicy {
    /// Content-hash version of the document this snapshot came from; empty
    /// for the built-in defaults.
    pub version: String,
    pub poll_interval: Duration,
    pub batch_window: Duration,
    pub batch_size_kb: usize,
    pub base_rates: HashMap<String, f64>,
    pub content_rules: Vec<ContentRule>,
}

impl Default for SamplingPolicy {
    /// Built-in defaults used until a document is first served: keep-all
    /// rates, 60 s polling, 10 s batch window.
    fn default() -> Self {
        Self {
            version: String::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_window: DEFAULT_BATCH_WINDOW,
            batch_size_kb: DEFAULT_BATCH_SIZE_KB,
            base_rates: HashMap::new(),
            content_rules: Vec::new(),
        }
    }
}

impl SamplingPolicy {
    /// Parses a served document. The returned snapshot carries the
    /// content-hash version of `payload`.
    pub fn from_yaml(payload: &[u8]) -> Result<Self, PolicyError> {
        let raw: RawDocument = serde_yaml::from_slice(payload)?;

        for (level, rate) in &raw.sampling.base_rates {
            validate_rate(format!("base_rates.{level}"), *rate)?;
        }
        let mut content_rules = Vec::with_capacity(raw.sampling.content_rules.len());
        for rule in raw.sampling.content_rules {
            validate_rate(format!("content_rules[{:?}]", rule.pattern), rule.rate)?;
            content_rules.push(ContentRule {
                pattern: rule.pattern,
                rate: rule.rate,
            });
        }

        let poll_interval = match raw.agent_settings.poll_interval {
            Some(ref value) => parse_duration("poll_interval", value)?,
            None => DEFAULT_POLL_INTERVAL,
        };
        let batch_window = match raw.agent_settings.batch_window {
            Some(ref value) => parse_duration("batch_window", value)?,
            None => DEFAULT_BATCH_WINDOW,
        };
        let batch_size_kb = raw
            .agent_settings
            .batch_size_kb
            .unwrap_or(DEFAULT_BATCH_SIZE_KB);

        Ok(Self {
            version: version_of(payload),
            poll_interval,
            batch_window,
            batch_size_kb,
            base_rates: raw.sampling.base_rates,
            content_rules,
        })
    }

    /// Effective sampling rate for one entry: base rate by level (1.0 when
    /// the level is not listed), overridden by the first matching content
    /// rule.
    pub fn rate_for(&self, level: &str, message: &str) -> f64 {
        let mut rate = self.base_rates.get(level).copied().unwrap_or(1.0);
        for rule in &self.content_rules {
            if message.contains(&rule.pattern) {
                rate = rule.rate;
                break;
            }
        }
        rate
    }
}

fn validate_rate(subject: String, rate: f64) -> Result<(), PolicyError> {
    if !(0.0..=1.0).contains(&rate) || rate.is_nan() {
        return Err(PolicyError::RateOutOfRange { subject, rate });
    }
    Ok(())
}

/// Parses duration strings of the form `"500ms"`, `"10s"`, `"2m"`.
pub fn parse_duration(field: &'static str, value: &str) -> Result<Duration, PolicyError> {
    let value = value.trim();
    let invalid = || PolicyError::InvalidDuration {
        field,
        value: value.to_string(),
    };

    let (number, unit) = value
        .find(|c: char| !c.is_ascii_digit())
        .map(|idx| value.split_at(idx))
        .ok_or_else(invalid)?;
    let number: u64 = number.parse().map_err(|_| invalid())?;
    match unit {
        "ms" => Ok(Duration::from_millis(number)),
        "s" => Ok(Duration::from_secs(number)),
        "m" => Ok(Duration::from_secs(number * 60)),
        _ => Err(invalid()),
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    #[serde(default)]
    #[allow(dead_code)]
    version: String,
    #[serde(default)]
    agent_settings: RawAgentSettings,
    #[serde(default)]
    sampling: RawSampling,
}

#[derive(Debug, Default, Deserialize)]
struct RawAgentSettings {
    #[serde(default)]
    poll_interval: Option<String>,
    #[serde(default)]
    batch_size_kb: Option<usize>,
    #[serde(default)]
    batch_window: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSampling {
    #[serde(default)]
    base_rates: HashMap<String, f64>,
    #[serde(default)]
    content_rules: Vec<RawContentRule>,
}

#[derive(Debug, Deserialize)]
struct RawContentRule {
    pattern: String,
    rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version: "v3"
agent_settings:
  poll_interval: "30s"
  batch_size_kb: 128
  batch_window: "5s"
sampling:
  base_rates:
    ERROR: 1.0
    WARN: 1.0
    INFO: 0.5
    DEBUG: 0.0
  content_rules:
    - pattern: "payment"
      rate: 1.0
    - pattern: "heartbeat"
      rate: 0.0
"#;

    #[test]
    fn version_is_first_eight_hash_bytes_in_hex() {
        let version = version_of(b"hello");
        assert_eq!(version.len(), 16);
        assert!(version.chars().all(|c| c.is_ascii_hexdigit()));
        // Stable for identical content, different for different content.
        assert_eq!(version, version_of(b"hello"));
        assert_ne!(version, version_of(b"hello!"));
    }

    #[test]
    fn parses_full_document() {
        let policy = SamplingPolicy::from_yaml(SAMPLE.as_bytes()).unwrap();
        assert_eq!(policy.poll_interval, Duration::from_secs(30));
        assert_eq!(policy.batch_window, Duration::from_secs(5));
        assert_eq!(policy.batch_size_kb, 128);
        assert_eq!(policy.base_rates["INFO"], 0.5);
        assert_eq!(policy.content_rules.len(), 2);
        assert_eq!(policy.version, version_of(SAMPLE.as_bytes()));
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let policy = SamplingPolicy::from_yaml(b"version: \"v1\"").unwrap();
        assert_eq!(policy.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(policy.batch_window, DEFAULT_BATCH_WINDOW);
        assert_eq!(policy.batch_size_kb, DEFAULT_BATCH_SIZE_KB);
        assert!(policy.base_rates.is_empty());
    }

    #[test]
    fn unlisted_level_defaults_to_keep_all() {
        let policy = SamplingPolicy::from_yaml(SAMPLE.as_bytes()).unwrap();
        assert_eq!(policy.rate_for("UNKNOWN", "anything"), 1.0);
    }

    #[test]
    fn first_matching_content_rule_wins() {
        let policy = SamplingPolicy::from_yaml(SAMPLE.as_bytes()).unwrap();
        // "payment" matches the first rule even though DEBUG would drop it.
        assert_eq!(policy.rate_for("DEBUG", "payment declined"), 1.0);
        assert_eq!(policy.rate_for("ERROR", "heartbeat ok"), 0.0);
        assert_eq!(policy.rate_for("INFO", "no rule matches"), 0.5);
    }

    #[test]
    fn out_of_range_rate_is_rejected() {
        let doc = b"sampling:\n  base_rates:\n    INFO: 1.5\n";
        assert!(matches!(
            SamplingPolicy::from_yaml(doc),
            Err(PolicyError::RateOutOfRange { .. })
        ));
    }

    #[test]
    fn malformed_yaml_is_rejected() {
        assert!(SamplingPolicy::from_yaml(b"sampling: [not a map").is_err());
    }

    #[test]
    fn duration_strings() {
        assert_eq!(
            parse_duration("t", "500ms").unwrap(),
            Duration::from_millis(500)
        );
        assert_eq!(parse_duration("t", "10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("t", "2m").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("t", "10").is_err());
        assert!(parse_duration("t", "fast").is_err());
        assert!(parse_duration("t", "10h").is_err());
    }
}
