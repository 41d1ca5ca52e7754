//! Fabric configuration.
//!
//! Aggregates configuration into a single Config struct that can be loaded
//! from YAML files or environment variables. Core components never read the
//! environment themselves; they receive the pieces they need at construction.

mod error_codes;
mod scope;

pub use error_codes::{ErrorCodeMapping, ErrorCodesConfig, ErrorKind};
pub use scope::{arn_resource_name, AccountScope};

use serde::Deserialize;

use crate::error::Result;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "fanout.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "FANOUT_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "FANOUT";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "FANOUT_LOG";

/// Long-poll wait per receive call, seconds.
pub const DEFAULT_WAIT_TIME_SECS: i32 = 20;
/// Visibility lease for received messages, seconds.
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: i32 = 600;

/// What to do with a message whose body cannot be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeFailurePolicy {
    /// Leave it in the queue; it reappears after the lease and can be
    /// redriven by a backend dead-letter policy.
    #[default]
    Retain,
    /// Delete it so it is never redelivered.
    Discard,
}

/// Receive-side settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConsumeConfig {
    /// Long-poll wait per receive call.
    pub wait_time_secs: i32,
    /// Visibility lease applied to received messages.
    pub visibility_timeout_secs: i32,
    /// `ReceiveMessageWaitTimeSeconds` set on queues the reconciler creates.
    pub queue_wait_time_secs: i32,
    /// Handling of undecodable bodies.
    pub decode_failures: DecodeFailurePolicy,
}

impl Default for ConsumeConfig {
    fn default() -> Self {
        Self {
            wait_time_secs: DEFAULT_WAIT_TIME_SECS,
            visibility_timeout_secs: DEFAULT_VISIBILITY_TIMEOUT_SECS,
            queue_wait_time_secs: DEFAULT_WAIT_TIME_SECS,
            decode_failures: DecodeFailurePolicy::Retain,
        }
    }
}

/// Settings for the `fanout-tail` binary.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    /// Subscriber channels to tail.
    pub channels: Vec<String>,
    /// Messages requested per receive call (clamped to 10).
    pub max_messages: i32,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            max_messages: 10,
        }
    }
}

/// Main fabric configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Account and region for identity derivation.
    pub scope: AccountScope,
    /// Custom endpoint URL (for LocalStack or testing).
    pub endpoint_url: Option<String>,
    /// Receive-side settings.
    pub consume: ConsumeConfig,
    /// Status/code mapping per backend family.
    pub error_codes: ErrorCodesConfig,
    /// `fanout-tail` settings.
    pub tail: TailConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `fanout.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                // Values stay strings so account ids keep leading zeros;
                // numeric fields are converted on deserialize.
                Environment::with_prefix(CONFIG_ENV_PREFIX).separator("__"),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self {
            scope: AccountScope::new("123456789012", "us-east-1"),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.consume.wait_time_secs, 20);
        assert_eq!(config.consume.visibility_timeout_secs, 600);
        assert_eq!(config.consume.decode_failures, DecodeFailurePolicy::Retain);
        assert_eq!(config.error_codes.topic, ErrorCodeMapping::sns());
        assert_eq!(config.error_codes.queue, ErrorCodeMapping::sqs());
        assert!(config.endpoint_url.is_none());
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "scope:\n  account: \"000000000000\"\n  region: eu-central-1\n\
             endpoint_url: http://localhost:4566\n\
             consume:\n  visibility_timeout_secs: 30\n  decode_failures: discard\n\
             tail:\n  channels: [billing, audit]"
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();

        assert_eq!(config.scope, AccountScope::new("000000000000", "eu-central-1"));
        assert_eq!(config.endpoint_url.as_deref(), Some("http://localhost:4566"));
        assert_eq!(config.consume.visibility_timeout_secs, 30);
        assert_eq!(config.consume.wait_time_secs, 20);
        assert_eq!(config.consume.decode_failures, DecodeFailurePolicy::Discard);
        assert_eq!(config.tail.channels, vec!["billing", "audit"]);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "scope:\n  account: \"111111111111\"\n  region: us-east-1").unwrap();

        std::env::set_var("FANOUT__SCOPE__REGION", "ap-southeast-2");
        let config = Config::load(file.path().to_str());
        std::env::remove_var("FANOUT__SCOPE__REGION");

        let config = config.unwrap();
        assert_eq!(config.scope.account, "111111111111");
        assert_eq!(config.scope.region, "ap-southeast-2");
    }

    #[test]
    #[serial]
    fn test_env_account_keeps_leading_zero() {
        std::env::set_var("FANOUT__SCOPE__ACCOUNT", "012345678901");
        std::env::set_var("FANOUT__SCOPE__REGION", "us-east-1");
        std::env::set_var("FANOUT__CONSUME__WAIT_TIME_SECS", "5");
        let config = Config::load(None);
        std::env::remove_var("FANOUT__SCOPE__ACCOUNT");
        std::env::remove_var("FANOUT__SCOPE__REGION");
        std::env::remove_var("FANOUT__CONSUME__WAIT_TIME_SECS");

        let config = config.unwrap();
        assert_eq!(config.scope.account, "012345678901");
        assert_eq!(
            config.scope.topic_arn("orders"),
            "arn:aws:sns:us-east-1:012345678901:orders"
        );
        assert_eq!(config.consume.wait_time_secs, 5);
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_error() {
        assert!(Config::load(Some("/nonexistent/fanout-config.yaml")).is_err());
    }
}
