//! Configuration for outputs and their shared transport settings.

use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::{TlsOptions, TransportOptions};

/// Configuration file read by [`Config::load`].
pub const CONFIG_FILE: &str = "outpost.toml";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "OUTPOST_";

/// Content type sent when an output does not configure one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A provider failed or a value has the wrong type.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// Values parsed but are inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Settings shared by every output, plus the outputs themselves.
///
/// Loaded in priority order:
/// 1. Environment variables prefixed `OUTPOST_` (highest priority)
/// 2. Configuration file (`outpost.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// # Example
///
/// ```no_run
/// use outpost_delivery::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
/// println!("{} outputs configured", config.outputs.len());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding `ca.crt`, `client.crt` and `client.key` for outputs
    /// with mutual TLS enabled.
    ///
    /// Environment variable: `OUTPOST_MUTUAL_TLS_FILES_PATH`
    #[serde(default = "default_mutual_tls_files_path")]
    pub mutual_tls_files_path: PathBuf,

    /// Whole-request timeout in seconds, 0 disables it.
    ///
    /// Environment variable: `OUTPOST_REQUEST_TIMEOUT_SECONDS`
    #[serde(default)]
    pub request_timeout_seconds: u64,

    /// Connect timeout in seconds, 0 disables it.
    ///
    /// Environment variable: `OUTPOST_CONNECT_TIMEOUT_SECONDS`
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// User agent sent with every post.
    ///
    /// Environment variable: `OUTPOST_USER_AGENT`
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Log filter used when `RUST_LOG` is unset.
    ///
    /// Environment variable: `OUTPOST_LOG_LEVEL`
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Configured destinations.
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
}

/// One destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Label used for logging and statistics.
    pub kind: String,

    /// Absolute URL to post to.
    pub address: String,

    /// Present a client certificate and trust only the configured CA.
    #[serde(default)]
    pub mutual_tls: bool,

    /// Verify the server certificate when mutual TLS is disabled.
    #[serde(default = "default_true")]
    pub check_cert: bool,

    /// Overrides [`DEFAULT_CONTENT_TYPE`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Extra headers sent with every post.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl OutputConfig {
    /// Creates an output with default TLS settings and no extra headers.
    pub fn new(kind: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            address: address.into(),
            mutual_tls: false,
            check_cert: true,
            content_type: None,
            headers: BTreeMap::new(),
        }
    }

    /// TLS flags for this output.
    pub fn tls_options(&self) -> TlsOptions {
        TlsOptions { mutual_tls: self.mutual_tls, check_cert: self.check_cert }
    }
}

impl Config {
    /// Load configuration from defaults, `outpost.toml` and environment
    /// variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(CONFIG_FILE)
    }

    /// Same as [`Config::load`] with an explicit configuration file. A
    /// missing file is not an error.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to the transport builder's options.
    pub fn to_transport_options(&self) -> TransportOptions {
        TransportOptions {
            timeout: non_zero_seconds(self.request_timeout_seconds),
            connect_timeout: non_zero_seconds(self.connect_timeout_seconds),
            user_agent: self.user_agent.clone(),
        }
    }

    /// Finds an output by kind.
    pub fn output(&self, kind: &str) -> Option<&OutputConfig> {
        self.outputs.iter().find(|o| o.kind == kind)
    }

    /// Validate configuration values.
    ///
    /// Addresses are only checked for presence; URL parsing happens when the
    /// client for that output is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid("user_agent must not be empty".into()));
        }

        if self.request_timeout_seconds > 0
            && self.connect_timeout_seconds > self.request_timeout_seconds
        {
            return Err(ConfigError::Invalid(
                "connect_timeout_seconds cannot exceed request_timeout_seconds".into(),
            ));
        }

        let mut seen = HashSet::new();
        for output in &self.outputs {
            if output.kind.trim().is_empty() {
                return Err(ConfigError::Invalid("output kind must not be empty".into()));
            }
            if output.address.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "output {:?} has an empty address",
                    output.kind
                )));
            }
            if !seen.insert(output.kind.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "output {:?} is configured more than once",
                    output.kind
                )));
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mutual_tls_files_path: default_mutual_tls_files_path(),
            request_timeout_seconds: 0,
            connect_timeout_seconds: default_connect_timeout(),
            user_agent: default_user_agent(),
            log_level: default_log_level(),
            outputs: Vec::new(),
        }
    }
}

fn non_zero_seconds(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

fn default_mutual_tls_files_path() -> PathBuf {
    PathBuf::from("/etc/certs")
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!("outpost/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, env, fs, sync::Mutex};

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct TestEnvGuard {
        _lock: std::sync::MutexGuard<'static, ()>,
        vars: Vec<String>,
        originals: HashMap<String, Option<String>>,
    }

    impl TestEnvGuard {
        fn new() -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Self { _lock: lock, vars: Vec::new(), originals: HashMap::new() }
        }

        fn set_var(&mut self, key: &str, value: &str) {
            if !self.vars.contains(&key.to_string()) {
                self.originals.insert(key.to_string(), env::var(key).ok());
                self.vars.push(key.to_string());
            }
            env::set_var(key, value);
        }
    }

    impl Drop for TestEnvGuard {
        fn drop(&mut self) {
            for var in &self.vars {
                match self.originals.get(var) {
                    Some(Some(value)) => env::set_var(var, value),
                    Some(None) => env::remove_var(var),
                    None => {},
                }
            }
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.mutual_tls_files_path, PathBuf::from("/etc/certs"));
        assert!(config.user_agent.starts_with("outpost/"));

        let options = config.to_transport_options();
        assert_eq!(options.timeout, None);
        assert_eq!(options.connect_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn loads_outputs_from_toml_file() {
        let _guard = TestEnvGuard::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outpost.toml");
        fs::write(
            &path,
            r#"
            mutual_tls_files_path = "/srv/outpost/certs"
            request_timeout_seconds = 30

            [[outputs]]
            kind = "webhook"
            address = "https://hooks.example.com/events"
            mutual_tls = true

            [[outputs]]
            kind = "alertmanager"
            address = "http://alertmanager:9093/api/v2/alerts"
            check_cert = false
            content_type = "application/json"
            headers = { "X-Api-Key" = "secret" }
            "#,
        )
        .unwrap();

        let config = Config::load_from(&path).expect("config should load");

        assert_eq!(config.mutual_tls_files_path, PathBuf::from("/srv/outpost/certs"));
        assert_eq!(config.to_transport_options().timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.outputs.len(), 2);

        let webhook = config.output("webhook").unwrap();
        assert!(webhook.mutual_tls);
        assert!(webhook.check_cert);
        assert_eq!(webhook.content_type, None);

        let alertmanager = config.output("alertmanager").unwrap();
        assert!(!alertmanager.mutual_tls);
        assert!(!alertmanager.check_cert);
        assert_eq!(alertmanager.content_type.as_deref(), Some("application/json"));
        assert_eq!(alertmanager.headers["X-Api-Key"], "secret");
    }

    #[test]
    fn env_overrides_file_values() {
        let mut guard = TestEnvGuard::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outpost.toml");
        fs::write(&path, "user_agent = \"from-file\"\nconnect_timeout_seconds = 3\n").unwrap();

        guard.set_var("OUTPOST_USER_AGENT", "from-env");
        guard.set_var("OUTPOST_MUTUAL_TLS_FILES_PATH", "/tmp/outpost-certs");

        let config = Config::load_from(&path).expect("config should load with env overrides");

        assert_eq!(config.user_agent, "from-env");
        assert_eq!(config.mutual_tls_files_path, PathBuf::from("/tmp/outpost-certs"));
        assert_eq!(config.connect_timeout_seconds, 3);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let _guard = TestEnvGuard::new();
        let dir = tempfile::tempdir().unwrap();

        let config = Config::load_from(dir.path().join("absent.toml")).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn rejects_duplicate_output_kinds() {
        let mut config = Config::default();
        config.outputs.push(OutputConfig::new("webhook", "http://a.example.com"));
        config.outputs.push(OutputConfig::new("webhook", "http://b.example.com"));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn rejects_empty_kind_and_address() {
        let mut config = Config::default();
        config.outputs.push(OutputConfig::new(" ", "http://a.example.com"));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.outputs.push(OutputConfig::new("webhook", ""));
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_connect_timeout_above_request_timeout() {
        let config = Config {
            request_timeout_seconds: 5,
            connect_timeout_seconds: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let unbounded = Config { request_timeout_seconds: 0, ..config };
        assert!(unbounded.validate().is_ok());
    }

    #[test]
    fn rejects_empty_user_agent() {
        let config = Config { user_agent: String::new(), ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn output_tls_options_follow_flags() {
        let mut output = OutputConfig::new("webhook", "https://hooks.example.com");
        assert_eq!(output.tls_options(), TlsOptions { mutual_tls: false, check_cert: true });

        output.mutual_tls = true;
        output.check_cert = false;
        assert_eq!(output.tls_options(), TlsOptions { mutual_tls: true, check_cert: false });
    }
}
