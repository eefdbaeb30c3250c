//! TOML configuration for the courier binary
//!
//! ```toml
//! [broker]
//! url = "mqtt://broker.example:1883"
//! keepalive_secs = 60
//! max_retry = 3
//! retry_interval_secs = 5
//! username_env = "MQTT_USERNAME"
//! password_env = "MQTT_PASSWORD"
//!
//! [tls]
//! ca_file = "/etc/ssl/ca.pem"
//!
//! [[subscriptions]]
//! topic = "sensors/#"
//! qos = 1
//!
//! [outbound]
//! topic = "chat/room1"
//! qos = 0
//! greeting = "hello"
//! ```

use crate::client::connection::MAX_KEEPALIVE_SECS;
use crate::client::{ClientOptions, ConnectionConfig};
use crate::transport::{qos_from_level, Credentials, QoS, TlsFiles};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub broker: BrokerSection,
    pub tls: Option<TlsSection>,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionEntry>,
    pub outbound: Option<OutboundSection>,
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// `mqtt://host[:port]` or `mqtts://host[:port]`; takes precedence over
    /// `host`/`port`
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
}

fn default_keepalive_secs() -> u64 {
    60
}

fn default_max_retry() -> u32 {
    3
}

fn default_retry_interval_secs() -> u64 {
    5
}

/// TLS material paths
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TlsSection {
    pub ca_file: PathBuf,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionEntry {
    pub topic: String,
    #[serde(default)]
    pub qos: u8,
}

/// Where stdin lines are published
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundSection {
    pub topic: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
    /// Published once after the first successful connect
    pub greeting: Option<String>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde can't express
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker_endpoint()?;

        for entry in &self.subscriptions {
            if entry.topic.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "subscription topic must not be empty".to_string(),
                ));
            }
            check_qos(entry.qos, &entry.topic)?;
        }

        if let Some(outbound) = &self.outbound {
            if outbound.topic.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "outbound topic must not be empty".to_string(),
                ));
            }
            if outbound.topic.contains(['+', '#']) {
                return Err(ConfigError::InvalidConfig(format!(
                    "outbound topic '{}' must not contain wildcards",
                    outbound.topic
                )));
            }
            check_qos(outbound.qos, &outbound.topic)?;
        }

        if let Some(tls) = &self.tls {
            if tls.cert_file.is_some() != tls.key_file.is_some() {
                return Err(ConfigError::InvalidConfig(
                    "[tls] cert_file and key_file must be given together".to_string(),
                ));
            }
        }

        if self.broker.keepalive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "keepalive_secs must be greater than 0".to_string(),
            ));
        }
        if self.broker.keepalive_secs > MAX_KEEPALIVE_SECS {
            return Err(ConfigError::InvalidConfig(format!(
                "keepalive_secs must be at most {MAX_KEEPALIVE_SECS}"
            )));
        }
        if self.broker.retry_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry_interval_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve host, port and whether the URL asked for TLS
    pub fn broker_endpoint(&self) -> Result<(String, u16, bool), ConfigError> {
        if let Some(raw) = &self.broker.url {
            return parse_broker_url(raw);
        }

        match &self.broker.host {
            Some(host) if !host.is_empty() => {
                Ok((host.clone(), self.broker.port.unwrap_or(1883), false))
            }
            _ => Err(ConfigError::InvalidConfig(
                "[broker] needs either url or host".to_string(),
            )),
        }
    }

    /// Replace the broker address, e.g. from a command-line flag
    pub fn override_broker(&mut self, url: &str) -> Result<(), ConfigError> {
        parse_broker_url(url)?;
        self.broker.url = Some(url.to_string());
        Ok(())
    }

    /// Credentials with environment variables taking precedence over inline
    /// values
    pub fn credentials(&self) -> Result<Option<Credentials>, ConfigError> {
        let username = Self::get_env_var_optional(self.broker.username_env.as_ref())
            .or_else(|| self.broker.username.clone());
        let password = Self::get_env_var_optional(self.broker.password_env.as_ref())
            .or_else(|| self.broker.password.clone());

        match (username, password) {
            (Some(username), password) => {
                Ok(Some(Credentials::new(username, password.unwrap_or_default())))
            }
            (None, _) => match &self.broker.username_env {
                Some(name) => Err(ConfigError::EnvVarNotFound(name.clone())),
                None => Ok(None),
            },
        }
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    pub fn tls_files(&self) -> Option<TlsFiles> {
        self.tls.as_ref().map(|tls| TlsFiles {
            ca_file: tls.ca_file.clone(),
            cert_file: tls.cert_file.clone(),
            key_file: tls.key_file.clone(),
        })
    }

    /// Build the connect parameters this file describes
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        let (host, port, wants_tls) = self.broker_endpoint()?;
        let tls = self.tls_files();
        if wants_tls && tls.is_none() {
            return Err(ConfigError::InvalidConfig(
                "mqtts:// broker requires a [tls] section with ca_file".to_string(),
            ));
        }

        let mut config = ConnectionConfig::new(host)
            .with_port(port)
            .with_keepalive(Duration::from_secs(self.broker.keepalive_secs))
            .with_max_retry(self.broker.max_retry);
        config.credentials = self.credentials()?;
        config.tls = tls;
        Ok(config)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions::default()
            .with_retry_interval(Duration::from_secs(self.broker.retry_interval_secs))
    }

    /// Subscriptions as wire QoS. Levels were checked by `validate`.
    pub fn subscription_list(&self) -> Vec<(String, QoS)> {
        self.subscriptions
            .iter()
            .filter_map(|entry| qos_from_level(entry.qos).map(|qos| (entry.topic.clone(), qos)))
            .collect()
    }

    /// Copy safe to print: inline password masked
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.broker.password.is_some() {
            copy.broker.password = Some("***".to_string());
        }
        copy
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[broker]
url = "mqtt://localhost:1883"

[[subscriptions]]
topic = "test/#"
qos = 1

[outbound]
topic = "test/out"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

impl OutboundSection {
    pub fn qos(&self) -> QoS {
        qos_from_level(self.qos).unwrap_or(QoS::AtMostOnce)
    }
}

fn check_qos(level: u8, topic: &str) -> Result<(), ConfigError> {
    if qos_from_level(level).is_none() {
        return Err(ConfigError::InvalidConfig(format!(
            "QoS {level} for '{topic}' is not one of 0, 1, 2"
        )));
    }
    Ok(())
}

/// Parse `mqtt://host[:port]` / `mqtts://host[:port]`
pub fn parse_broker_url(raw: &str) -> Result<(String, u16, bool), ConfigError> {
    let url = Url::parse(raw).map_err(|_| ConfigError::InvalidBrokerUrl(raw.to_string()))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(ConfigError::InvalidBrokerUrl(raw.to_string())),
    };
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ConfigError::InvalidBrokerUrl(raw.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok((host.to_string(), port, tls))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[broker]
url = "mqtts://broker.example:8884"
keepalive_secs = 30
max_retry = 5
retry_interval_secs = 2
username = "izumi"
password = "123456"

[tls]
ca_file = "/etc/ssl/ca.pem"
cert_file = "/etc/ssl/client.pem"
key_file = "/etc/ssl/client.key"

[[subscriptions]]
topic = "sensors/#"
qos = 1

[[subscriptions]]
topic = "alerts"

[outbound]
topic = "chat/room1"
qos = 1
retain = true
greeting = "hello"
"#;

        let config = ClientConfig::from_toml_str(toml_content).unwrap();

        let connection = config.connection_config().unwrap();
        assert_eq!(connection.host, "broker.example");
        assert_eq!(connection.port, 8884);
        assert_eq!(connection.keepalive, Duration::from_secs(30));
        assert_eq!(connection.max_retry, 5);
        assert_eq!(
            connection.credentials,
            Some(Credentials::new("izumi", "123456"))
        );
        assert!(connection.tls.is_some());

        assert_eq!(
            config.client_options().retry_interval,
            Duration::from_secs(2)
        );
        assert_eq!(
            config.subscription_list(),
            vec![
                ("sensors/#".to_string(), QoS::AtLeastOnce),
                ("alerts".to_string(), QoS::AtMostOnce),
            ]
        );

        let outbound = config.outbound.as_ref().unwrap();
        assert_eq!(outbound.qos(), QoS::AtLeastOnce);
        assert!(outbound.retain);
        assert_eq!(outbound.greeting.as_deref(), Some("hello"));
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = ClientConfig::from_toml_str("[broker]\nhost = \"localhost\"\n").unwrap();

        assert_eq!(config.broker.keepalive_secs, 60);
        assert_eq!(config.broker.max_retry, 3);
        assert_eq!(config.broker.retry_interval_secs, 5);
        assert!(config.subscriptions.is_empty());
        assert!(config.outbound.is_none());

        let (host, port, tls) = config.broker_endpoint().unwrap();
        assert_eq!((host.as_str(), port, tls), ("localhost", 1883, false));
    }

    #[test]
    fn test_url_default_ports() {
        assert_eq!(
            parse_broker_url("mqtt://broker.example").unwrap(),
            ("broker.example".to_string(), 1883, false)
        );
        assert_eq!(
            parse_broker_url("mqtts://broker.example").unwrap(),
            ("broker.example".to_string(), 8883, true)
        );
    }

    #[test]
    fn test_invalid_broker_urls() {
        for raw in ["not a url", "http://broker.example", "mqtt://"] {
            assert!(
                matches!(parse_broker_url(raw), Err(ConfigError::InvalidBrokerUrl(_))),
                "expected {raw} to be rejected"
            );
        }
    }

    #[test]
    fn test_qos_above_two_rejected() {
        let toml_content = r#"
[broker]
host = "localhost"

[[subscriptions]]
topic = "a"
qos = 3
"#;
        let result = ClientConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::InvalidConfig(ref m)) if m.contains("QoS 3")));
    }

    #[test]
    fn test_missing_broker_address_rejected() {
        let result = ClientConfig::from_toml_str("[broker]\nmax_retry = 2\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_keepalive_out_of_range_rejected() {
        for keepalive in ["0", "70000"] {
            let toml_content =
                format!("[broker]\nhost = \"localhost\"\nkeepalive_secs = {keepalive}\n");
            let result = ClientConfig::from_toml_str(&toml_content);
            assert!(
                matches!(result, Err(ConfigError::InvalidConfig(ref m)) if m.contains("keepalive_secs")),
                "expected keepalive_secs = {keepalive} to be rejected"
            );
        }

        let toml_content = "[broker]\nhost = \"localhost\"\nkeepalive_secs = 65535\n";
        assert!(ClientConfig::from_toml_str(toml_content).is_ok());
    }

    #[test]
    fn test_outbound_wildcard_rejected() {
        let toml_content = r#"
[broker]
host = "localhost"

[outbound]
topic = "chat/#"
"#;
        assert!(ClientConfig::from_toml_str(toml_content).is_err());
    }

    #[test]
    fn test_mqtts_without_tls_section() {
        let config =
            ClientConfig::from_toml_str("[broker]\nurl = \"mqtts://broker.example\"\n").unwrap();
        assert!(matches!(
            config.connection_config(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_env_credentials_win_over_inline() {
        std::env::set_var("COURIER_TEST_USER_A", "env-user");
        std::env::set_var("COURIER_TEST_PASS_A", "env-pass");

        let toml_content = r#"
[broker]
host = "localhost"
username = "inline-user"
password = "inline-pass"
username_env = "COURIER_TEST_USER_A"
password_env = "COURIER_TEST_PASS_A"
"#;
        let config = ClientConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(
            config.credentials().unwrap(),
            Some(Credentials::new("env-user", "env-pass"))
        );
    }

    #[test]
    fn test_missing_username_env_var() {
        let toml_content = r#"
[broker]
host = "localhost"
username_env = "COURIER_TEST_USER_DEFINITELY_UNSET"
"#;
        let config = ClientConfig::from_toml_str(toml_content).unwrap();
        assert!(matches!(
            config.credentials(),
            Err(ConfigError::EnvVarNotFound(ref name)) if name == "COURIER_TEST_USER_DEFINITELY_UNSET"
        ));
    }

    #[test]
    fn test_override_broker() {
        let mut config = ClientConfig::test_config();
        config.override_broker("mqtt://other.example:1884").unwrap();
        let (host, port, _) = config.broker_endpoint().unwrap();
        assert_eq!((host.as_str(), port), ("other.example", 1884));

        assert!(config.override_broker("ftp://nope").is_err());
    }

    #[test]
    fn test_redacted_masks_password() {
        let mut config = ClientConfig::test_config();
        config.broker.password = Some("123456".to_string());
        let shown = toml::to_string_pretty(&config.redacted()).unwrap();
        assert!(!shown.contains("123456"));
        assert!(shown.contains("***"));
    }
}
