//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.

use mqtt_courier::config::{ClientConfig, ConfigError};
use mqtt_courier::transport::QoS;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[broker]
url = "mqtt://broker.example:1883"
keepalive_secs = 60
max_retry = 3

[[subscriptions]]
topic = "sensors/#"
qos = 1

[outbound]
topic = "chat/room1"
greeting = "hello"
"#
    )
    .unwrap();

    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();
    let connection = config.connection_config().unwrap();

    assert_eq!(connection.host, "broker.example");
    assert_eq!(connection.port, 1883);
    assert_eq!(connection.keepalive, Duration::from_secs(60));
    assert_eq!(connection.max_retry, 3);
    assert_eq!(
        config.subscription_list(),
        vec![("sensors/#".to_string(), QoS::AtLeastOnce)]
    );
    assert_eq!(
        config.outbound.unwrap().greeting.as_deref(),
        Some("hello")
    );
}

#[test]
fn test_config_with_tls_section() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[broker]
url = "mqtts://broker.example"

[tls]
ca_file = "/etc/ssl/ca.pem"
cert_file = "/etc/ssl/client.pem"
key_file = "/etc/ssl/client.key"
"#
    )
    .unwrap();

    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();
    let connection = config.connection_config().unwrap();

    assert_eq!(connection.port, 8883);
    let tls = connection.tls.expect("TLS should be configured");
    assert_eq!(tls.ca_file.to_str(), Some("/etc/ssl/ca.pem"));
    assert!(tls.cert_file.is_some() && tls.key_file.is_some());
}

#[test]
fn test_missing_file_returns_file_read_error() {
    let result = ClientConfig::load_from_file(std::path::Path::new("/nonexistent/courier.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_returns_parse_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[broker\nurl = ").unwrap();

    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_broker_section_is_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[[subscriptions]]\ntopic = \"a\"").unwrap();

    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_cert_without_key_is_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[broker]
host = "localhost"

[tls]
ca_file = "/etc/ssl/ca.pem"
cert_file = "/etc/ssl/client.pem"
"#
    )
    .unwrap();

    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_error_messages_are_descriptive() {
    let error = ConfigError::InvalidBrokerUrl("ftp://x".to_string());
    assert_eq!(error.to_string(), "Invalid broker URL: ftp://x");

    let error = ConfigError::EnvVarNotFound("MQTT_USERNAME".to_string());
    assert!(error.to_string().contains("MQTT_USERNAME"));
}
