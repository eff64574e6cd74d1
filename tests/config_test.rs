//! Integration tests for configuration loading

use carshare::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "test-site"

[server]
bind_address = "127.0.0.1"
port = 9090

[handover]
owner_may_initiate = true

[reminders]
enabled = false
interval_secs = 600
webhook_url = "http://hooks.test/reminders"
timeout_ms = 1500

[mqtt]
enabled = true
host = "test-host"
port = 1884
topic_prefix = "fleet/test"
username = "svc"
password = "pw"

[audit]
file = "/tmp/carshare-audit.jsonl"

[admin]
token = "s3cret"

[metrics]
interval_secs = 15

[store]
seed_file = "config/seed.json"
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-site");
    assert_eq!(config.bind_address(), "127.0.0.1");
    assert_eq!(config.server_port(), 9090);
    assert!(config.owner_may_initiate());
    assert!(!config.reminders_enabled());
    assert_eq!(config.reminder_interval_secs(), 600);
    assert_eq!(config.reminder_webhook_url(), Some("http://hooks.test/reminders"));
    assert_eq!(config.reminder_timeout_ms(), 1500);
    assert!(config.mqtt_enabled());
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_topic_prefix(), "fleet/test");
    assert_eq!(config.mqtt_username(), Some("svc"));
    assert_eq!(config.mqtt_password(), Some("pw"));
    assert_eq!(config.audit_file(), "/tmp/carshare-audit.jsonl");
    assert_eq!(config.admin_token(), Some("s3cret"));
    assert_eq!(config.metrics_interval_secs(), 15);
    assert_eq!(config.seed_file(), Some("config/seed.json"));
}

#[test]
fn test_partial_file_keeps_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[site]\nid = \"gaborone\"\n\n[admin]\ntoken = \"\"\n").unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();
    assert_eq!(config.site_id(), "gaborone");
    assert_eq!(config.server_port(), 8080);
    assert!(!config.owner_may_initiate());
    assert_eq!(config.admin_token(), None);
}

#[test]
fn test_invalid_toml_is_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[server\nport = ").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.config_file(), "default");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert!(!config.mqtt_enabled());
    assert!(config.reminders_enabled());
    assert_eq!(config.admin_token(), None);
}

#[test]
fn test_builders_override_file_values() {
    let config = Config::default()
        .with_admin_token("ops")
        .with_audit_file("/var/log/carshare/audit.jsonl")
        .with_owner_may_initiate(true);
    assert_eq!(config.admin_token(), Some("ops"));
    assert_eq!(config.audit_file(), "/var/log/carshare/audit.jsonl");
    assert!(config.owner_may_initiate());
}

#[test]
fn test_load_uses_flag_path() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[site]\nid = \"flagged\"").unwrap();

    let config = Config::load(temp_file.path().to_str());
    assert_eq!(config.site_id(), "flagged");
    assert_eq!(config.config_file(), temp_file.path().display().to_string());
}
