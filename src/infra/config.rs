//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Deployment identifier used as the metrics `site` label
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "carshare".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: default_bind_address(), port: default_server_port() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HandoverConfig {
    /// Let car owners start pickup/return handovers (renter-only when false)
    #[serde(default)]
    pub owner_may_initiate: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemindersConfig {
    #[serde(default = "default_reminders_enabled")]
    pub enabled: bool,
    #[serde(default = "default_reminder_interval")]
    pub interval_secs: u64,
    /// Webhook receiving reminder notifications (POST JSON); none disables delivery
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_reminder_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_reminders_enabled() -> bool {
    true
}

fn default_reminder_interval() -> u64 {
    3600
}

fn default_reminder_timeout_ms() -> u64 {
    5000
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            enabled: default_reminders_enabled(),
            interval_secs: default_reminder_interval(),
            webhook_url: None,
            timeout_ms: default_reminder_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Publish realtime handover events and location updates
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Topics are `<prefix>/handover/<session_id>/{location,events}`
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_topic_prefix() -> String {
    "carshare".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic_prefix: default_topic_prefix(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// File path for the audit trail (JSONL format)
    #[serde(default = "default_audit_file")]
    pub file: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { file: default_audit_file() }
    }
}

fn default_audit_file() -> String {
    "audit.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdminConfig {
    /// Bearer token for /admin endpoints; admin routes are refused when unset
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreConfig {
    /// JSON file with bookings, sessions and promo codes loaded at startup
    #[serde(default)]
    pub seed_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub handover: HandoverConfig,
    #[serde(default)]
    pub reminders: RemindersConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    bind_address: String,
    server_port: u16,
    owner_may_initiate: bool,
    reminders_enabled: bool,
    reminder_interval_secs: u64,
    reminder_webhook_url: Option<String>,
    reminder_timeout_ms: u64,
    mqtt_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic_prefix: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    audit_file: String,
    admin_token: Option<String>,
    metrics_interval_secs: u64,
    seed_file: Option<String>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            bind_address: toml_config.server.bind_address,
            server_port: toml_config.server.port,
            owner_may_initiate: toml_config.handover.owner_may_initiate,
            reminders_enabled: toml_config.reminders.enabled,
            reminder_interval_secs: toml_config.reminders.interval_secs,
            reminder_webhook_url: toml_config.reminders.webhook_url,
            reminder_timeout_ms: toml_config.reminders.timeout_ms,
            mqtt_enabled: toml_config.mqtt.enabled,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic_prefix: toml_config.mqtt.topic_prefix,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            audit_file: toml_config.audit.file,
            admin_token: toml_config.admin.token.filter(|t| !t.is_empty()),
            metrics_interval_secs: toml_config.metrics.interval_secs,
            seed_file: toml_config.store.seed_file,
            config_file,
        }
    }

    /// Determine config file path from the --config flag or environment
    pub fn resolve_config_path(cli_path: Option<&str>) -> String {
        if let Some(path) = cli_path {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(cli_path: Option<&str>) -> Self {
        Self::load_from_path(Self::resolve_config_path(cli_path))
    }

    /// Load from an explicit path, falling back to defaults on any error
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn owner_may_initiate(&self) -> bool {
        self.owner_may_initiate
    }

    pub fn reminders_enabled(&self) -> bool {
        self.reminders_enabled
    }

    pub fn reminder_interval_secs(&self) -> u64 {
        self.reminder_interval_secs
    }

    pub fn reminder_webhook_url(&self) -> Option<&str> {
        self.reminder_webhook_url.as_deref()
    }

    pub fn reminder_timeout_ms(&self) -> u64 {
        self.reminder_timeout_ms
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt_enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic_prefix(&self) -> &str {
        &self.mqtt_topic_prefix
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn audit_file(&self) -> &str {
        &self.audit_file
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn seed_file(&self) -> Option<&str> {
        self.seed_file.as_deref()
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the admin token
    pub fn with_admin_token(mut self, token: &str) -> Self {
        self.admin_token = Some(token.to_string());
        self
    }

    /// Builder method for tests to redirect the audit file
    pub fn with_audit_file(mut self, file: &str) -> Self {
        self.audit_file = file.to_string();
        self
    }

    /// Builder method for tests to point MQTT at a specific broker
    pub fn with_mqtt_broker(mut self, host: &str, port: u16) -> Self {
        self.mqtt_host = host.to_string();
        self.mqtt_port = port;
        self
    }

    /// Builder method for tests to allow owner-initiated handovers
    pub fn with_owner_may_initiate(mut self, allowed: bool) -> Self {
        self.owner_may_initiate = allowed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "carshare");
        assert_eq!(config.bind_address(), "0.0.0.0");
        assert_eq!(config.server_port(), 8080);
        assert!(!config.owner_may_initiate());
        assert!(config.reminders_enabled());
        assert_eq!(config.reminder_interval_secs(), 3600);
        assert!(config.reminder_webhook_url().is_none());
        assert!(!config.mqtt_enabled());
        assert_eq!(config.mqtt_topic_prefix(), "carshare");
        assert_eq!(config.audit_file(), "audit.jsonl");
        assert!(config.admin_token().is_none());
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_empty_admin_token_is_unset() {
        let toml_config: TomlConfig = toml::from_str("[admin]\ntoken = \"\"\n").unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert!(config.admin_token().is_none());
    }

    #[test]
    fn test_resolve_config_path_prefers_flag() {
        assert_eq!(Config::resolve_config_path(Some("config/prod.toml")), "config/prod.toml");
    }

    #[test]
    fn test_audit_file_default() {
        let audit = AuditConfig::default();
        assert_eq!(audit.file, "audit.jsonl");
        assert!(!audit.file.is_empty());
    }
}
