//! Configuration management
//!
//! This module provides YAML-based configuration management with support for:
//! - Environment variable overrides
//! - Multiple configuration file locations
//! - Default values for all settings
//! - Executable plugin paths

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Renewal window used when none is configured
pub const DEFAULT_ALLOW_RENEWAL_DAYS: u32 = 14;

/// Client certificate lifetime used when none is configured
pub const DEFAULT_CLIENT_VALIDITY_DAYS: u32 = 365;

/// Main configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ScepConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub plugins: PluginConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Issuance settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Static shared secret clients must present; unset disables the check
    #[serde(default)]
    pub challenge_password: Option<String>,
    /// Password protecting the CA key in the depot
    #[serde(default)]
    pub ca_key_password: String,
    /// Days before expiry in which a certificate may be renewed (0 disables renewal)
    #[serde(default = "default_allow_renewal_days")]
    pub allow_renewal_days: u32,
    /// Lifetime of issued client certificates
    #[serde(default = "default_client_validity_days")]
    pub client_validity_days: u32,
}

fn default_allow_renewal_days() -> u32 {
    DEFAULT_ALLOW_RENEWAL_DAYS
}

fn default_client_validity_days() -> u32 {
    DEFAULT_CLIENT_VALIDITY_DAYS
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            challenge_password: None,
            ca_key_password: String::new(),
            allow_renewal_days: default_allow_renewal_days(),
            client_validity_days: default_client_validity_days(),
        }
    }
}

/// Executable plugins
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PluginConfig {
    #[serde(default)]
    pub csr_verifier: Option<PathBuf>,
    #[serde(default)]
    pub ca_chooser: Option<PathBuf>,
    #[serde(default)]
    pub subject_filter: Option<PathBuf>,
    /// Kill plugins that run longer than this; unset waits forever
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl PluginConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Log output target (console or file)
    #[serde(default = "default_log_target")]
    pub target: LogTarget,
    /// Directory for log files (used when target is "file")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Log file name prefix (default: "scep-server")
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    /// Enable daily log rotation
    #[serde(default = "default_log_rotation")]
    pub daily_rotation: bool,
}

/// Log output target
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Log to console (stdout) - default for development
    #[default]
    Console,
    /// Log to file with optional rotation - recommended for production
    File,
    /// Log to both console and file
    Both,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_log_target() -> LogTarget {
    LogTarget::Console
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/scep")
}

fn default_log_prefix() -> String {
    "scep-server".to_string()
}

fn default_log_rotation() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: default_log_target(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            daily_rotation: default_log_rotation(),
        }
    }
}

impl ScepConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values
    /// 2. Configuration file (YAML)
    /// 3. Environment variables (prefixed with SCEP_)
    pub fn load() -> Result<Self> {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        // Check for config path override from environment
        let config_path = std::env::var("SCEP_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(Self::find_config_file);

        let mut config = match config_path {
            Some(ref path) if path.exists() => {
                eprintln!("[CONFIG] Loading configuration from: {:?}", path);
                Self::from_file(path)?
            }
            Some(ref path) => {
                eprintln!("[CONFIG] Config file not found: {:?}, using defaults", path);
                ScepConfig::default()
            }
            None => ScepConfig::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Parse a YAML configuration file without applying overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_norway::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            // Current directory
            PathBuf::from("config.yaml"),
            PathBuf::from("config/scep.yaml"),
            // System config directory
            PathBuf::from("/etc/scep/config.yaml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("scep/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    /// Apply environment variable overrides read through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Service overrides
        if let Some(password) = lookup("SCEP_CHALLENGE_PASSWORD") {
            self.service.challenge_password = Some(password);
        }
        if let Some(password) = lookup("SCEP_CA_KEY_PASSWORD") {
            self.service.ca_key_password = password;
        }
        if let Some(days) = lookup("SCEP_ALLOW_RENEWAL_DAYS") {
            if let Ok(d) = days.parse() {
                self.service.allow_renewal_days = d;
            }
        }
        if let Some(days) = lookup("SCEP_CLIENT_VALIDITY_DAYS") {
            if let Ok(d) = days.parse() {
                self.service.client_validity_days = d;
            }
        }

        // Plugin overrides
        if let Some(path) = lookup("SCEP_CSR_VERIFIER_EXEC") {
            self.plugins.csr_verifier = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("SCEP_CA_CHOOSER_EXEC") {
            self.plugins.ca_chooser = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("SCEP_SUBJECT_FILTER_EXEC") {
            self.plugins.subject_filter = Some(PathBuf::from(path));
        }
        if let Some(secs) = lookup("SCEP_PLUGIN_TIMEOUT_SECS") {
            if let Ok(s) = secs.parse() {
                self.plugins.timeout_secs = Some(s);
            }
        }

        // Logging overrides
        if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("SCEP_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.service.client_validity_days == 0 {
            anyhow::bail!("Client certificate validity must be at least one day");
        }

        if self.plugins.timeout_secs == Some(0) {
            anyhow::bail!("Plugin timeout cannot be 0");
        }

        let plugins = [
            ("CSR verifier", &self.plugins.csr_verifier),
            ("CA chooser", &self.plugins.ca_chooser),
            ("Subject filter", &self.plugins.subject_filter),
        ];
        for (name, path) in plugins {
            if let Some(path) = path {
                if !path.exists() {
                    anyhow::bail!("{} executable not found: {:?}", name, path);
                }
            }
        }

        Ok(())
    }
}
