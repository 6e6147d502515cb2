use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Join all errors into a single line for logging
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding config.toml
    pub config_dir: PathBuf,

    /// Optional TOML spot catalog; the bundled catalog is used when unset
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub quota: QuotaConfig,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub push: PushConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Base URL of the quota-limited marine point forecast API
    #[serde(default = "default_primary_base_url")]
    pub primary_base_url: String,

    /// API key for the primary provider (usually set via STORMGLASS_KEY).
    /// Without it the chain starts at the secondary provider.
    #[serde(default)]
    pub primary_api_key: Option<String>,

    #[serde(default = "default_primary_timeout_secs")]
    pub primary_timeout_secs: u64,

    /// Base URL of the free marine forecast API
    #[serde(default = "default_secondary_base_url")]
    pub secondary_base_url: String,

    #[serde(default = "default_secondary_timeout_secs")]
    pub secondary_timeout_secs: u64,
}

fn default_primary_base_url() -> String {
    "https://api.stormglass.io/v2".to_string()
}

fn default_primary_timeout_secs() -> u64 {
    8
}

fn default_secondary_base_url() -> String {
    "https://marine-api.open-meteo.com".to_string()
}

fn default_secondary_timeout_secs() -> u64 {
    10
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            primary_base_url: default_primary_base_url(),
            primary_api_key: None,
            primary_timeout_secs: default_primary_timeout_secs(),
            secondary_base_url: default_secondary_base_url(),
            secondary_timeout_secs: default_secondary_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Primary-provider requests allowed per UTC day
    pub daily_cap: u32,
    /// Primary-provider requests allowed per refresh run
    pub per_run_cap: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_cap: 500,
            per_run_cap: 120,
        }
    }
}

/// Which coordinates the alert phase uses to rebuild a cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertKeyMode {
    /// The alert's own spot coordinates
    #[default]
    SpotCoordinates,
    /// The coordinates of the spot's cluster representative
    ClusterRepresentative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Pause between two clusters that need a fetch
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Interval of the in-process scheduler used by `serve` (0 disables it)
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,

    #[serde(default)]
    pub alert_key_mode: AlertKeyMode,

    /// Rows that expired longer ago than this are purged after a scheduled run
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,
}

fn default_request_delay_ms() -> u64 {
    300
}

fn default_interval_minutes() -> u32 {
    240
}

fn default_retention_hours() -> u32 {
    24
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: default_request_delay_ms(),
            interval_minutes: default_interval_minutes(),
            alert_key_mode: AlertKeyMode::default(),
            retention_hours: default_retention_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database shared by the forecast cache, quota ledger and alert tables
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("swellsync");
        Self {
            database_path: data_dir.join("swellsync.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Web push gateway endpoint; dispatch is disabled when unset
    #[serde(default)]
    pub gateway_url: Option<String>,

    #[serde(default)]
    pub gateway_token: Option<String>,

    #[serde(default = "default_push_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_push_timeout_secs() -> u64 {
    10
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            gateway_url: None,
            gateway_token: None,
            timeout_secs: default_push_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,

    /// Shared secret expected as `Authorization: Bearer <secret>` on the
    /// manual refresh trigger (usually set via CRON_SECRET)
    #[serde(default)]
    pub cron_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),
            cron_secret: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("swellsync");

        Self {
            config_dir,
            catalog_path: None,
            providers: ProvidersConfig::default(),
            quota: QuotaConfig::default(),
            refresh: RefreshConfig::default(),
            storage: StorageConfig::default(),
            push: PushConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing,
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            let config = Self::default();
            config.save_to(&config_path)?;
            config
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a config file without touching the environment
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Config =
            toml::from_str(&contents).map_err(|e| ConfigError::Malformed(e.to_string()))?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// With `path`, that file is read instead of the default location (it
    /// must exist). Warnings are logged; errors abort loading.
    pub fn load_validated(path: Option<&Path>) -> Result<(Self, ValidationResult)> {
        let config = match path {
            Some(path) => {
                let mut config = Self::load_from(path)?;
                config.apply_env_overrides();
                config
            }
            None => Self::load()?,
        };
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Secrets and deployment-specific values normally come from the environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("STORMGLASS_KEY").filter(|v| !v.is_empty()) {
            self.providers.primary_api_key = Some(key);
        }
        if let Some(secret) = lookup("CRON_SECRET").filter(|v| !v.is_empty()) {
            self.server.cron_secret = Some(secret);
        }
        if let Some(path) = lookup("SWELLSYNC_DB").filter(|v| !v.is_empty()) {
            self.storage.database_path = PathBuf::from(path);
        }
        if let Some(url) = lookup("PUSH_GATEWAY_URL").filter(|v| !v.is_empty()) {
            self.push.gateway_url = Some(url);
        }
        if let Some(token) = lookup("PUSH_GATEWAY_TOKEN").filter(|v| !v.is_empty()) {
            self.push.gateway_token = Some(token);
        }
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(
            &self.providers.primary_base_url,
            "providers.primary_base_url",
            &mut result,
        );
        self.validate_url(
            &self.providers.secondary_base_url,
            "providers.secondary_base_url",
            &mut result,
        );

        if self.providers.primary_api_key.is_none() {
            result.add_warning(
                "providers.primary_api_key",
                "No primary API key - forecasts will come from the secondary provider only",
            );
        }

        if self.providers.primary_timeout_secs == 0 || self.providers.secondary_timeout_secs == 0 {
            result.add_error("providers", "Provider timeouts must be greater than 0");
        }

        if self.quota.daily_cap == 0 {
            result.add_error("quota.daily_cap", "Daily cap must be greater than 0");
        }
        if self.quota.per_run_cap == 0 {
            result.add_error("quota.per_run_cap", "Per-run cap must be greater than 0");
        } else if self.quota.per_run_cap > self.quota.daily_cap {
            result.add_error(
                "quota.per_run_cap",
                format!(
                    "Per-run cap ({}) exceeds the daily cap ({})",
                    self.quota.per_run_cap, self.quota.daily_cap
                ),
            );
        }

        if self.refresh.interval_minutes == 0 {
            result.add_warning(
                "refresh.interval_minutes",
                "Scheduled refresh disabled (0 minutes)",
            );
        } else if self.refresh.interval_minutes < 60 {
            result.add_warning(
                "refresh.interval_minutes",
                "Refreshing more often than hourly wastes the request budget",
            );
        }

        match &self.push.gateway_url {
            Some(url) => self.validate_url(url, "push.gateway_url", &mut result),
            None => result.add_warning(
                "push.gateway_url",
                "No push gateway configured - alert notifications are disabled",
            ),
        }

        if self.server.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            result.add_error(
                "server.bind_addr",
                format!("Invalid socket address: {}", self.server.bind_addr),
            );
        }

        if self.server.cron_secret.is_none() {
            result.add_warning(
                "server.cron_secret",
                "No cron secret - the manual refresh trigger is unauthenticated",
            );
        }

        if let Some(path) = &self.catalog_path {
            if !path.exists() {
                result.add_error(
                    "catalog_path",
                    format!("Catalog file does not exist: {}", path.display()),
                );
            }
        }

        result
    }

    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }
                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("swellsync");

        Ok(config_dir.join("config.toml"))
    }
}
