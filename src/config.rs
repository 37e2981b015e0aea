//! Provider configuration.
//!
//! Read from a TOML file (by default `~/.config/vmconverge/provider.toml`),
//! then overridden by the `PM_*` environment variables.

use crate::allocator::IdRange;
use crate::error::{Error, Result};
use anyhow::Context;
use pveapi::PollConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Control-plane API URL
pub const ENV_API_URL: &str = "PM_API_URL";
/// Control-plane user
pub const ENV_USER: &str = "PM_USER";
/// Control-plane password
pub const ENV_PASSWORD: &str = "PM_PASS";
/// Skip TLS verification (`true`/`false`, `1`/`0`)
pub const ENV_TLS_INSECURE: &str = "PM_TLS_INSECURE";

/// When the pre-provisioning hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreprovisionPolicy {
    Never,
    /// After a successful create only
    #[default]
    OnCreate,
    /// After every successful create or update
    Always,
}

impl PreprovisionPolicy {
    pub fn runs_on_create(&self) -> bool {
        matches!(self, Self::OnCreate | Self::Always)
    }

    pub fn runs_on_update(&self) -> bool {
        matches!(self, Self::Always)
    }
}

/// Timing of the settle barrier, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub max_wait_ms: u64,
    /// Used when the plane returns no task handle
    pub fallback_delay_ms: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self::from(&PollConfig::default())
    }
}

impl From<&PollConfig> for SettleConfig {
    fn from(poll: &PollConfig) -> Self {
        Self {
            base_delay_ms: poll.base_delay.as_millis() as u64,
            backoff_factor: poll.backoff_factor,
            max_delay_ms: poll.max_delay.as_millis() as u64,
            max_wait_ms: poll.max_wait.as_millis() as u64,
            fallback_delay_ms: poll.fallback_delay.as_millis() as u64,
        }
    }
}

impl SettleConfig {
    /// Reject timings the backoff cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(Error::Config(anyhow::anyhow!(
                "settle.backoff_factor must be a finite number >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            base_delay: Duration::from_millis(self.base_delay_ms),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_wait: Duration::from_millis(self.max_wait_ms),
            fallback_delay: Duration::from_millis(self.fallback_delay_ms),
        }
    }
}

/// Provider-wide settings shared by every operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Control-plane API URL, e.g. `https://pve.example:8006/api2/json`
    pub api_url: String,
    pub user: String,
    pub password: String,
    pub tls_insecure: bool,

    /// Guest ids handed out on create
    pub id_range: IdRange,

    /// Settle barrier timing
    pub settle: SettleConfig,

    /// Recycle an existing guest with the declared name instead of failing
    pub recycle_existing: bool,

    pub preprovision: PreprovisionPolicy,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            user: String::new(),
            password: String::new(),
            tls_insecure: true,
            id_range: IdRange::default(),
            settle: SettleConfig::default(),
            recycle_existing: false,
            preprovision: PreprovisionPolicy::default(),
        }
    }
}

impl ProviderConfig {
    /// Default configuration file path (~/.config/vmconverge/provider.toml)
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .context("Could not determine home directory")
            .map_err(Error::Config)?;
        Ok(home.join(".config").join("vmconverge").join("provider.toml"))
    }

    /// Parse configuration from TOML.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .context("Invalid provider configuration")
            .map_err(Error::Config)?;
        config.settle.validate()?;
        Ok(config)
    }

    /// Load from a file (`~` is expanded) and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = path.as_ref().to_string_lossy();
        let path = PathBuf::from(shellexpand::tilde(&raw).as_ref());

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))
            .map_err(Error::Config)?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
            .map_err(Error::Config)?;
        config.settle.validate()?;

        log::debug!("Loaded provider configuration from {}", path.display());
        config.apply_env()?;
        Ok(config)
    }

    /// Load from the default path, or use defaults if the file is missing.
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            return Self::load(&path);
        }

        log::debug!("{} does not exist, using defaults", path.display());
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply the `PM_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply the `PM_*` overrides using `lookup` to read variables.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_url = url;
        }
        if let Some(user) = lookup(ENV_USER) {
            self.user = user;
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            self.password = password;
        }
        if let Some(value) = lookup(ENV_TLS_INSECURE) {
            self.tls_insecure = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(Error::Config(anyhow::anyhow!(
                        "{ENV_TLS_INSECURE} must be true or false, got '{other}'"
                    )));
                }
            };
        }
        Ok(())
    }

    /// Poll settings for the settle barrier.
    pub fn poll_config(&self) -> PollConfig {
        self.settle.poll_config()
    }
}
