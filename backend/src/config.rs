//! Registration configuration.
//!
//! The configuration is loaded once (typically from a YAML file) and then
//! handed to every service as an immutable [`ConfigSnapshot`]. Services never
//! consult process-wide state, so two differently configured service sets can
//! live side by side in the same process (and in the same test binary).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Shared, read-only configuration handle.
pub type ConfigSnapshot = Arc<RegistrationConfig>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Price, tax and capacity settings for one bookable package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageConfig {
    pub code: String,
    #[serde(default)]
    pub price_cents: i64,
    #[serde(default)]
    pub vat_percent: f64,
    /// Maximum number of attendees holding this package, `0` means unlimited
    #[serde(default)]
    pub limit: u32,
}

impl PackageConfig {
    pub fn is_limited(&self) -> bool {
        self.limit > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub currency: String,
    /// Shortfall in cents below which an attendee still counts as fully paid
    pub grace_amount_cents: i64,
    pub manual_dues_vat_percent: f64,
    /// Admin-only flag that waives all package dues
    pub guest_flag: String,
    /// Permission that allows a logged-in user to check other attendees in
    pub regdesk_permission: String,
    pub due_days: i64,
    pub earliest_due_date: Option<NaiveDate>,
    pub latest_due_date: Option<NaiveDate>,
    pub packages: Vec<PackageConfig>,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            currency: "EUR".to_string(),
            grace_amount_cents: 100,
            manual_dues_vat_percent: 19.0,
            guest_flag: "guest".to_string(),
            regdesk_permission: "regdesk".to_string(),
            due_days: 14,
            earliest_due_date: None,
            latest_due_date: None,
            packages: Vec::new(),
        }
    }
}

impl RegistrationConfig {
    pub fn package(&self, code: &str) -> Option<&PackageConfig> {
        self.packages.iter().find(|p| p.code == code)
    }

    pub fn limited_packages(&self) -> impl Iterator<Item = &PackageConfig> {
        self.packages.iter().filter(|p| p.is_limited())
    }

    /// Due date for dues booked on `today`, clamped to the configured window.
    pub fn due_date_for(&self, today: NaiveDate) -> NaiveDate {
        let mut due = today + chrono::Duration::days(self.due_days);
        if let Some(earliest) = self.earliest_due_date {
            if due < earliest {
                due = earliest;
            }
        }
        if let Some(latest) = self.latest_due_date {
            if due > latest {
                due = latest;
            }
        }
        due
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.currency.trim().is_empty() {
            return Err(ConfigError::Invalid("currency is required".to_string()));
        }
        if self.grace_amount_cents < 0 {
            return Err(ConfigError::Invalid(
                "grace_amount_cents must not be negative".to_string(),
            ));
        }
        if self.due_days < 0 {
            return Err(ConfigError::Invalid("due_days must not be negative".to_string()));
        }
        if let (Some(earliest), Some(latest)) = (self.earliest_due_date, self.latest_due_date) {
            if earliest > latest {
                return Err(ConfigError::Invalid(format!(
                    "earliest_due_date {} is after latest_due_date {}",
                    earliest, latest
                )));
            }
        }

        let mut seen = HashSet::new();
        for package in &self.packages {
            if package.code.trim().is_empty() {
                return Err(ConfigError::Invalid("package code is required".to_string()));
            }
            if !seen.insert(package.code.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate package code: {}",
                    package.code
                )));
            }
            if package.price_cents < 0 {
                return Err(ConfigError::Invalid(format!(
                    "package {} has a negative price",
                    package.code
                )));
            }
        }
        Ok(())
    }
}

pub struct ConfigService;

impl ConfigService {
    pub fn load_config(config_path: &Path) -> Result<RegistrationConfig, ConfigError> {
        let content = fs::read_to_string(config_path).map_err(|source| ConfigError::Io {
            path: config_path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml_str(&content)?;
        info!(
            "Loaded registration config from {:?} with {} packages",
            config_path,
            config.packages.len()
        );
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<RegistrationConfig, ConfigError> {
        let config: RegistrationConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_config_or_default(config_path: &Path) -> RegistrationConfig {
        match Self::load_config(config_path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load registration config from {:?}: {}", config_path, e);
                info!("Using default registration config (no packages)");
                RegistrationConfig::default()
            }
        }
    }

    pub fn snapshot(config: RegistrationConfig) -> ConfigSnapshot {
        Arc::new(config)
    }
}
