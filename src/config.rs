//! Configuration for the library binary
//!
//! Values come from built-in defaults, then an optional TOML file
//! (`library.toml` in the working directory, or a path given explicitly),
//! then `LIBRARY_*` environment variables. Nested keys use a double
//! underscore, e.g. `LIBRARY_LENDING__LOAN_DAYS=21`.
use crate::ledger::{DEFAULT_FINE_PER_DAY, DEFAULT_LOAN_DAYS, LoanPolicy};
use crate::membership::{MembershipTier, TierLimits};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    pub standard: u32,
    pub premium: u32,
    pub student: u32,
    pub senior: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LendingConfig {
    pub loan_days: i64,
    /// Minor currency units per day late.
    pub fine_per_day: u64,
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LibraryConfig {
    pub data_dir: PathBuf,
    pub lending: LendingConfig,
    pub logging: LoggingConfig,
}

impl LibraryConfig {
    /// Load configuration from an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("library").required(false),
        };

        let config = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("LIBRARY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.lending.loan_days <= 0 {
            return Err(ConfigError::Message(format!(
                "lending.loan_days must be positive, got {}",
                self.lending.loan_days
            )));
        }
        Ok(())
    }

    pub fn loan_policy(&self) -> LoanPolicy {
        LoanPolicy {
            loan_days: self.lending.loan_days,
            fine_per_day: self.lending.fine_per_day,
        }
    }

    pub fn tier_limits(&self) -> TierLimits {
        let limits = &self.lending.limits;
        TierLimits::empty()
            .with_limit(MembershipTier::Standard, limits.standard)
            .with_limit(MembershipTier::Premium, limits.premium)
            .with_limit(MembershipTier::Student, limits.student)
            .with_limit(MembershipTier::Senior, limits.senior)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let defaults = TierLimits::default();
        Self {
            standard: defaults.limit_for(MembershipTier::Standard),
            premium: defaults.limit_for(MembershipTier::Premium),
            student: defaults.limit_for(MembershipTier::Student),
            senior: defaults.limit_for(MembershipTier::Senior),
        }
    }
}

impl Default for LendingConfig {
    fn default() -> Self {
        Self {
            loan_days: DEFAULT_LOAN_DAYS,
            fine_per_day: DEFAULT_FINE_PER_DAY,
            limits: LimitsConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./library_data"),
            lending: LendingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
