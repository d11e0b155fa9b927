//! Settings for the workflow. Values come from an optional `settings.toml`,
//! then `COOP__`-prefixed environment variables, over built-in defaults.
//!
//! e.g. `COOP__LIMITS__SAVINGS_WITHDRAWAL_CEILING_PERCENT=75`
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreSettings {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LimitSettings {
    pub savings_withdrawal_ceiling_percent: u32,
    pub personal_withdrawal_ceiling_percent: u32,
    pub savings_withdrawals_per_year: u32,
    pub loan_min_contributions: u32,
    pub max_page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DisplaySettings {
    pub currency_symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub store: StoreSettings,
    pub limits: LimitSettings,
    pub display: DisplaySettings,
}

impl Settings {
    /// Reads `settings.toml` from the working directory when present.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file("settings")
    }

    pub fn from_file(name: &str) -> Result<Self, ConfigError> {
        let defaults = Settings::default();

        let settings = Config::builder()
            .set_default("store.path", defaults.store.path)?
            .set_default(
                "limits.savings_withdrawal_ceiling_percent",
                i64::from(defaults.limits.savings_withdrawal_ceiling_percent),
            )?
            .set_default(
                "limits.personal_withdrawal_ceiling_percent",
                i64::from(defaults.limits.personal_withdrawal_ceiling_percent),
            )?
            .set_default(
                "limits.savings_withdrawals_per_year",
                i64::from(defaults.limits.savings_withdrawals_per_year),
            )?
            .set_default(
                "limits.loan_min_contributions",
                i64::from(defaults.limits.loan_min_contributions),
            )?
            .set_default("limits.max_page_size", i64::from(defaults.limits.max_page_size))?
            .set_default("display.currency_symbol", defaults.display.currency_symbol)?
            .add_source(File::with_name(name).required(false))
            .add_source(Environment::with_prefix("COOP").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            savings_withdrawal_ceiling_percent: 80,
            personal_withdrawal_ceiling_percent: 100,
            savings_withdrawals_per_year: 1,
            loan_min_contributions: 1,
            max_page_size: 100,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store: StoreSettings {
                path: "coop_approvals.db".to_string(),
            },
            limits: LimitSettings::default(),
            display: DisplaySettings {
                currency_symbol: "₦".to_string(),
            },
        }
    }
}
