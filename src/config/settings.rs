//! Engine settings loaded from `payroll.toml`.
//!
//! Every section is optional; a missing file section falls back to statutory defaults.
//!
//! ```toml
//! [payroll]
//! allow_salary_fallback = false
//!
//! [tax]
//! tax_free_threshold = 300000.0
//! bands = [
//!     { width = 300000.0, rate = 0.07 },
//!     { width = 500000.0, rate = 0.11 },
//! ]
//!
//! [leave]
//! max_carry_forward_days = 5.0
//! ```

use crate::core::tax::TaxTable;
use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Environment variable naming an alternative settings file.
pub const CONFIG_PATH_ENV: &str = "PAYROLL_CONFIG";

/// Complete engine settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// Payroll computation switches
    #[serde(default)]
    pub payroll: PayrollSettings,
    /// Tax table; the statutory PAYE table when omitted
    #[serde(default)]
    pub tax: TaxTable,
    /// Leave ledger settings
    #[serde(default)]
    pub leave: LeaveSettings,
}

/// Payroll computation switches
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PayrollSettings {
    /// Use the fallback salary formula when a grade/step is missing from the table.
    /// Off by default: a missing scale entry is a data error.
    #[serde(default)]
    pub allow_salary_fallback: bool,
}

/// Leave ledger settings
#[derive(Debug, Clone, Deserialize)]
pub struct LeaveSettings {
    /// Upper bound on days carried into a new year
    #[serde(default = "default_max_carry_forward_days")]
    pub max_carry_forward_days: f64,
}

const fn default_max_carry_forward_days() -> f64 {
    5.0
}

impl Default for LeaveSettings {
    fn default() -> Self {
        Self {
            max_carry_forward_days: default_max_carry_forward_days(),
        }
    }
}

/// Loads settings from a TOML file.
///
/// # Errors
/// Returns [`Error::Config`] if the file cannot be read, is not valid TOML,
/// or describes an invalid tax table.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path_ref = path.as_ref();
    tracing::debug!("Loading settings from {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {path_ref:?}: {e}"),
    })?;
    parse_config(&contents)
}

/// Parses settings from a TOML string and validates the tax table.
pub fn parse_config(contents: &str) -> Result<Settings> {
    let settings: Settings = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse payroll.toml: {e}"),
    })?;
    settings.tax.validate()?;
    if settings.leave.max_carry_forward_days < 0.0 {
        return Err(Error::Config {
            message: "max_carry_forward_days cannot be negative".to_string(),
        });
    }
    Ok(settings)
}

/// Loads settings from `PAYROLL_CONFIG` or `./payroll.toml`, using defaults when
/// neither file exists.
pub fn load_default_config() -> Result<Settings> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "payroll.toml".to_string());
    if Path::new(&path).exists() {
        load_config(path)
    } else {
        tracing::info!("No settings file at {path}, using statutory defaults");
        Ok(Settings::default())
    }
}
