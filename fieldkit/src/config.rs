//! Engine settings shared by the validator, formula engine and search helpers.
//!
//! Settings are plain serde structs so a host can embed them in its own TOML
//! configuration; every key has a default.

use serde::{Deserialize, Serialize};

/// Default `chrono` format for bare dates.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
/// Default `chrono` format for naive timestamps (RFC 3339 is always accepted as well).
pub const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub validation: ValidationSettings,
    #[serde(default)]
    pub formula: FormulaSettings,
    #[serde(default)]
    pub search: SearchSettings,
}

impl EngineSettings {
    /// Parse settings from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSettings {
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default = "default_datetime_format")]
    pub datetime_format: String,
    /// Decimal places applied to currency fields that do not configure their own.
    #[serde(default = "default_currency_decimals")]
    pub currency_decimal_places: u32,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            date_format: default_date_format(),
            datetime_format: default_datetime_format(),
            currency_decimal_places: default_currency_decimals(),
        }
    }
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

fn default_datetime_format() -> String {
    DEFAULT_DATETIME_FORMAT.to_string()
}

fn default_currency_decimals() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaSettings {
    /// Maximum cached formula results; `0` disables caching.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for FormulaSettings {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_cache_capacity() -> usize {
    4096
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_page_size")]
    pub default_page_size: u64,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

fn default_page_size() -> u64 {
    25
}

fn default_max_page_size() -> u64 {
    100
}
