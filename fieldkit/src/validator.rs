//! # Value Validator
//!
//! Turns a loosely typed candidate value into the canonical [`FieldValue`] shape for a
//! field definition, or reports the first violated rule.
//!
//! Checks run in three stages:
//!
//! 1. Computed fields are rejected outright and empty input short-circuits to `None`
//!    (or `validation.required`).
//! 2. Type-specific checks driven by the field's [`FieldConfig`].
//! 3. Generic [`ValidationRules`](crate::types::ValidationRules): length, range, pattern and
//!    registered custom hooks. The `unique` rule is enforced by the value store.
//!
//! Normalization is idempotent: feeding `value.to_json()` back through [`Validator::validate`]
//! yields the same value.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::Regex;
use serde_json::Value;

use crate::catalog::{
    DateConfig, FieldConfig, FieldType, FileConfig, LocationMode, MultiSelectConfig, NumberConfig, SelectConfig,
    TextConfig,
};
use crate::config::ValidationSettings;
use crate::errors::{ValidationError, ValidationResult};
use crate::types::{CustomFieldDefinition, FieldValue, FileRef, Location, round_to};
use crate::validators;

/// `None` when the field was left empty.
pub type NormalizedValue = Option<FieldValue>;

/// Custom validation hook. Returns a human-readable message on failure.
pub type ValidationHook = Arc<dyn Fn(&CustomFieldDefinition, &FieldValue) -> Result<(), String> + Send + Sync>;

pub struct Validator {
    settings: ValidationSettings,
    hooks: HashMap<String, ValidationHook>,
    patterns: Mutex<HashMap<String, Regex>>,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("settings", &self.settings)
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ValidationSettings::default())
    }
}

impl Validator {
    pub fn new(settings: ValidationSettings) -> Self {
        Self {
            settings,
            hooks: HashMap::new(),
            patterns: Mutex::new(HashMap::new()),
        }
    }

    /// Register a named hook referenced by `validation_rules.custom_validation`.
    pub fn with_hook<F>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&CustomFieldDefinition, &FieldValue) -> Result<(), String> + Send + Sync + 'static,
    {
        self.hooks.insert(name.into(), Arc::new(hook));
        self
    }

    pub fn has_hook(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    pub fn settings(&self) -> &ValidationSettings {
        &self.settings
    }

    pub fn validate(&self, definition: &CustomFieldDefinition, raw: &Value) -> ValidationResult<NormalizedValue> {
        let field = definition.name.as_str();
        if definition.field_type.is_computed() {
            return Err(ValidationError::ComputedFieldNotSettable { field: field.to_string() });
        }
        if is_empty_raw(raw) {
            if definition.is_required() {
                return Err(ValidationError::Required { field: field.to_string() });
            }
            return Ok(None);
        }

        let value = self.check_type(definition, raw)?;
        match &value {
            // Lists of blank items normalize to nothing.
            FieldValue::List(items) if items.is_empty() => {
                if definition.is_required() {
                    return Err(ValidationError::Required { field: field.to_string() });
                }
                return Ok(None);
            }
            FieldValue::Number(number) if !number.is_finite() => return Err(mismatch(field, "a number")),
            _ => {}
        }
        self.check_rules(definition, &value)?;
        Ok(Some(value))
    }

    fn check_type(&self, definition: &CustomFieldDefinition, raw: &Value) -> ValidationResult<FieldValue> {
        let field = definition.name.as_str();
        let config = &definition.configuration;
        match definition.field_type {
            FieldType::Text => self.text(field, raw, text_config(config)).map(FieldValue::Text),
            FieldType::Email => {
                let text = self.text(field, raw, text_config(config))?;
                if !validators::is_valid_email(&text) {
                    return Err(format_error(field, "email address"));
                }
                Ok(FieldValue::Text(text))
            }
            FieldType::Url => {
                let text = self.text(field, raw, text_config(config))?;
                if !validators::is_valid_url(&text) {
                    return Err(format_error(field, "URL"));
                }
                Ok(FieldValue::Text(text))
            }
            FieldType::Phone => {
                let text = self.text(field, raw, text_config(config))?;
                if !validators::is_valid_phone(&text) {
                    return Err(format_error(field, "phone number"));
                }
                Ok(FieldValue::Text(validators::normalize_phone(&text)))
            }
            FieldType::Number => {
                let config = number_config(config);
                let number = maybe_round(numeric(field, raw)?, config.decimal_places);
                check_bounds(field, number, config.min_value, config.max_value)?;
                Ok(FieldValue::Number(number))
            }
            FieldType::Currency => {
                let config = number_config(config);
                let places = config.decimal_places.unwrap_or(self.settings.currency_decimal_places);
                let number = round_to(numeric(field, raw)?, places);
                check_bounds(field, number, config.min_value, config.max_value)?;
                Ok(FieldValue::Number(number))
            }
            FieldType::Percentage => {
                let mut number = numeric(field, raw)?;
                let config = number_config(config);
                if !config.allow_out_of_range {
                    number = number.clamp(0.0, 100.0);
                }
                let number = maybe_round(number, config.decimal_places);
                check_bounds(field, number, config.min_value, config.max_value)?;
                Ok(FieldValue::Number(number))
            }
            FieldType::Rating => {
                let number = numeric(field, raw)?;
                if number.fract() != 0.0 {
                    return Err(ValidationError::TypeMismatch {
                        field: field.to_string(),
                        expected: "a whole number",
                    });
                }
                let max = number_config(config).effective_max_rating();
                check_bounds(field, number, Some(1.0), Some(f64::from(max)))?;
                Ok(FieldValue::Number(number))
            }
            FieldType::Duration => {
                let seconds = duration_seconds(field, raw)?;
                let config = number_config(config);
                check_bounds(field, seconds, config.min_value, config.max_value)?;
                Ok(FieldValue::Number(seconds))
            }
            FieldType::Date => self.date(field, raw, date_config(config)).map(FieldValue::Date),
            FieldType::Select => select(field, raw, select_config(config)).map(FieldValue::Text),
            FieldType::MultiSelect | FieldType::Tags | FieldType::MultiUser => {
                multi(definition.field_type, field, raw, multi_config(config)).map(FieldValue::List)
            }
            FieldType::Checkbox => checkbox(field, raw).map(FieldValue::Bool),
            FieldType::User | FieldType::Relation => {
                let text = string(field, raw)?;
                if !validators::is_valid_entity_ref(&text) {
                    return Err(format_error(field, "entity reference"));
                }
                Ok(FieldValue::Text(text))
            }
            FieldType::File => file(field, raw, file_config(config)).map(FieldValue::File),
            FieldType::Color => {
                let text = string(field, raw)?;
                let allow_named = match config {
                    FieldConfig::Color(color) => color.allow_named,
                    _ => true,
                };
                if let Some(hex) = validators::normalize_hex_color(&text) {
                    return Ok(FieldValue::Text(hex));
                }
                if allow_named && validators::is_named_color(&text) {
                    return Ok(FieldValue::Text(text.to_ascii_lowercase()));
                }
                Err(format_error(field, "color"))
            }
            FieldType::Location => {
                let mode = match config {
                    FieldConfig::Location(location) => location.mode,
                    _ => LocationMode::Any,
                };
                location(field, raw, mode).map(FieldValue::Location)
            }
            FieldType::Formula | FieldType::Lookup => {
                Err(ValidationError::ComputedFieldNotSettable { field: field.to_string() })
            }
        }
    }

    fn text(&self, field: &str, raw: &Value, config: Option<&TextConfig>) -> ValidationResult<String> {
        let text = string(field, raw)?;
        if let Some(config) = config {
            if let Some(max) = config.max_length
                && text.chars().count() > max
            {
                return Err(ValidationError::TooLong {
                    field: field.to_string(),
                    max,
                });
            }
            if let Some(pattern) = &config.pattern {
                self.check_pattern(field, pattern, &text)?;
            }
        }
        Ok(text)
    }

    fn date(&self, field: &str, raw: &Value, config: Option<&DateConfig>) -> ValidationResult<DateTime<Utc>> {
        let text = string(field, raw)?;
        let include_time = config.is_some_and(|config| config.include_time);
        let date_format = config
            .and_then(|config| config.date_format.as_deref())
            .unwrap_or(&self.settings.date_format);

        let parsed = if let Ok(timestamp) = DateTime::parse_from_rfc3339(&text) {
            Some(timestamp.with_timezone(&Utc))
        } else if let Ok(naive) = NaiveDateTime::parse_from_str(&text, &self.settings.datetime_format) {
            Some(naive.and_utc())
        } else if let Ok(date) = NaiveDate::parse_from_str(&text, date_format) {
            if include_time {
                return Err(format_error(field, "date with time"));
            }
            Some(date.and_time(NaiveTime::MIN).and_utc())
        } else {
            None
        };
        let mut parsed = parsed.ok_or_else(|| format_error(field, "date"))?;

        if !include_time {
            parsed = parsed.date_naive().and_time(NaiveTime::MIN).and_utc();
        }
        if let Some(config) = config {
            let day = parsed.date_naive();
            if let Some(min) = config.min_date
                && day < min
            {
                return Err(ValidationError::BelowMinimum {
                    field: field.to_string(),
                    min: min.to_string(),
                });
            }
            if let Some(max) = config.max_date
                && day > max
            {
                return Err(ValidationError::AboveMaximum {
                    field: field.to_string(),
                    max: max.to_string(),
                });
            }
        }
        Ok(parsed)
    }

    fn check_rules(&self, definition: &CustomFieldDefinition, value: &FieldValue) -> ValidationResult<()> {
        let field = definition.name.as_str();
        let rules = &definition.validation_rules;

        if let FieldValue::Text(text) = value {
            let length = text.chars().count();
            if let Some(min) = rules.min_length
                && length < min
            {
                return Err(ValidationError::TooShort {
                    field: field.to_string(),
                    min,
                });
            }
            if let Some(max) = rules.max_length
                && length > max
            {
                return Err(ValidationError::TooLong {
                    field: field.to_string(),
                    max,
                });
            }
            if let Some(pattern) = &rules.pattern {
                self.check_pattern(field, pattern, text)?;
            }
        }

        if let FieldValue::Number(number) = value {
            check_bounds(field, *number, rules.min_value, rules.max_value)?;
        }

        if let Some(hook_name) = &rules.custom_validation {
            let hook = self.hooks.get(hook_name).ok_or_else(|| ValidationError::Custom {
                field: field.to_string(),
                hook: hook_name.clone(),
                message: "hook is not registered".to_string(),
            })?;
            hook(definition, value).map_err(|message| ValidationError::Custom {
                field: field.to_string(),
                hook: hook_name.clone(),
                message,
            })?;
        }
        Ok(())
    }

    fn check_pattern(&self, field: &str, pattern: &str, text: &str) -> ValidationResult<()> {
        let mismatch = || ValidationError::PatternMismatch {
            field: field.to_string(),
            pattern: pattern.to_string(),
        };
        let mut cache = self.patterns.lock().unwrap_or_else(PoisonError::into_inner);
        if !cache.contains_key(pattern) {
            let compiled = Regex::new(pattern).map_err(|_| mismatch())?;
            cache.insert(pattern.to_string(), compiled);
        }
        match cache.get(pattern) {
            Some(regex) if regex.is_match(text) => Ok(()),
            _ => Err(mismatch()),
        }
    }
}

/// `null`, blank strings and empty arrays/objects count as "no value".
pub fn is_empty_raw(raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn format_error(field: &str, format: &'static str) -> ValidationError {
    ValidationError::InvalidFormat {
        field: field.to_string(),
        format,
    }
}

fn mismatch(field: &str, expected: &'static str) -> ValidationError {
    ValidationError::TypeMismatch {
        field: field.to_string(),
        expected,
    }
}

fn string(field: &str, raw: &Value) -> ValidationResult<String> {
    raw.as_str()
        .map(|text| text.trim().to_string())
        .ok_or_else(|| mismatch(field, "a string"))
}

fn numeric(field: &str, raw: &Value) -> ValidationResult<f64> {
    let number = match raw {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite()).ok_or_else(|| mismatch(field, "a number"))
}

fn maybe_round(number: f64, places: Option<u32>) -> f64 {
    places.map_or(number, |places| round_to(number, places))
}

fn check_bounds(field: &str, number: f64, min: Option<f64>, max: Option<f64>) -> ValidationResult<()> {
    if let Some(min) = min
        && number < min
    {
        return Err(ValidationError::BelowMinimum {
            field: field.to_string(),
            min: crate::types::format_number(min),
        });
    }
    if let Some(max) = max
        && number > max
    {
        return Err(ValidationError::AboveMaximum {
            field: field.to_string(),
            max: crate::types::format_number(max),
        });
    }
    Ok(())
}

/// Seconds, or a string of `<n><unit>` parts with units `d`, `h`, `m`, `s` (e.g. `1h 30m`).
fn duration_seconds(field: &str, raw: &Value) -> ValidationResult<f64> {
    if let Ok(seconds) = numeric(field, raw) {
        if seconds < 0.0 {
            return Err(ValidationError::BelowMinimum {
                field: field.to_string(),
                min: "0".to_string(),
            });
        }
        return Ok(seconds);
    }
    let text = raw.as_str().ok_or_else(|| mismatch(field, "a duration"))?;
    let invalid = || format_error(field, "duration");

    let mut total = 0.0;
    let mut digits = String::new();
    let mut seen_unit = false;
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        if c.is_ascii_digit() || c == '.' {
            digits.push(c);
            continue;
        }
        let factor = match c.to_ascii_lowercase() {
            'd' => 86_400.0,
            'h' => 3_600.0,
            'm' => 60.0,
            's' => 1.0,
            _ => return Err(invalid()),
        };
        let amount: f64 = digits.parse().map_err(|_| invalid())?;
        total += amount * factor;
        digits.clear();
        seen_unit = true;
    }
    if !digits.is_empty() || !seen_unit || !total.is_finite() {
        return Err(invalid());
    }
    Ok(total)
}

fn select(field: &str, raw: &Value, config: Option<&SelectConfig>) -> ValidationResult<String> {
    let text = string(field, raw)?;
    let Some(config) = config else {
        return Ok(text);
    };
    match config.find(&text) {
        Some(option) => Ok(option.value.clone()),
        None if config.allow_custom => Ok(text),
        None => Err(ValidationError::InvalidOption {
            field: field.to_string(),
            value: text,
        }),
    }
}

fn multi(
    field_type: FieldType,
    field: &str,
    raw: &Value,
    config: Option<&MultiSelectConfig>,
) -> ValidationResult<Vec<String>> {
    let items: Vec<String> = match raw {
        Value::String(text) => vec![text.trim().to_string()],
        Value::Array(items) => items
            .iter()
            .map(|item| string(field, item))
            .collect::<ValidationResult<_>>()
            .map_err(|_| mismatch(field, "a list of strings"))?,
        _ => return Err(mismatch(field, "a list of strings")),
    };

    let mut normalized: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if item.is_empty() {
            continue;
        }
        let canonical = match field_type {
            FieldType::MultiSelect => config
                .and_then(|config| config.find(&item))
                .map(|option| option.value.clone())
                .ok_or_else(|| ValidationError::InvalidOption {
                    field: field.to_string(),
                    value: item.clone(),
                })?,
            FieldType::MultiUser => {
                if !validators::is_valid_entity_ref(&item) {
                    return Err(format_error(field, "user reference"));
                }
                item
            }
            _ => config
                .and_then(|config| config.find(&item))
                .map_or(item, |option| option.value.clone()),
        };
        if !normalized.iter().any(|existing| existing.to_lowercase() == canonical.to_lowercase()) {
            normalized.push(canonical);
        }
    }

    if let Some(config) = config
        && !normalized.is_empty()
    {
        if let Some(min) = config.min_selections
            && normalized.len() < min
        {
            return Err(ValidationError::TooFewSelections {
                field: field.to_string(),
                min,
            });
        }
        if let Some(max) = config.max_selections
            && normalized.len() > max
        {
            return Err(ValidationError::TooManySelections {
                field: field.to_string(),
                max,
            });
        }
    }
    Ok(normalized)
}

fn checkbox(field: &str, raw: &Value) -> ValidationResult<bool> {
    match raw {
        Value::Bool(flag) => Ok(*flag),
        Value::Number(number) => match number.as_f64() {
            Some(n) if n == 1.0 => Ok(true),
            Some(n) if n == 0.0 => Ok(false),
            _ => Err(mismatch(field, "a boolean")),
        },
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(mismatch(field, "a boolean")),
        },
        _ => Err(mismatch(field, "a boolean")),
    }
}

fn file(field: &str, raw: &Value, config: Option<&FileConfig>) -> ValidationResult<FileRef> {
    let file: FileRef =
        serde_json::from_value(raw.clone()).map_err(|_| mismatch(field, "a file object with name and size"))?;
    if file.name.trim().is_empty() {
        return Err(mismatch(field, "a file object with name and size"));
    }
    if let Some(config) = config {
        if !config.allowed_extensions.is_empty() {
            let extension = file.extension().unwrap_or_default();
            if !config.allows_extension(extension) {
                return Err(ValidationError::FileExtension {
                    field: field.to_string(),
                    extension: extension.to_string(),
                });
            }
        }
        if let Some(max) = config.max_file_size
            && file.size > max
        {
            return Err(ValidationError::FileTooLarge {
                field: field.to_string(),
                max,
            });
        }
    }
    Ok(file)
}

fn location(field: &str, raw: &Value, mode: LocationMode) -> ValidationResult<Location> {
    let coordinates = |latitude: f64, longitude: f64| {
        if (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude) {
            Ok(Location::Coordinates { latitude, longitude })
        } else {
            Err(format_error(field, "latitude/longitude pair"))
        }
    };

    match raw {
        Value::Object(map) if mode != LocationMode::Text => {
            let lat = map.get("latitude").or_else(|| map.get("lat")).and_then(Value::as_f64);
            let lng = map.get("longitude").or_else(|| map.get("lng")).and_then(Value::as_f64);
            match (lat, lng) {
                (Some(latitude), Some(longitude)) => coordinates(latitude, longitude),
                _ => Err(format_error(field, "latitude/longitude pair")),
            }
        }
        Value::String(text) if mode == LocationMode::Coordinates => {
            let (lat, lng) = text
                .split_once(',')
                .ok_or_else(|| format_error(field, "latitude/longitude pair"))?;
            match (lat.trim().parse::<f64>(), lng.trim().parse::<f64>()) {
                (Ok(latitude), Ok(longitude)) => coordinates(latitude, longitude),
                _ => Err(format_error(field, "latitude/longitude pair")),
            }
        }
        Value::String(text) => Ok(Location::Place(text.trim().to_string())),
        _ => Err(mismatch(field, "a location")),
    }
}

fn text_config(config: &FieldConfig) -> Option<&TextConfig> {
    match config {
        FieldConfig::Text(text) => Some(text),
        _ => None,
    }
}

fn number_config(config: &FieldConfig) -> NumberConfig {
    match config {
        FieldConfig::Number(number) => number.clone(),
        _ => NumberConfig::default(),
    }
}

fn date_config(config: &FieldConfig) -> Option<&DateConfig> {
    match config {
        FieldConfig::Date(date) => Some(date),
        _ => None,
    }
}

fn select_config(config: &FieldConfig) -> Option<&SelectConfig> {
    config.as_select()
}

fn multi_config(config: &FieldConfig) -> Option<&MultiSelectConfig> {
    match config {
        FieldConfig::MultiSelect(multi) => Some(multi),
        _ => None,
    }
}

fn file_config(config: &FieldConfig) -> Option<&FileConfig> {
    match config {
        FieldConfig::File(file) => Some(file),
        _ => None,
    }
}
