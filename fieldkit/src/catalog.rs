//! # Field Type Catalog
//!
//! Enumerates every supported field kind, the configuration keys each kind
//! accepts, and the filter operators that are meaningful for it.
//!
//! Configuration arrives as loose JSON from callers and is parsed here into a
//! per-kind [`FieldConfig`] variant, so downstream code never has to ask
//! whether a key is relevant for a given type.
//!
//! | Kind(s)                                   | Config variant | Required keys                      |
//! |-------------------------------------------|----------------|------------------------------------|
//! | `text`, `url`, `email`, `phone`           | `Text`         | -                                  |
//! | `number`, `currency`, `percentage`, ...   | `Number`       | -                                  |
//! | `date`                                    | `Date`         | -                                  |
//! | `select`                                  | `Select`       | `options`                          |
//! | `multi_select`, `tags`, `multi_user`      | `MultiSelect`  | `options` (multi_select only)      |
//! | `formula`                                 | `Formula`      | `formula`                          |
//! | `relation`                                | `Relation`     | `related_entity_type`              |
//! | `lookup`                                  | `Lookup`       | `related_entity_type`, `relation_field_id`, `lookup_field_id` |

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use chrono::format::{Item, StrftimeItems};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[cfg(feature = "utoipa")]
use utoipa::ToSchema;

use crate::errors::{DefinitionError, DefinitionResult};
use crate::filter::FilterOperator;
use crate::formula;
use crate::id::FieldId;
use crate::types::EntityType;

const MAX_DECIMAL_PLACES: u32 = 10;
const DEFAULT_MAX_RATING: u32 = 5;
const MAX_RATING_LIMIT: u32 = 10;

/// The kind of a custom field. Determines the shape of its values.
#[cfg_attr(feature = "utoipa", derive(ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Select,
    MultiSelect,
    Checkbox,
    Url,
    Email,
    Phone,
    Currency,
    Percentage,
    Duration,
    Rating,
    Tags,
    User,
    MultiUser,
    File,
    Color,
    Location,
    Formula,
    Relation,
    Lookup,
}

/// Legal configuration keys for one field kind.
#[derive(Debug, Clone, Copy)]
pub struct ConfigSchema {
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
}

impl ConfigSchema {
    const fn new(required: &'static [&'static str], optional: &'static [&'static str]) -> Self {
        Self { required, optional }
    }

    pub fn allows(&self, key: &str) -> bool {
        self.required.contains(&key) || self.optional.contains(&key)
    }
}

const TEXT_KEYS: ConfigSchema = ConfigSchema::new(&[], &["max_length", "pattern"]);
const NUMBER_KEYS: ConfigSchema = ConfigSchema::new(&[], &["min_value", "max_value", "decimal_places"]);
const CURRENCY_KEYS: ConfigSchema =
    ConfigSchema::new(&[], &["min_value", "max_value", "decimal_places", "currency_code"]);
const PERCENTAGE_KEYS: ConfigSchema =
    ConfigSchema::new(&[], &["min_value", "max_value", "decimal_places", "allow_out_of_range"]);
const DURATION_KEYS: ConfigSchema = ConfigSchema::new(&[], &["min_value", "max_value"]);
const RATING_KEYS: ConfigSchema = ConfigSchema::new(&[], &["max_rating"]);
const DATE_KEYS: ConfigSchema = ConfigSchema::new(&[], &["date_format", "include_time", "min_date", "max_date"]);
const SELECT_KEYS: ConfigSchema = ConfigSchema::new(&["options"], &["allow_custom"]);
const MULTI_SELECT_KEYS: ConfigSchema = ConfigSchema::new(&["options"], &["min_selections", "max_selections"]);
const TAGS_KEYS: ConfigSchema = ConfigSchema::new(&[], &["options", "min_selections", "max_selections"]);
const MULTI_USER_KEYS: ConfigSchema = ConfigSchema::new(&[], &["min_selections", "max_selections"]);
const NO_KEYS: ConfigSchema = ConfigSchema::new(&[], &[]);
const FILE_KEYS: ConfigSchema = ConfigSchema::new(&[], &["allowed_extensions", "max_file_size"]);
const COLOR_KEYS: ConfigSchema = ConfigSchema::new(&[], &["allow_named"]);
const LOCATION_KEYS: ConfigSchema = ConfigSchema::new(&[], &["mode"]);
const FORMULA_KEYS: ConfigSchema = ConfigSchema::new(&["formula"], &["decimal_places"]);
const RELATION_KEYS: ConfigSchema = ConfigSchema::new(&["related_entity_type"], &[]);
const LOOKUP_KEYS: ConfigSchema =
    ConfigSchema::new(&["related_entity_type", "relation_field_id", "lookup_field_id"], &[]);

use FilterOperator as Op;

const STRING_OPERATORS: &[FilterOperator] = &[
    Op::Equals,
    Op::NotEquals,
    Op::Contains,
    Op::StartsWith,
    Op::EndsWith,
    Op::IsEmpty,
    Op::IsNotEmpty,
];
const ORDERED_OPERATORS: &[FilterOperator] = &[
    Op::Equals,
    Op::NotEquals,
    Op::GreaterThan,
    Op::LessThan,
    Op::Between,
    Op::IsEmpty,
    Op::IsNotEmpty,
];
const CHOICE_OPERATORS: &[FilterOperator] =
    &[Op::Equals, Op::NotEquals, Op::ContainsAny, Op::IsEmpty, Op::IsNotEmpty];
const SET_OPERATORS: &[FilterOperator] = &[Op::ContainsAny, Op::ContainsAll, Op::IsEmpty, Op::IsNotEmpty];
const IDENTITY_OPERATORS: &[FilterOperator] = &[Op::Equals, Op::NotEquals, Op::IsEmpty, Op::IsNotEmpty];
const PRESENCE_OPERATORS: &[FilterOperator] = &[Op::Contains, Op::IsEmpty, Op::IsNotEmpty];
const COMPUTED_OPERATORS: &[FilterOperator] = &[
    Op::Equals,
    Op::NotEquals,
    Op::GreaterThan,
    Op::LessThan,
    Op::Between,
    Op::Contains,
    Op::StartsWith,
    Op::EndsWith,
    Op::ContainsAny,
    Op::ContainsAll,
    Op::IsEmpty,
    Op::IsNotEmpty,
];

impl FieldType {
    pub const ALL: [FieldType; 22] = [
        FieldType::Text,
        FieldType::Number,
        FieldType::Date,
        FieldType::Select,
        FieldType::MultiSelect,
        FieldType::Checkbox,
        FieldType::Url,
        FieldType::Email,
        FieldType::Phone,
        FieldType::Currency,
        FieldType::Percentage,
        FieldType::Duration,
        FieldType::Rating,
        FieldType::Tags,
        FieldType::User,
        FieldType::MultiUser,
        FieldType::File,
        FieldType::Color,
        FieldType::Location,
        FieldType::Formula,
        FieldType::Relation,
        FieldType::Lookup,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Select => "select",
            FieldType::MultiSelect => "multi_select",
            FieldType::Checkbox => "checkbox",
            FieldType::Url => "url",
            FieldType::Email => "email",
            FieldType::Phone => "phone",
            FieldType::Currency => "currency",
            FieldType::Percentage => "percentage",
            FieldType::Duration => "duration",
            FieldType::Rating => "rating",
            FieldType::Tags => "tags",
            FieldType::User => "user",
            FieldType::MultiUser => "multi_user",
            FieldType::File => "file",
            FieldType::Color => "color",
            FieldType::Location => "location",
            FieldType::Formula => "formula",
            FieldType::Relation => "relation",
            FieldType::Lookup => "lookup",
        }
    }

    /// Formula and lookup fields are always derived, never stored.
    #[inline]
    pub const fn is_computed(self) -> bool {
        matches!(self, FieldType::Formula | FieldType::Lookup)
    }

    #[inline]
    pub const fn is_set_valued(self) -> bool {
        matches!(self, FieldType::MultiSelect | FieldType::Tags | FieldType::MultiUser)
    }

    #[inline]
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            FieldType::Number | FieldType::Currency | FieldType::Percentage | FieldType::Duration | FieldType::Rating
        )
    }

    /// Kinds whose values form a small set of categories worth a histogram.
    #[inline]
    pub const fn is_categorical(self) -> bool {
        matches!(
            self,
            FieldType::Select
                | FieldType::MultiSelect
                | FieldType::Tags
                | FieldType::Checkbox
                | FieldType::User
                | FieldType::MultiUser
                | FieldType::Color
        )
    }

    /// Which configuration keys are legal/required for this kind.
    pub const fn configuration_schema(self) -> ConfigSchema {
        match self {
            FieldType::Text | FieldType::Url | FieldType::Email | FieldType::Phone => TEXT_KEYS,
            FieldType::Number => NUMBER_KEYS,
            FieldType::Currency => CURRENCY_KEYS,
            FieldType::Percentage => PERCENTAGE_KEYS,
            FieldType::Duration => DURATION_KEYS,
            FieldType::Rating => RATING_KEYS,
            FieldType::Date => DATE_KEYS,
            FieldType::Select => SELECT_KEYS,
            FieldType::MultiSelect => MULTI_SELECT_KEYS,
            FieldType::Tags => TAGS_KEYS,
            FieldType::MultiUser => MULTI_USER_KEYS,
            FieldType::Checkbox | FieldType::User => NO_KEYS,
            FieldType::File => FILE_KEYS,
            FieldType::Color => COLOR_KEYS,
            FieldType::Location => LOCATION_KEYS,
            FieldType::Formula => FORMULA_KEYS,
            FieldType::Relation => RELATION_KEYS,
            FieldType::Lookup => LOOKUP_KEYS,
        }
    }

    /// Filter operators valid for this kind.
    pub const fn default_operators(self) -> &'static [FilterOperator] {
        match self {
            FieldType::Text | FieldType::Url | FieldType::Email | FieldType::Phone => STRING_OPERATORS,
            FieldType::Number
            | FieldType::Currency
            | FieldType::Percentage
            | FieldType::Duration
            | FieldType::Rating
            | FieldType::Date => ORDERED_OPERATORS,
            FieldType::Select => CHOICE_OPERATORS,
            FieldType::MultiSelect | FieldType::Tags | FieldType::MultiUser => SET_OPERATORS,
            FieldType::Checkbox | FieldType::User | FieldType::Relation | FieldType::Color => IDENTITY_OPERATORS,
            FieldType::File | FieldType::Location => PRESENCE_OPERATORS,
            FieldType::Formula | FieldType::Lookup => COMPUTED_OPERATORS,
        }
    }

    #[inline]
    pub fn supports(self, operator: FilterOperator) -> bool {
        self.default_operators().contains(&operator)
    }

    /// Parse and check raw JSON configuration against this kind's schema.
    ///
    /// `null` is treated as an empty object. Unknown keys, missing required keys and
    /// semantically invalid values (e.g. a select with no options) are rejected.
    pub fn parse_configuration(self, field: &str, raw: &Value) -> DefinitionResult<FieldConfig> {
        let empty = serde_json::Map::new();
        let object = match raw {
            Value::Null => &empty,
            Value::Object(map) => map,
            _ => return Err(DefinitionError::config(field, "configuration must be an object")),
        };

        let schema = self.configuration_schema();
        for key in object.keys() {
            if !schema.allows(key) {
                return Err(DefinitionError::config(
                    field,
                    format!("unknown key '{key}' for {self} fields"),
                ));
            }
        }
        for key in schema.required {
            if !object.contains_key(*key) {
                return Err(DefinitionError::config(field, format!("missing required key '{key}'")));
            }
        }

        let raw = Value::Object(object.clone());
        let config = match self {
            FieldType::Text | FieldType::Url | FieldType::Email | FieldType::Phone => {
                FieldConfig::Text(from_raw(field, raw)?)
            }
            FieldType::Number
            | FieldType::Currency
            | FieldType::Percentage
            | FieldType::Duration
            | FieldType::Rating => FieldConfig::Number(from_raw(field, raw)?),
            FieldType::Date => FieldConfig::Date(from_raw(field, raw)?),
            FieldType::Select => FieldConfig::Select(from_raw(field, raw)?),
            FieldType::MultiSelect | FieldType::Tags | FieldType::MultiUser => {
                FieldConfig::MultiSelect(from_raw(field, raw)?)
            }
            FieldType::Checkbox | FieldType::User => FieldConfig::Empty,
            FieldType::File => FieldConfig::File(from_raw(field, raw)?),
            FieldType::Color => FieldConfig::Color(from_raw(field, raw)?),
            FieldType::Location => FieldConfig::Location(from_raw(field, raw)?),
            FieldType::Formula => FieldConfig::Formula(from_raw(field, raw)?),
            FieldType::Relation => FieldConfig::Relation(from_raw(field, raw)?),
            FieldType::Lookup => FieldConfig::Lookup(from_raw(field, raw)?),
        };
        config.check(self, field)?;
        Ok(config)
    }
}

fn from_raw<T: DeserializeOwned>(field: &str, raw: Value) -> DefinitionResult<T> {
    serde_json::from_value(raw).map_err(|err| DefinitionError::config(field, err.to_string()))
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        FieldType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| DefinitionError::UnknownFieldType { name: s.to_string() })
    }
}

/// A single option in a select or multi-select field.
#[cfg_attr(feature = "utoipa", derive(ToSchema))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub order: i32,
}

impl SelectOption {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: None,
            color: None,
            order: 0,
        }
    }
}

/// Type-specific configuration. Each variant carries only the keys meaningful for its kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldConfig {
    Empty,
    Text(TextConfig),
    Number(NumberConfig),
    Date(DateConfig),
    Select(SelectConfig),
    MultiSelect(MultiSelectConfig),
    File(FileConfig),
    Color(ColorConfig),
    Location(LocationConfig),
    Formula(FormulaConfig),
    Relation(RelationConfig),
    Lookup(LookupConfig),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// Shared by number, currency, percentage, duration and rating fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumberConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimal_places: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency_code: Option<String>,
    #[serde(default)]
    pub allow_out_of_range: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rating: Option<u32>,
}

impl NumberConfig {
    pub fn effective_max_rating(&self) -> u32 {
        self.max_rating.unwrap_or(DEFAULT_MAX_RATING)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,
    #[serde(default)]
    pub include_time: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectConfig {
    pub options: Vec<SelectOption>,
    #[serde(default)]
    pub allow_custom: bool,
}

impl SelectConfig {
    /// Find the canonical option for a raw value (exact match first, then case-insensitive).
    pub fn find(&self, candidate: &str) -> Option<&SelectOption> {
        find_option(&self.options, candidate)
    }
}

/// Shared by multi_select, tags and multi_user fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiSelectConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_selections: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_selections: Option<usize>,
}

impl MultiSelectConfig {
    pub fn find(&self, candidate: &str) -> Option<&SelectOption> {
        find_option(&self.options, candidate)
    }
}

fn find_option<'a>(options: &'a [SelectOption], candidate: &str) -> Option<&'a SelectOption> {
    options
        .iter()
        .find(|option| option.value == candidate)
        .or_else(|| {
            let folded = candidate.to_lowercase();
            options.iter().find(|option| option.value.to_lowercase() == folded)
        })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_extensions: Vec<String>,
    /// Maximum size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,
}

impl FileConfig {
    pub fn allows_extension(&self, extension: &str) -> bool {
        self.allowed_extensions.is_empty()
            || self
                .allowed_extensions
                .iter()
                .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorConfig {
    #[serde(default = "default_true")]
    pub allow_named: bool,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self { allow_named: true }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationMode {
    Coordinates,
    Text,
    #[default]
    Any,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    #[serde(default)]
    pub mode: LocationMode,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormulaConfig {
    pub formula: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimal_places: Option<u32>,
    /// Reference token (as written in the formula) to resolved field id. Filled by the registry.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<String, FieldId>,
}

impl FormulaConfig {
    /// Field ids this formula depends on, deduplicated.
    pub fn dependencies(&self) -> Vec<FieldId> {
        let mut seen = HashSet::new();
        self.references
            .values()
            .filter(|id| seen.insert((*id).clone()))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationConfig {
    pub related_entity_type: EntityType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupConfig {
    pub related_entity_type: EntityType,
    /// Relation field on the local entity holding the related entity's id.
    pub relation_field_id: FieldId,
    /// Field of the related entity whose resolved value is surfaced.
    pub lookup_field_id: FieldId,
}

impl FieldConfig {
    /// Default configuration for kinds that require no keys.
    pub fn default_for(field_type: FieldType) -> Option<FieldConfig> {
        field_type.parse_configuration("", &Value::Null).ok()
    }

    /// Structural checks that cannot be expressed by serde alone.
    fn check(&self, field_type: FieldType, field: &str) -> DefinitionResult<()> {
        match self {
            FieldConfig::Empty | FieldConfig::Color(_) | FieldConfig::Location(_) | FieldConfig::Relation(_) => Ok(()),
            FieldConfig::Text(config) => {
                if config.max_length == Some(0) {
                    return Err(DefinitionError::config(field, "max_length must be positive"));
                }
                if let Some(pattern) = &config.pattern {
                    Regex::new(pattern)
                        .map_err(|err| DefinitionError::config(field, format!("invalid pattern: {err}")))?;
                }
                Ok(())
            }
            FieldConfig::Number(config) => {
                if let (Some(min), Some(max)) = (config.min_value, config.max_value)
                    && min > max
                {
                    return Err(DefinitionError::config(field, "min_value exceeds max_value"));
                }
                if config.min_value.is_some_and(|v| !v.is_finite()) || config.max_value.is_some_and(|v| !v.is_finite())
                {
                    return Err(DefinitionError::config(field, "bounds must be finite numbers"));
                }
                if config.decimal_places.is_some_and(|places| places > MAX_DECIMAL_PLACES) {
                    return Err(DefinitionError::config(
                        field,
                        format!("decimal_places must be at most {MAX_DECIMAL_PLACES}"),
                    ));
                }
                if field_type == FieldType::Rating {
                    let max = config.effective_max_rating();
                    if max == 0 || max > MAX_RATING_LIMIT {
                        return Err(DefinitionError::config(
                            field,
                            format!("max_rating must be between 1 and {MAX_RATING_LIMIT}"),
                        ));
                    }
                }
                if let Some(code) = &config.currency_code
                    && (code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()))
                {
                    return Err(DefinitionError::config(field, "currency_code must be a 3-letter ISO code"));
                }
                Ok(())
            }
            FieldConfig::Date(config) => {
                if let Some(format) = &config.date_format
                    && (format.trim().is_empty() || StrftimeItems::new(format).any(|item| matches!(item, Item::Error)))
                {
                    return Err(DefinitionError::config(field, format!("invalid date_format '{format}'")));
                }
                if let (Some(min), Some(max)) = (config.min_date, config.max_date)
                    && min > max
                {
                    return Err(DefinitionError::config(field, "min_date is after max_date"));
                }
                Ok(())
            }
            FieldConfig::Select(config) => {
                if config.options.is_empty() {
                    return Err(DefinitionError::config(field, "select fields need at least one option"));
                }
                check_options(field, &config.options)
            }
            FieldConfig::MultiSelect(config) => {
                if field_type == FieldType::MultiSelect && config.options.is_empty() {
                    return Err(DefinitionError::config(
                        field,
                        "multi_select fields need at least one option",
                    ));
                }
                check_options(field, &config.options)?;
                if config.max_selections == Some(0) {
                    return Err(DefinitionError::config(field, "max_selections must be positive"));
                }
                if let (Some(min), Some(max)) = (config.min_selections, config.max_selections)
                    && min > max
                {
                    return Err(DefinitionError::config(field, "min_selections exceeds max_selections"));
                }
                if field_type == FieldType::MultiSelect
                    && config.min_selections.is_some_and(|min| min > config.options.len())
                {
                    return Err(DefinitionError::config(field, "min_selections exceeds the number of options"));
                }
                Ok(())
            }
            FieldConfig::File(config) => {
                if config.max_file_size == Some(0) {
                    return Err(DefinitionError::config(field, "max_file_size must be positive"));
                }
                if config.allowed_extensions.iter().any(|ext| ext.trim_start_matches('.').is_empty()) {
                    return Err(DefinitionError::config(field, "allowed_extensions contains an empty entry"));
                }
                Ok(())
            }
            FieldConfig::Formula(config) => {
                if config.formula.trim().is_empty() {
                    return Err(DefinitionError::config(field, "formula cannot be empty"));
                }
                if config.decimal_places.is_some_and(|places| places > MAX_DECIMAL_PLACES) {
                    return Err(DefinitionError::config(
                        field,
                        format!("decimal_places must be at most {MAX_DECIMAL_PLACES}"),
                    ));
                }
                formula::parse(&config.formula)
                    .map(|_| ())
                    .map_err(|err| DefinitionError::config(field, err.to_string()))
            }
            FieldConfig::Lookup(config) => {
                if config.relation_field_id.as_str().trim().is_empty() || config.lookup_field_id.as_str().trim().is_empty()
                {
                    return Err(DefinitionError::config(field, "lookup field references cannot be empty"));
                }
                Ok(())
            }
        }
    }

    pub fn as_select(&self) -> Option<&SelectConfig> {
        match self {
            FieldConfig::Select(config) => Some(config),
            _ => None,
        }
    }

    pub fn as_formula(&self) -> Option<&FormulaConfig> {
        match self {
            FieldConfig::Formula(config) => Some(config),
            _ => None,
        }
    }

    pub fn as_lookup(&self) -> Option<&LookupConfig> {
        match self {
            FieldConfig::Lookup(config) => Some(config),
            _ => None,
        }
    }

    pub fn as_relation(&self) -> Option<&RelationConfig> {
        match self {
            FieldConfig::Relation(config) => Some(config),
            _ => None,
        }
    }
}

fn check_options(field: &str, options: &[SelectOption]) -> DefinitionResult<()> {
    let mut seen = HashSet::new();
    for option in options {
        let value = option.value.trim();
        if value.is_empty() {
            return Err(DefinitionError::config(field, "option values cannot be empty"));
        }
        if !seen.insert(value.to_lowercase()) {
            return Err(DefinitionError::config(field, format!("duplicate option '{value}'")));
        }
    }
    Ok(())
}
