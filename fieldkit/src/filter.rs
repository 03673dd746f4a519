//! # Filter Evaluation
//!
//! A [`FilterConfig`] is a flat list of `(field, operator, value)` conditions
//! joined by a single [`FilterLogic`]. Evaluation runs against an entity's
//! resolved values and never fails: a condition that cannot be evaluated
//! (unknown field, unsupported operator, bad operand, unavailable value)
//! counts as `false` and is reported back as a warning.
//!
//! | Field kinds                          | Operators                                                  |
//! |--------------------------------------|------------------------------------------------------------|
//! | numeric, `date`                      | `equals`, `not_equals`, `greater_than`, `less_than`, `between` |
//! | `text`, `url`, `email`, `phone`      | `equals`, `not_equals`, `contains`, `starts_with`, `ends_with` |
//! | `multi_select`, `tags`, `multi_user` | `contains_any`, `contains_all`                             |
//! | every kind                           | `is_empty`, `is_not_empty`                                 |
//!
//! Text comparisons are case-insensitive. `between` is inclusive on both ends.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[cfg(feature = "utoipa")]
use utoipa::ToSchema;

use crate::errors::{EvaluationError, FieldError};
use crate::id::FieldId;
use crate::types::{
    CustomFieldDefinition, EntityType, FieldValue, Location, ResolvedValue, ResolvedValues, format_number,
};

#[cfg_attr(feature = "utoipa", derive(ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Between,
    Contains,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
    ContainsAny,
    ContainsAll,
}

impl FilterOperator {
    pub const ALL: [FilterOperator; 12] = [
        FilterOperator::Equals,
        FilterOperator::NotEquals,
        FilterOperator::GreaterThan,
        FilterOperator::LessThan,
        FilterOperator::Between,
        FilterOperator::Contains,
        FilterOperator::StartsWith,
        FilterOperator::EndsWith,
        FilterOperator::IsEmpty,
        FilterOperator::IsNotEmpty,
        FilterOperator::ContainsAny,
        FilterOperator::ContainsAll,
    ];

    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            FilterOperator::Equals => "equals",
            FilterOperator::NotEquals => "not_equals",
            FilterOperator::GreaterThan => "greater_than",
            FilterOperator::LessThan => "less_than",
            FilterOperator::Between => "between",
            FilterOperator::Contains => "contains",
            FilterOperator::StartsWith => "starts_with",
            FilterOperator::EndsWith => "ends_with",
            FilterOperator::IsEmpty => "is_empty",
            FilterOperator::IsNotEmpty => "is_not_empty",
            FilterOperator::ContainsAny => "contains_any",
            FilterOperator::ContainsAll => "contains_all",
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOperator {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        FilterOperator::ALL
            .into_iter()
            .find(|op| op.as_str() == normalized)
            .ok_or_else(|| FieldError::InvalidRequest {
                message: format!("unknown filter operator: {s}"),
            })
    }
}

#[cfg_attr(feature = "utoipa", derive(ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterLogic {
    #[default]
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

/// One field-level condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub field_id: FieldId,
    pub operator: FilterOperator,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
}

impl FilterCondition {
    pub fn new(field_id: impl Into<FieldId>, operator: FilterOperator, value: Value) -> Self {
        Self {
            field_id: field_id.into(),
            operator,
            value,
        }
    }

    #[inline]
    pub fn equals(field_id: impl Into<FieldId>, value: impl Into<Value>) -> Self {
        Self::new(field_id, FilterOperator::Equals, value.into())
    }

    #[inline]
    pub fn greater_than(field_id: impl Into<FieldId>, value: impl Into<Value>) -> Self {
        Self::new(field_id, FilterOperator::GreaterThan, value.into())
    }

    #[inline]
    pub fn less_than(field_id: impl Into<FieldId>, value: impl Into<Value>) -> Self {
        Self::new(field_id, FilterOperator::LessThan, value.into())
    }

    #[inline]
    pub fn between(field_id: impl Into<FieldId>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::new(field_id, FilterOperator::Between, Value::Array(vec![low.into(), high.into()]))
    }

    #[inline]
    pub fn contains(field_id: impl Into<FieldId>, value: impl Into<String>) -> Self {
        Self::new(field_id, FilterOperator::Contains, Value::String(value.into()))
    }

    pub fn contains_any<S: Into<String>>(field_id: impl Into<FieldId>, values: impl IntoIterator<Item = S>) -> Self {
        Self::new(field_id, FilterOperator::ContainsAny, string_array(values))
    }

    pub fn contains_all<S: Into<String>>(field_id: impl Into<FieldId>, values: impl IntoIterator<Item = S>) -> Self {
        Self::new(field_id, FilterOperator::ContainsAll, string_array(values))
    }

    #[inline]
    pub fn is_empty(field_id: impl Into<FieldId>) -> Self {
        Self::new(field_id, FilterOperator::IsEmpty, Value::Null)
    }

    #[inline]
    pub fn is_not_empty(field_id: impl Into<FieldId>) -> Self {
        Self::new(field_id, FilterOperator::IsNotEmpty, Value::Null)
    }
}

fn string_array<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Value {
    Value::Array(values.into_iter().map(|value| Value::String(value.into())).collect())
}

/// A single-level boolean expression over field conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub logic: FilterLogic,
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
}

impl FilterConfig {
    pub fn all(conditions: impl IntoIterator<Item = FilterCondition>) -> Self {
        Self {
            logic: FilterLogic::And,
            conditions: conditions.into_iter().collect(),
        }
    }

    pub fn any(conditions: impl IntoIterator<Item = FilterCondition>) -> Self {
        Self {
            logic: FilterLogic::Or,
            conditions: conditions.into_iter().collect(),
        }
    }
}

/// A persisted, named filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldFilter {
    pub id: String,
    pub name: String,
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub filter: FilterConfig,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for saving a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCustomFieldFilter {
    pub name: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub description: Option<String>,
    pub filter: FilterConfig,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl NewCustomFieldFilter {
    pub fn new(name: impl Into<String>, entity_type: EntityType, filter: FilterConfig) -> Self {
        Self {
            name: name.into(),
            entity_type,
            description: None,
            filter,
            is_shared: false,
            created_by: None,
        }
    }

    pub fn shared(mut self) -> Self {
        self.is_shared = true;
        self
    }

    pub fn created_by(mut self, user: impl Into<String>) -> Self {
        self.created_by = Some(user.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub filter: Option<FilterConfig>,
    #[serde(default)]
    pub is_shared: Option<bool>,
}

/// Result of evaluating a filter against one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOutcome {
    pub matched: bool,
    /// Conditions that failed closed.
    pub warnings: Vec<EvaluationError>,
}

/// Evaluates filters against resolved values, using the field definitions to select operator semantics.
pub struct FilterEvaluator<'a> {
    definitions: HashMap<&'a FieldId, &'a CustomFieldDefinition>,
}

impl<'a> FilterEvaluator<'a> {
    pub fn new<I>(definitions: I) -> Self
    where
        I: IntoIterator<Item = &'a CustomFieldDefinition>,
    {
        Self {
            definitions: definitions.into_iter().map(|def| (&def.id, def)).collect(),
        }
    }

    /// Evaluate `config` against `values`. `AND` stops at the first false condition and `OR` at the
    /// first true one; an empty condition list matches.
    pub fn evaluate(&self, config: &FilterConfig, values: &ResolvedValues) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();
        if config.conditions.is_empty() {
            outcome.matched = true;
            return outcome;
        }

        let mut matched = config.logic == FilterLogic::And;
        for condition in &config.conditions {
            let result = match self.evaluate_condition(condition, values) {
                Ok(result) => result,
                Err(error) => {
                    warn!("filter condition on '{}' failed closed: {error}", condition.field_id);
                    outcome.warnings.push(error);
                    false
                }
            };
            match config.logic {
                FilterLogic::And if !result => {
                    matched = false;
                    break;
                }
                FilterLogic::Or if result => {
                    matched = true;
                    break;
                }
                _ => {}
            }
        }
        outcome.matched = matched;
        outcome
    }

    fn evaluate_condition(&self, condition: &FilterCondition, values: &ResolvedValues) -> Result<bool, EvaluationError> {
        let definition = self
            .definitions
            .get(&condition.field_id)
            .ok_or_else(|| EvaluationError::UnknownField {
                field_id: condition.field_id.to_string(),
            })?;
        if !definition.field_type.supports(condition.operator) {
            return Err(EvaluationError::UnsupportedOperator {
                field_id: condition.field_id.to_string(),
                field_type: definition.field_type.to_string(),
                operator: condition.operator.to_string(),
            });
        }

        let value = match values.get(&condition.field_id) {
            Some(ResolvedValue::Value(value)) if !is_empty_value(value) => value,
            Some(ResolvedValue::Unavailable(error)) => return Err(error.clone()),
            // Missing, null and empty values only satisfy the presence operators.
            _ => return Ok(condition.operator == FilterOperator::IsEmpty),
        };

        apply(condition, value)
    }
}

fn is_empty_value(value: &FieldValue) -> bool {
    match value {
        FieldValue::Text(text) => text.trim().is_empty(),
        FieldValue::List(items) => items.is_empty(),
        FieldValue::Location(Location::Place(place)) => place.trim().is_empty(),
        _ => false,
    }
}

fn apply(condition: &FilterCondition, value: &FieldValue) -> Result<bool, EvaluationError> {
    use FilterOperator as Op;

    let operand = &condition.value;
    match condition.operator {
        Op::IsEmpty => Ok(false),
        Op::IsNotEmpty => Ok(true),
        Op::Equals => equals(condition, value, operand),
        Op::NotEquals => equals(condition, value, operand).map(|eq| !eq),
        Op::GreaterThan => compare(condition, value, operand).map(|ord| ord == std::cmp::Ordering::Greater),
        Op::LessThan => compare(condition, value, operand).map(|ord| ord == std::cmp::Ordering::Less),
        Op::Between => {
            let (low, high) = match operand {
                Value::Array(bounds) if bounds.len() == 2 => (&bounds[0], &bounds[1]),
                _ => return Err(invalid(condition, "between expects [low, high]")),
            };
            let above = compare(condition, value, low)? != std::cmp::Ordering::Less;
            let below = compare(condition, value, high)? != std::cmp::Ordering::Greater;
            Ok(above && below)
        }
        Op::Contains | Op::StartsWith | Op::EndsWith => {
            let needle = text_operand(condition, operand)?.to_lowercase();
            if let FieldValue::List(items) = value
                && condition.operator == Op::Contains
            {
                return Ok(items.iter().any(|item| item.to_lowercase() == needle));
            }
            let haystack = searchable_text(value)
                .ok_or_else(|| invalid(condition, "field value is not text"))?
                .to_lowercase();
            Ok(match condition.operator {
                Op::Contains => haystack.contains(&needle),
                Op::StartsWith => haystack.starts_with(&needle),
                _ => haystack.ends_with(&needle),
            })
        }
        Op::ContainsAny | Op::ContainsAll => {
            let wanted = list_operand(condition, operand)?;
            if wanted.is_empty() {
                return Err(invalid(condition, "expected at least one value"));
            }
            let present: Vec<String> = match value {
                FieldValue::List(items) => items.iter().map(|item| item.to_lowercase()).collect(),
                FieldValue::Text(text) => vec![text.to_lowercase()],
                _ => return Err(invalid(condition, "field value is not a set")),
            };
            let mut hits = wanted.iter().map(|item| present.contains(item));
            Ok(if condition.operator == Op::ContainsAny {
                hits.any(|hit| hit)
            } else {
                hits.all(|hit| hit)
            })
        }
    }
}

fn invalid(condition: &FilterCondition, message: impl Into<String>) -> EvaluationError {
    EvaluationError::InvalidFilterValue {
        field_id: condition.field_id.to_string(),
        message: message.into(),
    }
}

fn equals(condition: &FilterCondition, value: &FieldValue, operand: &Value) -> Result<bool, EvaluationError> {
    match value {
        FieldValue::Number(_) | FieldValue::Date(_) => {
            compare(condition, value, operand).map(|ord| ord == std::cmp::Ordering::Equal)
        }
        FieldValue::Bool(flag) => match operand {
            Value::Bool(expected) => Ok(flag == expected),
            Value::String(text) => text
                .parse::<bool>()
                .map(|expected| *flag == expected)
                .map_err(|_| invalid(condition, "expected a boolean")),
            _ => Err(invalid(condition, "expected a boolean")),
        },
        FieldValue::List(items) => {
            let mut wanted = list_operand(condition, operand)?;
            let mut present: Vec<String> = items.iter().map(|item| item.to_lowercase()).collect();
            present.sort();
            wanted.sort();
            Ok(present == wanted)
        }
        other => {
            let expected = text_operand(condition, operand)?;
            let actual = searchable_text(other).ok_or_else(|| invalid(condition, "field value is not text"))?;
            Ok(actual.to_lowercase() == expected.to_lowercase())
        }
    }
}

fn compare(condition: &FilterCondition, value: &FieldValue, operand: &Value) -> Result<std::cmp::Ordering, EvaluationError> {
    match value {
        FieldValue::Number(actual) => {
            let expected = number_operand(operand).ok_or_else(|| invalid(condition, "expected a number"))?;
            actual
                .partial_cmp(&expected)
                .ok_or_else(|| invalid(condition, "number is not comparable"))
        }
        FieldValue::Date(actual) => {
            let expected = date_operand(operand).ok_or_else(|| invalid(condition, "expected a date"))?;
            Ok(actual.cmp(&expected))
        }
        _ => Err(invalid(condition, "field value is not ordered")),
    }
}

fn number_operand(operand: &Value) -> Option<f64> {
    match operand {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` dates (midnight UTC).
fn date_operand(operand: &Value) -> Option<DateTime<Utc>> {
    let text = operand.as_str()?.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn text_operand(condition: &FilterCondition, operand: &Value) -> Result<String, EvaluationError> {
    match operand {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        _ => Err(invalid(condition, "expected a string")),
    }
}

fn list_operand(condition: &FilterCondition, operand: &Value) -> Result<Vec<String>, EvaluationError> {
    match operand {
        Value::String(text) => Ok(vec![text.to_lowercase()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_lowercase)
                    .ok_or_else(|| invalid(condition, "expected a list of strings"))
            })
            .collect(),
        _ => Err(invalid(condition, "expected a list of strings")),
    }
}

fn searchable_text(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Text(text) => Some(text.clone()),
        FieldValue::Number(number) => Some(format_number(*number)),
        FieldValue::Location(Location::Place(place)) => Some(place.clone()),
        FieldValue::File(file) => Some(file.name.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldConfig, FieldType};
    use crate::errors::FormulaError;
    use crate::types::ValidationRules;
    use chrono::TimeZone;
    use serde_json::json;

    fn definition(id: &str, field_type: FieldType) -> CustomFieldDefinition {
        let now = Utc::now();
        CustomFieldDefinition {
            id: FieldId::new(id),
            name: id.to_string(),
            field_type,
            entity_type: EntityType::Task,
            entity_id: None,
            description: None,
            required: false,
            position: 0,
            configuration: FieldConfig::Empty,
            validation_rules: ValidationRules::default(),
            default_value: None,
            is_active: true,
            is_system: false,
            archived: false,
            show_in_list: true,
            show_in_details: true,
            searchable: true,
            sortable: true,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn fixture() -> (Vec<CustomFieldDefinition>, ResolvedValues) {
        let definitions = vec![
            definition("hours", FieldType::Number),
            definition("title", FieldType::Text),
            definition("labels", FieldType::Tags),
            definition("due", FieldType::Date),
            definition("owner", FieldType::User),
            definition("cost", FieldType::Formula),
        ];
        let mut values = ResolvedValues::new();
        values.insert("hours".into(), ResolvedValue::Value(FieldValue::Number(5.0)));
        values.insert("title".into(), ResolvedValue::Value(FieldValue::Text("Fix Login Bug".into())));
        values.insert(
            "labels".into(),
            ResolvedValue::Value(FieldValue::List(vec!["backend".into(), "urgent".into()])),
        );
        values.insert(
            "due".into(),
            ResolvedValue::Value(FieldValue::Date(Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap())),
        );
        values.insert(
            "cost".into(),
            ResolvedValue::Unavailable(EvaluationError::Formula(FormulaError::DivisionByZero)),
        );
        (definitions, values)
    }

    #[test]
    fn and_stops_at_first_false() {
        let (definitions, values) = fixture();
        let evaluator = FilterEvaluator::new(&definitions);
        let config = FilterConfig::all([
            FilterCondition::greater_than("hours", 10),
            FilterCondition::contains("title", "login"),
        ]);
        let outcome = evaluator.evaluate(&config, &values);
        assert!(!outcome.matched);
        assert!(outcome.warnings.is_empty());

        let config = FilterConfig::all([
            FilterCondition::between("hours", 1, 5),
            FilterCondition::contains("title", "LOGIN"),
            FilterCondition::contains_all("labels", ["urgent", "backend"]),
        ]);
        assert!(evaluator.evaluate(&config, &values).matched);
    }

    #[test]
    fn or_matches_on_any_true() {
        let (definitions, values) = fixture();
        let evaluator = FilterEvaluator::new(&definitions);
        let config = FilterConfig::any([
            FilterCondition::equals("hours", 99),
            FilterCondition::contains_any("labels", ["frontend", "urgent"]),
        ]);
        assert!(evaluator.evaluate(&config, &values).matched);
    }

    #[test]
    fn null_only_satisfies_presence_operators() {
        let (definitions, values) = fixture();
        let evaluator = FilterEvaluator::new(&definitions);
        assert!(evaluator.evaluate(&FilterConfig::all([FilterCondition::is_empty("owner")]), &values).matched);
        let not_equals = FilterCondition::new("owner", FilterOperator::NotEquals, json!("usr_1"));
        assert!(!evaluator.evaluate(&FilterConfig::all([not_equals]), &values).matched);
        assert!(evaluator.evaluate(&FilterConfig::all([FilterCondition::is_not_empty("title")]), &values).matched);
    }

    #[test]
    fn unsupported_operator_fails_closed_with_warning() {
        let (definitions, values) = fixture();
        let evaluator = FilterEvaluator::new(&definitions);
        let config = FilterConfig::any([FilterCondition::contains("hours", "5")]);
        let outcome = evaluator.evaluate(&config, &values);
        assert!(!outcome.matched);
        assert!(matches!(outcome.warnings[0], EvaluationError::UnsupportedOperator { .. }));
    }

    #[test]
    fn set_operators_reject_empty_operands() {
        let (definitions, values) = fixture();
        let evaluator = FilterEvaluator::new(&definitions);
        let none: [&str; 0] = [];
        for condition in [
            FilterCondition::contains_all("labels", none),
            FilterCondition::contains_any("labels", none),
        ] {
            let outcome = evaluator.evaluate(&FilterConfig::all([condition]), &values);
            assert!(!outcome.matched);
            assert!(matches!(outcome.warnings[0], EvaluationError::InvalidFilterValue { .. }));
        }
    }

    #[test]
    fn unknown_fields_and_unavailable_values_warn() {
        let (definitions, values) = fixture();
        let evaluator = FilterEvaluator::new(&definitions);
        let config = FilterConfig::any([
            FilterCondition::equals("missing", "x"),
            FilterCondition::greater_than("cost", 1),
        ]);
        let outcome = evaluator.evaluate(&config, &values);
        assert!(!outcome.matched);
        assert_eq!(outcome.warnings.len(), 2);
    }

    #[test]
    fn dates_compare_against_bare_dates() {
        let (definitions, values) = fixture();
        let evaluator = FilterEvaluator::new(&definitions);
        let config = FilterConfig::all([FilterCondition::between("due", "2024-05-01", "2024-05-31")]);
        assert!(evaluator.evaluate(&config, &values).matched);
        let config = FilterConfig::all([FilterCondition::less_than("due", "2024-05-10T00:00:00Z")]);
        assert!(!evaluator.evaluate(&config, &values).matched);
    }

    #[test]
    fn logic_deserializes_from_upper_and_lower_case() {
        let config: FilterConfig = serde_json::from_value(json!({
            "logic": "or",
            "conditions": [{ "field_id": "hours", "operator": "between", "value": [1, 2] }]
        }))
        .unwrap();
        assert_eq!(config.logic, FilterLogic::Or);
        assert_eq!(config.conditions[0].operator, FilterOperator::Between);
        assert_eq!(serde_json::to_value(FilterLogic::And).unwrap(), json!("AND"));
    }

    #[test]
    fn empty_filter_matches() {
        let (definitions, values) = fixture();
        let evaluator = FilterEvaluator::new(&definitions);
        let config = FilterConfig {
            logic: FilterLogic::Or,
            conditions: Vec::new(),
        };
        assert!(evaluator.evaluate(&config, &values).matched);
    }
}
