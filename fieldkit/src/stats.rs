//! Per-field aggregates, recomputed on demand.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

#[cfg(feature = "utoipa")]
use utoipa::ToSchema;

use crate::catalog::FieldType;
use crate::id::FieldId;
use crate::types::{CustomFieldDefinition, FieldValue, ResolvedValue};

#[cfg_attr(feature = "utoipa", derive(ToSchema))]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomFieldStats {
    pub field_id: FieldId,
    pub field_name: String,
    pub field_type: FieldType,
    /// Entities holding a value.
    pub total_values: u64,
    pub unique_values: u64,
    /// Entities without a value.
    pub null_count: u64,
    /// Computed values that failed to resolve.
    pub unavailable_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_distribution: Option<BTreeMap<String, u64>>,
}

/// Aggregate the resolved values of one field across a population of entities.
pub fn compute<'a, I>(definition: &CustomFieldDefinition, values: I) -> CustomFieldStats
where
    I: IntoIterator<Item = &'a ResolvedValue>,
{
    let mut total = 0u64;
    let mut nulls = 0u64;
    let mut unavailable = 0u64;
    let mut distinct = HashSet::new();
    let mut numbers = Vec::new();
    let mut distribution = BTreeMap::new();
    let categorical = definition.field_type.is_categorical();

    for resolved in values {
        let value = match resolved {
            ResolvedValue::Value(value) => value,
            ResolvedValue::Null => {
                nulls += 1;
                continue;
            }
            ResolvedValue::Unavailable(_) => {
                unavailable += 1;
                continue;
            }
        };
        total += 1;
        distinct.insert(value.to_json().to_string());
        if let FieldValue::Number(number) = value {
            numbers.push(*number);
        }
        if categorical {
            for bucket in buckets(value) {
                *distribution.entry(bucket).or_insert(0u64) += 1;
            }
        }
    }

    let (average, min, max) = if numbers.is_empty() {
        (None, None, None)
    } else {
        let sum: f64 = numbers.iter().sum();
        (
            Some(sum / numbers.len() as f64),
            numbers.iter().copied().reduce(f64::min),
            numbers.iter().copied().reduce(f64::max),
        )
    };

    CustomFieldStats {
        field_id: definition.id.clone(),
        field_name: definition.name.clone(),
        field_type: definition.field_type,
        total_values: total,
        unique_values: distinct.len() as u64,
        null_count: nulls,
        unavailable_count: unavailable,
        average,
        min,
        max,
        value_distribution: categorical.then_some(distribution),
    }
}

fn buckets(value: &FieldValue) -> Vec<String> {
    match value {
        FieldValue::List(items) => items.clone(),
        other => vec![other.display()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{EvaluationError, FormulaError};
    use crate::registry::FieldRegistry;
    use crate::types::{EntityType, NewFieldDefinition};
    use serde_json::json;

    #[test]
    fn numeric_stats() {
        let registry = FieldRegistry::default();
        let hours = registry
            .create(NewFieldDefinition::new("Hours", FieldType::Number, EntityType::Task))
            .unwrap();
        let values = [
            ResolvedValue::Value(FieldValue::Number(2.0)),
            ResolvedValue::Value(FieldValue::Number(4.0)),
            ResolvedValue::Value(FieldValue::Number(4.0)),
            ResolvedValue::Null,
            ResolvedValue::Unavailable(EvaluationError::Formula(FormulaError::DivisionByZero)),
        ];

        let stats = compute(&hours, &values);
        assert_eq!(stats.total_values, 3);
        assert_eq!(stats.unique_values, 2);
        assert_eq!(stats.null_count, 1);
        assert_eq!(stats.unavailable_count, 1);
        assert_eq!(stats.min, Some(2.0));
        assert_eq!(stats.max, Some(4.0));
        assert!((stats.average.unwrap() - 10.0 / 3.0).abs() < 1e-9);
        assert!(stats.value_distribution.is_none());
    }

    #[test]
    fn categorical_distribution_counts_list_members() {
        let registry = FieldRegistry::default();
        let tags = registry
            .create(
                NewFieldDefinition::new("Labels", FieldType::MultiSelect, EntityType::Task)
                    .with_configuration(json!({ "options": [{ "value": "ui" }, { "value": "api" }] })),
            )
            .unwrap();
        let values = [
            ResolvedValue::Value(FieldValue::List(vec!["ui".into(), "api".into()])),
            ResolvedValue::Value(FieldValue::List(vec!["ui".into()])),
        ];

        let stats = compute(&tags, &values);
        let distribution = stats.value_distribution.unwrap();
        assert_eq!(distribution["ui"], 2);
        assert_eq!(distribution["api"], 1);
        assert!(stats.average.is_none());
    }
}
