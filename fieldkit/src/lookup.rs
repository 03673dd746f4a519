//! Resolution of computed fields.
//!
//! [`LookupResolver`] follows a relation field to one related entity and surfaces a field from it.
//! It also drives whole-record resolution, since lookups and formulas interleave in dependency
//! order. Fetching the related entity goes through an [`EntityAccessor`].

use log::warn;
use thiserror::Error;

use crate::catalog::{FieldConfig, FieldType};
use crate::errors::{DefinitionResult, EvaluationError, LookupError};
use crate::formula::FormulaEngine;
use crate::registry::FieldRegistry;
use crate::types::{CustomFieldDefinition, EntityRecord, EntityType, FieldValue, ResolvedValue, ResolvedValues};

/// The requested entity does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{entity_type} '{id}' not found")]
pub struct NotFound {
    pub entity_type: EntityType,
    pub id: String,
}

impl NotFound {
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            entity_type,
            id: id.into(),
        }
    }
}

/// Loads stored values of a related entity.
pub trait EntityAccessor {
    fn fetch(&self, entity_type: EntityType, entity_id: &str) -> Result<EntityRecord, NotFound>;
}

pub struct LookupResolver<'a> {
    registry: &'a FieldRegistry,
    formulas: &'a FormulaEngine,
    accessor: &'a dyn EntityAccessor,
}

impl<'a> LookupResolver<'a> {
    pub fn new(registry: &'a FieldRegistry, formulas: &'a FormulaEngine, accessor: &'a dyn EntityAccessor) -> Self {
        Self {
            registry,
            formulas,
            accessor,
        }
    }

    /// Resolve one lookup field given the already-resolved values of the local entity.
    ///
    /// An empty relation yields `Ok(None)`. Formula targets are computed on the related entity;
    /// lookups on the related entity are never followed.
    pub fn resolve(&self, lookup: &CustomFieldDefinition, local: &ResolvedValues) -> Result<Option<FieldValue>, LookupError> {
        let config = lookup
            .configuration
            .as_lookup()
            .ok_or_else(|| broken(format!("'{}' is not a lookup field", lookup.name)))?;

        let relation = self
            .registry
            .get(&config.relation_field_id)
            .ok()
            .filter(CustomFieldDefinition::is_live)
            .ok_or_else(|| broken(format!("relation field of '{}' is archived or deleted", lookup.name)))?;

        let related_id = match local.get(&relation.id) {
            Some(ResolvedValue::Value(FieldValue::Text(id))) => id.clone(),
            Some(ResolvedValue::Value(other)) => {
                return Err(broken(format!("relation '{}' holds {}", relation.name, other.display())));
            }
            Some(ResolvedValue::Unavailable(err)) => return Err(broken(err.to_string())),
            Some(ResolvedValue::Null) | None => return Ok(None),
        };

        let target = self
            .registry
            .get(&config.lookup_field_id)
            .ok()
            .filter(|target| target.is_live() && target.entity_type == config.related_entity_type)
            .ok_or_else(|| {
                broken(format!(
                    "target field of '{}' no longer exists on {}",
                    lookup.name, config.related_entity_type
                ))
            })?;
        if target.field_type == FieldType::Lookup {
            return Err(LookupError::DepthExceeded {
                field: lookup.name.clone(),
            });
        }
        if !target.applies_to(Some(&related_id)) {
            return Err(broken(format!(
                "'{}' does not apply to {} '{related_id}'",
                target.name, config.related_entity_type
            )));
        }

        let record = self
            .accessor
            .fetch(config.related_entity_type, &related_id)
            .map_err(|err| broken(err.to_string()))?;

        if !target.field_type.is_computed() {
            return Ok(record.values.get(&target.id).cloned());
        }

        let resolved = self.resolve_record(&record, false).map_err(|err| broken(err.to_string()))?;
        match resolved.get(&target.id) {
            Some(ResolvedValue::Value(value)) => Ok(Some(value.clone())),
            Some(ResolvedValue::Null) => Ok(None),
            Some(ResolvedValue::Unavailable(EvaluationError::Formula(source))) => Err(LookupError::TargetUnavailable {
                field: target.name.clone(),
                source: source.clone(),
            }),
            Some(ResolvedValue::Unavailable(other)) => Err(broken(other.to_string())),
            None => Err(broken(format!("'{}' was not resolved on '{related_id}'", target.name))),
        }
    }

    /// Every live field of `record`, stored values merged with computed ones.
    ///
    /// Fields are visited in dependency order. Failed computations become
    /// [`ResolvedValue::Unavailable`]. With `follow_lookups == false` lookup fields are marked
    /// unavailable instead of dereferenced.
    pub fn resolve_record(&self, record: &EntityRecord, follow_lookups: bool) -> DefinitionResult<ResolvedValues> {
        let order = self.registry.evaluation_order(record.entity_type, Some(&record.id))?;
        let mut resolved = ResolvedValues::with_capacity(order.len());

        for definition in &order {
            let value: ResolvedValue = match &definition.configuration {
                FieldConfig::Formula(config) => {
                    match self.formulas.compute(&record.id, &definition.id, config, &resolved) {
                        Ok(value) => value.into(),
                        Err(err) => degraded(definition, record, err.into()),
                    }
                }
                FieldConfig::Lookup(_) if follow_lookups => match self.resolve(definition, &resolved) {
                    Ok(value) => value.into(),
                    Err(err) => degraded(definition, record, err.into()),
                },
                FieldConfig::Lookup(_) => degraded(
                    definition,
                    record,
                    LookupError::DepthExceeded {
                        field: definition.name.clone(),
                    }
                    .into(),
                ),
                _ => record.values.get(&definition.id).cloned().into(),
            };
            resolved.insert(definition.id.clone(), value);
        }

        Ok(resolved)
    }
}

fn broken(message: impl Into<String>) -> LookupError {
    LookupError::BrokenReference {
        message: message.into(),
    }
}

fn degraded(definition: &CustomFieldDefinition, record: &EntityRecord, error: EvaluationError) -> ResolvedValue {
    warn!(
        "'{}' is unavailable on {} '{}': {error}",
        definition.name, record.entity_type, record.id
    );
    ResolvedValue::Unavailable(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FormulaError;
    use crate::id::FieldId;
    use crate::types::NewFieldDefinition;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Entities(HashMap<(EntityType, String), EntityRecord>);

    impl Entities {
        fn add(&mut self, record: EntityRecord) {
            self.0.insert((record.entity_type, record.id.clone()), record);
        }
    }

    impl EntityAccessor for Entities {
        fn fetch(&self, entity_type: EntityType, entity_id: &str) -> Result<EntityRecord, NotFound> {
            self.0
                .get(&(entity_type, entity_id.to_string()))
                .cloned()
                .ok_or_else(|| NotFound::new(entity_type, entity_id))
        }
    }

    struct Fixture {
        registry: FieldRegistry,
        budget: FieldId,
        project: FieldId,
        lookup: CustomFieldDefinition,
    }

    fn fixture() -> Fixture {
        let registry = FieldRegistry::default();
        let budget = registry
            .create(NewFieldDefinition::new("Budget", FieldType::Currency, EntityType::Project))
            .unwrap()
            .id;
        let project = registry
            .create(
                NewFieldDefinition::new("Project", FieldType::Relation, EntityType::Task)
                    .with_configuration(json!({ "related_entity_type": "project" })),
            )
            .unwrap()
            .id;
        let lookup = registry
            .create(
                NewFieldDefinition::new("Project Budget", FieldType::Lookup, EntityType::Task).with_configuration(json!({
                    "related_entity_type": "project",
                    "relation_field_id": "Project",
                    "lookup_field_id": "Budget"
                })),
            )
            .unwrap();
        Fixture {
            registry,
            budget,
            project,
            lookup,
        }
    }

    fn local(project: &FieldId, related: &str) -> ResolvedValues {
        ResolvedValues::from([(project.clone(), ResolvedValue::Value(FieldValue::Text(related.into())))])
    }

    #[test]
    fn follows_relation_to_stored_value() {
        let fx = fixture();
        let formulas = FormulaEngine::new(0);
        let mut entities = Entities::default();
        entities.add(EntityRecord::new(EntityType::Project, "p1").with_value(fx.budget.clone(), FieldValue::Number(5000.0)));
        let resolver = LookupResolver::new(&fx.registry, &formulas, &entities);

        let value = resolver.resolve(&fx.lookup, &local(&fx.project, "p1")).unwrap();
        assert_eq!(value, Some(FieldValue::Number(5000.0)));
        assert_eq!(resolver.resolve(&fx.lookup, &ResolvedValues::new()).unwrap(), None);
    }

    #[test]
    fn missing_entity_is_a_broken_reference() {
        let fx = fixture();
        let formulas = FormulaEngine::new(0);
        let entities = Entities::default();
        let resolver = LookupResolver::new(&fx.registry, &formulas, &entities);

        let err = resolver.resolve(&fx.lookup, &local(&fx.project, "gone")).unwrap_err();
        assert!(matches!(err, LookupError::BrokenReference { .. }));
    }

    #[test]
    fn archived_target_is_a_broken_reference() {
        let fx = fixture();
        fx.registry.archive(&fx.budget).unwrap();
        let formulas = FormulaEngine::new(0);
        let mut entities = Entities::default();
        entities.add(EntityRecord::new(EntityType::Project, "p1"));
        let resolver = LookupResolver::new(&fx.registry, &formulas, &entities);

        let err = resolver.resolve(&fx.lookup, &local(&fx.project, "p1")).unwrap_err();
        assert!(err.to_string().contains("no longer exists"));
    }

    #[test]
    fn formula_targets_are_computed_on_the_related_entity() {
        let fx = fixture();
        fx.registry
            .create(
                NewFieldDefinition::new("Budget With Tax", FieldType::Formula, EntityType::Project)
                    .with_configuration(json!({ "formula": "{Budget} * 1.5" })),
            )
            .unwrap();
        let lookup = fx
            .registry
            .create(
                NewFieldDefinition::new("Taxed", FieldType::Lookup, EntityType::Task).with_configuration(json!({
                    "related_entity_type": "project",
                    "relation_field_id": "Project",
                    "lookup_field_id": "Budget With Tax"
                })),
            )
            .unwrap();

        let formulas = FormulaEngine::new(0);
        let mut entities = Entities::default();
        entities.add(EntityRecord::new(EntityType::Project, "p1").with_value(fx.budget.clone(), FieldValue::Number(200.0)));
        entities.add(EntityRecord::new(EntityType::Project, "p2").with_value(fx.budget.clone(), FieldValue::Text("lots".into())));
        let resolver = LookupResolver::new(&fx.registry, &formulas, &entities);

        assert_eq!(
            resolver.resolve(&lookup, &local(&fx.project, "p1")).unwrap(),
            Some(FieldValue::Number(300.0))
        );
        let err = resolver.resolve(&lookup, &local(&fx.project, "p2")).unwrap_err();
        assert!(matches!(
            err,
            LookupError::TargetUnavailable {
                source: FormulaError::TypeMismatch { .. },
                ..
            }
        ));
    }

    #[test]
    fn record_resolution_degrades_instead_of_failing() {
        let fx = fixture();
        let formulas = FormulaEngine::new(0);
        let entities = Entities::default();
        let resolver = LookupResolver::new(&fx.registry, &formulas, &entities);

        let task = EntityRecord::new(EntityType::Task, "t1").with_value(fx.project.clone(), FieldValue::Text("gone".into()));
        let resolved = resolver.resolve_record(&task, true).unwrap();
        assert!(resolved[&fx.lookup.id].is_unavailable());
        assert_eq!(resolved[&fx.lookup.id].display(), "unavailable");

        let shallow = resolver.resolve_record(&task, false).unwrap();
        assert!(matches!(
            shallow[&fx.lookup.id],
            ResolvedValue::Unavailable(EvaluationError::Lookup(LookupError::DepthExceeded { .. }))
        ));
    }
}
