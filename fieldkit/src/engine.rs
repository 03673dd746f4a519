//! # Field Engine
//!
//! Facade tying the registry, validator, value store, computed-field resolution, filters,
//! templates and stats together. Hosting applications talk to this type; the components
//! underneath stay usable on their own.
//!
//! Fields can be addressed by id or by (case-insensitive) name wherever a `field` string is
//! accepted.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;

use crate::config::EngineSettings;
use crate::errors::{BulkValidationError, EvaluationError, FieldError, FieldResult, ValidationIssue};
use crate::filter::{CustomFieldFilter, FilterConfig, FilterEvaluator, FilterPatch, NewCustomFieldFilter};
use crate::formula::FormulaEngine;
use crate::id::{FieldId, generate_id};
use crate::lookup::{EntityAccessor, LookupResolver};
use crate::registry::{DeleteOutcome, FieldRegistry};
use crate::stats::{self, CustomFieldStats};
use crate::store::{MemoryStore, PreparedWrite};
use crate::templates::{FieldTemplate, NewFieldTemplate, TemplatePatch, TemplateStore};
use crate::types::{
    BulkFieldValueUpdate, CustomFieldDefinition, DefinitionPatch, EntityType, FieldSearchQuery, FieldValue,
    NewFieldDefinition, Page, ResolvedValue, ResolvedValues,
};
use crate::validator::Validator;

/// Entities matching a filter, plus the conditions that failed closed along the way.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResult {
    pub entity_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", serialize_with = "serialize_warnings")]
    pub warnings: Vec<EvaluationError>,
}

fn serialize_warnings<S>(warnings: &[EvaluationError], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_seq(warnings.iter().map(ToString::to_string))
}

/// Normalized values written by a bulk update, keyed by field id. `None` means cleared.
pub type WrittenValues = BTreeMap<FieldId, Option<FieldValue>>;

pub struct FieldEngine {
    settings: EngineSettings,
    registry: FieldRegistry,
    formulas: FormulaEngine,
    store: MemoryStore,
    templates: TemplateStore,
    filters: RwLock<HashMap<String, CustomFieldFilter>>,
}

impl Default for FieldEngine {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl FieldEngine {
    pub fn new(settings: EngineSettings) -> Self {
        let validator = Validator::new(settings.validation.clone());
        Self::with_validator(settings, validator)
    }

    /// Build an engine around a validator carrying custom validation hooks.
    pub fn with_validator(settings: EngineSettings, validator: Validator) -> Self {
        Self {
            registry: FieldRegistry::new(Arc::new(validator)),
            formulas: FormulaEngine::new(settings.formula.cache_capacity),
            store: MemoryStore::new(),
            templates: TemplateStore::new(),
            filters: RwLock::new(HashMap::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn formulas(&self) -> &FormulaEngine {
        &self.formulas
    }

    // ---- definitions ----

    pub fn create_field(&self, new: NewFieldDefinition) -> FieldResult<CustomFieldDefinition> {
        Ok(self.registry.create(new)?)
    }

    pub fn update_field(&self, id: &FieldId, patch: DefinitionPatch) -> FieldResult<CustomFieldDefinition> {
        Ok(self.registry.update(id, patch, &self.store)?)
    }

    pub fn archive_field(&self, id: &FieldId) -> FieldResult<CustomFieldDefinition> {
        Ok(self.registry.archive(id)?)
    }

    pub fn restore_field(&self, id: &FieldId) -> FieldResult<CustomFieldDefinition> {
        Ok(self.registry.restore(id)?)
    }

    pub fn delete_field(&self, id: &FieldId) -> FieldResult<DeleteOutcome> {
        Ok(self.registry.delete(id, &self.store)?)
    }

    pub fn list_fields(
        &self,
        entity_type: EntityType,
        entity_id: Option<&str>,
        include_archived: bool,
    ) -> Vec<CustomFieldDefinition> {
        self.registry.list(entity_type, entity_id, include_archived)
    }

    pub fn search_fields(&self, query: &FieldSearchQuery) -> Page<CustomFieldDefinition> {
        self.registry.search(query, &self.settings.search)
    }

    /// A live field of `entity_type` by id or name.
    pub fn field(&self, entity_type: EntityType, field: &str) -> FieldResult<CustomFieldDefinition> {
        self.registry.find(entity_type, field).ok_or_else(|| FieldError::NotFound {
            kind: "field",
            id: field.to_string(),
        })
    }

    // ---- values ----

    /// Validate and store one value. Returns the normalized value (`None` when cleared).
    ///
    /// Writing to an unknown entity registers it on the spot, without defaults or required
    /// checks; [`FieldEngine::create_entity`] is the checked way to introduce one.
    pub fn set_value(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        field: &str,
        raw: &Value,
    ) -> FieldResult<Option<FieldValue>> {
        let definition = self.field(entity_type, field)?;
        ensure_applies(&definition, entity_id)?;
        let value = self.registry.validator().validate(&definition, raw)?;
        self.store.commit(entity_type, entity_id, &[prepared(&definition, value.clone())])?;
        Ok(value)
    }

    /// Resolved value of one field, computing it if needed.
    pub fn get_value(&self, entity_type: EntityType, entity_id: &str, field: &str) -> FieldResult<ResolvedValue> {
        let definition = self.field(entity_type, field)?;
        if definition.field_type.is_computed() {
            let mut resolved = self.resolve(entity_type, entity_id)?;
            return Ok(resolved.remove(&definition.id).unwrap_or(ResolvedValue::Null));
        }
        if !self.store.contains(entity_type, entity_id) {
            return Err(entity_not_found(entity_type, entity_id));
        }
        Ok(self.store.value(entity_type, entity_id, &definition.id).into())
    }

    /// Validate every value of the update and write them all, or write nothing.
    ///
    /// Like [`FieldEngine::set_value`], an unknown entity is registered by the write.
    pub fn bulk_update(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        update: &BulkFieldValueUpdate,
    ) -> FieldResult<WrittenValues> {
        self.write_values(entity_type, entity_id, update.values.iter().map(|(key, raw)| (key.as_str(), raw)))
    }

    /// Register a new entity with its initial values.
    ///
    /// Defaults fill in live fields the update leaves out; required fields without a value or
    /// default reject the whole entity.
    pub fn create_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        update: &BulkFieldValueUpdate,
    ) -> FieldResult<WrittenValues> {
        if self.store.contains(entity_type, entity_id) {
            return Err(FieldError::InvalidRequest {
                message: format!("{entity_type} '{entity_id}' already exists"),
            });
        }

        let provided: Vec<FieldId> = update
            .values
            .keys()
            .filter_map(|key| self.registry.find(entity_type, key.as_str()).map(|def| def.id))
            .collect();
        let mut values: Vec<(String, Value)> = update
            .values
            .iter()
            .map(|(key, raw)| (key.as_str().to_string(), raw.clone()))
            .collect();
        let mut missing = Vec::new();
        for definition in self.registry.list(entity_type, Some(entity_id), false) {
            if definition.field_type.is_computed() || provided.contains(&definition.id) {
                continue;
            }
            match &definition.default_value {
                Some(default) => values.push((definition.id.to_string(), default.clone())),
                None if definition.is_required() => missing.push(ValidationIssue::new(
                    &definition.name,
                    "validation.required",
                    format!("'{}' is required", definition.name),
                )),
                None => {}
            }
        }
        if !missing.is_empty() {
            return Err(BulkValidationError::new(missing).into());
        }

        let written = self.write_values(entity_type, entity_id, values.iter().map(|(key, raw)| (key.as_str(), raw)))?;
        self.store.insert_entity(entity_type, entity_id);
        debug!("created {entity_type} '{entity_id}' with {} value(s)", written.len());
        Ok(written)
    }

    pub fn delete_entity(&self, entity_type: EntityType, entity_id: &str) -> FieldResult<()> {
        self.store
            .remove_entity(entity_type, entity_id)
            .map(|_| ())
            .ok_or_else(|| entity_not_found(entity_type, entity_id))
    }

    fn write_values<'v, I>(&self, entity_type: EntityType, entity_id: &str, values: I) -> FieldResult<WrittenValues>
    where
        I: IntoIterator<Item = (&'v str, &'v Value)>,
    {
        let mut issues = Vec::new();
        let mut writes = Vec::new();
        for (key, raw) in values {
            let Some(definition) = self.registry.find(entity_type, key) else {
                issues.push(ValidationIssue::new(
                    key,
                    "validation.unknown_field",
                    format!("{entity_type} has no field '{key}'"),
                ));
                continue;
            };
            if let Err(FieldError::InvalidRequest { message }) = ensure_applies(&definition, entity_id) {
                issues.push(ValidationIssue::new(&definition.name, "validation.scope", message));
                continue;
            }
            match self.registry.validator().validate(&definition, raw) {
                Ok(value) => writes.push(prepared(&definition, value)),
                Err(err) => issues.push(ValidationIssue::from(&err)),
            }
        }
        if !issues.is_empty() {
            return Err(BulkValidationError::new(issues).into());
        }

        self.store.commit(entity_type, entity_id, &writes)?;
        Ok(writes.into_iter().map(|write| (write.field_id, write.value)).collect())
    }

    // ---- resolution & search ----

    /// Every live field of one entity, stored and computed.
    pub fn resolve(&self, entity_type: EntityType, entity_id: &str) -> FieldResult<ResolvedValues> {
        let record = self
            .store
            .fetch(entity_type, entity_id)
            .map_err(|_| entity_not_found(entity_type, entity_id))?;
        let resolver = LookupResolver::new(&self.registry, &self.formulas, &self.store);
        Ok(resolver.resolve_record(&record, true)?)
    }

    /// Ids of entities of `entity_type` matching `filter`. Conditions may name fields by id or name.
    pub fn search(&self, entity_type: EntityType, filter: &FilterConfig) -> FieldResult<SearchResult> {
        let definitions = self.registry.list(entity_type, None, false);
        let filter = self.canonical_filter(entity_type, filter);
        let evaluator = FilterEvaluator::new(&definitions);

        let mut result = SearchResult::default();
        for entity_id in self.store.entity_ids(entity_type) {
            let resolved = self.resolve(entity_type, &entity_id)?;
            let outcome = evaluator.evaluate(&filter, &resolved);
            for warning in outcome.warnings {
                if !result.warnings.contains(&warning) {
                    result.warnings.push(warning);
                }
            }
            if outcome.matched {
                result.entity_ids.push(entity_id);
            }
        }
        debug!(
            "filter on {entity_type} matched {} entit(ies) with {} warning(s)",
            result.entity_ids.len(),
            result.warnings.len()
        );
        Ok(result)
    }

    pub fn search_saved(&self, filter_id: &str) -> FieldResult<SearchResult> {
        let saved = self.get_filter(filter_id)?;
        self.search(saved.entity_type, &saved.filter)
    }

    /// Replace field names in conditions with ids. Unknown references are left for the evaluator
    /// to report.
    fn canonical_filter(&self, entity_type: EntityType, filter: &FilterConfig) -> FilterConfig {
        let mut filter = filter.clone();
        for condition in &mut filter.conditions {
            if let Some(definition) = self.registry.find(entity_type, condition.field_id.as_str()) {
                condition.field_id = definition.id;
            }
        }
        filter
    }

    // ---- saved filters ----

    pub fn create_filter(&self, new: NewCustomFieldFilter) -> FieldResult<CustomFieldFilter> {
        let name = non_empty(&new.name, "filter name")?;
        let filter = self.checked_filter(new.entity_type, &new.filter)?;
        let now = Utc::now();
        let saved = CustomFieldFilter {
            id: generate_id(),
            name,
            entity_type: new.entity_type,
            description: new.description,
            filter,
            is_shared: new.is_shared,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        };
        self.filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(saved.id.clone(), saved.clone());
        debug!("saved filter '{}' ({})", saved.name, saved.id);
        Ok(saved)
    }

    pub fn get_filter(&self, id: &str) -> FieldResult<CustomFieldFilter> {
        self.filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| filter_not_found(id))
    }

    /// Saved filters of an entity type visible to `user`: shared ones plus their own.
    /// Without a user every filter is listed.
    pub fn list_filters(&self, entity_type: EntityType, user: Option<&str>) -> Vec<CustomFieldFilter> {
        let mut filters: Vec<CustomFieldFilter> = self
            .filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|saved| saved.entity_type == entity_type)
            .filter(|saved| {
                user.is_none_or(|user| saved.is_shared || saved.created_by.as_deref() == Some(user))
            })
            .cloned()
            .collect();
        filters.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()).then_with(|| a.id.cmp(&b.id)));
        filters
    }

    pub fn update_filter(&self, id: &str, patch: FilterPatch) -> FieldResult<CustomFieldFilter> {
        let current = self.get_filter(id)?;
        let name = patch.name.as_deref().map(|name| non_empty(name, "filter name")).transpose()?;
        let filter = patch
            .filter
            .as_ref()
            .map(|filter| self.checked_filter(current.entity_type, filter))
            .transpose()?;

        let mut filters = self.filters.write().unwrap_or_else(PoisonError::into_inner);
        let saved = filters.get_mut(id).ok_or_else(|| filter_not_found(id))?;
        if let Some(name) = name {
            saved.name = name;
        }
        if let Some(description) = patch.description {
            saved.description = Some(description).filter(|text| !text.trim().is_empty());
        }
        if let Some(filter) = filter {
            saved.filter = filter;
        }
        if let Some(is_shared) = patch.is_shared {
            saved.is_shared = is_shared;
        }
        saved.updated_at = Utc::now();
        Ok(saved.clone())
    }

    pub fn delete_filter(&self, id: &str) -> FieldResult<CustomFieldFilter> {
        self.filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| filter_not_found(id))
    }

    /// Canonicalize a filter for saving, rejecting conditions that could never evaluate.
    fn checked_filter(&self, entity_type: EntityType, filter: &FilterConfig) -> FieldResult<FilterConfig> {
        let filter = self.canonical_filter(entity_type, filter);
        for condition in &filter.conditions {
            let definition = self
                .registry
                .get(&condition.field_id)
                .ok()
                .filter(|def| def.entity_type == entity_type && def.is_live())
                .ok_or_else(|| FieldError::InvalidRequest {
                    message: format!("{entity_type} has no field '{}'", condition.field_id),
                })?;
            if !definition.field_type.supports(condition.operator) {
                return Err(FieldError::InvalidRequest {
                    message: format!(
                        "operator {} is not supported for {} field '{}'",
                        condition.operator, definition.field_type, definition.name
                    ),
                });
            }
        }
        Ok(filter)
    }

    // ---- templates ----

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn create_template(&self, new: NewFieldTemplate) -> FieldResult<FieldTemplate> {
        self.templates.create(new)
    }

    pub fn update_template(&self, id: &str, patch: TemplatePatch) -> FieldResult<FieldTemplate> {
        self.templates.update(id, patch)
    }

    pub fn delete_template(&self, id: &str) -> FieldResult<FieldTemplate> {
        self.templates.delete(id)
    }

    /// Create every field of a template, in order. If one fails the fields already created are
    /// removed again and the error is returned.
    pub fn materialize_template(
        &self,
        template_id: &str,
        entity_id: Option<&str>,
    ) -> FieldResult<Vec<CustomFieldDefinition>> {
        let template = self.templates.get(template_id)?;
        let mut created: Vec<CustomFieldDefinition> = Vec::with_capacity(template.fields.len());

        for field in &template.fields {
            let mut new = field.clone();
            new.id = None;
            new.entity_type = template.entity_type;
            if let Some(entity_id) = entity_id {
                new.entity_id = Some(entity_id.to_string());
            }
            match self.registry.create(new) {
                Ok(definition) => created.push(definition),
                Err(err) => {
                    warn!(
                        "template '{}' failed on field '{}': {err}; rolling back {} field(s)",
                        template.name,
                        field.name,
                        created.len()
                    );
                    for definition in created.iter().rev() {
                        if let Err(rollback) = self.registry.delete(&definition.id, &self.store) {
                            warn!("rollback of '{}' failed: {rollback}", definition.name);
                        }
                    }
                    return Err(err.into());
                }
            }
        }

        self.templates.record_use(template_id)?;
        Ok(created)
    }

    // ---- stats ----

    /// Aggregates of one field over every entity of its type it applies to.
    pub fn stats(&self, entity_type: EntityType, field: &str) -> FieldResult<CustomFieldStats> {
        let definition = self.field(entity_type, field)?;
        let mut values = Vec::new();
        for entity_id in self.store.entity_ids(entity_type) {
            if !definition.applies_to(Some(&entity_id)) {
                continue;
            }
            let value = if definition.field_type.is_computed() {
                self.resolve(entity_type, &entity_id)?
                    .remove(&definition.id)
                    .unwrap_or(ResolvedValue::Null)
            } else {
                self.store.value(entity_type, &entity_id, &definition.id).into()
            };
            values.push(value);
        }
        Ok(stats::compute(&definition, &values))
    }
}

fn prepared(definition: &CustomFieldDefinition, value: Option<FieldValue>) -> PreparedWrite {
    PreparedWrite {
        field_id: definition.id.clone(),
        field_name: definition.name.clone(),
        unique: definition.validation_rules.unique,
        value,
    }
}

fn ensure_applies(definition: &CustomFieldDefinition, entity_id: &str) -> FieldResult<()> {
    if definition.applies_to(Some(entity_id)) {
        return Ok(());
    }
    Err(FieldError::InvalidRequest {
        message: format!("'{}' does not apply to '{entity_id}'", definition.name),
    })
}

fn non_empty(raw: &str, what: &str) -> FieldResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FieldError::InvalidRequest {
            message: format!("{what} cannot be empty"),
        });
    }
    Ok(trimmed.to_string())
}

fn entity_not_found(entity_type: EntityType, entity_id: &str) -> FieldError {
    FieldError::NotFound {
        kind: entity_type.as_str(),
        id: entity_id.to_string(),
    }
}

fn filter_not_found(id: &str) -> FieldError {
    FieldError::NotFound {
        kind: "filter",
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldType;
    use crate::filter::FilterCondition;
    use serde_json::json;

    fn engine_with_hours() -> (FieldEngine, CustomFieldDefinition) {
        let engine = FieldEngine::default();
        let hours = engine
            .create_field(NewFieldDefinition::new("Hours", FieldType::Number, EntityType::Task))
            .unwrap();
        (engine, hours)
    }

    #[test]
    fn set_and_get_by_name() {
        let (engine, _) = engine_with_hours();
        let stored = engine.set_value(EntityType::Task, "t1", "hours", &json!("7.5")).unwrap();
        assert_eq!(stored, Some(FieldValue::Number(7.5)));
        assert_eq!(
            engine.get_value(EntityType::Task, "t1", "Hours").unwrap(),
            ResolvedValue::Value(FieldValue::Number(7.5))
        );
        assert!(matches!(
            engine.get_value(EntityType::Task, "t9", "Hours"),
            Err(FieldError::NotFound { kind: "task", .. })
        ));
    }

    #[test]
    fn plain_writes_register_unknown_entities_without_defaults() {
        let (engine, hours) = engine_with_hours();
        engine
            .create_field(NewFieldDefinition::new("Status", FieldType::Text, EntityType::Task).with_default(json!("open")))
            .unwrap();
        engine
            .create_field(NewFieldDefinition::new("Owner", FieldType::Text, EntityType::Task).required())
            .unwrap();

        assert!(!engine.store().contains(EntityType::Task, "t7"));
        engine.set_value(EntityType::Task, "t7", "Hours", &json!(2)).unwrap();
        assert!(engine.store().contains(EntityType::Task, "t7"));
        assert_eq!(
            engine.get_value(EntityType::Task, "t7", "Status").unwrap(),
            ResolvedValue::Null
        );
        assert_eq!(
            engine.store().value(EntityType::Task, "t7", &hours.id),
            Some(FieldValue::Number(2.0))
        );

        let written = engine
            .bulk_update(EntityType::Task, "t8", &BulkFieldValueUpdate::new().set("Hours", json!(3)))
            .unwrap();
        assert_eq!(written.len(), 1);
        assert!(engine.store().contains(EntityType::Task, "t8"));
        assert!(matches!(
            engine.create_entity(EntityType::Task, "t8", &BulkFieldValueUpdate::new()),
            Err(FieldError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn create_entity_applies_defaults_and_required() {
        let (engine, _) = engine_with_hours();
        engine
            .create_field(NewFieldDefinition::new("Status", FieldType::Text, EntityType::Task).with_default(json!("open")))
            .unwrap();
        engine
            .create_field(NewFieldDefinition::new("Owner", FieldType::Text, EntityType::Task).required())
            .unwrap();

        let err = engine
            .create_entity(EntityType::Task, "t1", &BulkFieldValueUpdate::new().set("Hours", json!(1)))
            .unwrap_err();
        assert!(matches!(err, FieldError::BulkValidation(ref bulk) if bulk.issues[0].field == "Owner"));
        assert!(!engine.store().contains(EntityType::Task, "t1"));

        engine
            .create_entity(EntityType::Task, "t1", &BulkFieldValueUpdate::new().set("Owner", json!("sam")))
            .unwrap();
        assert_eq!(
            engine.get_value(EntityType::Task, "t1", "Status").unwrap().display(),
            "open"
        );
    }

    #[test]
    fn saved_filters_are_checked_and_listed_per_user() {
        let (engine, _) = engine_with_hours();
        engine.set_value(EntityType::Task, "t1", "Hours", &json!(3)).unwrap();
        engine.set_value(EntityType::Task, "t2", "Hours", &json!(12)).unwrap();

        let bad = NewCustomFieldFilter::new(
            "Broken",
            EntityType::Task,
            FilterConfig::all([FilterCondition::contains("Hours", "1")]),
        );
        assert!(matches!(engine.create_filter(bad), Err(FieldError::InvalidRequest { .. })));

        let big = engine
            .create_filter(
                NewCustomFieldFilter::new(
                    "Big",
                    EntityType::Task,
                    FilterConfig::all([FilterCondition::greater_than("Hours", 10)]),
                )
                .created_by("ana"),
            )
            .unwrap();
        assert_eq!(engine.search_saved(&big.id).unwrap().entity_ids, vec!["t2".to_string()]);
        assert_eq!(engine.list_filters(EntityType::Task, Some("ana")).len(), 1);
        assert!(engine.list_filters(EntityType::Task, Some("bo")).is_empty());

        engine
            .update_filter(
                &big.id,
                FilterPatch {
                    is_shared: Some(true),
                    ..FilterPatch::default()
                },
            )
            .unwrap();
        assert_eq!(engine.list_filters(EntityType::Task, Some("bo")).len(), 1);
        engine.delete_filter(&big.id).unwrap();
        assert!(engine.get_filter(&big.id).is_err());
    }

    #[test]
    fn template_materialization_rolls_back() {
        let (engine, _) = engine_with_hours();
        let template = engine
            .create_template(
                NewFieldTemplate::new("Costing", EntityType::Task)
                    .with_field(NewFieldDefinition::new("Rate", FieldType::Currency, EntityType::Task))
                    .with_field(
                        NewFieldDefinition::new("Cost", FieldType::Formula, EntityType::Task)
                            .with_configuration(json!({ "formula": "{Hours} * {Rate}" })),
                    )
                    .with_field(NewFieldDefinition::new("hours", FieldType::Number, EntityType::Task)),
            )
            .unwrap();

        let err = engine.materialize_template(&template.id, None).unwrap_err();
        assert!(matches!(err, FieldError::Definition(_)));
        assert_eq!(engine.list_fields(EntityType::Task, None, true).len(), 1);
        assert_eq!(engine.templates().get(&template.id).unwrap().usage_count, 0);

        engine
            .update_template(
                &template.id,
                TemplatePatch {
                    fields: Some(template.fields[..2].to_vec()),
                    ..TemplatePatch::default()
                },
            )
            .unwrap();
        let created = engine.materialize_template(&template.id, None).unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(engine.templates().get(&template.id).unwrap().usage_count, 1);
    }

    #[test]
    fn stats_cover_stored_and_computed_fields() {
        let (engine, _) = engine_with_hours();
        engine
            .create_field(
                NewFieldDefinition::new("Double", FieldType::Formula, EntityType::Task)
                    .with_configuration(json!({ "formula": "{Hours} * 2" })),
            )
            .unwrap();
        engine.set_value(EntityType::Task, "t1", "Hours", &json!(1)).unwrap();
        engine.set_value(EntityType::Task, "t2", "Hours", &json!(3)).unwrap();
        engine.store().insert_entity(EntityType::Task, "t3");

        let hours = engine.stats(EntityType::Task, "Hours").unwrap();
        assert_eq!((hours.total_values, hours.null_count), (2, 1));
        let double = engine.stats(EntityType::Task, "Double").unwrap();
        assert_eq!(double.max, Some(6.0));
        assert_eq!(double.average, Some(4.0));
    }
}
