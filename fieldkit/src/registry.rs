//! # Field Definition Registry
//!
//! Owns every [`CustomFieldDefinition`] and enforces the structural rules around them:
//! unique names per entity type, dense positions, immutable field types, acyclic
//! formula/lookup dependencies and safe configuration narrowing.
//!
//! Mutations are serialized per entity type. The registry holds no values; checks that need
//! stored data go through an injected [`ValueInspector`].

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::iter;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use log::debug;
use regex::Regex;
use serde_json::Value;

use crate::catalog::{FieldConfig, FieldType};
use crate::config::SearchSettings;
use crate::errors::{DefinitionError, DefinitionResult};
use crate::formula;
use crate::graph::DependencyGraph;
use crate::id::FieldId;
use crate::types::{
    CustomFieldDefinition, CustomFieldValue, DefinitionPatch, EntityType, FieldSearchQuery, FieldSortKey,
    NewFieldDefinition, Page, SortOrder, ValidationRules,
};
use crate::validator::{Validator, is_empty_raw};

const MAX_NAME_LENGTH: usize = 100;
const ENTITY_TYPE_COUNT: usize = EntityType::ALL.len();

/// Read access to stored values, supplied by the value store.
pub trait ValueInspector {
    /// Every stored value of `field_id`, across all entities.
    fn stored_values(&self, field_id: &FieldId) -> Vec<CustomFieldValue>;

    fn has_values(&self, field_id: &FieldId) -> bool {
        !self.stored_values(field_id).is_empty()
    }
}

/// Inspector for callers without a value store.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStoredValues;

impl ValueInspector for NoStoredValues {
    fn stored_values(&self, _field_id: &FieldId) -> Vec<CustomFieldValue> {
        Vec::new()
    }
}

/// Result of [`FieldRegistry::delete`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// No values existed; the definition is gone.
    Deleted(CustomFieldDefinition),
    /// Values exist; the definition was archived instead.
    Archived(CustomFieldDefinition),
}

impl DeleteOutcome {
    pub fn into_inner(self) -> CustomFieldDefinition {
        match self {
            Self::Deleted(definition) | Self::Archived(definition) => definition,
        }
    }

    pub fn was_deleted(&self) -> bool {
        matches!(self, Self::Deleted(_))
    }
}

type DefinitionMap = HashMap<FieldId, CustomFieldDefinition>;

pub struct FieldRegistry {
    validator: Arc<Validator>,
    definitions: RwLock<DefinitionMap>,
    writers: [Mutex<()>; ENTITY_TYPE_COUNT],
}

impl Default for FieldRegistry {
    fn default() -> Self {
        Self::new(Arc::new(Validator::default()))
    }
}

impl FieldRegistry {
    pub fn new(validator: Arc<Validator>) -> Self {
        Self {
            validator,
            definitions: RwLock::new(HashMap::new()),
            writers: std::array::from_fn(|_| Mutex::new(())),
        }
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    fn read(&self) -> RwLockReadGuard<'_, DefinitionMap> {
        self.definitions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DefinitionMap> {
        self.definitions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Single-writer section for one entity type.
    fn gate(&self, entity_type: EntityType) -> MutexGuard<'_, ()> {
        self.writers[entity_type as usize]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create(&self, new: NewFieldDefinition) -> DefinitionResult<CustomFieldDefinition> {
        let _writer = self.gate(new.entity_type);

        let field_type: FieldType = new.field_type.parse()?;
        let name = check_name(&new.name)?;
        let configuration = field_type.parse_configuration(&name, &new.configuration)?;
        self.check_rules(&name, &new.validation_rules)?;
        if field_type.is_computed() && (new.required || new.validation_rules.required) {
            return Err(DefinitionError::config(&name, "computed fields cannot be required"));
        }

        let now = Utc::now();
        let mut candidate = CustomFieldDefinition {
            id: new.id.clone().unwrap_or_else(FieldId::generate),
            name,
            field_type,
            entity_type: new.entity_type,
            entity_id: new.entity_id.clone(),
            description: new.description.clone().filter(|text| !text.trim().is_empty()),
            required: new.required,
            position: 0,
            configuration,
            validation_rules: new.validation_rules.clone(),
            default_value: None,
            is_active: true,
            is_system: new.is_system,
            archived: false,
            show_in_list: new.show_in_list,
            show_in_details: new.show_in_details,
            searchable: new.searchable,
            sortable: new.sortable,
            created_by: new.created_by.clone(),
            created_at: now,
            updated_at: now,
        };
        candidate.default_value = self.normalize_default(&candidate, new.default_value.as_ref())?;

        let mut definitions = self.write();
        if definitions.contains_key(&candidate.id) {
            return Err(DefinitionError::config(
                &candidate.name,
                format!("a field with id '{}' already exists", candidate.id),
            ));
        }
        ensure_unique_name(&definitions, &candidate)?;
        resolve_references(&definitions, &mut candidate)?;
        ensure_acyclic(&definitions, &candidate)?;

        let id = candidate.id.clone();
        let entity_type = candidate.entity_type;
        definitions.insert(id.clone(), candidate);
        place(&mut definitions, entity_type, &id, new.position);

        let created = lookup(&definitions, &id)?;
        debug!(
            "created {} field '{}' ({}) for {} at position {}",
            created.field_type, created.name, created.id, created.entity_type, created.position
        );
        Ok(created)
    }

    /// Apply a partial update. Configuration changes are checked against stored values through
    /// `inspector` and rejected if any would become invalid.
    pub fn update(
        &self,
        id: &FieldId,
        patch: DefinitionPatch,
        inspector: &dyn ValueInspector,
    ) -> DefinitionResult<CustomFieldDefinition> {
        let entity_type = self.get(id)?.entity_type;
        let _writer = self.gate(entity_type);
        let current = self.get(id)?;
        let mut candidate = current.clone();

        if let Some(raw_type) = &patch.field_type {
            let requested: FieldType = raw_type.parse()?;
            if requested != current.field_type {
                return Err(DefinitionError::ImmutableFieldType {
                    field: current.name.clone(),
                    from: current.field_type.to_string(),
                    to: requested.to_string(),
                });
            }
        }
        if let Some(name) = &patch.name {
            candidate.name = check_name(name)?;
        }
        if let Some(description) = &patch.description {
            candidate.description = Some(description.trim().to_string()).filter(|text| !text.is_empty());
        }
        if let Some(required) = patch.required {
            candidate.required = required;
        }
        if let Some(rules) = &patch.validation_rules {
            self.check_rules(&candidate.name, rules)?;
            candidate.validation_rules = rules.clone();
        }
        if candidate.field_type.is_computed() && candidate.is_required() {
            return Err(DefinitionError::config(&candidate.name, "computed fields cannot be required"));
        }
        if let Some(is_active) = patch.is_active {
            if !is_active && current.is_system {
                return Err(DefinitionError::SystemField {
                    field: current.name.clone(),
                    action: "deactivated",
                });
            }
            candidate.is_active = is_active;
        }
        candidate.show_in_list = patch.show_in_list.unwrap_or(candidate.show_in_list);
        candidate.show_in_details = patch.show_in_details.unwrap_or(candidate.show_in_details);
        candidate.searchable = patch.searchable.unwrap_or(candidate.searchable);
        candidate.sortable = patch.sortable.unwrap_or(candidate.sortable);

        {
            let definitions = self.read();
            if candidate.is_live() {
                ensure_unique_name(&definitions, &candidate)?;
            }
            if let Some(raw) = &patch.configuration {
                candidate.configuration = current.field_type.parse_configuration(&candidate.name, raw)?;
                resolve_references(&definitions, &mut candidate)?;
            }
        }

        candidate.default_value = match &patch.default_value {
            Some(raw) => self.normalize_default(&candidate, Some(raw))?,
            None if patch.touches_value_shape() => {
                self.normalize_default(&candidate, current.default_value.as_ref())?
            }
            None => current.default_value.clone(),
        };

        if patch.touches_value_shape() && !candidate.field_type.is_computed() {
            self.check_narrowing(&candidate, inspector)?;
        }

        let mut definitions = self.write();
        ensure_acyclic(&definitions, &candidate)?;
        candidate.updated_at = Utc::now();
        definitions.insert(id.clone(), candidate);
        if let Some(position) = patch.position {
            place(&mut definitions, entity_type, id, Some(position));
        }

        let updated = lookup(&definitions, id)?;
        debug!("updated field '{}' ({})", updated.name, updated.id);
        Ok(updated)
    }

    /// Exclude a definition from active sets. Idempotent.
    pub fn archive(&self, id: &FieldId) -> DefinitionResult<CustomFieldDefinition> {
        let entity_type = self.get(id)?.entity_type;
        let _writer = self.gate(entity_type);
        let mut definitions = self.write();
        let definition = definitions
            .get_mut(id)
            .ok_or_else(|| DefinitionError::FieldNotFound { id: id.to_string() })?;
        if definition.is_system {
            return Err(DefinitionError::SystemField {
                field: definition.name.clone(),
                action: "archived",
            });
        }
        if !definition.archived {
            definition.archived = true;
            definition.updated_at = Utc::now();
            debug!("archived field '{}' ({})", definition.name, definition.id);
        }
        Ok(definition.clone())
    }

    /// Bring an archived definition back, re-checking name collisions and dependency cycles.
    pub fn restore(&self, id: &FieldId) -> DefinitionResult<CustomFieldDefinition> {
        let entity_type = self.get(id)?.entity_type;
        let _writer = self.gate(entity_type);
        let mut definitions = self.write();
        let mut candidate = lookup(&definitions, id)?;
        if !candidate.archived {
            return Ok(candidate);
        }
        candidate.archived = false;
        if candidate.is_live() {
            ensure_unique_name(&definitions, &candidate)?;
        }
        ensure_acyclic(&definitions, &candidate)?;
        candidate.updated_at = Utc::now();
        definitions.insert(id.clone(), candidate.clone());
        debug!("restored field '{}' ({})", candidate.name, candidate.id);
        Ok(candidate)
    }

    /// Hard-delete a definition that has no stored values; otherwise archive it.
    pub fn delete(&self, id: &FieldId, inspector: &dyn ValueInspector) -> DefinitionResult<DeleteOutcome> {
        let current = self.get(id)?;
        if current.is_system {
            return Err(DefinitionError::SystemField {
                field: current.name,
                action: "deleted",
            });
        }
        if inspector.has_values(id) {
            return self.archive(id).map(DeleteOutcome::Archived);
        }

        let _writer = self.gate(current.entity_type);
        let mut definitions = self.write();
        let removed = definitions
            .remove(id)
            .ok_or_else(|| DefinitionError::FieldNotFound { id: id.to_string() })?;
        renumber(&mut definitions, removed.entity_type);
        debug!("deleted field '{}' ({})", removed.name, removed.id);
        Ok(DeleteOutcome::Deleted(removed))
    }

    pub fn get(&self, id: &FieldId) -> DefinitionResult<CustomFieldDefinition> {
        lookup(&self.read(), id)
    }

    /// Find a live definition of `entity_type` by id or (case-insensitive) name.
    pub fn find(&self, entity_type: EntityType, id_or_name: &str) -> Option<CustomFieldDefinition> {
        find_live(&self.read(), entity_type, id_or_name).cloned()
    }

    /// Definitions of `entity_type` ordered by position.
    ///
    /// With `entity_id`, only global fields and fields scoped to that entity are returned.
    pub fn list(
        &self,
        entity_type: EntityType,
        entity_id: Option<&str>,
        include_archived: bool,
    ) -> Vec<CustomFieldDefinition> {
        let definitions = self.read();
        let mut listed: Vec<CustomFieldDefinition> = definitions
            .values()
            .filter(|def| def.entity_type == entity_type)
            .filter(|def| include_archived || def.is_live())
            .filter(|def| entity_id.is_none() || def.applies_to(entity_id))
            .cloned()
            .collect();
        listed.sort_by(by_position);
        listed
    }

    /// Snapshot of every definition, archived included.
    pub fn all(&self) -> Vec<CustomFieldDefinition> {
        let mut all: Vec<CustomFieldDefinition> = self.read().values().cloned().collect();
        all.sort_by(by_position);
        all
    }

    pub fn search(&self, query: &FieldSearchQuery, settings: &SearchSettings) -> Page<CustomFieldDefinition> {
        let needle = query
            .query
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_lowercase);

        let mut matches: Vec<CustomFieldDefinition> = self
            .read()
            .values()
            .filter(|def| query.include_archived || !def.archived)
            .filter(|def| query.entity_type.is_none_or(|entity_type| def.entity_type == entity_type))
            .filter(|def| query.entity_id.as_deref().is_none_or(|id| def.applies_to(Some(id))))
            .filter(|def| query.field_type.is_none_or(|field_type| def.field_type == field_type))
            .filter(|def| {
                needle.as_deref().is_none_or(|needle| {
                    def.name.to_lowercase().contains(needle)
                        || def
                            .description
                            .as_deref()
                            .is_some_and(|text| text.to_lowercase().contains(needle))
                })
            })
            .cloned()
            .collect();

        let key = query.sort_by.unwrap_or_default();
        matches.sort_by(|a, b| {
            let ordering = match key {
                FieldSortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
                FieldSortKey::CreatedAt => a.created_at.cmp(&b.created_at),
                FieldSortKey::Position => by_position(a, b),
            };
            ordering.then_with(|| a.id.cmp(&b.id))
        });
        if query.sort_order == Some(SortOrder::Desc) {
            matches.reverse();
        }

        let page = query.page.unwrap_or(1).max(1);
        let per_page = query
            .per_page
            .unwrap_or(settings.default_page_size)
            .clamp(1, settings.max_page_size.max(1));
        let total = matches.len() as u64;
        let offset = usize::try_from((page - 1).saturating_mul(per_page)).unwrap_or(usize::MAX);
        let items = matches
            .into_iter()
            .skip(offset)
            .take(per_page as usize)
            .collect();

        Page {
            items,
            total,
            page,
            per_page,
        }
    }

    /// Live definitions applying to one entity, ordered so that every computed field comes after
    /// the fields it depends on. Ties keep position order.
    pub fn evaluation_order(
        &self,
        entity_type: EntityType,
        entity_id: Option<&str>,
    ) -> DefinitionResult<Vec<CustomFieldDefinition>> {
        let definitions = self.read();
        let mut ordered: Vec<&CustomFieldDefinition> = definitions.values().collect();
        ordered.sort_by(|a, b| by_position(a, b));
        let graph = DependencyGraph::from_definitions(ordered);
        let order = graph
            .topological_order()
            .map_err(|cycle| circular(&definitions, None, cycle))?;

        Ok(order
            .iter()
            .filter_map(|id| definitions.get(id))
            .filter(|def| def.entity_type == entity_type && def.is_live() && def.applies_to(entity_id))
            .cloned()
            .collect())
    }

    fn check_rules(&self, field: &str, rules: &ValidationRules) -> DefinitionResult<()> {
        if let Some(pattern) = &rules.pattern {
            Regex::new(pattern).map_err(|err| DefinitionError::config(field, format!("invalid pattern: {err}")))?;
        }
        if let (Some(min), Some(max)) = (rules.min_length, rules.max_length)
            && min > max
        {
            return Err(DefinitionError::config(field, "min_length exceeds max_length"));
        }
        if let (Some(min), Some(max)) = (rules.min_value, rules.max_value)
            && min > max
        {
            return Err(DefinitionError::config(field, "min_value exceeds max_value"));
        }
        if let Some(hook) = &rules.custom_validation
            && !self.validator.has_hook(hook)
        {
            return Err(DefinitionError::config(
                field,
                format!("unknown custom validation hook '{hook}'"),
            ));
        }
        Ok(())
    }

    /// Validate a default value against the definition and return its normalized JSON form.
    fn normalize_default(
        &self,
        candidate: &CustomFieldDefinition,
        raw: Option<&Value>,
    ) -> DefinitionResult<Option<Value>> {
        let Some(raw) = raw.filter(|raw| !is_empty_raw(raw)) else {
            return Ok(None);
        };
        if candidate.field_type.is_computed() {
            return Err(DefinitionError::config(
                &candidate.name,
                "computed fields cannot have a default value",
            ));
        }
        self.validator
            .validate(candidate, raw)
            .map(|value| value.map(|value| value.to_json()))
            .map_err(|source| DefinitionError::InvalidDefaultValue {
                field: candidate.name.clone(),
                source,
            })
    }

    fn check_narrowing(&self, candidate: &CustomFieldDefinition, inspector: &dyn ValueInspector) -> DefinitionResult<()> {
        let mut conflicts = 0;
        let mut example = None;
        for stored in inspector.stored_values(&candidate.id) {
            if let Err(err) = self.validator.validate(candidate, &stored.value.to_json()) {
                conflicts += 1;
                example.get_or_insert_with(|| format!("entity {}: {err}", stored.entity_id));
            }
        }
        match example {
            Some(example) => Err(DefinitionError::UnsafeNarrowing {
                field: candidate.name.clone(),
                conflicts,
                example,
            }),
            None => Ok(()),
        }
    }
}

fn lookup(definitions: &DefinitionMap, id: &FieldId) -> DefinitionResult<CustomFieldDefinition> {
    definitions
        .get(id)
        .cloned()
        .ok_or_else(|| DefinitionError::FieldNotFound { id: id.to_string() })
}

fn by_position(a: &CustomFieldDefinition, b: &CustomFieldDefinition) -> Ordering {
    a.entity_type
        .cmp(&b.entity_type)
        .then(a.position.cmp(&b.position))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

fn check_name(raw: &str) -> DefinitionResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DefinitionError::InvalidName {
            message: "name cannot be empty".to_string(),
        });
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(DefinitionError::InvalidName {
            message: format!("name cannot exceed {MAX_NAME_LENGTH} characters"),
        });
    }
    // Braces delimit field references in formulas.
    if name.contains(['{', '}']) {
        return Err(DefinitionError::InvalidName {
            message: format!("'{name}' cannot contain braces"),
        });
    }
    Ok(name.to_string())
}

fn ensure_unique_name(definitions: &DefinitionMap, candidate: &CustomFieldDefinition) -> DefinitionResult<()> {
    let taken = definitions.values().any(|existing| {
        existing.id != candidate.id
            && existing.entity_type == candidate.entity_type
            && existing.is_live()
            && same_name(&existing.name, &candidate.name)
    });
    if taken {
        return Err(DefinitionError::DuplicateName {
            name: candidate.name.clone(),
            entity_type: candidate.entity_type.to_string(),
        });
    }
    Ok(())
}

/// Field names compare case-insensitively over full Unicode.
fn same_name(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

fn find_live<'a>(
    definitions: &'a DefinitionMap,
    entity_type: EntityType,
    id_or_name: &str,
) -> Option<&'a CustomFieldDefinition> {
    let needle = id_or_name.trim();
    definitions
        .get(&FieldId::new(needle))
        .filter(|def| def.entity_type == entity_type && def.is_live())
        .or_else(|| {
            definitions
                .values()
                .find(|def| def.entity_type == entity_type && def.is_live() && same_name(&def.name, needle))
        })
}

/// Replace formula tokens and lookup references with concrete field ids.
fn resolve_references(definitions: &DefinitionMap, candidate: &mut CustomFieldDefinition) -> DefinitionResult<()> {
    let own_id = candidate.id.clone();
    let own_name = candidate.name.clone();
    let entity_type = candidate.entity_type;

    match &mut candidate.configuration {
        FieldConfig::Formula(config) => {
            let expr = formula::parse(&config.formula).map_err(|err| DefinitionError::config(&own_name, err.to_string()))?;
            let mut references = BTreeMap::new();
            for token in expr.references() {
                let field_id = if token == own_id.as_str() || same_name(token, &own_name) {
                    own_id.clone()
                } else {
                    find_live(definitions, entity_type, token)
                        .map(|def| def.id.clone())
                        .ok_or_else(|| {
                            DefinitionError::config(&own_name, format!("formula references unknown field '{token}'"))
                        })?
                };
                references.insert(token.to_string(), field_id);
            }
            config.references = references;
        }
        FieldConfig::Lookup(config) => {
            let relation = find_live(definitions, entity_type, config.relation_field_id.as_str()).ok_or_else(|| {
                DefinitionError::config(
                    &own_name,
                    format!("relation field '{}' does not exist", config.relation_field_id),
                )
            })?;
            match relation.configuration.as_relation() {
                Some(target) if target.related_entity_type == config.related_entity_type => {}
                Some(target) => {
                    return Err(DefinitionError::config(
                        &own_name,
                        format!(
                            "relation field '{}' points to {}, not {}",
                            relation.name, target.related_entity_type, config.related_entity_type
                        ),
                    ));
                }
                None => {
                    return Err(DefinitionError::config(
                        &own_name,
                        format!("'{}' is not a relation field", relation.name),
                    ));
                }
            }
            let relation_id = relation.id.clone();

            let target = find_live(definitions, config.related_entity_type, config.lookup_field_id.as_str())
                .ok_or_else(|| {
                    DefinitionError::config(
                        &own_name,
                        format!(
                            "{} has no field '{}'",
                            config.related_entity_type, config.lookup_field_id
                        ),
                    )
                })?;
            if target.field_type == FieldType::Lookup {
                return Err(DefinitionError::InvalidLookupDepth {
                    field: own_name,
                    target: target.name.clone(),
                });
            }
            config.lookup_field_id = target.id.clone();
            config.relation_field_id = relation_id;
        }
        _ => {}
    }
    Ok(())
}

fn ensure_acyclic(definitions: &DefinitionMap, candidate: &CustomFieldDefinition) -> DefinitionResult<()> {
    let mut others: Vec<&CustomFieldDefinition> =
        definitions.values().filter(|def| def.id != candidate.id).collect();
    others.sort_by(|a, b| by_position(a, b));
    // Candidate first so a reported cycle starts at the field being changed.
    let graph = DependencyGraph::from_definitions(iter::once(candidate).chain(others));
    match graph.find_cycle() {
        Some(cycle) => Err(circular(definitions, Some(candidate), cycle)),
        None => Ok(()),
    }
}

fn circular(
    definitions: &DefinitionMap,
    candidate: Option<&CustomFieldDefinition>,
    cycle: Vec<FieldId>,
) -> DefinitionError {
    let names = cycle
        .iter()
        .map(|id| match candidate {
            Some(candidate) if &candidate.id == id => candidate.name.clone(),
            _ => definitions.get(id).map_or_else(|| id.to_string(), |def| def.name.clone()),
        })
        .collect();
    DefinitionError::CircularDependency { cycle: names }
}

/// Move `id` to `requested` (or the end) within its entity type and renumber densely.
fn place(definitions: &mut DefinitionMap, entity_type: EntityType, id: &FieldId, requested: Option<i32>) {
    let mut others: Vec<&CustomFieldDefinition> = definitions
        .values()
        .filter(|def| def.entity_type == entity_type && &def.id != id)
        .collect();
    others.sort_by(|a, b| by_position(a, b));
    let mut ordered: Vec<FieldId> = others.into_iter().map(|def| def.id.clone()).collect();
    let index = requested.map_or(ordered.len(), |position| (position.max(0) as usize).min(ordered.len()));
    ordered.insert(index, id.clone());
    apply_positions(definitions, &ordered);
}

fn renumber(definitions: &mut DefinitionMap, entity_type: EntityType) {
    let mut same_type: Vec<&CustomFieldDefinition> =
        definitions.values().filter(|def| def.entity_type == entity_type).collect();
    same_type.sort_by(|a, b| by_position(a, b));
    let ordered: Vec<FieldId> = same_type.into_iter().map(|def| def.id.clone()).collect();
    apply_positions(definitions, &ordered);
}

fn apply_positions(definitions: &mut DefinitionMap, ordered: &[FieldId]) {
    for (position, field_id) in ordered.iter().enumerate() {
        if let Some(def) = definitions.get_mut(field_id) {
            def.position = position as i32;
        }
    }
}
