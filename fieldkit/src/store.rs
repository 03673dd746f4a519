//! In-memory value store.
//!
//! Reference implementation of the storage capabilities the engine depends on: the
//! [`ValueInspector`] used for narrowing checks, the [`EntityAccessor`] used by lookups, scoped
//! uniqueness checks performed in the same lock scope as the write, and all-or-nothing writes.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::debug;

use crate::errors::FieldError;
use crate::id::FieldId;
use crate::lookup::{EntityAccessor, NotFound};
use crate::registry::ValueInspector;
use crate::types::{CustomFieldValue, EntityRecord, EntityType, FieldValue};

type Values = HashMap<FieldId, FieldValue>;
type Entities = HashMap<EntityType, BTreeMap<String, Values>>;

/// A validated write of one field, ready to commit.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedWrite {
    pub field_id: FieldId,
    /// Used in uniqueness errors.
    pub field_name: String,
    /// Whether the field's rules demand a value unique across entities of the same type.
    pub unique: bool,
    /// `None` clears the stored value.
    pub value: Option<FieldValue>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: RwLock<Entities>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Entities> {
        self.entities.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entities> {
        self.entities.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an entity without values. Returns `false` if it already existed.
    pub fn insert_entity(&self, entity_type: EntityType, entity_id: &str) -> bool {
        let mut entities = self.write();
        let of_type = entities.entry(entity_type).or_default();
        if of_type.contains_key(entity_id) {
            return false;
        }
        of_type.insert(entity_id.to_string(), Values::new());
        true
    }

    pub fn remove_entity(&self, entity_type: EntityType, entity_id: &str) -> Option<EntityRecord> {
        let values = self.write().get_mut(&entity_type)?.remove(entity_id)?;
        debug!("removed {entity_type} '{entity_id}'");
        Some(EntityRecord {
            entity_type,
            id: entity_id.to_string(),
            values,
        })
    }

    pub fn contains(&self, entity_type: EntityType, entity_id: &str) -> bool {
        self.read()
            .get(&entity_type)
            .is_some_and(|of_type| of_type.contains_key(entity_id))
    }

    /// Ids of every entity of `entity_type`, sorted.
    pub fn entity_ids(&self, entity_type: EntityType) -> Vec<String> {
        self.read()
            .get(&entity_type)
            .map(|of_type| of_type.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn value(&self, entity_type: EntityType, entity_id: &str, field_id: &FieldId) -> Option<FieldValue> {
        self.read().get(&entity_type)?.get(entity_id)?.get(field_id).cloned()
    }

    /// Apply every write to one entity, or none of them.
    ///
    /// Unique constraints are checked under the same write lock that applies the values. The
    /// entity is created if it does not exist yet.
    pub fn commit(&self, entity_type: EntityType, entity_id: &str, writes: &[PreparedWrite]) -> Result<(), FieldError> {
        let mut entities = self.write();
        let of_type = entities.entry(entity_type).or_default();

        for write in writes.iter().filter(|write| write.unique) {
            let Some(value) = &write.value else { continue };
            let holder = of_type.iter().find(|(other_id, values)| {
                other_id.as_str() != entity_id
                    && values
                        .get(&write.field_id)
                        .is_some_and(|existing| same_value(existing, value))
            });
            if let Some((existing_entity_id, _)) = holder {
                return Err(FieldError::UniqueViolation {
                    field: write.field_name.clone(),
                    existing_entity_id: existing_entity_id.clone(),
                });
            }
        }

        let values = of_type.entry(entity_id.to_string()).or_default();
        for write in writes {
            match &write.value {
                Some(value) => {
                    values.insert(write.field_id.clone(), value.clone());
                }
                None => {
                    values.remove(&write.field_id);
                }
            }
        }
        debug!("committed {} value(s) to {entity_type} '{entity_id}'", writes.len());
        Ok(())
    }
}

/// Text compares case-insensitively so `ACME` and `acme` collide.
fn same_value(a: &FieldValue, b: &FieldValue) -> bool {
    match (a, b) {
        (FieldValue::Text(a), FieldValue::Text(b)) => a == b || a.to_lowercase() == b.to_lowercase(),
        _ => a == b,
    }
}

impl ValueInspector for MemoryStore {
    fn stored_values(&self, field_id: &FieldId) -> Vec<CustomFieldValue> {
        self.read()
            .values()
            .flat_map(|of_type| of_type.iter())
            .filter_map(|(entity_id, values)| {
                values.get(field_id).map(|value| CustomFieldValue {
                    field_id: field_id.clone(),
                    entity_id: entity_id.clone(),
                    value: value.clone(),
                })
            })
            .collect()
    }

    fn has_values(&self, field_id: &FieldId) -> bool {
        self.read()
            .values()
            .flat_map(|of_type| of_type.values())
            .any(|values| values.contains_key(field_id))
    }
}

impl EntityAccessor for MemoryStore {
    fn fetch(&self, entity_type: EntityType, entity_id: &str) -> Result<EntityRecord, NotFound> {
        self.read()
            .get(&entity_type)
            .and_then(|of_type| of_type.get(entity_id))
            .map(|values| EntityRecord {
                entity_type,
                id: entity_id.to_string(),
                values: values.clone(),
            })
            .ok_or_else(|| NotFound::new(entity_type, entity_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(field: &str, unique: bool, value: Option<FieldValue>) -> PreparedWrite {
        PreparedWrite {
            field_id: FieldId::new(field),
            field_name: field.to_string(),
            unique,
            value,
        }
    }

    #[test]
    fn commit_writes_and_clears() {
        let store = MemoryStore::new();
        store
            .commit(
                EntityType::Task,
                "t1",
                &[
                    write("hours", false, Some(FieldValue::Number(5.0))),
                    write("notes", false, Some(FieldValue::Text("hi".into()))),
                ],
            )
            .unwrap();
        assert_eq!(
            store.value(EntityType::Task, "t1", &FieldId::new("hours")),
            Some(FieldValue::Number(5.0))
        );

        store.commit(EntityType::Task, "t1", &[write("notes", false, None)]).unwrap();
        let record = store.fetch(EntityType::Task, "t1").unwrap();
        assert_eq!(record.values.len(), 1);
    }

    #[test]
    fn unique_violation_rejects_whole_commit() {
        let store = MemoryStore::new();
        store
            .commit(EntityType::Task, "t1", &[write("code", true, Some(FieldValue::Text("ACME".into())))])
            .unwrap();

        let err = store
            .commit(
                EntityType::Task,
                "t2",
                &[
                    write("hours", false, Some(FieldValue::Number(1.0))),
                    write("code", true, Some(FieldValue::Text("acme".into()))),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, FieldError::UniqueViolation { ref existing_entity_id, .. } if existing_entity_id == "t1"));
        assert!(!store.contains(EntityType::Task, "t2"));

        // Rewriting the same value on the holder is fine.
        store
            .commit(EntityType::Task, "t1", &[write("code", true, Some(FieldValue::Text("ACME".into())))])
            .unwrap();
    }

    #[test]
    fn inspector_and_accessor_views() {
        let store = MemoryStore::new();
        assert!(store.insert_entity(EntityType::Project, "p1"));
        assert!(!store.insert_entity(EntityType::Project, "p1"));
        store
            .commit(EntityType::Task, "t1", &[write("hours", false, Some(FieldValue::Number(2.0)))])
            .unwrap();

        let field = FieldId::new("hours");
        assert!(store.has_values(&field));
        assert_eq!(store.stored_values(&field)[0].entity_id, "t1");
        assert_eq!(store.entity_ids(EntityType::Project), vec!["p1".to_string()]);

        assert!(store.remove_entity(EntityType::Project, "p1").is_some());
        assert!(store.fetch(EntityType::Project, "p1").is_err());
    }
}
