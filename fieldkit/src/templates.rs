//! Reusable bundles of field definitions.
//!
//! A template is a convenience wrapper around a list of [`NewFieldDefinition`]s. Its fields are
//! only validated when the template is materialized through the registry.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::FieldError;
use crate::id::generate_id;
use crate::types::{EntityType, NewFieldDefinition};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldTemplate {
    pub id: String,
    pub name: String,
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<NewFieldDefinition>,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFieldTemplate {
    pub name: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<NewFieldDefinition>,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl NewFieldTemplate {
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            name: name.into(),
            entity_type,
            description: None,
            fields: Vec::new(),
            is_shared: false,
            created_by: None,
        }
    }

    pub fn with_field(mut self, field: NewFieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn shared(mut self) -> Self {
        self.is_shared = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplatePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Option<Vec<NewFieldDefinition>>,
    #[serde(default)]
    pub is_shared: Option<bool>,
}

#[derive(Debug, Default)]
pub struct TemplateStore {
    templates: RwLock<HashMap<String, FieldTemplate>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, FieldTemplate>> {
        self.templates.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, FieldTemplate>> {
        self.templates.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create(&self, new: NewFieldTemplate) -> Result<FieldTemplate, FieldError> {
        let name = template_name(&new.name)?;
        let now = Utc::now();
        let template = FieldTemplate {
            id: generate_id(),
            name,
            entity_type: new.entity_type,
            description: new.description,
            fields: new.fields,
            is_shared: new.is_shared,
            usage_count: 0,
            last_used_at: None,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        };
        self.write().insert(template.id.clone(), template.clone());
        debug!("created template '{}' ({})", template.name, template.id);
        Ok(template)
    }

    pub fn get(&self, id: &str) -> Result<FieldTemplate, FieldError> {
        self.read().get(id).cloned().ok_or_else(|| not_found(id))
    }

    /// Templates ordered by name, optionally restricted to one entity type.
    pub fn list(&self, entity_type: Option<EntityType>) -> Vec<FieldTemplate> {
        let mut templates: Vec<FieldTemplate> = self
            .read()
            .values()
            .filter(|template| entity_type.is_none_or(|kind| template.entity_type == kind))
            .cloned()
            .collect();
        templates.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()).then_with(|| a.id.cmp(&b.id)));
        templates
    }

    pub fn update(&self, id: &str, patch: TemplatePatch) -> Result<FieldTemplate, FieldError> {
        let name = patch.name.as_deref().map(template_name).transpose()?;
        let mut templates = self.write();
        let template = templates.get_mut(id).ok_or_else(|| not_found(id))?;
        if let Some(name) = name {
            template.name = name;
        }
        if let Some(description) = patch.description {
            template.description = Some(description).filter(|text| !text.trim().is_empty());
        }
        if let Some(fields) = patch.fields {
            template.fields = fields;
        }
        if let Some(is_shared) = patch.is_shared {
            template.is_shared = is_shared;
        }
        template.updated_at = Utc::now();
        Ok(template.clone())
    }

    pub fn delete(&self, id: &str) -> Result<FieldTemplate, FieldError> {
        let removed = self.write().remove(id).ok_or_else(|| not_found(id))?;
        debug!("deleted template '{}' ({})", removed.name, removed.id);
        Ok(removed)
    }

    /// Bump the usage counter after a successful materialization.
    pub fn record_use(&self, id: &str) -> Result<FieldTemplate, FieldError> {
        let mut templates = self.write();
        let template = templates.get_mut(id).ok_or_else(|| not_found(id))?;
        template.usage_count += 1;
        template.last_used_at = Some(Utc::now());
        Ok(template.clone())
    }
}

fn template_name(raw: &str) -> Result<String, FieldError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(FieldError::InvalidRequest {
            message: "template name cannot be empty".to_string(),
        });
    }
    Ok(name.to_string())
}

fn not_found(id: &str) -> FieldError {
    FieldError::NotFound {
        kind: "template",
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldType;

    #[test]
    fn template_crud_and_usage() {
        let store = TemplateStore::new();
        let template = store
            .create(
                NewFieldTemplate::new("Bug triage", EntityType::Task)
                    .with_field(NewFieldDefinition::new("Severity", FieldType::Text, EntityType::Task))
                    .shared(),
            )
            .unwrap();
        assert_eq!(template.usage_count, 0);
        assert!(template.is_shared);

        let used = store.record_use(&template.id).unwrap();
        assert_eq!(used.usage_count, 1);
        assert!(used.last_used_at.is_some());

        let renamed = store
            .update(
                &template.id,
                TemplatePatch {
                    name: Some("Triage".into()),
                    ..TemplatePatch::default()
                },
            )
            .unwrap();
        assert_eq!(renamed.name, "Triage");
        assert_eq!(renamed.usage_count, 1);

        assert_eq!(store.list(Some(EntityType::Task)).len(), 1);
        assert!(store.list(Some(EntityType::Project)).is_empty());

        store.delete(&template.id).unwrap();
        assert!(matches!(store.get(&template.id), Err(FieldError::NotFound { kind: "template", .. })));
    }

    #[test]
    fn blank_names_are_rejected() {
        let store = TemplateStore::new();
        assert!(matches!(
            store.create(NewFieldTemplate::new("  ", EntityType::Board)),
            Err(FieldError::InvalidRequest { .. })
        ));
    }
}
