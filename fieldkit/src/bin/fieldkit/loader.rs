//! Reads schema and entity documents from disk into a [`FieldEngine`].

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use fieldkit::{
    BulkFieldValueUpdate, EngineSettings, EntityType, FieldEngine, FieldId, NewCustomFieldFilter, NewFieldDefinition,
    NewFieldTemplate,
};
use serde::Deserialize;
use serde_json::Value;

use crate::output::OutputManager;

/// A schema document: definitions in creation order, plus templates and saved filters.
#[derive(Debug, Default, Deserialize)]
pub struct SchemaFile {
    #[serde(default)]
    pub fields: Vec<NewFieldDefinition>,
    #[serde(default)]
    pub templates: Vec<TemplateEntry>,
    #[serde(default)]
    pub filters: Vec<NewCustomFieldFilter>,
}

#[derive(Debug, Deserialize)]
pub struct TemplateEntry {
    #[serde(flatten)]
    pub template: NewFieldTemplate,
    /// Materialize the template's fields right after registering it.
    #[serde(default)]
    pub apply: bool,
}

#[derive(Debug, Deserialize)]
pub struct EntityEntry {
    pub entity_type: EntityType,
    pub id: String,
    #[serde(default)]
    pub values: BTreeMap<FieldId, Value>,
}

pub async fn read_schema(path: &Path) -> Result<SchemaFile> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read schema file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse schema file {}", path.display()))
}

pub async fn read_entities(path: &Path) -> Result<Vec<EntityEntry>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read entities file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse entities file {}", path.display()))
}

/// Build an engine from a parsed schema. Fails on the first definition the registry rejects.
pub fn build_engine(settings: EngineSettings, schema: SchemaFile, output: &OutputManager) -> Result<FieldEngine> {
    let engine = FieldEngine::new(settings);

    for field in schema.fields {
        let name = field.name.clone();
        let created = engine
            .create_field(field)
            .with_context(|| format!("Field '{name}' was rejected"))?;
        output.verbose(&format!("created {} field '{}' ({})", created.field_type, created.name, created.id));
    }

    for entry in schema.templates {
        let name = entry.template.name.clone();
        let template = engine
            .create_template(entry.template)
            .with_context(|| format!("Template '{name}' was rejected"))?;
        if entry.apply {
            let created = engine
                .materialize_template(&template.id, None)
                .with_context(|| format!("Template '{name}' could not be applied"))?;
            output.verbose(&format!("applied template '{name}' ({} field(s))", created.len()));
        }
    }

    for filter in schema.filters {
        let name = filter.name.clone();
        engine
            .create_filter(filter)
            .with_context(|| format!("Filter '{name}' was rejected"))?;
    }

    Ok(engine)
}

/// Register every entity with its values. Each entity is validated as a whole.
pub fn load_entities(engine: &FieldEngine, entities: Vec<EntityEntry>, output: &OutputManager) -> Result<usize> {
    let count = entities.len();
    for entity in entities {
        let update = BulkFieldValueUpdate { values: entity.values };
        engine
            .create_entity(entity.entity_type, &entity.id, &update)
            .with_context(|| format!("{} '{}' was rejected", entity.entity_type, entity.id))?;
    }
    output.verbose(&format!("loaded {count} entit(ies)"));
    Ok(count)
}

/// Schema plus optional entities, ready to query.
pub async fn load(
    settings: EngineSettings,
    schema_path: &Path,
    entities_path: Option<&Path>,
    output: &OutputManager,
) -> Result<FieldEngine> {
    let schema = read_schema(schema_path).await?;
    let engine = build_engine(settings, schema, output)?;
    if let Some(path) = entities_path {
        let entities = read_entities(path).await?;
        load_entities(&engine, entities, output)?;
    }
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::GlobalOptions;
    use fieldkit::{FilterConfig, FilterCondition};

    const SCHEMA: &str = r#"{
        "fields": [
            { "name": "Hours", "field_type": "number", "entity_type": "task" },
            { "name": "Rate", "field_type": "currency", "entity_type": "task", "default_value": 50 },
            {
                "name": "Total Cost",
                "field_type": "formula",
                "entity_type": "task",
                "configuration": { "formula": "{Hours} * {Rate}" }
            }
        ],
        "templates": [
            {
                "name": "Review",
                "entity_type": "task",
                "apply": true,
                "fields": [{ "name": "Reviewer", "field_type": "text", "entity_type": "task" }]
            }
        ],
        "filters": [
            {
                "name": "Expensive",
                "entity_type": "task",
                "filter": { "conditions": [{ "field_id": "Total Cost", "operator": "greater_than", "value": 100 }] }
            }
        ]
    }"#;

    #[tokio::test]
    async fn test_load_schema_and_entities() {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = dir.path().join("schema.json");
        let entities_path = dir.path().join("entities.json");
        tokio::fs::write(&schema_path, SCHEMA).await.unwrap();
        tokio::fs::write(
            &entities_path,
            r#"[
                { "entity_type": "task", "id": "t1", "values": { "Hours": 2 } },
                { "entity_type": "task", "id": "t2", "values": { "Hours": 3, "Rate": 100 } }
            ]"#,
        )
        .await
        .unwrap();

        let output = OutputManager::new(GlobalOptions::default());
        let engine = load(EngineSettings::default(), &schema_path, Some(&entities_path), &output)
            .await
            .unwrap();

        assert_eq!(engine.list_fields(EntityType::Task, None, false).len(), 4);
        let filters = engine.list_filters(EntityType::Task, None);
        assert_eq!(filters.len(), 1);
        let result = engine.search_saved(&filters[0].id).unwrap();
        assert_eq!(result.entity_ids, vec!["t2".to_string()]);

        let cheap = engine
            .search(EntityType::Task, &FilterConfig::all([FilterCondition::equals("Total Cost", 100)]))
            .unwrap();
        assert_eq!(cheap.entity_ids, vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn test_rejected_field_names_the_field() {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = dir.path().join("schema.json");
        tokio::fs::write(
            &schema_path,
            r#"{ "fields": [{ "name": "Bad", "field_type": "sprocket", "entity_type": "task" }] }"#,
        )
        .await
        .unwrap();

        let output = OutputManager::new(GlobalOptions::default());
        let err = load(EngineSettings::default(), &schema_path, None, &output)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("'Bad'"));
    }
}
