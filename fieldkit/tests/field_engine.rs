//! End-to-end behavior of the field engine facade: definitions, values, computed fields,
//! filters and bulk writes working together.

use fieldkit::{
    BulkFieldValueUpdate, DefinitionError, DefinitionPatch, EntityType, EvaluationError, FieldEngine, FieldError,
    FieldType, FieldValue, FilterCondition, FilterConfig, FormulaError, LookupError, NewFieldDefinition, ResolvedValue,
    ValidationError, ValidationRules,
};
use serde_json::json;

// ============================================================================
// Fixtures
// ============================================================================

fn severity(engine: &FieldEngine) {
    engine
        .create_field(
            NewFieldDefinition::new("Severity", FieldType::Select, EntityType::Task).with_configuration(json!({
                "options": [{ "value": "Low" }, { "value": "Medium" }, { "value": "High" }]
            })),
        )
        .unwrap();
}

fn costing(engine: &FieldEngine, hours_type: FieldType) {
    engine
        .create_field(NewFieldDefinition::new("Hours", hours_type, EntityType::Task))
        .unwrap();
    engine
        .create_field(NewFieldDefinition::new("Rate", FieldType::Number, EntityType::Task))
        .unwrap();
    engine
        .create_field(
            NewFieldDefinition::new("Total Cost", FieldType::Formula, EntityType::Task)
                .with_configuration(json!({ "formula": "{Hours} * {Rate}" })),
        )
        .unwrap();
}

fn project_budget(engine: &FieldEngine) {
    engine
        .create_field(NewFieldDefinition::new("Budget", FieldType::Currency, EntityType::Project))
        .unwrap();
    engine
        .create_field(
            NewFieldDefinition::new("Project", FieldType::Relation, EntityType::Task)
                .with_configuration(json!({ "related_entity_type": "project" })),
        )
        .unwrap();
    engine
        .create_field(
            NewFieldDefinition::new("Project Budget", FieldType::Lookup, EntityType::Task).with_configuration(json!({
                "related_entity_type": "project",
                "relation_field_id": "Project",
                "lookup_field_id": "Budget"
            })),
        )
        .unwrap();
}

fn ids(result: &fieldkit::SearchResult) -> Vec<&str> {
    result.entity_ids.iter().map(String::as_str).collect()
}

// ============================================================================
// Select validation
// ============================================================================

#[test]
fn select_accepts_options_and_rejects_others() {
    let engine = FieldEngine::default();
    severity(&engine);

    let stored = engine.set_value(EntityType::Task, "T1", "Severity", &json!("High")).unwrap();
    assert_eq!(stored, Some(FieldValue::Text("High".into())));

    let err = engine
        .set_value(EntityType::Task, "T1", "Severity", &json!("Critical"))
        .unwrap_err();
    assert!(matches!(
        err,
        FieldError::Validation(ValidationError::InvalidOption { ref value, .. }) if value == "Critical"
    ));
    assert_eq!(err.code(), "validation.option");

    // the rejected write left the stored value alone
    assert_eq!(
        engine.get_value(EntityType::Task, "T1", "Severity").unwrap(),
        ResolvedValue::Value(FieldValue::Text("High".into()))
    );
}

#[test]
fn normalization_is_idempotent() {
    let engine = FieldEngine::default();
    severity(&engine);
    engine
        .create_field(NewFieldDefinition::new("Estimate", FieldType::Number, EntityType::Task))
        .unwrap();

    let once = engine.set_value(EntityType::Task, "T1", "Severity", &json!("medium")).unwrap().unwrap();
    let twice = engine.set_value(EntityType::Task, "T1", "Severity", &once.to_json()).unwrap().unwrap();
    assert_eq!(once, FieldValue::Text("Medium".into()));
    assert_eq!(once, twice);

    let number = engine.set_value(EntityType::Task, "T1", "Estimate", &json!(" 12.50 ")).unwrap().unwrap();
    let again = engine.set_value(EntityType::Task, "T1", "Estimate", &number.to_json()).unwrap().unwrap();
    assert_eq!(number, again);
}

// ============================================================================
// Formulas
// ============================================================================

#[test]
fn formula_computes_from_dependencies() {
    let engine = FieldEngine::default();
    costing(&engine, FieldType::Number);
    engine
        .bulk_update(
            EntityType::Task,
            "T1",
            &BulkFieldValueUpdate::new().set("Hours", json!(5)).set("Rate", json!(20)),
        )
        .unwrap();

    assert_eq!(
        engine.get_value(EntityType::Task, "T1", "Total Cost").unwrap(),
        ResolvedValue::Value(FieldValue::Number(100.0))
    );
}

#[test]
fn non_numeric_operand_degrades_at_read_time() {
    let engine = FieldEngine::default();
    costing(&engine, FieldType::Text);
    engine
        .bulk_update(
            EntityType::Task,
            "T1",
            &BulkFieldValueUpdate::new().set("Hours", json!("abc")).set("Rate", json!(20)),
        )
        .unwrap();

    let value = engine.get_value(EntityType::Task, "T1", "Total Cost").unwrap();
    assert!(matches!(value, ResolvedValue::Unavailable(EvaluationError::Formula(_))));
    assert_eq!(value.display(), "unavailable");

    // numeric text still coerces
    engine.set_value(EntityType::Task, "T1", "Hours", &json!("5")).unwrap();
    assert_eq!(
        engine.get_value(EntityType::Task, "T1", "Total Cost").unwrap(),
        ResolvedValue::Value(FieldValue::Number(100.0))
    );
}

#[test]
fn computed_fields_cannot_be_written() {
    let engine = FieldEngine::default();
    costing(&engine, FieldType::Number);
    let err = engine
        .set_value(EntityType::Task, "T1", "Total Cost", &json!(1))
        .unwrap_err();
    assert!(matches!(err, FieldError::Validation(ValidationError::ComputedFieldNotSettable { .. })));
}

#[test]
fn formula_cycles_are_rejected_with_path() {
    let engine = FieldEngine::default();
    let a = engine
        .create_field(
            NewFieldDefinition::new("A", FieldType::Formula, EntityType::Task)
                .with_id("fld_a")
                .with_configuration(json!({ "formula": "{fld_b} + 1" })),
        )
        .unwrap_err();
    assert!(matches!(a, FieldError::Definition(DefinitionError::InvalidConfiguration { .. })));

    engine
        .create_field(NewFieldDefinition::new("Base", FieldType::Number, EntityType::Task))
        .unwrap();
    let b = engine
        .create_field(
            NewFieldDefinition::new("B", FieldType::Formula, EntityType::Task)
                .with_configuration(json!({ "formula": "{Base} * 2" })),
        )
        .unwrap();
    engine
        .create_field(
            NewFieldDefinition::new("C", FieldType::Formula, EntityType::Task)
                .with_configuration(json!({ "formula": "{B} + 1" })),
        )
        .unwrap();

    let err = engine
        .update_field(
            &b.id,
            DefinitionPatch {
                configuration: Some(json!({ "formula": "{C} * 2" })),
                ..DefinitionPatch::default()
            },
        )
        .unwrap_err();
    match err {
        FieldError::Definition(DefinitionError::CircularDependency { cycle }) => {
            assert_eq!(cycle.first(), cycle.last());
            assert!(cycle.contains(&"B".to_string()));
            assert!(cycle.contains(&"C".to_string()));
        }
        other => panic!("expected a circular dependency, got {other:?}"),
    }

    // the rejected update left B unchanged
    let b = engine.field(EntityType::Task, "B").unwrap();
    assert_eq!(b.configuration.as_formula().unwrap().formula, "{Base} * 2");
}

// ============================================================================
// Lookups
// ============================================================================

#[test]
fn lookup_follows_relation_and_breaks_on_delete() {
    let engine = FieldEngine::default();
    project_budget(&engine);
    engine
        .create_entity(EntityType::Project, "P1", &BulkFieldValueUpdate::new().set("Budget", json!(5000)))
        .unwrap();
    engine
        .create_entity(EntityType::Task, "T1", &BulkFieldValueUpdate::new().set("Project", json!("P1")))
        .unwrap();

    assert_eq!(
        engine.get_value(EntityType::Task, "T1", "Project Budget").unwrap(),
        ResolvedValue::Value(FieldValue::Number(5000.0))
    );

    // lookups always see the current value
    engine.set_value(EntityType::Project, "P1", "Budget", &json!(7500)).unwrap();
    assert_eq!(
        engine.get_value(EntityType::Task, "T1", "Project Budget").unwrap(),
        ResolvedValue::Value(FieldValue::Number(7500.0))
    );

    engine.delete_entity(EntityType::Project, "P1").unwrap();
    let value = engine.get_value(EntityType::Task, "T1", "Project Budget").unwrap();
    assert!(matches!(
        value,
        ResolvedValue::Unavailable(EvaluationError::Lookup(LookupError::BrokenReference { .. }))
    ));
    assert_eq!(value.display(), "unavailable");

    // the rest of the entity still resolves
    let resolved = engine.resolve(EntityType::Task, "T1").unwrap();
    let project = engine.field(EntityType::Task, "Project").unwrap();
    assert_eq!(resolved[&project.id], ResolvedValue::Value(FieldValue::Text("P1".into())));
}

#[test]
fn lookups_of_lookups_are_rejected() {
    let engine = FieldEngine::default();
    project_budget(&engine);
    engine
        .create_field(
            NewFieldDefinition::new("Parent", FieldType::Relation, EntityType::Board)
                .with_configuration(json!({ "related_entity_type": "task" })),
        )
        .unwrap();
    let err = engine
        .create_field(
            NewFieldDefinition::new("Parent Budget", FieldType::Lookup, EntityType::Board).with_configuration(json!({
                "related_entity_type": "task",
                "relation_field_id": "Parent",
                "lookup_field_id": "Project Budget"
            })),
        )
        .unwrap_err();
    assert!(matches!(err, FieldError::Definition(DefinitionError::InvalidLookupDepth { .. })));
}

// ============================================================================
// Filters
// ============================================================================

#[test]
fn and_or_filter_semantics() {
    let engine = FieldEngine::default();
    severity(&engine);
    costing(&engine, FieldType::Number);
    for (id, level, hours) in [("T1", "High", 10), ("T2", "Low", 10), ("T3", "High", 1), ("T4", "Medium", 2)] {
        engine
            .bulk_update(
                EntityType::Task,
                id,
                &BulkFieldValueUpdate::new()
                    .set("Severity", json!(level))
                    .set("Hours", json!(hours))
                    .set("Rate", json!(10)),
            )
            .unwrap();
    }

    let high = FilterCondition::equals("Severity", "high");
    let costly = FilterCondition::greater_than("Total Cost", 50);

    let both = engine
        .search(EntityType::Task, &FilterConfig::all([high.clone(), costly.clone()]))
        .unwrap();
    assert_eq!(ids(&both), ["T1"]);

    let either = engine.search(EntityType::Task, &FilterConfig::any([high, costly])).unwrap();
    assert_eq!(ids(&either), ["T1", "T2", "T3"]);
    assert!(either.warnings.is_empty());

    let everything = engine.search(EntityType::Task, &FilterConfig::default()).unwrap();
    assert_eq!(everything.entity_ids.len(), 4);
}

#[test]
fn unknown_filter_fields_fail_closed_with_warning() {
    let engine = FieldEngine::default();
    severity(&engine);
    engine.set_value(EntityType::Task, "T1", "Severity", &json!("Low")).unwrap();

    let result = engine
        .search(
            EntityType::Task,
            &FilterConfig::any([FilterCondition::equals("Nope", "x"), FilterCondition::equals("Severity", "Low")]),
        )
        .unwrap();
    assert_eq!(ids(&result), ["T1"]);
    assert!(matches!(result.warnings[..], [EvaluationError::UnknownField { .. }]));

    let strict = engine
        .search(EntityType::Task, &FilterConfig::all([FilterCondition::equals("Nope", "x")]))
        .unwrap();
    assert!(strict.entity_ids.is_empty());
}

// ============================================================================
// Bulk writes and schema evolution
// ============================================================================

#[test]
fn bulk_update_is_all_or_nothing() {
    let engine = FieldEngine::default();
    severity(&engine);
    costing(&engine, FieldType::Number);
    engine.set_value(EntityType::Task, "T1", "Hours", &json!(1)).unwrap();

    let err = engine
        .bulk_update(
            EntityType::Task,
            "T1",
            &BulkFieldValueUpdate::new()
                .set("Hours", json!(8))
                .set("Severity", json!("Critical"))
                .set("Rate", json!("lots")),
        )
        .unwrap_err();
    let FieldError::BulkValidation(bulk) = err else {
        panic!("expected a bulk validation error");
    };
    let mut fields: Vec<&str> = bulk.issues.iter().map(|issue| issue.field.as_str()).collect();
    fields.sort_unstable();
    assert_eq!(fields, ["Rate", "Severity"]);

    assert_eq!(
        engine.get_value(EntityType::Task, "T1", "Hours").unwrap(),
        ResolvedValue::Value(FieldValue::Number(1.0))
    );
}

#[test]
fn unique_values_are_enforced_across_entities() {
    let engine = FieldEngine::default();
    engine
        .create_field(NewFieldDefinition::new("Code", FieldType::Text, EntityType::Project).with_rules(
            ValidationRules {
                unique: true,
                ..ValidationRules::default()
            },
        ))
        .unwrap();
    engine.set_value(EntityType::Project, "P1", "Code", &json!("ALPHA")).unwrap();

    let err = engine
        .set_value(EntityType::Project, "P2", "Code", &json!("alpha"))
        .unwrap_err();
    assert!(matches!(err, FieldError::UniqueViolation { ref existing_entity_id, .. } if existing_entity_id == "P1"));

    // rewriting the same entity is fine
    engine.set_value(EntityType::Project, "P1", "Code", &json!("alpha")).unwrap();
}

#[test]
fn narrowing_select_options_is_refused_while_values_exist() {
    let engine = FieldEngine::default();
    severity(&engine);
    engine.set_value(EntityType::Task, "T1", "Severity", &json!("Medium")).unwrap();
    let field = engine.field(EntityType::Task, "Severity").unwrap();

    let narrowed = DefinitionPatch {
        configuration: Some(json!({ "options": [{ "value": "Low" }, { "value": "High" }] })),
        ..DefinitionPatch::default()
    };
    let err = engine.update_field(&field.id, narrowed.clone()).unwrap_err();
    assert!(matches!(
        err,
        FieldError::Definition(DefinitionError::UnsafeNarrowing { conflicts: 1, .. })
    ));

    engine.set_value(EntityType::Task, "T1", "Severity", &json!("Low")).unwrap();
    let updated = engine.update_field(&field.id, narrowed).unwrap();
    assert_eq!(updated.configuration.as_select().unwrap().options.len(), 2);
}

#[test]
fn deleting_a_field_with_values_archives_it() {
    let engine = FieldEngine::default();
    severity(&engine);
    let field = engine.field(EntityType::Task, "Severity").unwrap();
    engine.set_value(EntityType::Task, "T1", "Severity", &json!("Low")).unwrap();

    let outcome = engine.delete_field(&field.id).unwrap();
    assert!(!outcome.was_deleted());
    assert!(engine.field(EntityType::Task, "Severity").is_err());
    assert_eq!(engine.list_fields(EntityType::Task, None, true).len(), 1);

    let restored = engine.restore_field(&field.id).unwrap();
    assert!(restored.is_live());
    assert_eq!(
        engine.get_value(EntityType::Task, "T1", "Severity").unwrap(),
        ResolvedValue::Value(FieldValue::Text("Low".into()))
    );
}

#[test]
fn scoped_fields_only_apply_to_their_entity() {
    let engine = FieldEngine::default();
    engine
        .create_field(NewFieldDefinition::new("Sprint Goal", FieldType::Text, EntityType::Board).scoped_to("B1"))
        .unwrap();

    engine.set_value(EntityType::Board, "B1", "Sprint Goal", &json!("ship it")).unwrap();
    let err = engine
        .set_value(EntityType::Board, "B2", "Sprint Goal", &json!("nope"))
        .unwrap_err();
    assert!(matches!(err, FieldError::InvalidRequest { .. }));

    assert_eq!(engine.list_fields(EntityType::Board, Some("B1"), false).len(), 1);
    assert!(engine.list_fields(EntityType::Board, Some("B2"), false).is_empty());
}

#[test]
fn formula_error_type_is_reported() {
    let engine = FieldEngine::default();
    engine
        .create_field(NewFieldDefinition::new("N", FieldType::Number, EntityType::Task))
        .unwrap();
    engine
        .create_field(
            NewFieldDefinition::new("Inverse", FieldType::Formula, EntityType::Task)
                .with_configuration(json!({ "formula": "1 / {N}" })),
        )
        .unwrap();
    engine.set_value(EntityType::Task, "T1", "N", &json!(0)).unwrap();

    assert_eq!(
        engine.get_value(EntityType::Task, "T1", "Inverse").unwrap(),
        ResolvedValue::Unavailable(EvaluationError::Formula(FormulaError::DivisionByZero))
    );
}
