use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use comfy_table::Cell;
use fieldkit::EntityType;
use serde::Serialize;
use serde_json::Value;

use super::{load_context, parse_entity_type};
use crate::examples::ExampleGroup;
use crate::loader;
use crate::output::{OutputManager, TableDisplay};

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Value Validation",
    commands: &[
        "fieldkit value validate schema.json --entity-type task --field Severity --value high",
        "fieldkit value validate schema.json --entity-type task --field Hours --value '\"7.5\"'",
        "fieldkit value validate schema.json --entity-type task --field Labels --value '[\"ui\",\"api\"]'",
    ],
}];

#[derive(Subcommand)]
pub enum ValueCommands {
    /// Validate a raw value against a field and print its normalized form
    #[command(name = "validate")]
    Validate {
        /// Schema file (JSON)
        schema: PathBuf,

        #[arg(long, value_parser = parse_entity_type)]
        entity_type: EntityType,

        /// Field id or name
        #[arg(long)]
        field: String,

        /// Raw value as JSON; anything that is not valid JSON is taken as a string
        #[arg(long)]
        value: String,
    },
}

pub async fn handle_value_commands(command: ValueCommands, output: &OutputManager) -> Result<()> {
    let ctx = load_context(output)?;

    match command {
        ValueCommands::Validate {
            schema,
            entity_type,
            field,
            value,
        } => {
            let engine = loader::load(ctx.settings, &schema, None, output).await?;
            let definition = engine.field(entity_type, &field)?;
            let raw = parse_raw(&value);

            let report = match engine.registry().validator().validate(&definition, &raw) {
                Ok(normalized) => ValueReport {
                    field: definition.name,
                    valid: true,
                    value: normalized.map(|value| value.to_json()),
                    code: None,
                    message: None,
                },
                Err(err) => ValueReport {
                    field: definition.name,
                    valid: false,
                    value: None,
                    code: Some(err.code()),
                    message: Some(err.to_string()),
                },
            };
            output.display(&report)?;
            if !report.valid {
                anyhow::bail!("value rejected");
            }
        }
    }

    Ok(())
}

fn parse_raw(input: &str) -> Value {
    serde_json::from_str(input).unwrap_or_else(|_| Value::String(input.to_string()))
}

#[derive(Serialize)]
struct ValueReport {
    field: String,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl TableDisplay for ValueReport {
    fn to_table(&self, output: &OutputManager) -> comfy_table::Table {
        let mut table = output.create_table();
        table.add_row(vec![Cell::new("Field"), Cell::new(&self.field)]);
        table.add_row(vec![Cell::new("Valid"), Cell::new(if self.valid { "yes" } else { "no" })]);
        if self.valid {
            let shown = self.value.as_ref().map_or_else(|| "(empty)".to_string(), Value::to_string);
            table.add_row(vec![Cell::new("Normalized"), Cell::new(shown)]);
        }
        if let (Some(code), Some(message)) = (self.code, &self.message) {
            table.add_row(vec![Cell::new("Code"), Cell::new(code)]);
            table.add_row(vec![Cell::new("Message"), Cell::new(message)]);
        }
        table
    }

    fn to_compact(&self) -> String {
        match (&self.value, self.code) {
            (_, Some(code)) => format!("{}: {code}", self.field),
            (Some(value), None) => format!("{}={value}", self.field),
            (None, None) => format!("{}=null", self.field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_raw_falls_back_to_string() {
        assert_eq!(parse_raw("42"), json!(42));
        assert_eq!(parse_raw("[\"a\"]"), json!(["a"]));
        assert_eq!(parse_raw("high"), json!("high"));
        assert_eq!(parse_raw("null"), Value::Null);
    }
}
