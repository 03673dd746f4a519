use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use comfy_table::Cell;
use fieldkit::{CustomFieldDefinition, EntityType, FieldSearchQuery, FieldSortKey, Page, SortOrder};
use serde::Serialize;

use super::{load_context, parse_entity_type};
use crate::examples::ExampleGroup;
use crate::loader;
use crate::output::{OutputManager, TableDisplay, format_datetime};

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Schema Check",
        commands: &[
            "fieldkit schema check schema.json                 # Validate every definition, template and filter",
        ],
    },
    ExampleGroup {
        title: "Schema Listing",
        commands: &[
            "fieldkit schema list schema.json --entity-type task",
            "fieldkit schema list schema.json --query cost --sort name --desc",
            "fieldkit --output json schema list schema.json --include-archived",
        ],
    },
];

#[derive(Subcommand)]
pub enum SchemaCommands {
    /// Load a schema file and report whether every definition is accepted
    #[command(name = "check")]
    Check {
        /// Schema file (JSON)
        schema: PathBuf,
    },

    /// List field definitions
    #[command(name = "list")]
    List {
        /// Schema file (JSON)
        schema: PathBuf,

        /// Only fields of this entity type
        #[arg(long, value_parser = parse_entity_type)]
        entity_type: Option<EntityType>,

        /// Only fields applying to this entity instance
        #[arg(long)]
        entity_id: Option<String>,

        /// Include archived fields
        #[arg(long)]
        include_archived: bool,

        /// Case-insensitive match on name or description
        #[arg(long)]
        query: Option<String>,

        /// Sort key: position, name or created_at
        #[arg(long, value_parser = parse_sort_key)]
        sort: Option<FieldSortKey>,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        #[arg(long)]
        page: Option<u64>,

        #[arg(long)]
        per_page: Option<u64>,
    },
}

fn parse_sort_key(raw: &str) -> Result<FieldSortKey, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "position" => Ok(FieldSortKey::Position),
        "name" => Ok(FieldSortKey::Name),
        "created_at" | "created" => Ok(FieldSortKey::CreatedAt),
        other => Err(format!("unknown sort key '{other}' (expected position, name or created_at)")),
    }
}

pub async fn handle_schema_commands(command: SchemaCommands, output: &OutputManager) -> Result<()> {
    let ctx = load_context(output)?;

    match command {
        SchemaCommands::Check { schema } => {
            let engine = loader::load(ctx.settings, &schema, None, output).await?;
            output.heading("Schema Check");
            for entity_type in EntityType::ALL {
                let fields = engine.list_fields(entity_type, None, true);
                if fields.is_empty() {
                    continue;
                }
                let order = engine.registry().evaluation_order(entity_type, None)?;
                let computed: Vec<String> = order
                    .iter()
                    .filter(|def| def.field_type.is_computed())
                    .map(|def| def.name.clone())
                    .collect();
                output.key_value(entity_type.as_str(), &format!("{} field(s)", fields.len()));
                if !computed.is_empty() {
                    output.bullet(&format!("evaluation order: {}", computed.join(" -> ")));
                }
                let filters = engine.list_filters(entity_type, None);
                if !filters.is_empty() {
                    output.bullet(&format!("{} saved filter(s)", filters.len()));
                }
            }
            let templates = engine.templates().list(None);
            if !templates.is_empty() {
                output.key_value("templates", &templates.len().to_string());
            }
            output.success(&format!("{} is valid", schema.display()));
        }
        SchemaCommands::List {
            schema,
            entity_type,
            entity_id,
            include_archived,
            query,
            sort,
            desc,
            page,
            per_page,
        } => {
            let engine = loader::load(ctx.settings, &schema, None, output).await?;
            let search = FieldSearchQuery {
                query,
                entity_type,
                entity_id,
                include_archived,
                sort_by: sort,
                sort_order: desc.then_some(SortOrder::Desc),
                page,
                per_page,
                ..FieldSearchQuery::default()
            };
            let listing = FieldListing(engine.search_fields(&search));
            output.display(&listing)?;
            if listing.0.has_more() {
                output.info(&format!(
                    "showing page {} of {} field(s); use --page to see more",
                    listing.0.page, listing.0.total
                ));
            }
        }
    }

    Ok(())
}

#[derive(Serialize)]
#[serde(transparent)]
struct FieldListing(Page<CustomFieldDefinition>);

impl TableDisplay for FieldListing {
    fn to_table(&self, output: &OutputManager) -> comfy_table::Table {
        let mut table = output.create_table();
        output.add_table_header(
            &mut table,
            vec!["#", "Name", "Type", "Entity", "Scope", "Required", "State", "Created"],
        );
        for def in &self.0.items {
            let state = if def.archived {
                "archived"
            } else if !def.is_active {
                "inactive"
            } else {
                "active"
            };
            table.add_row(vec![
                Cell::new(def.position),
                Cell::new(&def.name),
                Cell::new(def.field_type),
                Cell::new(def.entity_type),
                Cell::new(def.entity_id.as_deref().unwrap_or("-")),
                Cell::new(if def.is_required() { "yes" } else { "no" }),
                Cell::new(state),
                Cell::new(format_datetime(def.created_at)),
            ]);
        }
        table
    }

    fn to_compact(&self) -> String {
        self.0
            .items
            .iter()
            .map(|def| format!("{}:{}", def.name, def.field_type))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sort_key() {
        assert_eq!(parse_sort_key("Name").unwrap(), FieldSortKey::Name);
        assert_eq!(parse_sort_key("created").unwrap(), FieldSortKey::CreatedAt);
        assert!(parse_sort_key("size").is_err());
    }
}
