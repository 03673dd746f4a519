use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::Cell;
use fieldkit::{EntityType, FilterConfig, SearchResult};

use super::{load_context, parse_entity_type};
use crate::examples::ExampleGroup;
use crate::loader;
use crate::output::{OutputManager, TableDisplay};

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Ad-hoc Filters",
        commands: &[
            r#"fieldkit filter run schema.json entities.json --entity-type task --filter '{"conditions":[{"field_id":"Severity","operator":"equals","value":"high"}]}'"#,
            r#"fieldkit filter run schema.json entities.json --entity-type task --filter '{"logic":"OR","conditions":[...]}'"#,
        ],
    },
    ExampleGroup {
        title: "Saved Filters",
        commands: &["fieldkit filter run schema.json entities.json --entity-type task --saved \"Expensive\""],
    },
];

#[derive(Subcommand)]
pub enum FilterCommands {
    /// Evaluate a filter against a set of entities
    #[command(name = "run")]
    Run {
        /// Schema file (JSON)
        schema: PathBuf,

        /// Entities file (JSON array)
        entities: PathBuf,

        #[arg(long, value_parser = parse_entity_type)]
        entity_type: EntityType,

        /// Filter as JSON
        #[arg(long, conflicts_with = "saved", required_unless_present = "saved")]
        filter: Option<String>,

        /// Name or id of a filter saved in the schema file
        #[arg(long)]
        saved: Option<String>,
    },
}

pub async fn handle_filter_commands(command: FilterCommands, output: &OutputManager) -> Result<()> {
    let ctx = load_context(output)?;

    match command {
        FilterCommands::Run {
            schema,
            entities,
            entity_type,
            filter,
            saved,
        } => {
            let engine = loader::load(ctx.settings, &schema, Some(&entities), output).await?;
            let result = match (filter, saved) {
                (Some(raw), _) => {
                    let config: FilterConfig = serde_json::from_str(&raw).context("Failed to parse --filter")?;
                    engine.search(entity_type, &config)?
                }
                (None, Some(name)) => {
                    let saved = engine
                        .list_filters(entity_type, None)
                        .into_iter()
                        .find(|saved| saved.id == name || saved.name.eq_ignore_ascii_case(&name))
                        .with_context(|| format!("No saved {entity_type} filter named '{name}'"))?;
                    engine.search_saved(&saved.id)?
                }
                (None, None) => anyhow::bail!("either --filter or --saved is required"),
            };

            let matches = Matches(result);
            output.display(&matches)?;
            for warning in &matches.0.warnings {
                output.warning(&warning.to_string());
            }
            output.info(&format!("{} {entity_type}(s) matched", matches.0.entity_ids.len()));
        }
    }

    Ok(())
}

#[derive(serde::Serialize)]
#[serde(transparent)]
struct Matches(SearchResult);

impl TableDisplay for Matches {
    fn to_table(&self, output: &OutputManager) -> comfy_table::Table {
        let mut table = output.create_table();
        output.add_table_header(&mut table, vec!["Entity"]);
        for id in &self.0.entity_ids {
            table.add_row(vec![Cell::new(id)]);
        }
        table
    }

    fn to_compact(&self) -> String {
        self.0.entity_ids.join(" ")
    }
}
