use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use comfy_table::Cell;
use fieldkit::{CustomFieldStats, EntityType};
use serde::Serialize;

use super::{load_context, parse_entity_type};
use crate::examples::ExampleGroup;
use crate::loader;
use crate::output::{OutputManager, TableDisplay};

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Field Statistics",
    commands: &[
        "fieldkit stats schema.json entities.json --entity-type task --field Hours",
        "fieldkit --output json stats schema.json entities.json --entity-type task --field Severity",
    ],
}];

#[derive(Args)]
pub struct StatsArgs {
    /// Schema file (JSON)
    pub schema: PathBuf,

    /// Entities file (JSON array)
    pub entities: PathBuf,

    #[arg(long, value_parser = parse_entity_type)]
    pub entity_type: EntityType,

    /// Field id or name
    #[arg(long)]
    pub field: String,
}

pub async fn handle_stats(args: StatsArgs, output: &OutputManager) -> Result<()> {
    let ctx = load_context(output)?;
    let engine = loader::load(ctx.settings, &args.schema, Some(&args.entities), output).await?;
    let stats = engine.stats(args.entity_type, &args.field)?;
    output.heading(&format!("{} ({})", stats.field_name, stats.field_type));
    output.display(&StatsView(stats))
}

#[derive(Serialize)]
#[serde(transparent)]
struct StatsView(CustomFieldStats);

fn number(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |value| format!("{value:.2}"))
}

impl TableDisplay for StatsView {
    fn to_table(&self, output: &OutputManager) -> comfy_table::Table {
        let stats = &self.0;
        let mut table = output.create_table();
        table.add_row(vec![Cell::new("Values"), Cell::new(stats.total_values)]);
        table.add_row(vec![Cell::new("Unique"), Cell::new(stats.unique_values)]);
        table.add_row(vec![Cell::new("Empty"), Cell::new(stats.null_count)]);
        if stats.unavailable_count > 0 {
            table.add_row(vec![Cell::new("Unavailable"), Cell::new(stats.unavailable_count)]);
        }
        if stats.average.is_some() {
            table.add_row(vec![Cell::new("Average"), Cell::new(number(stats.average))]);
            table.add_row(vec![Cell::new("Min"), Cell::new(number(stats.min))]);
            table.add_row(vec![Cell::new("Max"), Cell::new(number(stats.max))]);
        }
        if let Some(distribution) = &stats.value_distribution {
            for (bucket, count) in distribution {
                table.add_row(vec![Cell::new(format!("= {bucket}")), Cell::new(count)]);
            }
        }
        table
    }

    fn to_compact(&self) -> String {
        let stats = &self.0;
        format!(
            "values={} unique={} empty={} avg={}",
            stats.total_values,
            stats.unique_values,
            stats.null_count,
            number(stats.average)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_formatting() {
        assert_eq!(number(Some(10.0 / 3.0)), "3.33");
        assert_eq!(number(None), "-");
    }
}
