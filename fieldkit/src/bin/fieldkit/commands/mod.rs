pub mod filter;
pub mod schema;
pub mod stats;
pub mod value;

use anyhow::Result;
use fieldkit::EntityType;

use crate::context::ProjectContext;
use crate::output::OutputManager;

/// clap value parser for entity type arguments
pub fn parse_entity_type(raw: &str) -> Result<EntityType, String> {
    raw.parse::<EntityType>().map_err(|err| err.to_string())
}

/// Locate settings and report where they came from
pub fn load_context(output: &OutputManager) -> Result<ProjectContext> {
    let ctx = ProjectContext::find()?;
    output.verbose(&format!("using {}", ctx.describe()));
    Ok(ctx)
}
