mod commands;
mod context;
mod examples;
mod help;
mod loader;
mod output;
mod theme;

use anyhow::Result;
use clap::{FromArgMatches, Parser, Subcommand};
use colored::control::ShouldColorize;
use std::io::{self, Write};

use commands::{
    filter::{handle_filter_commands, FilterCommands},
    schema::{handle_schema_commands, SchemaCommands},
    stats::{handle_stats, StatsArgs},
    value::{handle_value_commands, ValueCommands},
};
use output::{GlobalOptions, OutputFormat, OutputManager};

#[derive(Parser)]
#[command(name = "fieldkit")]
#[command(version)]
#[command(
    about = "Inspect and exercise custom field schemas",
    long_about = r#"Command-line companion for the fieldkit custom field engine:

• Check schema files before shipping them
• Validate and normalize raw values against a field
• Run ad-hoc or saved filters over sample entities
• Compute per-field statistics

Commands:
  schema    Check and list field definitions
  value     Validate values against a field
  filter    Evaluate filters over entities
  stats     Aggregate one field over entities
"#
)]
#[command(subcommand_required = true, arg_required_else_help = true)]
struct Cli {
    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Suppress output (only errors will be shown)
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Enable verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Parse arguments against the themed command; clap prints help and usage errors itself.
    fn parse_themed() -> Self {
        let use_color = ShouldColorize::from_env().should_colorize();
        let matches = help::command(use_color).get_matches();
        Cli::from_arg_matches(&matches).unwrap_or_else(|err| err.exit())
    }
}

fn blank_line() {
    let mut stdout = io::stdout();
    let _ = stdout.write_all(b"\n").and_then(|()| stdout.flush());
}

#[derive(Subcommand)]
enum Commands {
    /// Check and list field definitions
    #[command(subcommand)]
    Schema(SchemaCommands),

    /// Validate raw values against a field
    #[command(subcommand)]
    Value(ValueCommands),

    /// Evaluate filters over a set of entities
    #[command(subcommand)]
    Filter(FilterCommands),

    /// Aggregate one field over a set of entities
    Stats(StatsArgs),
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse_themed();

    let global_options = GlobalOptions {
        output_format: cli.output,
        quiet: cli.quiet,
        verbose: cli.verbose,
        no_color: cli.no_color,
    };
    if global_options.no_color {
        colored::control::set_override(false);
    }
    let output = OutputManager::new(global_options);

    blank_line();

    match execute(cli.command, &output).await {
        Ok(()) => {
            blank_line();
        }
        Err(err) => {
            output.error(&format!("{err:#}"));
            blank_line();
            std::process::exit(1);
        }
    }
}

async fn execute(command: Commands, output: &OutputManager) -> Result<()> {
    match command {
        Commands::Schema(schema_cmd) => {
            handle_schema_commands(schema_cmd, output).await?;
        }
        Commands::Value(value_cmd) => {
            handle_value_commands(value_cmd, output).await?;
        }
        Commands::Filter(filter_cmd) => {
            handle_filter_commands(filter_cmd, output).await?;
        }
        Commands::Stats(args) => {
            handle_stats(args, output).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_themed_command_parses_global_flags() {
        let err = help::command(false)
            .try_get_matches_from(["fieldkit", "--no-color", "--output", "json", "schema", "--help"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
