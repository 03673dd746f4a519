//! Long-help appendices: per-command examples and the top-level environment listing.

use clap::{ColorChoice, Command, CommandFactory};
use colored::{Color, Colorize};

use crate::examples::{command_examples, ExampleGroup};
use crate::theme::{ICONS, THEME};
use crate::Cli;

const ENVIRONMENT_VARIABLES: &[(&str, &str)] = &[
    ("FIELDKIT_CONFIG", "Path to a settings file (defaults to the nearest .fieldkit/config.toml)"),
    ("RUST_LOG", "Log filter for engine diagnostics, e.g. fieldkit=debug"),
];

/// Paints text with the theme when color is enabled.
#[derive(Clone, Copy)]
struct Painter {
    color: bool,
}

impl Painter {
    fn paint(self, text: &str, color: Color) -> String {
        if self.color { text.color(color).to_string() } else { text.to_string() }
    }

    fn bold(self, text: &str, color: Color) -> String {
        if self.color { text.color(color).bold().to_string() } else { text.to_string() }
    }
}

/// The full clap command with themed styles and help appendices attached.
pub fn command(use_color: bool) -> Command {
    let painter = Painter { color: use_color };
    let mut command = Cli::command()
        .styles(THEME.help_styles())
        .color(if use_color { ColorChoice::Auto } else { ColorChoice::Never })
        .after_long_help(appendix(painter));
    for example in command_examples() {
        if let Some(subcommand) = command.find_subcommand_mut(example.name) {
            *subcommand = subcommand.clone().after_long_help(examples(example.groups, painter));
        }
    }
    command
}

fn examples(groups: &[ExampleGroup], painter: Painter) -> String {
    let mut sections = Vec::with_capacity(groups.len());
    for group in groups {
        let mut lines = vec![format!("  {}", painter.bold(group.title, THEME.primary))];
        lines.extend(group.commands.iter().map(|command| {
            format!(
                "    {} {}",
                painter.paint(ICONS.arrow, THEME.secondary),
                painter.paint(command, THEME.secondary)
            )
        }));
        sections.push(lines.join("\n"));
    }
    format!("{}\n{}\n", painter.bold("Examples:", THEME.highlight), sections.join("\n\n"))
}

fn appendix(painter: Painter) -> String {
    let mut text = format!("{}\n", painter.bold("Environment Variables:", THEME.highlight));
    for (key, description) in ENVIRONMENT_VARIABLES {
        text.push_str(&format!(
            "  {}  {}\n",
            painter.bold(key, THEME.key),
            painter.paint(description, THEME.value)
        ));
    }
    text.push_str(&format!(
        "\n{} {}\n",
        painter.bold("Tip:", THEME.highlight),
        painter.paint("Use 'fieldkit <command> --help' to view examples for each command.", THEME.secondary)
    ));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands;

    #[test]
    fn test_every_example_names_a_subcommand() {
        let command = command(false);
        for example in command_examples() {
            let subcommand = command
                .find_subcommand(example.name)
                .unwrap_or_else(|| panic!("no subcommand named {}", example.name));
            assert!(subcommand.get_after_long_help().is_some());
        }
    }

    #[test]
    fn test_examples_render_without_color() {
        let rendered = examples(commands::stats::EXAMPLES, Painter { color: false });
        assert!(rendered.starts_with("Examples:\n"));
        assert!(rendered.contains("fieldkit stats"));
        assert!(rendered.contains(ICONS.arrow));
        assert!(rendered.ends_with('\n'));
    }

    #[test]
    fn test_appendix_lists_environment() {
        let rendered = appendix(Painter { color: false });
        assert!(rendered.contains("FIELDKIT_CONFIG"));
        assert!(rendered.contains("RUST_LOG"));
    }
}
