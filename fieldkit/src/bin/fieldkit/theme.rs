use clap::builder::styling::{AnsiColor, Style, Styles};
use colored::Color;

/// Palette shared by command output and `--help` pages.
pub struct ColorTheme {
    pub success: Color,
    pub error: Color,
    pub warning: Color,
    pub info: Color,
    pub highlight: Color,
    pub muted: Color,
    pub primary: Color,
    pub secondary: Color,
    pub key: Color,
    pub value: Color,
}

pub const THEME: ColorTheme = ColorTheme {
    success: Color::Green,
    error: Color::Red,
    warning: Color::Yellow,
    info: Color::Blue,
    highlight: Color::Cyan,
    muted: Color::BrightBlack,
    primary: Color::BrightBlue,
    secondary: Color::Magenta,
    key: Color::BrightCyan,
    value: Color::White,
};

impl ColorTheme {
    /// Clap styles for help and usage errors, drawn from the same palette.
    pub fn help_styles(&self) -> Styles {
        let fg = |color: Color| Style::new().fg_color(Some(ansi(color).into()));
        Styles::styled()
            .usage(fg(self.primary).bold())
            .header(fg(self.highlight).bold())
            .literal(fg(self.secondary))
            .placeholder(fg(self.muted))
            .valid(fg(self.success))
            .invalid(fg(self.warning))
            .error(fg(self.error).bold())
    }
}

fn ansi(color: Color) -> AnsiColor {
    match color {
        Color::Green => AnsiColor::Green,
        Color::Red => AnsiColor::Red,
        Color::Yellow => AnsiColor::Yellow,
        Color::Blue => AnsiColor::Blue,
        Color::Cyan => AnsiColor::Cyan,
        Color::Magenta => AnsiColor::Magenta,
        Color::BrightBlack => AnsiColor::BrightBlack,
        Color::BrightBlue => AnsiColor::BrightBlue,
        Color::BrightCyan => AnsiColor::BrightCyan,
        _ => AnsiColor::White,
    }
}

pub struct Icons {
    pub success: &'static str,
    pub error: &'static str,
    pub warning: &'static str,
    pub info: &'static str,
    pub arrow: &'static str,
    pub bullet: &'static str,
}

pub const ICONS: Icons = Icons {
    success: "✓",
    error: "✗",
    warning: "⚠",
    info: "ℹ",
    arrow: "→",
    bullet: "•",
};
