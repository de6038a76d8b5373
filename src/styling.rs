//! Style constants for command titles and status lines.
//!
//! Uses anstyle for composable styling: render as `{STYLE}text{STYLE:#}`.

use anstyle::{AnsiColor, Color, Style};
use unicode_width::UnicodeWidthStr;

/// Title and section header style (cyan)
pub const TITLE: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan)));

/// Success style (green)
pub const SUCCESS: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green)));

/// Warning style (yellow)
pub const WARNING: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow)));

/// Error style (red)
pub const ERROR: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red)));

/// Wrap `text` in `style` when `color` is on, otherwise return it unchanged
pub fn paint(text: &str, style: Style, color: bool) -> String {
    if color {
        format!("{style}{text}{style:#}")
    } else {
        text.to_string()
    }
}

/// A dash rule as wide as `text` renders on the terminal
pub fn underline(text: &str) -> String {
    "-".repeat(text.width())
}
