//! Terminal styling helpers.
//!
//! Uses the anstyle ecosystem:
//! - anstream for auto-detecting color support (NO_COLOR, CLICOLOR_FORCE, TTY)
//! - anstyle for composable style constants
//!
//! ## stdout vs stderr principle
//!
//! - **stdout**: wtd's own messages and data
//! - **stderr**: child process output (git, docker, the user's command)

use anstyle::{AnsiColor, Color, Style};

/// Auto-detecting println that respects NO_COLOR, CLICOLOR_FORCE, and terminal capabilities
pub use anstream::println;

/// Auto-detecting eprintln that respects NO_COLOR, CLICOLOR_FORCE, and terminal capabilities
pub use anstream::eprintln;

/// Error style (red) - use as `{ERROR}text{ERROR:#}`
pub const ERROR: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red)));

/// Warning style (yellow) - use as `{WARNING}text{WARNING:#}`
pub const WARNING: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow)));

/// Hint style (dimmed)
pub const HINT: Style = Style::new().dimmed();

/// Green style - use as `{GREEN}text{GREEN:#}`
pub const GREEN: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green)));

/// Cyan style - use as `{CYAN}text{CYAN:#}`
pub const CYAN: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan)));

/// Error emoji - pairs with ERROR style
pub const ERROR_EMOJI: &str = "❌";

/// Success emoji - pairs with GREEN style
pub const SUCCESS_EMOJI: &str = "✅";

/// Warning emoji - pairs with WARNING style
pub const WARNING_EMOJI: &str = "🟡";

/// Progress emoji - pairs with CYAN style
pub const PROGRESS_EMOJI: &str = "🔄";

/// Format an error message with emoji and red styling.
pub fn error_message(msg: &str) -> String {
    format!("{ERROR_EMOJI} {ERROR}{msg}{ERROR:#}")
}

/// Format a warning message with emoji and yellow styling.
pub fn warning_message(msg: &str) -> String {
    format!("{WARNING_EMOJI} {WARNING}{msg}{WARNING:#}")
}

/// Format a success message with emoji and green styling.
pub fn success_message(msg: &str) -> String {
    format!("{SUCCESS_EMOJI} {GREEN}{msg}{GREEN:#}")
}

/// Format a progress message with emoji and cyan styling.
pub fn progress_message(msg: &str) -> String {
    format!("{PROGRESS_EMOJI} {CYAN}{msg}{CYAN:#}")
}
