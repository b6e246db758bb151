//! ANSI attributes used in rendered text.

/// Bold.
pub const BOLD: &str = "\x1b[1m";
/// Blue foreground.
pub const BLUE: &str = "\x1b[34m";
/// Red foreground.
pub const RED: &str = "\x1b[31m";
/// Green foreground.
pub const GREEN: &str = "\x1b[32m";
/// Grey foreground.
pub const GREY: &str = "\x1b[37m";
/// Reset all attributes.
pub const RESET: &str = "\x1b[0m";
/// Default colors.
pub const NORMAL: &str = "\x1b[39;49m";

/// A bracketed red marker standing in for content that could not be shown.
#[must_use]
pub fn error_marker(message: &str) -> String {
    format!("{RED}[{message}]{RESET}")
}
