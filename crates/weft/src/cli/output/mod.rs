//! Output formatting utilities

use std::time::Duration;

use console::{style, Style, StyledObject};

use weft_tasks::ExecutionStatus;

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("{} {}", style("!").yellow().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", style("→").blue(), message);
}

/// Create a styled header
pub fn header(text: &str) -> String {
    style(text).bold().to_string()
}

/// Create a styled key-value line
pub fn key_value(key: &str, value: &str) -> String {
    format!("  {}: {}", style(key).dim(), value)
}

/// Style for paths
pub fn path_style() -> Style {
    Style::new().cyan()
}

/// Style for task ids
pub fn task_style() -> Style {
    Style::new().bold()
}

/// Status glyph colored by outcome
pub fn status_marker(status: ExecutionStatus) -> StyledObject<&'static str> {
    match status {
        ExecutionStatus::Completed => style("✓").green(),
        ExecutionStatus::Failed => style("✗").red(),
        ExecutionStatus::Cancelled => style("○").yellow(),
        ExecutionStatus::Paused => style("‖").yellow(),
        ExecutionStatus::Running | ExecutionStatus::Queued => style("▸").dim(),
    }
}

/// Seconds with one decimal, dimmed
pub fn duration(d: Duration) -> String {
    style(format!("{:.1}s", d.as_secs_f64())).dim().to_string()
}
