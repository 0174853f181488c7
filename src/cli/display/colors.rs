//! Status and class color mapping for CLI output.
//!
//! `console` disables styling when stdout is not a terminal or `NO_COLOR` is set.

use console::{style, StyledObject};

/// Returns a styled string for any status value.
///
/// Color scheme:
/// - Green:  completed, healthy, resolved
/// - Yellow: running, claimed, degraded, acked
/// - Blue:   queued
/// - Red:    failed, down, open
/// - Dim:    canceled
pub fn colorize_status(status: &str) -> StyledObject<&str> {
    match status.to_lowercase().as_str() {
        "completed" | "healthy" | "resolved" => style(status).green().bold(),
        "running" | "claimed" | "degraded" | "acked" => style(status).yellow(),
        "queued" => style(status).blue(),
        "failed" | "down" | "open" => style(status).red().bold(),
        "canceled" | "cancelled" => style(status).dim(),
        _ => style(status),
    }
}

/// Failure classes: transient can be retried, terminal cannot.
pub fn colorize_failure_class(class: &str) -> StyledObject<&str> {
    match class {
        "transient" => style(class).yellow(),
        "terminal" => style(class).red(),
        _ => style(class).dim(),
    }
}

/// Yes/no flag.
pub fn flag(value: bool) -> String {
    if value {
        style("yes").green().to_string()
    } else {
        style("no").dim().to_string()
    }
}

/// Field label in detail views.
pub fn label(text: &str) -> String {
    style(text).dim().to_string()
}
