//! Display framework for CLI output formatting.
//!
//! Provides shared primitives for colors, tables and detail views used
//! across all CLI command output.

pub mod colors;
pub mod table;

use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;

pub use colors::*;
pub use table::*;

/// Trait for types that can be rendered as human-readable or JSON output.
pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Dispatch output based on JSON mode flag.
pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&result.to_json()).unwrap_or_default()
        );
    } else {
        println!("{}", result.to_human());
    }
}

/// Render a success action result.
pub fn action_success(message: &str) -> String {
    format!("{} {}", style("\u{2713}").green().bold(), message)
}

/// Render a failure action result.
pub fn action_failure(message: &str) -> String {
    format!("{} {}", style("\u{2717}").red().bold(), message)
}

/// Truncate a string to a maximum number of characters, appending "..." if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Timestamp in a compact UTC form, or "-".
pub fn timestamp_opt(dt: Option<&DateTime<Utc>>) -> String {
    dt.map_or_else(|| "-".to_string(), |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Key-value lines with aligned keys.
pub fn detail_lines(title: &str, fields: &[(&str, String)]) -> String {
    let width = fields.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    let mut lines = vec![style(title).bold().to_string()];
    for (key, value) in fields {
        lines.push(format!("  {}  {}", label(&format!("{key:<width$}")), value));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
        assert_eq!(truncate("µµµµµµµµµµ", 6), "µµµ...");
    }

    #[test]
    fn test_timestamp_opt() {
        assert_eq!(timestamp_opt(None), "-");
        let dt = DateTime::parse_from_rfc3339("2024-03-01T10:20:30Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(timestamp_opt(Some(&dt)), "2024-03-01 10:20:30");
    }
}
