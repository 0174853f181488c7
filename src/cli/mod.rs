//! Command-line interface.

pub mod commands;
pub mod display;
pub mod types;

use serde_json::json;

use crate::domain::errors::DomainError;

pub use types::{Cli, Commands};

/// Print a command failure and pick the process exit code.
///
/// Domain errors keep their machine code so scripts can branch on it.
pub fn handle_error(err: &anyhow::Error, json_mode: bool) -> i32 {
    let code = err
        .downcast_ref::<DomainError>()
        .map_or("ERROR", DomainError::code);

    if json_mode {
        let body = json!({
            "success": false,
            "error": { "code": code, "message": format!("{err:#}") },
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("{}", display::action_failure(&format!("{err:#}")));
    }

    match code {
        "NOT_FOUND" | "BAD_REQUEST" | "CONTRACT_VIOLATION" => 2,
        _ => 1,
    }
}

/// Parse a `--params` JSON argument. Only objects are accepted.
pub fn parse_params(raw: Option<&str>) -> anyhow::Result<Option<serde_json::Value>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("--params is not valid JSON: {e}"))?;
    if !value.is_object() {
        anyhow::bail!("--params must be a JSON object");
    }
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        assert_eq!(parse_params(None).unwrap(), None);
        assert_eq!(
            parse_params(Some(r#"{"volume": 50}"#)).unwrap(),
            Some(json!({"volume": 50}))
        );
        assert!(parse_params(Some("[1, 2]")).is_err());
        assert!(parse_params(Some("{oops")).is_err());
    }

    #[test]
    fn test_domain_errors_exit_with_usage_code() {
        let err = anyhow::Error::new(DomainError::not_found("robot plan", "RP-9"));
        assert_eq!(handle_error(&err, true), 2);
        assert_eq!(handle_error(&anyhow::anyhow!("disk full"), true), 1);
    }
}
