//! Failure classification for execution attempts.
//!
//! Maps the signals of a failed attempt onto the failure taxonomy and a
//! retry recommendation. Pure and deterministic. Rules are checked in
//! order and the first match wins, so explicit terminal signals shadow the
//! generic failure fallback.

use crate::domain::models::failure::codes;
use crate::domain::models::{
    FailureClass, FailureClassification, FailureSignals, RemoteRunState,
};

/// Classify a failed attempt.
pub fn classify(signals: &FailureSignals) -> FailureClassification {
    let status = signals.status_raw.as_deref().unwrap_or("").to_lowercase();
    let stderr = signals.stderr.as_deref().unwrap_or("").to_lowercase();

    if contains_any(&status, &["timeout", "temporar"]) || contains_any(&stderr, &["timeout", "temporar"]) {
        return FailureClassification::new(
            FailureClass::Transient,
            true,
            codes::TIMEOUT_TEMPORARY,
            "timeout or temporary failure reported",
        );
    }

    if signals.mode.is_some_and(|mode| mode.is_remote_polling())
        && RemoteRunState::normalize(&status).is_pending()
    {
        return FailureClassification::new(
            FailureClass::Transient,
            true,
            codes::REMOTE_RUN_NOT_SETTLED,
            format!("remote run is still {status}"),
        );
    }

    if let Some(exit_code) = signals.exit_code.filter(|code| *code >= 128) {
        return FailureClassification::new(
            FailureClass::Terminal,
            false,
            codes::PROCESS_FATAL,
            format!("process terminated fatally with exit code {exit_code}"),
        );
    }

    if contains_any(&stderr, &["invalid", "schema", "syntax"]) {
        return FailureClassification::new(
            FailureClass::Terminal,
            false,
            codes::INVALID_PROTOCOL,
            "bridge rejected the protocol payload",
        );
    }

    if contains_any(&status, &["failed", "error"]) || signals.exit_code.is_some_and(|code| code > 0) {
        return FailureClassification::new(
            FailureClass::Transient,
            true,
            codes::GENERIC_EXECUTION_FAILURE,
            "execution failed",
        );
    }

    FailureClassification::new(
        FailureClass::Unknown,
        false,
        codes::UNCLASSIFIED,
        "failure could not be classified",
    )
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ExecutionMode;
    use proptest::prelude::*;

    #[test]
    fn test_timeout_is_transient() {
        let c = classify(&FailureSignals::default().with_status_raw("timeout exceeded"));
        assert_eq!(c.failure_class, FailureClass::Transient);
        assert!(c.retry_recommended);
        assert_eq!(c.failure_code, "TIMEOUT_TEMPORARY");

        let c = classify(&FailureSignals::default().with_stderr("Temporarily unavailable"));
        assert_eq!(c.failure_code, "TIMEOUT_TEMPORARY");
    }

    #[test]
    fn test_fatal_exit_is_terminal() {
        let c = classify(&FailureSignals::default().with_exit_code(137));
        assert_eq!(c.failure_class, FailureClass::Terminal);
        assert!(!c.retry_recommended);
        assert_eq!(c.failure_code, "PROCESS_FATAL");
    }

    #[test]
    fn test_remote_run_not_settled_only_for_polling_backend() {
        let polling = FailureSignals::default()
            .with_mode(ExecutionMode::TwoStepHttp)
            .with_status_raw("running");
        assert_eq!(classify(&polling).failure_code, "REMOTE_RUN_NOT_SETTLED");

        let direct = FailureSignals::default()
            .with_mode(ExecutionMode::DirectHttp)
            .with_status_raw("running");
        assert_eq!(classify(&direct).failure_code, "UNCLASSIFIED");
    }

    #[test]
    fn test_invalid_protocol_beats_generic_failure() {
        let c = classify(
            &FailureSignals::default()
                .with_exit_code(1)
                .with_status_raw("failed")
                .with_stderr("schema validation error"),
        );
        assert_eq!(c.failure_code, "INVALID_PROTOCOL");
        assert_eq!(c.failure_class, FailureClass::Terminal);
    }

    #[test]
    fn test_generic_failure_and_fallback() {
        assert_eq!(
            classify(&FailureSignals::default().with_exit_code(2)).failure_code,
            "GENERIC_EXECUTION_FAILURE"
        );
        assert_eq!(
            classify(&FailureSignals::default().with_status_raw("ERROR")).failure_code,
            "GENERIC_EXECUTION_FAILURE"
        );
        let c = classify(&FailureSignals::default());
        assert_eq!(c.failure_class, FailureClass::Unknown);
        assert!(!c.retry_recommended);
    }

    proptest! {
        #[test]
        fn prop_classification_is_deterministic(
            exit_code in proptest::option::of(-5i32..300),
            status in proptest::option::of("[a-z ]{0,16}"),
            stderr in proptest::option::of("[a-zA-Z ]{0,24}"),
        ) {
            let signals = FailureSignals {
                mode: Some(ExecutionMode::Sidecar),
                exit_code,
                status_raw: status,
                stderr,
            };
            prop_assert_eq!(classify(&signals), classify(&signals));
        }

        #[test]
        fn prop_fatal_exit_never_retried(exit_code in 128i32..256, stderr in "[a-z ]{0,12}") {
            prop_assume!(!stderr.contains("timeout") && !stderr.contains("temporar"));
            let c = classify(&FailureSignals::default().with_exit_code(exit_code).with_stderr(stderr));
            prop_assert_eq!(c.failure_class, FailureClass::Terminal);
            prop_assert!(!c.retry_recommended);
        }

        #[test]
        fn prop_retry_only_for_transient(exit_code in proptest::option::of(0i32..200), status in "[a-z]{0,10}") {
            let c = classify(&FailureSignals { exit_code, status_raw: Some(status), ..Default::default() });
            prop_assert_eq!(c.retry_recommended, c.failure_class == FailureClass::Transient);
        }
    }
}
