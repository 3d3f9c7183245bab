//! Tests for error types.
//!
//! Validates display formatting and the split between configuration errors
//! and request or execution errors.

use std::path::PathBuf;
use std::time::Duration;

use simwps::Error;

// =============================================================================
// Configuration Error Tests
// =============================================================================

#[test]
fn test_missing_mechanism_display() {
    let err = Error::MissingMechanism {
        id: "catalog".to_string(),
        direction: "input".to_string(),
    };
    let msg = format!("{}", err);

    assert!(msg.contains("catalog"), "should include parameter id");
    assert!(msg.contains("input"), "should include direction");
    assert!(err.is_configuration_error());
}

#[test]
fn test_unknown_handler_display() {
    let err = Error::UnknownHandler {
        kind: "stderrHandler".to_string(),
        name: "shout".to_string(),
    };
    let msg = format!("{}", err);

    assert!(msg.contains("stderrHandler"));
    assert!(msg.contains("'shout'"));
    assert!(err.is_configuration_error());
}

#[test]
fn test_config_parse_keeps_reason() {
    let err = Error::ConfigParse {
        reason: "Missing key 'title'".to_string(),
    };
    assert_eq!(
        format!("{}", err),
        "configuration parse error: Missing key 'title'"
    );
}

#[test]
fn test_invalid_image_reference_display() {
    let err = Error::InvalidImageReference {
        reference: "--privileged".to_string(),
        reason: "must not start with '-'".to_string(),
    };
    let msg = format!("{}", err);

    assert!(msg.contains("--privileged"));
    assert!(msg.contains("must not start with"));
    assert!(err.is_configuration_error());
}

// =============================================================================
// Request Error Tests
// =============================================================================

#[test]
fn test_request_errors_are_not_configuration_errors() {
    let errors = [
        Error::MissingInput {
            id: "times".to_string(),
        },
        Error::InvalidInput {
            id: "etype".to_string(),
            reason: "Input is none of the allowed values".to_string(),
        },
        Error::UnknownOutput {
            id: "nope".to_string(),
        },
        Error::CacheMiss {
            key: "0".repeat(64),
        },
    ];
    for err in &errors {
        assert!(!err.is_configuration_error(), "{} misclassified", err);
    }
}

#[test]
fn test_invalid_input_display() {
    let err = Error::InvalidInput {
        id: "etype".to_string(),
        reason: "Input is none of the allowed values".to_string(),
    };
    assert_eq!(
        format!("{}", err),
        "invalid value for input 'etype': Input is none of the allowed values"
    );
}

// =============================================================================
// Execution Error Tests
// =============================================================================

#[test]
fn test_non_zero_exit_display() {
    let err = Error::NonZeroExitValue { code: 137 };
    assert!(format!("{}", err).contains("137"));
    assert!(!err.is_configuration_error());
}

#[test]
fn test_timeout_display() {
    let err = Error::Timeout {
        operation: "python3".to_string(),
        duration: Duration::from_secs(30),
    };
    let msg = format!("{}", err);

    assert!(msg.contains("python3"), "should include operation");
    assert!(msg.contains("30s"), "should include duration");
}

#[test]
fn test_runner_failed_display() {
    let err = Error::RunnerFailed {
        runner: "docker".to_string(),
        reason: "container create: exit status 125".to_string(),
    };
    assert_eq!(
        format!("{}", err),
        "docker runner failed: container create: exit status 125"
    );
}

// =============================================================================
// Storage Error Tests
// =============================================================================

#[test]
fn test_storage_init_failed_display() {
    let err = Error::StorageInitFailed {
        path: PathBuf::from("/readonly/cache"),
        reason: "permission denied".to_string(),
    };
    let msg = format!("{}", err);

    assert!(msg.contains("/readonly/cache"));
    assert!(msg.contains("permission denied"));
}

#[test]
fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: Error = io.into();
    assert!(matches!(err, Error::Io(_)));
    assert!(format!("{}", err).contains("gone"));
}
