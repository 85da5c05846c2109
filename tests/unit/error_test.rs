//! Tests for error types

use prometheus_automation_scheduler::core::{AppResult, SchedulerError};

#[test]
fn test_source_unavailable_error() {
    let err = SchedulerError::SourceUnavailable("timeout".to_string());
    assert_eq!(format!("{}", err), "definition source unavailable: timeout");
}

#[test]
fn test_missing_command_error() {
    let err = SchedulerError::MissingCommand;
    assert_eq!(format!("{}", err), "external process command is required");
}

#[test]
fn test_non_zero_exit_carries_code() {
    let err = SchedulerError::NonZeroExit { code: 3 };
    assert_eq!(format!("{}", err), "external process exited with code 3");
    assert_eq!(err.exit_code(), Some(3));
    assert_eq!(SchedulerError::Cancelled.exit_code(), None);
}

#[test]
fn test_invalid_definition_error() {
    let err = SchedulerError::InvalidDefinition {
        job: "inventory".to_string(),
        reason: "no command".to_string(),
    };
    assert_eq!(format!("{}", err), "invalid definition for job `inventory`: no command");
}

#[test]
fn test_launch_error_keeps_source() {
    use std::error::Error as _;

    let err = SchedulerError::ProcessLaunch {
        command: "missing.sh".to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
    };
    assert!(format!("{}", err).starts_with("failed to launch `missing.sh`"));
    assert!(err.source().is_some());
}

#[test]
fn test_app_result_wraps_scheduler_error() {
    fn fails() -> AppResult<()> {
        Err(SchedulerError::Engine("not started".to_string()).into())
    }
    let err = fails().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SchedulerError>(),
        Some(SchedulerError::Engine(_))
    ));
}
