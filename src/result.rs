// Copyright 2026 Build Acceleration Team.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The outcome of executing (or attempting to execute) an action.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::ProcessError;

/// How an action's execution finished. Field names are lower_snake_case,
/// lower-cased with underscores, via `strum`'s `snake_case` serialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    NonZeroExit,
    LocalError,
    RemoteError,
    Interrupted,
    Timeout,
    CacheHit,
}

/// The result of one execution attempt: an exit code (absent if the command never finished),
/// an optional error message, and a `Status` classifying how it finished.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: Option<i32>,
    pub err: Option<String>,
    pub status: Status,
}

impl ExecResult {
    pub fn from_exit_code(exit_code: i32) -> Self {
        ExecResult {
            exit_code: Some(exit_code),
            err: None,
            status: if exit_code == 0 {
                Status::Success
            } else {
                Status::NonZeroExit
            },
        }
    }

    pub fn cache_hit() -> Self {
        ExecResult {
            exit_code: Some(0),
            err: None,
            status: Status::CacheHit,
        }
    }

    pub fn from_local_error(err: impl std::fmt::Display) -> Self {
        ExecResult {
            exit_code: None,
            err: Some(err.to_string()),
            status: Status::LocalError,
        }
    }

    pub fn from_remote_error(err: impl std::fmt::Display) -> Self {
        ExecResult {
            exit_code: None,
            err: Some(err.to_string()),
            status: Status::RemoteError,
        }
    }

    pub fn interrupted(cause: impl std::fmt::Display) -> Self {
        ExecResult {
            exit_code: None,
            err: Some(cause.to_string()),
            status: Status::Interrupted,
        }
    }

    pub fn timeout() -> Self {
        ExecResult {
            exit_code: None,
            err: Some("timed out".to_owned()),
            status: Status::Timeout,
        }
    }

    /// A result is ok when it carries no error, regardless of exit code: a non-zero exit from
    /// a compile error is still a legitimate, "ok" outcome of having run the command.
    pub fn is_ok(&self) -> bool {
        self.err.is_none()
    }
}

impl From<ProcessError> for ExecResult {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::Local(m) => ExecResult::from_local_error(m),
            ProcessError::Remote(m) => ExecResult::from_remote_error(m),
            ProcessError::Validation(m) => ExecResult::from_local_error(m),
            ProcessError::Interrupted(m) => ExecResult::interrupted(m),
        }
    }
}

/// Captured stdout/stderr from a single execution attempt.
#[derive(Clone, Debug, Default)]
pub struct CapturedOutput {
    pub stdout: Bytes,
    pub stderr: Bytes,
}

/// A cheap-to-clone handle an executor (local or remote) writes captured output into. Kept
/// separate from `CapturedOutput` because the latter is an immutable snapshot taken once
/// execution finishes, while this is the live, shared write side.
#[derive(Clone, Default)]
pub struct OutputSink {
    stdout: std::sync::Arc<parking_lot::Mutex<Vec<u8>>>,
    stderr: std::sync::Arc<parking_lot::Mutex<Vec<u8>>>,
}

impl OutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_stdout(&self, data: &[u8]) {
        self.stdout.lock().extend_from_slice(data);
    }

    pub fn write_stderr(&self, data: &[u8]) {
        self.stderr.lock().extend_from_slice(data);
    }

    pub fn captured(&self) -> CapturedOutput {
        CapturedOutput {
            stdout: Bytes::copy_from_slice(&self.stdout.lock()),
            stderr: Bytes::copy_from_slice(&self.stderr.lock()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_exit_code_classifies_success_and_failure() {
        assert_eq!(ExecResult::from_exit_code(0).status, Status::Success);
        assert_eq!(ExecResult::from_exit_code(1).status, Status::NonZeroExit);
    }

    #[test]
    fn non_zero_exit_without_error_is_still_ok() {
        let r = ExecResult::from_exit_code(1);
        assert!(r.is_ok());
    }

    #[test]
    fn local_error_is_not_ok() {
        let r = ExecResult::from_local_error("boom");
        assert!(!r.is_ok());
        assert_eq!(r.status, Status::LocalError);
    }

    #[test]
    fn status_display_matches_spec_literal_names() {
        assert_eq!(Status::NonZeroExit.to_string(), "non_zero_exit");
        assert_eq!(Status::LocalError.to_string(), "local_error");
        assert_eq!(Status::CacheHit.to_string(), "cache_hit");
    }
}
