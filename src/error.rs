// Copyright 2026 Build Acceleration Team.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

/// Error taxonomy for a single action's execution. These are the terminal, well-formed
/// failures that get converted into a `Result` (see `crate::result`) rather than propagated
/// as exceptions -- callers inspect the action's `Result`, they never see this type directly
/// once `Action::execute` has returned.
#[derive(Clone, Debug)]
pub enum ProcessError {
    /// Filesystem, context-creation, input-processing, or other host-side failure. Terminal
    /// unless a race later promotes a local success.
    Local(String),
    /// RPC or backend failure during remote execution or download.
    Remote(String),
    /// A cached result failed deps-file verification.
    Validation(String),
    /// The parent cancellation scope was canceled; carries its cause.
    Interrupted(String),
}

impl ProcessError {
    pub fn local(msg: impl Into<String>) -> Self {
        ProcessError::Local(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        ProcessError::Remote(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ProcessError::Validation(msg.into())
    }

    pub fn interrupted(cause: impl Into<String>) -> Self {
        ProcessError::Interrupted(cause.into())
    }

    pub fn message(&self) -> &str {
        match self {
            ProcessError::Local(m)
            | ProcessError::Remote(m)
            | ProcessError::Validation(m)
            | ProcessError::Interrupted(m) => m,
        }
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::Local(m) => write!(f, "local error: {m}"),
            ProcessError::Remote(m) => write!(f, "remote error: {m}"),
            ProcessError::Validation(m) => write!(f, "cache validation error: {m}"),
            ProcessError::Interrupted(m) => write!(f, "interrupted: {m}"),
        }
    }
}

impl std::error::Error for ProcessError {}

impl From<String> for ProcessError {
    fn from(s: String) -> Self {
        ProcessError::Local(s)
    }
}

impl From<&str> for ProcessError {
    fn from(s: &str) -> Self {
        ProcessError::Local(s.to_owned())
    }
}

impl From<std::io::Error> for ProcessError {
    fn from(e: std::io::Error) -> Self {
        ProcessError::Local(e.to_string())
    }
}
