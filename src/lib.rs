// Copyright 2026 Build Acceleration Team.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(unused_must_use)]
// Enable all clippy lints except for the pedantic ones copied-and-pasted convention: see
// `[lints]` in Cargo.toml for the specific allows layered on top of this.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::single_match_else,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
#![allow(clippy::match_ref_pats)]

//! A racing execution engine for a remote build-action runner: given a command to run, it
//! speculatively drives a remote cache-read/execute attempt against a gated local attempt,
//! arbitrates the winner, and reconciles on-disk output state.
//!
//! The surrounding orchestration a build tool needs -- input discovery, dependency-graph
//! scheduling, protobuf wire formats for the remote backend, metrics/telemetry export -- is out
//! of scope; this crate owns the race itself. See `DESIGN.md` for how each module traces back
//! to its grounding.

pub mod action;
pub mod cancel;
pub mod command;
pub mod config;
pub mod digest;
pub mod error;
pub mod external;
pub mod forecaster;
pub mod log_record;
pub mod metadata_cache;
pub mod path_utils;
pub mod race;
pub mod result;
pub mod staging;

pub use action::Action;
pub use cancel::CancelScope;
pub use command::{ActionFingerprint, CommandDescriptor, ExecutionId};
pub use config::{ExecutionStrategy, LocalExecutionOptions, RaceConfig, RemoteExecutionOptions};
pub use error::ProcessError;
pub use race::RaceCoordinator;
pub use result::{CapturedOutput, ExecResult, Status};
