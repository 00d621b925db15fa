// Copyright 2026 Build Acceleration Team.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Traits for the collaborators the core consumes but does not implement:
//! the remote-execution client and the execution context it hands back, the local process
//! pool, the input processor, the dependency-file parser, and the logger sink. Each is an
//! `async_trait` the same way buck2's `RemoteActionResult`/`Claim` traits wrap collaborators
//! the executor doesn't own, and the same way pants' `CommandRunner` decorators (`cache.rs`,
//! `remote_cache.rs`, `switched.rs`) wrap an `inner: Arc<dyn CommandRunner>` rather than owning
//! execution themselves.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use crate::command::CommandDescriptor;
use crate::config::{ExecutionStrategy, RemoteExecutionOptions};
use crate::digest::ContentDigest;
use crate::error::ProcessError;
use crate::log_record::{LogRecord, RemoteMetadata};
use crate::result::{ExecResult, OutputSink};

/// One output the remote side reports, as returned by `ExecutionContext::get_flattened_outputs`.
/// Used by `crate::staging::exclude_unchanged_outputs` to decide what's worth downloading.
#[derive(Clone, Debug)]
pub struct RemoteOutputNode {
    /// Relative to the command's working directory.
    pub path: PathBuf,
    pub digest: ContentDigest,
    pub is_directory: bool,
}

/// A handle created once per action via `RemoteExecClient::new_context` and reused across
/// cache lookup, execution, download, and cache update.
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    async fn get_cached_result(&self) -> Result<Option<ExecResult>, String>;
    async fn execute_remotely(&self) -> Result<ExecResult, String>;
    /// Downloads every declared output into `dir`. Returns its own `Result` rather than
    /// mutating this context's stored result: see DESIGN.md's resolution of the open question
    /// about the post-download result contract.
    async fn download_outputs(&self, dir: &Path) -> Result<(), ProcessError>;
    async fn download_specified_outputs(
        &self,
        subset: &[PathBuf],
        dir: &Path,
    ) -> Result<(), ProcessError>;
    fn get_flattened_outputs(&self) -> Vec<RemoteOutputNode>;
    async fn get_output_file_digests(&self) -> Result<IndexMap<PathBuf, ContentDigest>, String>;
    async fn update_cached_result(&self) -> Result<(), String>;
    fn metadata(&self) -> RemoteMetadata;
}

#[async_trait]
pub trait RemoteExecClient: Send + Sync {
    async fn new_context(
        &self,
        cancel: CancellationToken,
        cmd: &CommandDescriptor,
        opts: &RemoteExecutionOptions,
        output_sink: OutputSink,
    ) -> Result<Arc<dyn ExecutionContext>, String>;
}

/// Guarantees that if `err` is `ProcessError::Interrupted`, no process was ever started --
/// the race coordinator relies on this to distinguish "local was canceled before it could
/// affect the filesystem" from "local started and must now be treated as authoritative".
#[async_trait]
pub trait LocalPool: Send + Sync {
    async fn run(
        &self,
        parent: CancellationToken,
        cancel: CancellationToken,
        cmd: &CommandDescriptor,
        labels: &IndexMap<String, String>,
        output_sink: OutputSink,
        log: &mut LogRecord,
    ) -> (Option<i32>, Option<ProcessError>);
}

/// Opaque input specification handed back by `InputProcessor::process_inputs`. The core
/// treats this as a black box it stores and forwards; input discovery itself is out of scope.
#[derive(Clone, Debug, Default)]
pub struct InputSpec {
    pub digests: IndexMap<PathBuf, ContentDigest>,
}

#[derive(Clone, Debug)]
pub struct InputProcessingOptions {
    pub cmd: CommandDescriptor,
    pub labels: IndexMap<String, String>,
    pub toolchain_inputs: Vec<PathBuf>,
    pub working_dir: PathBuf,
    pub strategy: ExecutionStrategy,
    pub env: IndexMap<String, String>,
    pub windows_cross_compile: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ProcessedInputs {
    pub input_spec: InputSpec,
    pub output_files: Vec<PathBuf>,
    pub output_dirs: Vec<PathBuf>,
    pub used_shallow_mode: bool,
    pub emitted_dependency_file: Option<PathBuf>,
}

#[async_trait]
pub trait InputProcessor: Send + Sync {
    async fn process_inputs(
        &self,
        opts: &InputProcessingOptions,
        log: &mut LogRecord,
    ) -> Result<ProcessedInputs, String>;
}

#[async_trait]
pub trait DepsParser: Send + Sync {
    async fn write_deps_file(&self, path: &Path, log: &mut LogRecord) -> Result<(), String>;
    /// `Ok(true)` means the deps file verified cleanly; `Ok(false)` means it parsed but
    /// disagreed with current input digests (a mismatch, not a parse error).
    async fn verify_deps_file(&self, path: &Path, log: &mut LogRecord) -> Result<bool, String>;
}

#[async_trait]
pub trait Logger: Send + Sync {
    async fn log(&self, record: &LogRecord) -> Result<(), String>;
}

#[cfg(test)]
pub mod testing;
