// Copyright 2026 Build Acceleration Team.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Controllable fakes for every collaborator trait in `crate::external`, used by
//! `crate::race`'s and `crate::action`'s scenario tests. Modeled on pants'
//! `process_execution::switched::tests` fakes, which wrap a `Mutex`-guarded response plan
//! rather than a real backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::command::CommandDescriptor;
use crate::config::{ExecutionStrategy, RemoteExecutionOptions};
use crate::digest::ContentDigest;
use crate::error::ProcessError;
use crate::log_record::{LogRecord, RemoteMetadata};
use crate::result::{ExecResult, OutputSink};

use super::{
    DepsParser, ExecutionContext, InputProcessingOptions, InputProcessor, LocalPool, Logger,
    ProcessedInputs, RemoteExecClient, RemoteOutputNode,
};

/// A fully scripted `ExecutionContext`. Every field defaults to "instant cache miss, empty
/// outputs" so a test only needs to set the fields it cares about.
pub struct FakeExecutionContext {
    pub cache_result: Option<ExecResult>,
    pub cache_lookup_delay: Duration,
    pub execute_delay: Duration,
    pub execute_result: Result<ExecResult, String>,
    pub download_delay: Duration,
    pub download_result: Result<(), ProcessError>,
    pub flattened_outputs: Vec<RemoteOutputNode>,
    pub output_file_digests: Result<IndexMap<PathBuf, ContentDigest>, String>,
    pub metadata: RemoteMetadata,
    pub calls: Mutex<Vec<&'static str>>,
}

impl Default for FakeExecutionContext {
    fn default() -> Self {
        FakeExecutionContext {
            cache_result: None,
            cache_lookup_delay: Duration::ZERO,
            execute_delay: Duration::ZERO,
            execute_result: Ok(ExecResult::from_exit_code(0)),
            download_delay: Duration::ZERO,
            download_result: Ok(()),
            flattened_outputs: Vec::new(),
            output_file_digests: Ok(IndexMap::new()),
            metadata: RemoteMetadata::default(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeExecutionContext {
    /// A context that reports a cache hit after `lookup_delay` and then takes `download_delay`
    /// to materialize outputs -- the shape scenario 1/5 need.
    pub fn cache_hit(lookup_delay: Duration, download_delay: Duration) -> Self {
        FakeExecutionContext {
            cache_result: Some(ExecResult::cache_hit()),
            cache_lookup_delay: lookup_delay,
            download_delay,
            ..Default::default()
        }
    }

    /// A context that reports a cache miss after `lookup_delay` and then takes `execute_delay`
    /// to run remotely.
    pub fn cache_miss(lookup_delay: Duration, execute_delay: Duration, execute_result: Result<ExecResult, String>) -> Self {
        FakeExecutionContext {
            cache_result: None,
            cache_lookup_delay: lookup_delay,
            execute_delay,
            execute_result,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ExecutionContext for FakeExecutionContext {
    async fn get_cached_result(&self) -> Result<Option<ExecResult>, String> {
        if !self.cache_lookup_delay.is_zero() {
            tokio::time::sleep(self.cache_lookup_delay).await;
        }
        self.calls.lock().push("get_cached_result");
        Ok(self.cache_result.clone())
    }

    async fn execute_remotely(&self) -> Result<ExecResult, String> {
        if !self.execute_delay.is_zero() {
            tokio::time::sleep(self.execute_delay).await;
        }
        self.calls.lock().push("execute_remotely");
        self.execute_result.clone()
    }

    async fn download_outputs(&self, _dir: &Path) -> Result<(), ProcessError> {
        if !self.download_delay.is_zero() {
            tokio::time::sleep(self.download_delay).await;
        }
        self.calls.lock().push("download_outputs");
        self.download_result.clone()
    }

    async fn download_specified_outputs(
        &self,
        _subset: &[PathBuf],
        dir: &Path,
    ) -> Result<(), ProcessError> {
        self.calls.lock().push("download_specified_outputs");
        self.download_outputs(dir).await
    }

    fn get_flattened_outputs(&self) -> Vec<RemoteOutputNode> {
        self.flattened_outputs.clone()
    }

    async fn get_output_file_digests(&self) -> Result<IndexMap<PathBuf, ContentDigest>, String> {
        self.output_file_digests.clone()
    }

    async fn update_cached_result(&self) -> Result<(), String> {
        self.calls.lock().push("update_cached_result");
        Ok(())
    }

    fn metadata(&self) -> RemoteMetadata {
        self.metadata.clone()
    }
}

/// What `FakeRemoteExecClient::new_context` hands back. A context-creation failure (scenario 4)
/// is modeled as the `Err` variant, distinct from a context that itself reports a cache miss.
pub enum ContextOutcome {
    Ready(Arc<FakeExecutionContext>),
    CreationFailed(String),
}

pub struct FakeRemoteExecClient {
    pub outcome: ContextOutcome,
}

impl FakeRemoteExecClient {
    pub fn ready(ctx: FakeExecutionContext) -> Self {
        FakeRemoteExecClient {
            outcome: ContextOutcome::Ready(Arc::new(ctx)),
        }
    }

    pub fn creation_fails(msg: impl Into<String>) -> Self {
        FakeRemoteExecClient {
            outcome: ContextOutcome::CreationFailed(msg.into()),
        }
    }
}

#[async_trait]
impl RemoteExecClient for FakeRemoteExecClient {
    async fn new_context(
        &self,
        _cancel: CancellationToken,
        _cmd: &CommandDescriptor,
        _opts: &RemoteExecutionOptions,
        _output_sink: OutputSink,
    ) -> Result<Arc<dyn ExecutionContext>, String> {
        match &self.outcome {
            ContextOutcome::Ready(ctx) => Ok(ctx.clone() as Arc<dyn ExecutionContext>),
            ContextOutcome::CreationFailed(msg) => Err(msg.clone()),
        }
    }
}

/// A local pool whose timing and outcome are fully scripted. `start_delay` models the time
/// between the pool accepting `run` and the process actually starting (the "queued" window
/// during which cancellation is still honored); `exec_delay` models how long the process then
/// takes to run, during which cancellation is ignored.
pub struct FakeLocalPool {
    pub start_delay: Duration,
    pub exec_delay: Duration,
    pub outcome: Result<i32, ProcessError>,
}

impl FakeLocalPool {
    pub fn new(start_delay: Duration, exec_delay: Duration, outcome: Result<i32, ProcessError>) -> Self {
        FakeLocalPool {
            start_delay,
            exec_delay,
            outcome,
        }
    }

    pub fn instant_success(exit_code: i32) -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Ok(exit_code))
    }
}

#[async_trait]
impl LocalPool for FakeLocalPool {
    async fn run(
        &self,
        parent: CancellationToken,
        cancel: CancellationToken,
        _cmd: &CommandDescriptor,
        _labels: &IndexMap<String, String>,
        _output_sink: OutputSink,
        log: &mut LogRecord,
    ) -> (Option<i32>, Option<ProcessError>) {
        tokio::select! {
            _ = tokio::time::sleep(self.start_delay) => {}
            _ = cancel.cancelled() => {
                return (None, Some(ProcessError::interrupted("canceled before local started")));
            }
            _ = parent.cancelled() => {
                return (None, Some(ProcessError::interrupted("parent canceled before local started")));
            }
        }
        log.local.executed_locally = true;
        if !self.exec_delay.is_zero() {
            tokio::time::sleep(self.exec_delay).await;
        }
        match &self.outcome {
            Ok(code) => {
                log.local.exit_code = Some(*code);
                (Some(*code), None)
            }
            Err(e) => (None, Some(e.clone())),
        }
    }
}

/// Returns `processed` unmodified -- input discovery itself is out of scope, so
/// this fake exists only to exercise the merge/rewrite steps in `crate::action::lifecycle`.
pub struct FakeInputProcessor {
    pub processed: ProcessedInputs,
}

impl FakeInputProcessor {
    pub fn new(processed: ProcessedInputs) -> Self {
        FakeInputProcessor { processed }
    }
}

#[async_trait]
impl InputProcessor for FakeInputProcessor {
    async fn process_inputs(
        &self,
        _opts: &InputProcessingOptions,
        _log: &mut LogRecord,
    ) -> Result<ProcessedInputs, String> {
        Ok(self.processed.clone())
    }
}

pub struct FakeDepsParser {
    pub verify_result: Result<bool, String>,
}

impl FakeDepsParser {
    pub fn verifies_ok() -> Self {
        FakeDepsParser {
            verify_result: Ok(true),
        }
    }

    pub fn mismatch() -> Self {
        FakeDepsParser {
            verify_result: Ok(false),
        }
    }
}

#[async_trait]
impl DepsParser for FakeDepsParser {
    async fn write_deps_file(&self, _path: &Path, _log: &mut LogRecord) -> Result<(), String> {
        Ok(())
    }

    async fn verify_deps_file(&self, _path: &Path, _log: &mut LogRecord) -> Result<bool, String> {
        self.verify_result.clone()
    }
}

/// Records every record it's handed so a test can assert on what was logged, instead of
/// shipping anywhere.
#[derive(Default)]
pub struct FakeLogger {
    pub records: Mutex<Vec<LogRecord>>,
}

impl FakeLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl Logger for FakeLogger {
    async fn log(&self, record: &LogRecord) -> Result<(), String> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// A `CommandDescriptor` with no outputs, for tests that don't care about staging.
pub fn bare_command() -> CommandDescriptor {
    CommandDescriptor::new("cc", vec!["cc".to_owned()], PathBuf::from("."), PathBuf::from("/exec/root"))
}

pub fn default_input_options(cmd: CommandDescriptor) -> InputProcessingOptions {
    InputProcessingOptions {
        cmd,
        labels: IndexMap::new(),
        toolchain_inputs: Vec::new(),
        working_dir: PathBuf::from("/exec/root"),
        strategy: ExecutionStrategy::Race,
        env: IndexMap::new(),
        windows_cross_compile: false,
    }
}
