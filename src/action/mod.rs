// Copyright 2026 Build Acceleration Team.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `Action`: the unit of work the race coordinator executes, plus its lifecycle operations
//! (input processing, cached-result validation, local-result caching, compare-mode
//! duplication).

pub mod lifecycle;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;

use crate::command::{ActionFingerprint, CommandDescriptor};
use crate::config::{ExecutionStrategy, LocalExecutionOptions, RemoteExecutionOptions};
use crate::external::{ExecutionContext, InputSpec};
use crate::log_record::LogRecord;
use crate::result::{ExecResult, OutputSink};

/// The unit of work driven by `crate::race::RaceCoordinator`. Plain data plus lifecycle
/// operations in `crate::action::lifecycle` -- collaborators (remote client, local pool, input
/// processor, deps parser) are passed in by the caller at each operation rather than stored
/// here, the same way pants' `Process` value never holds a reference to the `CommandRunner`
/// that will execute it.
#[derive(Clone)]
pub struct Action {
    pub command: CommandDescriptor,
    pub fingerprint: ActionFingerprint,
    pub labels: IndexMap<String, String>,
    pub toolchain_inputs: Vec<PathBuf>,
    pub remote_options: RemoteExecutionOptions,
    pub local_options: LocalExecutionOptions,
    pub strategy: ExecutionStrategy,
    pub compare_mode: bool,
    pub num_local_reruns: u32,
    pub num_remote_reruns: u32,
    pub reclient_timeout: Duration,
    /// Scalar in `[0, 1]`; see `RaceConfig::holdoff_for_forecast`.
    pub racing_bias: f64,
    pub output_sink: OutputSink,
    pub log: LogRecord,

    /// Replaced wholesale by `lifecycle::process_inputs` once the input processor runs.
    pub input_spec: InputSpec,
    /// Set when the input processor used shallow mode; the `.deps` side file lives here once
    /// written.
    pub deps_file_path: Option<PathBuf>,
    pub result: Option<ExecResult>,
    /// Set once per action by `crate::race::RaceCoordinator` when it creates a remote
    /// execution context; reused across cache lookup, execution, download, and cache update.
    pub execution_context: Option<Arc<dyn ExecutionContext>>,
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("command", &self.command)
            .field("fingerprint", &self.fingerprint)
            .field("strategy", &self.strategy)
            .field("compare_mode", &self.compare_mode)
            .field("racing_bias", &self.racing_bias)
            .field("result", &self.result)
            .field("has_execution_context", &self.execution_context.is_some())
            .finish()
    }
}

impl Action {
    pub fn new(command: CommandDescriptor, fingerprint: ActionFingerprint, strategy: ExecutionStrategy) -> Self {
        let labels = fingerprint.labels.clone();
        Action {
            command,
            fingerprint,
            labels,
            toolchain_inputs: Vec::new(),
            remote_options: RemoteExecutionOptions::default(),
            local_options: LocalExecutionOptions::default(),
            strategy,
            compare_mode: false,
            num_local_reruns: 0,
            num_remote_reruns: 0,
            reclient_timeout: Duration::from_secs(600),
            racing_bias: 0.5,
            output_sink: OutputSink::new(),
            log: LogRecord::new(),
            input_spec: InputSpec::default(),
            deps_file_path: None,
            result: None,
            execution_context: None,
        }
    }

    pub fn action_digest(&self) -> &str {
        &self.fingerprint.digest
    }

    /// compare-mode duplication: `num_local_reruns + num_remote_reruns + 1`
    /// independent actions, each a deep copy of the command, fingerprint, and option sets, with
    /// a fresh log record and output sink. Each duplicate's command gets a freshly generated
    /// `ExecutionId`: reusing the original would have every duplicate racing for the same
    /// scratch directory.
    ///
    /// The first `num_local_reruns` duplicates are forced to `LocalOnly` and the next
    /// `num_remote_reruns` to `RemoteOnly`; the naming only means something if a local rerun
    /// actually measures local determinism and a remote rerun actually measures remote
    /// determinism, rather than every duplicate just racing again. The trailing `+ 1` duplicate
    /// keeps the original strategy, since it's the baseline run the reruns are being compared
    /// against.
    pub fn duplicate(&self) -> Vec<Action> {
        let local_count = self.num_local_reruns;
        let remote_count = self.num_remote_reruns;
        let count = local_count + remote_count + 1;
        (0..count)
            .map(|i| {
                let strategy = if i < local_count {
                    ExecutionStrategy::LocalOnly
                } else if i < local_count + remote_count {
                    ExecutionStrategy::RemoteOnly
                } else {
                    self.strategy
                };
                let mut command = self.command.clone();
                command.exec_id = crate::command::ExecutionId::new();
                Action {
                    command,
                    fingerprint: self.fingerprint.clone(),
                    labels: self.labels.clone(),
                    toolchain_inputs: self.toolchain_inputs.clone(),
                    remote_options: self.remote_options.clone(),
                    local_options: self.local_options.clone(),
                    strategy,
                    compare_mode: self.compare_mode,
                    num_local_reruns: self.num_local_reruns,
                    num_remote_reruns: self.num_remote_reruns,
                    reclient_timeout: self.reclient_timeout,
                    racing_bias: self.racing_bias,
                    output_sink: OutputSink::new(),
                    log: LogRecord::new(),
                    input_spec: self.input_spec.clone(),
                    deps_file_path: self.deps_file_path.clone(),
                    result: None,
                    execution_context: None,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn action() -> Action {
        let command = CommandDescriptor::new(
            "cc",
            vec!["cc".to_owned()],
            PathBuf::from("."),
            PathBuf::from("/exec/root"),
        );
        Action::new(command, ActionFingerprint::new("abc123", IndexMap::new()), ExecutionStrategy::Race)
    }

    #[test]
    fn duplicate_count_matches_rerun_sum_plus_one() {
        let mut a = action();
        a.num_local_reruns = 1;
        a.num_remote_reruns = 1;
        assert_eq!(a.duplicate().len(), 3);
    }

    #[test]
    fn duplicates_are_mutually_independent() {
        let mut a = action();
        a.num_local_reruns = 1;
        let mut dups = a.duplicate();
        dups[0].log.record_event_time("only_first", std::time::SystemTime::UNIX_EPOCH);
        dups[0].command.argv.push("-O2".to_owned());
        assert!(dups[1].log.event_times.is_empty());
        assert_eq!(dups[1].command.argv.len(), 1);
    }

    #[test]
    fn duplicates_get_distinct_execution_ids() {
        let a = action();
        let dups = a.duplicate();
        assert_ne!(dups[0].command.exec_id, a.command.exec_id);
    }

    #[test]
    fn duplicates_force_local_and_remote_strategies_for_their_reruns() {
        let mut a = action();
        a.num_local_reruns = 1;
        a.num_remote_reruns = 1;
        let dups = a.duplicate();
        assert_eq!(dups.len(), 3, "1 local rerun + 1 remote rerun + the original run");
        assert_eq!(dups[0].strategy, ExecutionStrategy::LocalOnly);
        assert_eq!(dups[1].strategy, ExecutionStrategy::RemoteOnly);
        assert_eq!(dups[2].strategy, ExecutionStrategy::Race, "the baseline run keeps the original strategy");
    }
}
