// Copyright 2026 Build Acceleration Team.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The race coordinator: the central state machine that drives one of four
//! execution strategies for an action. The `race` strategy is the hard case -- it concurrently
//! drives a detached remote attempt and a gated local attempt, arbitrates the winner under
//! partial failure, and reconciles on-disk output state. Modeled on pants'
//! `remote_cache::speculate_read_action_cache`, which races a local execution future against a
//! remote cache read with `tokio::select!`, generalized to a full bidirectional race with a
//! local-start holdoff.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::action::{lifecycle, Action};
use crate::cancel::CancelScope;
use crate::command::{ActionFingerprint, CommandDescriptor};
use crate::config::{ExecutionStrategy, RaceConfig, RemoteExecutionOptions};
use crate::error::ProcessError;
use crate::external::{DepsParser, ExecutionContext, LocalPool, RemoteExecClient};
use crate::forecaster::Forecaster;
use crate::log_record::LogRecord;
use crate::metadata_cache::FileMetadataCache;
use crate::result::{CapturedOutput, ExecResult, OutputSink};
use crate::staging;

/// What the detached remote attempt decided. `Canceled` means "this side should not be treated
/// as a winner" -- either context creation failed, the remote result wasn't ok, or local had
/// already won by the time the download finished.
enum RemoteAttemptOutcome {
    Completed(ExecResult),
    Canceled(Option<ExecResult>),
}

type RemoteAttemptResult = (RemoteAttemptOutcome, LogRecord, Option<Arc<dyn ExecutionContext>>);
type LocalAttemptResult = (Option<i32>, Option<ProcessError>, LogRecord);

/// Drives one action to completion. Holds the collaborators the core consumes but does not
/// implement, plus the shared `num_fallbacks` counter threaded through every racing action.
pub struct RaceCoordinator {
    remote_client: Arc<dyn RemoteExecClient>,
    local_pool: Arc<dyn LocalPool>,
    forecaster: Arc<dyn Forecaster>,
    deps_parser: Option<Arc<dyn DepsParser>>,
    metadata_cache: Arc<dyn FileMetadataCache>,
    config: RaceConfig,
    num_fallbacks: AtomicU64,
}

impl RaceCoordinator {
    pub fn new(
        remote_client: Arc<dyn RemoteExecClient>,
        local_pool: Arc<dyn LocalPool>,
        forecaster: Arc<dyn Forecaster>,
        metadata_cache: Arc<dyn FileMetadataCache>,
        config: RaceConfig,
    ) -> Self {
        RaceCoordinator {
            remote_client,
            local_pool,
            forecaster,
            deps_parser: None,
            metadata_cache,
            config,
            num_fallbacks: AtomicU64::new(0),
        }
    }

    pub fn with_deps_parser(mut self, deps_parser: Arc<dyn DepsParser>) -> Self {
        self.deps_parser = Some(deps_parser);
        self
    }

    pub fn num_fallbacks(&self) -> u64 {
        self.num_fallbacks.load(Ordering::Relaxed)
    }

    /// Executes `action` using whichever strategy it's configured with, mutating its log
    /// record and `result` in place and returning the result plus whatever it captured.
    pub async fn execute(&self, parent: CancelScope, action: &mut Action) -> (ExecResult, CapturedOutput) {
        match action.strategy {
            ExecutionStrategy::RemoteOnly => self.run_remote_only(parent, action).await,
            ExecutionStrategy::LocalOnly => self.run_local_only(parent, action).await,
            ExecutionStrategy::LocalFallback => self.run_local_fallback(parent, action).await,
            ExecutionStrategy::Race => self.run_race(parent, action).await,
        }
    }

    /// Wires spec §4.3's local-result-caching step into every path that can hand back a local
    /// win with an ok result: refreshes the deps file, invalidates the metadata-cache entries
    /// for the action's outputs, and tells the execution context (if one exists) to adopt the
    /// local result as the cached one. Errors are logged, not propagated -- a caching failure
    /// must never turn an otherwise-successful local win into a failed action.
    async fn cache_after_local_win(&self, action: &mut Action) {
        let caching_disabled = action.remote_options.disable_local_result_caching;
        if let Err(e) = lifecycle::cache_local_result(
            action,
            self.deps_parser.as_deref(),
            self.metadata_cache.as_ref(),
            caching_disabled,
        )
        .await
        {
            tracing::warn!(error = %e, "failed to cache local result after local win");
        }
    }

    async fn run_local_only(&self, parent: CancelScope, action: &mut Action) -> (ExecResult, CapturedOutput) {
        let mut cmd = action.command.clone();
        if !action.local_options.wrapper_prefix.is_empty() {
            let mut wrapped = action.local_options.wrapper_prefix.clone();
            wrapped.append(&mut cmd.argv);
            cmd.argv = wrapped;
        }
        let (exit_code, err) = self
            .local_pool
            .run(
                parent.token(),
                CancellationToken::new(),
                &cmd,
                &action.labels,
                action.output_sink.clone(),
                &mut action.log,
            )
            .await;
        let result = to_local_result(exit_code, err);
        action.result = Some(result.clone());
        if result.is_ok() {
            self.cache_after_local_win(action).await;
        }
        (result, action.output_sink.captured())
    }

    async fn run_remote_only(&self, parent: CancelScope, action: &mut Action) -> (ExecResult, CapturedOutput) {
        let ctx = match self
            .remote_client
            .new_context(parent.token(), &action.command, &action.remote_options, action.output_sink.clone())
            .await
        {
            Ok(ctx) => ctx,
            Err(e) => {
                let result = ExecResult::from_remote_error(e);
                action.result = Some(result.clone());
                return (result, action.output_sink.captured());
            }
        };
        action.execution_context = Some(ctx.clone());

        let cached = ctx.get_cached_result().await.ok().flatten();
        let hit_valid = self.validate_hit(action, &cached).await;

        let result = if hit_valid {
            action.log.remote.cache_hit = true;
            cached.expect("hit_valid implies a cached result was present")
        } else {
            match ctx.execute_remotely().await {
                Ok(r) => r,
                Err(e) => ExecResult::from_remote_error(e),
            }
        };
        action.log.remote.result = Some(result.clone());

        if result.is_ok() {
            let working_dir = action.command.abs_working_dir();
            let download_outcome = if action.remote_options.exclude_unchanged_outputs {
                let nodes = ctx.get_flattened_outputs();
                let subset = staging::exclude_unchanged_outputs(&nodes, &working_dir).await;
                let paths: Vec<PathBuf> = subset.into_iter().map(|n| n.path).collect();
                ctx.download_specified_outputs(&paths, &working_dir).await
            } else {
                ctx.download_outputs(&working_dir).await
            };
            if let Err(e) = download_outcome {
                let result = ExecResult::from(e);
                action.result = Some(result.clone());
                return (result, action.output_sink.captured());
            }
        }

        action.result = Some(result.clone());
        (result, action.output_sink.captured())
    }

    async fn run_local_fallback(&self, parent: CancelScope, action: &mut Action) -> (ExecResult, CapturedOutput) {
        let ctx = self
            .remote_client
            .new_context(parent.token(), &action.command, &action.remote_options, action.output_sink.clone())
            .await;

        let remote_ok = match ctx {
            Ok(ctx) => {
                action.execution_context = Some(ctx.clone());
                let remote_result = match ctx.execute_remotely().await {
                    Ok(r) => r,
                    Err(e) => ExecResult::from_remote_error(e),
                };
                action.log.remote.result = Some(remote_result.clone());
                if remote_result.is_ok() {
                    let working_dir = action.command.abs_working_dir();
                    match ctx.download_outputs(&working_dir).await {
                        Ok(()) => Some(remote_result),
                        Err(_) => None,
                    }
                } else {
                    None
                }
            }
            Err(e) => {
                action.log.remote.result = Some(ExecResult::from_remote_error(e));
                None
            }
        };

        if let Some(result) = remote_ok {
            action.result = Some(result.clone());
            return (result, action.output_sink.captured());
        }

        let (exit_code, err) = self
            .local_pool
            .run(
                parent.token(),
                CancellationToken::new(),
                &action.command,
                &action.labels,
                action.output_sink.clone(),
                &mut action.log,
            )
            .await;
        action.log.local.num_fallbacks = self.num_fallbacks.fetch_add(1, Ordering::Relaxed) + 1;
        let result = to_local_result(exit_code, err);
        action.result = Some(result.clone());
        if result.is_ok() {
            self.cache_after_local_win(action).await;
        }
        (result, action.output_sink.captured())
    }

    async fn run_race(&self, parent: CancelScope, action: &mut Action) -> (ExecResult, CapturedOutput) {
        let working_dir = action.command.abs_working_dir();

        // Step 1: pre-exec snapshot.
        let snapshot = if action.remote_options.preserve_unchanged_mtime {
            staging::pre_exec_snapshot(&working_dir, &action.command.output_files, &action.command.output_dirs).await
        } else {
            Default::default()
        };

        // Step 2: scratch directory.
        let scratch_dir = self.config.racing_temp_root.join(action.command.exec_id.as_dir_name());
        if let Err(e) = tokio::fs::create_dir_all(&scratch_dir).await {
            let result = ExecResult::from_local_error(format!("creating racing scratch directory: {e}"));
            action.result = Some(result.clone());
            return (result, action.output_sink.captured());
        }
        let _cleanup = ScratchCleanupGuard(scratch_dir.clone());

        // Cancellation tokens: `local_cancel` stops the local attempt once remote has
        // tentatively won; `remote_watch_cancel` tells the (otherwise fully detached) remote
        // attempt that local has already won, so a successful download is moot.
        let local_cancel = CancellationToken::new();
        let remote_watch_cancel = CancellationToken::new();
        let (start_local_tx, start_local_rx) = oneshot::channel::<()>();

        // Step 3: remote attempt, detached from the sibling-cancel signal (so local winning
        // doesn't cut it short -- it keeps running to populate the cache) but still a *child* of
        // the parent scope: `remote_scope` below is derived from `parent.token()` via
        // `child_token()`, so parent cancellation still reaches it per spec §5, while the
        // sibling-only `remote_watch_cancel` continues to gate only the holdoff timer.
        let mut remote_handle = tokio::spawn(run_remote_attempt(
            self.remote_client.clone(),
            self.forecaster.clone(),
            self.deps_parser.clone(),
            action.command.clone(),
            action.remote_options.clone(),
            action.output_sink.clone(),
            scratch_dir.clone(),
            action.fingerprint.clone(),
            action.deps_file_path.clone(),
            action.racing_bias,
            self.config.clone(),
            start_local_tx,
            remote_watch_cancel.clone(),
            parent.token(),
        ));

        // Step 4: local attempt, gated by `start_local`.
        let local_pool = self.local_pool.clone();
        let cmd_for_local = action.command.clone();
        let labels_for_local = action.labels.clone();
        let local_output_sink = action.output_sink.clone();
        let parent_for_local = parent.token();
        let local_cancel_for_local = local_cancel.clone();
        let mut local_future: std::pin::Pin<Box<dyn std::future::Future<Output = LocalAttemptResult> + Send>> =
            Box::pin(async move {
                let mut start_local_rx = start_local_rx;
                tokio::select! {
                    _ = &mut start_local_rx => {}
                    _ = local_cancel_for_local.cancelled() => {
                        return (None, Some(ProcessError::interrupted("canceled before local-start holdoff elapsed")), LogRecord::new());
                    }
                }
                let mut log = LogRecord::new();
                let (exit_code, err) = local_pool
                    .run(
                        parent_for_local,
                        local_cancel_for_local,
                        &cmd_for_local,
                        &labels_for_local,
                        local_output_sink,
                        &mut log,
                    )
                    .await;
                (exit_code, err, log)
            });

        // Step 5: wait for the first of remote, local, or parent cancellation.
        enum Winner {
            ParentCanceled,
            Remote(Result<RemoteAttemptResult, tokio::task::JoinError>),
            Local(LocalAttemptResult),
        }
        let winner = tokio::select! {
            biased;
            _ = parent.cancelled() => Winner::ParentCanceled,
            r = &mut remote_handle => Winner::Remote(r),
            l = &mut local_future => Winner::Local(l),
        };

        match winner {
            Winner::ParentCanceled => {
                // `remote_scope` is a child of `parent.token()`, so the detached attempt already
                // observes this cancellation on its next suspension point; abort it outright so
                // it can't outlive the race even if it's blocked somewhere that doesn't poll the
                // token promptly.
                remote_handle.abort();
                let cause = parent
                    .cause()
                    .unwrap_or_else(|| "parent cancellation scope canceled during race".to_owned());
                let result = ExecResult::interrupted(cause);
                action.result = Some(result.clone());
                (result, action.output_sink.captured())
            }
            Winner::Remote(remote_join) => {
                let (outcome, remote_log, ctx) = remote_join.unwrap_or_else(|e| {
                    (
                        RemoteAttemptOutcome::Canceled(Some(ExecResult::from_local_error(format!(
                            "remote attempt task panicked: {e}"
                        )))),
                        LogRecord::new(),
                        None,
                    )
                });
                merge_remote_log(&mut action.log, &remote_log);
                if ctx.is_some() {
                    action.execution_context = ctx;
                }

                match outcome {
                    RemoteAttemptOutcome::Canceled(canceled_result) => {
                        // Remote bailed before deciding (e.g. context creation failed): don't
                        // cancel local, let it run to completion.
                        let (local_exit, local_err, local_log) = local_future.await;
                        action.log.local = local_log.local;
                        action.log.copy_event_times_from(&local_log);
                        self.finalize_after_remote_canceled(action, canceled_result, local_exit, local_err).await
                    }
                    RemoteAttemptOutcome::Completed(remote_result) => {
                        local_cancel.cancel();
                        let (local_exit, local_err, local_log) = local_future.await;
                        action.log.copy_event_times_from(&local_log);
                        action.log.local = local_log.local;
                        if action.log.local.executed_locally {
                            // Once local actually started, it wins regardless of its own
                            // outcome: its side effects are already on disk.
                            let result = to_local_result(local_exit, local_err);
                            action.result = Some(result.clone());
                            if result.is_ok() {
                                self.cache_after_local_win(action).await;
                            }
                            (result, action.output_sink.captured())
                        } else {
                            self.finalize_remote_win(action, remote_result, &scratch_dir, &snapshot).await
                        }
                    }
                }
            }
            Winner::Local((local_exit, local_err, local_log)) => {
                action.log.local = local_log.local.clone();
                action.log.copy_event_times_from(&local_log);
                match local_err {
                    None => {
                        // Local finished first: remote keeps running detached to populate the
                        // cache, but it's no longer a candidate winner.
                        remote_watch_cancel.cancel();
                        self.finalize_local_win(action, local_exit).await
                    }
                    Some(err) => {
                        // Local itself failed or was canceled before remote decided anything;
                        // remote is now the only source of truth.
                        let remote_join = remote_handle.await;
                        let (outcome, remote_log, ctx) = remote_join.unwrap_or_else(|e| {
                            (
                                RemoteAttemptOutcome::Canceled(Some(ExecResult::from_local_error(format!(
                                    "remote attempt task panicked: {e}"
                                )))),
                                LogRecord::new(),
                                None,
                            )
                        });
                        merge_remote_log(&mut action.log, &remote_log);
                        if ctx.is_some() {
                            action.execution_context = ctx;
                        }
                        match outcome {
                            RemoteAttemptOutcome::Completed(remote_result) => {
                                self.finalize_remote_win(action, remote_result, &scratch_dir, &snapshot).await
                            }
                            RemoteAttemptOutcome::Canceled(canceled_result) => {
                                let result = canceled_result.unwrap_or_else(|| ExecResult::from(err));
                                action.result = Some(result.clone());
                                (result, action.output_sink.captured())
                            }
                        }
                    }
                }
            }
        }
    }

    async fn finalize_after_remote_canceled(
        &self,
        action: &mut Action,
        canceled_result: Option<ExecResult>,
        local_exit: Option<i32>,
        local_err: Option<ProcessError>,
    ) -> (ExecResult, CapturedOutput) {
        let is_fallback_win = local_err.is_none();
        let result = match local_err {
            None => {
                action.log.local.num_fallbacks = self.num_fallbacks.fetch_add(1, Ordering::Relaxed) + 1;
                ExecResult::from_exit_code(local_exit.unwrap_or(-1))
            }
            Some(e) => canceled_result.unwrap_or_else(|| ExecResult::from(e)),
        };
        action.result = Some(result.clone());
        if is_fallback_win && result.is_ok() {
            self.cache_after_local_win(action).await;
        }
        (result, action.output_sink.captured())
    }

    async fn finalize_local_win(&self, action: &mut Action, local_exit: Option<i32>) -> (ExecResult, CapturedOutput) {
        let result = ExecResult::from_exit_code(local_exit.unwrap_or(-1));
        action.result = Some(result.clone());
        if result.is_ok() {
            self.cache_after_local_win(action).await;
        }
        (result, action.output_sink.captured())
    }

    async fn finalize_remote_win(
        &self,
        action: &mut Action,
        remote_result: ExecResult,
        scratch_dir: &std::path::Path,
        snapshot: &staging::PreExecSnapshot,
    ) -> (ExecResult, CapturedOutput) {
        let working_dir = action.command.abs_working_dir();
        if let Err(e) = staging::move_from_scratch(
            scratch_dir,
            &working_dir,
            &action.command.output_files,
            &action.command.output_dirs,
            self.metadata_cache.as_ref(),
        )
        .await
        {
            let result = ExecResult::from(e);
            action.result = Some(result.clone());
            return (result, action.output_sink.captured());
        }

        if action.remote_options.preserve_unchanged_mtime {
            if let Some(ctx) = action.execution_context.clone() {
                if let Ok(post_digests) = ctx.get_output_file_digests().await {
                    let post_digests: std::collections::HashMap<_, _> = post_digests.into_iter().collect();
                    staging::restore_mtimes(&working_dir, snapshot, &post_digests, self.metadata_cache.as_ref()).await;
                }
            }
        }

        action.log.remote.result = Some(remote_result.clone());
        action.result = Some(remote_result.clone());
        (remote_result, action.output_sink.captured())
    }

    async fn validate_hit(&self, action: &mut Action, cached: &Option<ExecResult>) -> bool {
        let Some(cached_result) = cached else {
            return false;
        };
        if !cached_result.is_ok() {
            return false;
        }
        let Some(deps_path) = action.deps_file_path.clone() else {
            return true;
        };
        let Some(parser) = &self.deps_parser else {
            return true;
        };
        matches!(parser.verify_deps_file(&deps_path, &mut action.log).await, Ok(true))
    }
}

fn to_local_result(exit_code: Option<i32>, err: Option<ProcessError>) -> ExecResult {
    match err {
        None => ExecResult::from_exit_code(exit_code.unwrap_or(-1)),
        Some(e) => ExecResult::from(e),
    }
}

fn merge_remote_log(dest: &mut LogRecord, src: &LogRecord) {
    dest.remote = src.remote.clone();
    dest.copy_event_times_from(src);
}

/// Removes the per-action scratch directory on drop. Scheduled to run asynchronously rather
/// than inline so a slow filesystem cleanup never delays returning the action's result; a
/// cleanup failure is logged and never surfaces to the caller.
struct ScratchCleanupGuard(PathBuf);

impl Drop for ScratchCleanupGuard {
    fn drop(&mut self) {
        let path = std::mem::take(&mut self.0);
        tokio::spawn(async move {
            if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to clean up racing scratch directory");
                }
            }
        });
    }
}

/// The detached remote attempt: creates the execution context, determines cache hit vs. miss,
/// and either downloads (hit) or executes (miss) accordingly. Decoupled from the *sibling*
/// cancellation scope (local winning doesn't cut it short, per spec §4.1 step 3), but still a
/// child of the parent scope -- see DESIGN.md's detached-scope note.
#[allow(clippy::too_many_arguments)]
async fn run_remote_attempt(
    remote_client: Arc<dyn RemoteExecClient>,
    forecaster: Arc<dyn Forecaster>,
    deps_parser: Option<Arc<dyn DepsParser>>,
    cmd: CommandDescriptor,
    opts: RemoteExecutionOptions,
    output_sink: OutputSink,
    scratch_dir: PathBuf,
    fingerprint: ActionFingerprint,
    deps_file_path: Option<PathBuf>,
    racing_bias: f64,
    config: RaceConfig,
    start_local_tx: oneshot::Sender<()>,
    remote_watch_cancel: CancellationToken,
    parent_token: CancellationToken,
) -> RemoteAttemptResult {
    let mut log = LogRecord::new();
    // A child of the parent scope: parent cancellation reaches this attempt (spec §5), but
    // canceling `remote_watch_cancel` (the sibling-only "local already won" signal) does not --
    // only the parent, or this attempt's own successful completion, ends it.
    let remote_scope = parent_token.child_token();

    let ctx = match remote_client.new_context(remote_scope, &cmd, &opts, output_sink).await {
        Ok(ctx) => ctx,
        Err(e) => {
            let _ = start_local_tx.send(());
            log.remote.result = Some(ExecResult::from_remote_error(&e));
            return (RemoteAttemptOutcome::Canceled(None), log, None);
        }
    };

    let cached = match ctx.get_cached_result().await {
        Ok(cached) => cached,
        Err(e) => {
            let _ = start_local_tx.send(());
            let result = ExecResult::from_remote_error(e);
            log.remote.result = Some(result.clone());
            return (RemoteAttemptOutcome::Canceled(Some(result)), log, Some(ctx));
        }
    };

    let is_hit = matches!(&cached, Some(r) if r.is_ok());
    let hit_is_valid = if is_hit {
        match (&deps_file_path, &deps_parser) {
            (Some(path), Some(parser)) => matches!(parser.verify_deps_file(path, &mut log).await, Ok(true)),
            _ => true,
        }
    } else {
        false
    };

    if !is_hit || !hit_is_valid {
        // Cache miss path (or an invalid shallow-mode hit, which is treated the same as a
        // miss): release local immediately and execute remotely.
        let _ = start_local_tx.send(());
        let exec_result = match ctx.execute_remotely().await {
            Ok(r) => r,
            Err(e) => ExecResult::from_remote_error(e),
        };
        log.remote.result = Some(exec_result.clone());
        if !exec_result.is_ok() {
            return (RemoteAttemptOutcome::Canceled(Some(exec_result)), log, Some(ctx));
        }
        return (RemoteAttemptOutcome::Completed(exec_result), log, Some(ctx));
    }

    // Cache hit path: hold `start_local` for an adaptive holdoff while downloading outputs.
    log.remote.cache_hit = true;
    log.remote.used_shallow_inputs = deps_file_path.is_some();

    let forecast = forecaster
        .percentile_download_latency(&fingerprint, 90)
        .await
        .unwrap_or(config.max_holdoff);
    let holdoff = config.holdoff_for_forecast(forecast, racing_bias);

    // The timer's only job is releasing `start_local` on schedule; it runs independently of
    // the download below rather than gating this function's return on it, so a fast download
    // doesn't have to sit around waiting out the rest of the holdoff before reporting its
    // outcome to the outer race. It's gated on the sibling-cancel scope so it never outlives
    // the race once a winner (local, here) is known.
    let timer_watch = remote_watch_cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(holdoff) => {}
            _ = timer_watch.cancelled() => {}
        }
        let _ = start_local_tx.send(());
    });

    let download_result = ctx.download_outputs(&scratch_dir).await;

    if remote_watch_cancel.is_cancelled() {
        // Local already won while we were downloading; the outputs are no longer needed.
        return (RemoteAttemptOutcome::Canceled(None), log, Some(ctx));
    }

    match download_result {
        Ok(()) => {
            let exec_result = cached.expect("is_hit implies cached is Some");
            log.remote.result = Some(exec_result.clone());
            (RemoteAttemptOutcome::Completed(exec_result), log, Some(ctx))
        }
        Err(e) => {
            let result = ExecResult::from(e);
            log.remote.result = Some(result.clone());
            (RemoteAttemptOutcome::Canceled(Some(result)), log, Some(ctx))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::command::{ActionFingerprint, CommandDescriptor};
    use crate::config::ExecutionStrategy;
    use crate::external::testing::{FakeExecutionContext, FakeLocalPool, FakeRemoteExecClient};
    use crate::forecaster::FixedForecaster;
    use crate::metadata_cache::InMemoryFileMetadataCache;
    use indexmap::IndexMap;
    use std::path::PathBuf;
    use std::time::Duration;

    /// Scenario tests race real timers against each other (under `start_paused`); turning on
    /// `tracing` output via `RUST_LOG` makes a hang or an unexpected winner much easier to
    /// diagnose than bisecting `tokio::select!` arms by hand. Safe to call from every test: only
    /// the first caller's subscriber wins, the rest are no-ops.
    fn init_test_tracing() {
        let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init();
    }

    fn coordinator(
        remote: FakeRemoteExecClient,
        local: FakeLocalPool,
        forecast_ms: u64,
        max_holdoff_ms: u64,
        racing_temp_root: PathBuf,
    ) -> RaceCoordinator {
        RaceCoordinator::new(
            Arc::new(remote),
            Arc::new(local),
            Arc::new(FixedForecaster(Duration::from_millis(forecast_ms))),
            Arc::new(InMemoryFileMetadataCache::new()),
            RaceConfig::new(racing_temp_root).with_max_holdoff(Duration::from_millis(max_holdoff_ms)),
        )
    }

    fn race_action(working_dir: &std::path::Path, racing_bias: f64) -> Action {
        let command = CommandDescriptor::new(
            "cc",
            vec!["cc".to_owned()],
            PathBuf::from("."),
            working_dir.to_path_buf(),
        );
        let mut action = Action::new(
            command,
            ActionFingerprint::new("digest", IndexMap::new()),
            ExecutionStrategy::Race,
        );
        action.racing_bias = racing_bias;
        action
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_1_cache_hit_fast_download_remote_wins() {
        init_test_tracing();
        let exec_root = tempfile::tempdir().unwrap();
        let temp_root = tempfile::tempdir().unwrap();
        let remote = FakeRemoteExecClient::ready(FakeExecutionContext::cache_hit(
            Duration::from_millis(1),
            Duration::from_millis(10),
        ));
        let local = FakeLocalPool::instant_success(0);
        let coordinator = coordinator(remote, local, 100, 1000, temp_root.path().to_path_buf());

        let mut action = race_action(exec_root.path(), 0.5);
        let (result, _) = coordinator.execute(CancelScope::new(), &mut action).await;

        assert!(result.is_ok());
        assert_eq!(coordinator.num_fallbacks(), 0);
        assert!(action.log.remote.cache_hit);
        // Download (10ms) finishes well inside the 100ms local-start holdoff, so local is
        // never released at all.
        assert!(!action.log.local.executed_locally, "remote should win, local should never start");
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_2_cache_miss_remote_finishes_first() {
        init_test_tracing();
        let exec_root = tempfile::tempdir().unwrap();
        let temp_root = tempfile::tempdir().unwrap();
        let remote = FakeRemoteExecClient::ready(FakeExecutionContext::cache_miss(
            Duration::from_millis(1),
            Duration::from_millis(400),
            Ok(ExecResult::from_exit_code(0)),
        ));
        // Cache miss releases `start_local` at t=1ms, but local's own queued window (5s) is
        // far longer than remote's 400ms execution, so local must still be waiting to start
        // (not executing) when remote wins and cancels it.
        let local = FakeLocalPool::new(Duration::from_secs(5), Duration::from_secs(5), Ok(0));
        let coordinator = coordinator(remote, local, 100, 1000, temp_root.path().to_path_buf());

        let mut action = race_action(exec_root.path(), 0.5);
        let (result, _) = coordinator.execute(CancelScope::new(), &mut action).await;

        assert!(result.is_ok());
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(coordinator.num_fallbacks(), 0);
        assert!(
            !action.log.local.executed_locally,
            "local must be canceled before it starts, not promoted over remote"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_3_cache_miss_local_finishes_first() {
        let exec_root = tempfile::tempdir().unwrap();
        let temp_root = tempfile::tempdir().unwrap();
        let remote = FakeRemoteExecClient::ready(FakeExecutionContext::cache_miss(
            Duration::from_millis(1),
            Duration::from_secs(5),
            Ok(ExecResult::from_exit_code(0)),
        ));
        let local = FakeLocalPool::new(Duration::ZERO, Duration::from_millis(200), Ok(0));
        let coordinator = coordinator(remote, local, 100, 1000, temp_root.path().to_path_buf());

        let mut action = race_action(exec_root.path(), 0.5);
        let (result, _) = coordinator.execute(CancelScope::new(), &mut action).await;

        assert!(result.is_ok());
        assert!(action.log.local.executed_locally);
        assert_eq!(coordinator.num_fallbacks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_4_remote_context_creation_fails_local_wins_and_counts_a_fallback() {
        let exec_root = tempfile::tempdir().unwrap();
        let temp_root = tempfile::tempdir().unwrap();
        let remote = FakeRemoteExecClient::creation_fails("backend unavailable");
        let local = FakeLocalPool::instant_success(0);
        let coordinator = coordinator(remote, local, 100, 1000, temp_root.path().to_path_buf());

        let mut action = race_action(exec_root.path(), 0.5);
        let (result, _) = coordinator.execute(CancelScope::new(), &mut action).await;

        assert!(result.is_ok());
        assert_eq!(coordinator.num_fallbacks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_5_preserve_unchanged_mtime_is_a_noop_when_nothing_changed() {
        // The fake execution context doesn't materialize bytes on disk, so this exercises the
        // `preserve_unchanged_mtime` wiring (an empty pre-exec snapshot, a successful
        // `get_output_file_digests` call, and a no-op `restore_mtimes` pass) rather than the
        // byte-for-byte mtime comparison, which `staging::tests::restore_mtimes_only_touches_digest_equal_outputs`
        // already covers directly.
        let exec_root = tempfile::tempdir().unwrap();
        let temp_root = tempfile::tempdir().unwrap();

        let digest = crate::digest::ContentDigest::from_bytes(b"unchanged");
        let ctx = FakeExecutionContext {
            output_file_digests: Ok(IndexMap::from([(PathBuf::from("same.o"), digest)])),
            ..FakeExecutionContext::cache_hit(Duration::from_millis(1), Duration::from_millis(1))
        };
        let remote = FakeRemoteExecClient::ready(ctx);
        let local = FakeLocalPool::new(Duration::from_secs(5), Duration::ZERO, Ok(0));
        let coordinator = coordinator(remote, local, 1, 10, temp_root.path().to_path_buf());

        let mut action = race_action(exec_root.path(), 0.5);
        action.remote_options.preserve_unchanged_mtime = true;

        let (result, _) = coordinator.execute(CancelScope::new(), &mut action).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_during_race_carries_the_cause() {
        init_test_tracing();
        let exec_root = tempfile::tempdir().unwrap();
        let temp_root = tempfile::tempdir().unwrap();
        let remote = FakeRemoteExecClient::ready(FakeExecutionContext::cache_miss(
            Duration::from_millis(1),
            Duration::from_secs(5),
            Ok(ExecResult::from_exit_code(0)),
        ));
        let local = FakeLocalPool::new(Duration::from_secs(5), Duration::from_secs(5), Ok(0));
        let coordinator = coordinator(remote, local, 100, 1000, temp_root.path().to_path_buf());

        let mut action = race_action(exec_root.path(), 0.5);
        let parent = CancelScope::new();
        parent.cancel("build canceled by user");

        let (result, _) = coordinator.execute(parent, &mut action).await;

        assert_eq!(result.status, crate::result::Status::Interrupted);
        assert_eq!(result.err.as_deref(), Some("build canceled by user"));
    }
}
