// Copyright 2026 Build Acceleration Team.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Configuration types the race coordinator is parameterized by. Loading these from flags or
//! a config file is out of scope -- only the types a caller constructs and
//! hands to `Action`/`RaceCoordinator` are specified here, mirroring how buck2's
//! `buck2_common::executor_config::{Executor, RemoteEnabledExecutor, HybridExecutionLevel}`
//! separates "what strategy" from "how is the strategy chosen".

use std::path::PathBuf;
use std::time::Duration;

/// Which of the four strategies an action should use. Maps directly
/// onto buck2's `HybridExecutionLevel`: `RemoteOnly`/`LocalOnly` are `Executor::Local` /
/// `RemoteEnabled` with no local fallback, `LocalFallback` is `Hybrid::Fallback`, `Race` is
/// `Hybrid::Full`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionStrategy {
    RemoteOnly,
    LocalOnly,
    LocalFallback,
    Race,
}

#[derive(Clone, Debug)]
pub struct RemoteExecutionOptions {
    /// Restore the mtime of any output whose post-exec digest matches its pre-exec digest,
    /// instead of leaving it at the time the remote output was moved in.
    pub preserve_unchanged_mtime: bool,
    /// On the non-race remote path, skip downloading outputs whose digest already matches
    /// what's on disk (see `crate::staging::exclude_unchanged_outputs`).
    pub exclude_unchanged_outputs: bool,
    pub reclient_timeout: Duration,
    /// Skips `crate::action::lifecycle::cache_local_result` entirely after a local win, even
    /// when the result is ok. Off by default: §4.3 caching only needs disabling when a caller
    /// doesn't trust the remote cache to stay consistent with local-only output.
    pub disable_local_result_caching: bool,
}

impl Default for RemoteExecutionOptions {
    fn default() -> Self {
        RemoteExecutionOptions {
            preserve_unchanged_mtime: false,
            exclude_unchanged_outputs: false,
            reclient_timeout: Duration::from_secs(600),
            disable_local_result_caching: false,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LocalExecutionOptions {
    /// Prepended to argv for local-only and local-fallback execution, e.g. a sandboxing or
    /// resource-limiting wrapper.
    pub wrapper_prefix: Vec<String>,
}

/// Tunables for the race strategy shared across actions. The racing bias itself lives on each
/// `Action` (since different action kinds may
/// want different speed/bandwidth tradeoffs), so it's threaded into `holdoff_for_forecast` as
/// an argument rather than stored here.
#[derive(Clone, Debug)]
pub struct RaceConfig {
    /// Upper bound on the local-start holdoff, and the value used when the forecaster has no
    /// data for an action's fingerprint.
    pub max_holdoff: Duration,
    /// Root directory under which each racing action gets a scratch directory named by its
    /// execution id.
    pub racing_temp_root: PathBuf,
}

impl RaceConfig {
    pub fn new(racing_temp_root: PathBuf) -> Self {
        RaceConfig {
            max_holdoff: Duration::from_secs(1),
            racing_temp_root,
        }
    }

    pub fn with_max_holdoff(mut self, max_holdoff: Duration) -> Self {
        self.max_holdoff = max_holdoff;
        self
    }

    /// `forecast * 2 * racing_bias`, clamped to `max_holdoff`. At `racing_bias = 0.5` this is
    /// exactly `forecast`; at `0` it's zero; at `1` it's `2 * forecast`. `racing_bias` is
    /// clamped into `[0, 1]` so a caller-provided out-of-range value degrades gracefully
    /// instead of panicking or producing a negative duration.
    pub fn holdoff_for_forecast(&self, forecast: Duration, racing_bias: f64) -> Duration {
        let scaled = forecast.mul_f64(2.0 * racing_bias.clamp(0.0, 1.0));
        scaled.min(self.max_holdoff)
    }
}
