// Copyright 2026 Build Acceleration Team.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The per-action structured record an `Action` mutates as it executes and an external
//! `Logger` sink (see `crate::external::Logger`) reads once execution completes.

use std::time::SystemTime;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::result::ExecResult;

/// Bookkeeping specific to a local execution attempt.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LocalMetadata {
    /// True once a local process has actually begun executing (not merely queued). This is
    /// the flag the race coordinator's "once local starts, local wins" rule keys off of.
    pub executed_locally: bool,
    pub exit_code: Option<i32>,
    pub num_fallbacks: u64,
}

/// Bookkeeping specific to a remote execution attempt.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RemoteMetadata {
    pub cache_hit: bool,
    pub used_shallow_inputs: bool,
    pub result: Option<ExecResult>,
    pub event_times: IndexMap<String, SystemTime>,
}

/// Structured record of one action's execution, mutated in place by `Action`/`RaceCoordinator`
/// and handed to `Logger::log` at completion. Serializable to JSON so an external sink can
/// ship it wherever it likes -- this stands in for the protobuf conversion helpers an external
/// logger sink would otherwise need, since protobuf message definitions are out of scope here.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LogRecord {
    pub event_times: IndexMap<String, SystemTime>,
    pub local: LocalMetadata,
    pub remote: RemoteMetadata,
    pub used_cache: bool,
}

impl LogRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event_time(&mut self, event: impl Into<String>, from: SystemTime) {
        self.event_times.insert(event.into(), from);
    }

    pub fn copy_event_times_from(&mut self, other: &LogRecord) {
        for (event, time) in &other.event_times {
            self.event_times.insert(event.clone(), *time);
        }
    }

    /// Renders this record as JSON, standing in for the protobuf conversion helper an external
    /// `Logger` sink would otherwise call (see `crate::external::Logger`; protobuf message
    /// definitions are out of scope for this crate).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_event_time_is_idempotent_per_event_name() {
        let mut log = LogRecord::new();
        let t0 = SystemTime::UNIX_EPOCH;
        let t1 = t0 + std::time::Duration::from_secs(1);
        log.record_event_time("start", t0);
        log.record_event_time("start", t1);
        assert_eq!(log.event_times.get("start"), Some(&t1));
    }

    #[test]
    fn copy_event_times_merges_without_clearing_existing() {
        let mut a = LogRecord::new();
        a.record_event_time("a", SystemTime::UNIX_EPOCH);
        let mut b = LogRecord::new();
        b.record_event_time("b", SystemTime::UNIX_EPOCH);
        a.copy_event_times_from(&b);
        assert!(a.event_times.contains_key("a"));
        assert!(a.event_times.contains_key("b"));
    }

    #[test]
    fn duplicated_records_are_independent() {
        let mut a = LogRecord::new();
        let mut b = a.clone();
        b.record_event_time("only_b", SystemTime::UNIX_EPOCH);
        assert!(!a.event_times.contains_key("only_b"));
    }

    #[test]
    fn json_round_trips() {
        let mut record = LogRecord::new();
        record.local.executed_locally = true;
        record.remote.cache_hit = true;
        let json = record.to_json().unwrap();
        let back = LogRecord::from_json(&json).unwrap();
        assert!(back.local.executed_locally);
        assert!(back.remote.cache_hit);
    }
}
