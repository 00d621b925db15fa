// Copyright 2026 Build Acceleration Team.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The immutable description of a command to run, and the small pieces of bookkeeping state
//! tied to a single action.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use uuid::Uuid;

use crate::path_utils;

/// Free-form tags plus the action's digest, used to key the latency forecaster and to group
/// metrics. Distinct from `ExecutionId`: many actions (e.g. every invocation of the same
/// compiler flags on different files) share a fingerprint but each gets its own execution id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionFingerprint {
    pub digest: String,
    pub labels: IndexMap<String, String>,
}

impl ActionFingerprint {
    pub fn new(digest: impl Into<String>, labels: IndexMap<String, String>) -> Self {
        ActionFingerprint {
            digest: digest.into(),
            labels,
        }
    }

    /// A canonical string uniquely identifying this fingerprint's label set, used as the
    /// forecaster's histogram bucket key. Does not include the digest: we want latency
    /// history to be shared across actions with the same shape (e.g. "compile-cc") even
    /// though each has a distinct content digest.
    pub fn key(&self) -> String {
        if self.labels.is_empty() {
            return self.digest.clone();
        }
        self.labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Uniquely identifies one execution attempt of an action. Used to name its scratch directory
/// (see `crate::staging`) and as a key into the file-metadata cache's staged-output lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        ExecutionId(Uuid::new_v4())
    }

    pub fn as_dir_name(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable description of what to run. Cloning a `CommandDescriptor` deep-copies every
/// owned field (`Vec`/`BTreeMap`/`PathBuf` clones duplicate their backing storage in Rust,
/// unlike a field-by-field struct copy in a language with slice-backed reference semantics),
/// which is exactly the property `crate::action::lifecycle::duplicate` relies on to avoid
/// mutation of one rerun bleeding into another. See DESIGN.md for the corresponding Go
/// shallow-copy hazard this sidesteps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub executable: String,
    pub argv: Vec<String>,
    /// Caller-provided, relative to `exec_root`.
    pub local_working_dir: PathBuf,
    pub exec_root: PathBuf,
    pub env: BTreeMap<String, String>,
    pub output_files: IndexSet<PathBuf>,
    pub output_dirs: IndexSet<PathBuf>,
    pub exec_id: ExecutionId,
}

impl CommandDescriptor {
    pub fn new(
        executable: impl Into<String>,
        argv: Vec<String>,
        local_working_dir: PathBuf,
        exec_root: PathBuf,
    ) -> Self {
        CommandDescriptor {
            executable: executable.into(),
            argv,
            local_working_dir,
            exec_root,
            env: BTreeMap::new(),
            output_files: IndexSet::new(),
            output_dirs: IndexSet::new(),
            exec_id: ExecutionId::new(),
        }
    }

    /// Absolute path to the working directory on the local host.
    pub fn abs_working_dir(&self) -> PathBuf {
        self.exec_root.join(&self.local_working_dir)
    }

    /// The canonical remote working directory of the same segment depth as
    /// `local_working_dir`, per `crate::path_utils`.
    pub fn remote_working_dir(&self) -> String {
        path_utils::to_remote_working_dir(&self.local_working_dir.to_string_lossy())
    }

    /// Deduplicate declared outputs and re-express them relative to `working_dir`. On
    /// cross-compilation to Windows from a POSIX host, rewrite them to use forward slashes.
    pub fn normalize_outputs(&mut self, working_dir: &Path, windows_cross_compile: bool) {
        self.output_files = renormalize(&self.output_files, working_dir, windows_cross_compile);
        self.output_dirs = renormalize(&self.output_dirs, working_dir, windows_cross_compile);
    }

    pub fn merge_outputs(&mut self, files: impl IntoIterator<Item = PathBuf>, dirs: impl IntoIterator<Item = PathBuf>) {
        self.output_files.extend(files);
        self.output_dirs.extend(dirs);
    }
}

fn renormalize(
    paths: &IndexSet<PathBuf>,
    working_dir: &Path,
    windows_cross_compile: bool,
) -> IndexSet<PathBuf> {
    let mut out = IndexSet::new();
    for path in paths {
        let rel = path.strip_prefix(working_dir).unwrap_or(path).to_path_buf();
        let rel = if windows_cross_compile {
            PathBuf::from(rel.to_string_lossy().replace('\\', "/"))
        } else {
            rel
        };
        out.insert(rel);
    }
    out
}
