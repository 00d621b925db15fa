// Copyright 2026 Build Acceleration Team.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Depth counting and canonicalization of working directories for remote execution.
//!
//! Remote workers resolve relative paths inside a command the same way the local host does,
//! so the working directory we hand them has to have the same number of path segments as the
//! caller's local working directory, even though the names of those segments are meaningless
//! on the remote side.

const SET_BY_RECLIENT: &str = "set_by_reclient";
const FILLER_SEGMENT: &str = "a";

/// Number of path segments in `path`. Both `/` and `\` count as separators regardless of host
/// OS, since paths may arrive in either form when cross-compiling for Windows from a POSIX
/// host (see `crate::command`).
pub fn depth(path: &str) -> usize {
    if path.is_empty() {
        return 0;
    }
    1 + path.chars().filter(|&c| c == '/' || c == '\\').count()
}

/// A canonical remote working directory of the same segment depth as `dir`. Empty and `.`
/// inputs pass through unchanged. The result always uses the host's native path separator.
pub fn to_remote_working_dir(dir: &str) -> String {
    if dir.is_empty() || dir == "." {
        return dir.to_owned();
    }

    let depth = depth(dir);
    let mut segments = Vec::with_capacity(depth);
    segments.push(SET_BY_RECLIENT);
    for _ in 1..depth {
        segments.push(FILLER_SEGMENT);
    }
    segments.join(&std::path::MAIN_SEPARATOR.to_string())
}
