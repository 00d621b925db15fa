// Copyright 2026 Build Acceleration Team.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Output reconciliation: snapshotting declared outputs before execution,
//! moving a remote winner's staged outputs into the execution root, restoring mtimes of
//! outputs that didn't actually change, and filtering already-up-to-date outputs out of a
//! non-race remote download.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use futures::future::BoxFuture;
use indexmap::IndexSet;

use crate::digest::ContentDigest;
use crate::error::ProcessError;
use crate::external::RemoteOutputNode;
use crate::metadata_cache::{FileMetadata, FileMetadataCache};

/// Digests and mtimes of every declared output that exists on disk before execution begins,
/// keyed by path relative to the working directory. Held locally by the caller rather than in
/// the shared `FileMetadataCache`, since it's a point-in-time snapshot for this one action, not
/// reusable state.
pub type PreExecSnapshot = HashMap<PathBuf, FileMetadata>;

/// Walk `output_files` and `output_dirs` (recursively) under `working_dir`, recording the
/// digest and mtime of whatever already exists. Non-existent outputs are silently skipped, and
/// errors encountered walking a declared output directory are logged and skipped rather than
/// failing the action.
pub async fn pre_exec_snapshot(
    working_dir: &Path,
    output_files: &IndexSet<PathBuf>,
    output_dirs: &IndexSet<PathBuf>,
) -> PreExecSnapshot {
    let mut snapshot = HashMap::new();
    for rel in output_files {
        let abs = working_dir.join(rel);
        if let Some(md) = stat_one(&abs).await {
            snapshot.insert(rel.clone(), md);
        }
    }
    for rel in output_dirs {
        let abs = working_dir.join(rel);
        walk_into_snapshot(&abs, rel, &mut snapshot).await;
    }
    snapshot
}

async fn stat_one(abs: &Path) -> Option<FileMetadata> {
    let digest = ContentDigest::of_file(abs).await.ok()?;
    let meta = tokio::fs::metadata(abs).await.ok()?;
    let mtime = meta.modified().ok()?;
    Some(FileMetadata::file(digest, mtime))
}

fn walk_into_snapshot<'a>(
    abs_dir: &'a Path,
    rel_dir: &'a Path,
    snapshot: &'a mut PreExecSnapshot,
) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        let mut entries = match tokio::fs::read_dir(abs_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %abs_dir.display(), error = %e, "skipping unreadable output directory during pre-exec snapshot");
                return;
            }
        };
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(dir = %abs_dir.display(), error = %e, "aborting walk of output directory during pre-exec snapshot");
                    break;
                }
            };
            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "skipping entry with unreadable file type");
                    continue;
                }
            };
            let rel_child = rel_dir.join(entry.file_name());
            if file_type.is_dir() {
                walk_into_snapshot(&entry.path(), &rel_child, snapshot).await;
            } else if file_type.is_file() {
                if let Some(md) = stat_one(&entry.path()).await {
                    snapshot.insert(rel_child, md);
                }
            }
        }
    })
}

/// Move a remote winner's staged outputs from `scratch_dir` into `working_dir`, files before
/// directories. Rename failures are fatal; everything else (a missing or errored staging entry)
/// is logged and skipped.
pub async fn move_from_scratch(
    scratch_dir: &Path,
    working_dir: &Path,
    output_files: &IndexSet<PathBuf>,
    output_dirs: &IndexSet<PathBuf>,
    cache: &dyn FileMetadataCache,
) -> Result<(), ProcessError> {
    let mut created_parents: HashSet<PathBuf> = HashSet::new();

    for rel in output_files {
        let staged = scratch_dir.join(rel);
        if let Some(md) = cache.get(&staged).await {
            if let Some(err) = &md.err {
                tracing::warn!(path = %rel.display(), error = %err, "skipping output file with recorded staging error");
                continue;
            }
        }
        let dest = working_dir.join(rel);
        ensure_parent(&dest, &mut created_parents).await?;
        tokio::fs::rename(&staged, &dest).await.map_err(|e| {
            ProcessError::local(format!(
                "renaming staged output {} to {}: {e}",
                staged.display(),
                dest.display()
            ))
        })?;
    }

    for rel in output_dirs {
        let staged = scratch_dir.join(rel);
        let is_staged_dir = matches!(cache.get(&staged).await, Some(md) if md.is_directory);
        if !is_staged_dir {
            tracing::debug!(path = %rel.display(), "no staged directory recorded, skipping");
            continue;
        }
        let dest = working_dir.join(rel);
        if tokio::fs::metadata(&dest).await.is_ok() {
            if let Err(e) = tokio::fs::remove_dir_all(&dest).await {
                tracing::warn!(path = %dest.display(), error = %e, "failed to remove stale output directory before replacing it");
            }
        }
        ensure_parent(&dest, &mut created_parents).await?;
        tokio::fs::rename(&staged, &dest).await.map_err(|e| {
            ProcessError::local(format!(
                "renaming staged output directory {} to {}: {e}",
                staged.display(),
                dest.display()
            ))
        })?;
    }

    Ok(())
}

async fn ensure_parent(dest: &Path, created: &mut HashSet<PathBuf>) -> Result<(), ProcessError> {
    let Some(parent) = dest.parent() else {
        return Ok(());
    };
    if created.insert(parent.to_path_buf()) {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            ProcessError::local(format!("creating output parent {}: {e}", parent.display()))
        })?;
    }
    Ok(())
}

/// After a remote win with preserve-unchanged-mtime enabled, restore the original mtime of
/// every output whose post-exec digest matches its pre-exec digest. A failure restoring any one
/// output is logged and does not fail the action.
pub async fn restore_mtimes(
    working_dir: &Path,
    snapshot: &PreExecSnapshot,
    post_exec_digests: &std::collections::HashMap<PathBuf, ContentDigest>,
    cache: &dyn FileMetadataCache,
) {
    for (rel, pre) in snapshot {
        let (Some(pre_digest), Some(pre_mtime)) = (pre.digest, pre.mtime) else {
            continue;
        };
        let Some(post_digest) = post_exec_digests.get(rel) else {
            continue;
        };
        if *post_digest != pre_digest {
            continue;
        }
        let abs = working_dir.join(rel);
        let target = FileTime::from_system_time(pre_mtime);
        let abs_for_blocking = abs.clone();
        let result = tokio::task::spawn_blocking(move || filetime::set_file_mtime(&abs_for_blocking, target))
            .await
            .unwrap_or_else(|e| Err(std::io::Error::other(e)));
        match result {
            Ok(()) => {
                cache
                    .update(&abs, FileMetadata::file(pre_digest, pre_mtime))
                    .await;
            }
            Err(e) => {
                tracing::warn!(path = %rel.display(), error = %e, "failed to restore mtime of unchanged output");
            }
        }
    }
}

/// For the non-race remote path: given the remote's flattened output tree and the local
/// destination root, return only the nodes actually worth downloading -- missing locally, or
/// present but digest-mismatched. A digest-computation failure on the existing local file
/// results in inclusion, since we can't prove the file is already correct.
pub async fn exclude_unchanged_outputs(
    nodes: &[RemoteOutputNode],
    local_root: &Path,
) -> Vec<RemoteOutputNode> {
    let mut to_download = Vec::with_capacity(nodes.len());
    for node in nodes {
        let dest = local_root.join(&node.path);
        if tokio::fs::metadata(&dest).await.is_err() {
            to_download.push(node.clone());
            continue;
        }
        match ContentDigest::of_file(&dest).await {
            Ok(digest) if digest == node.digest => {}
            _ => to_download.push(node.clone()),
        }
    }
    to_download
}
