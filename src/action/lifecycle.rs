// Copyright 2026 Build Acceleration Team.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Action lifecycle operations: input processing, cached-result validation,
//! local-result caching, and the compare-mode stash/restore/cleanup operations. Each takes the
//! `Action` plus whichever collaborator it needs, rather than the collaborators living on
//! `Action` itself.

use std::path::{Path, PathBuf};

use indexmap::IndexSet;

use crate::error::ProcessError;
use crate::external::{DepsParser, InputProcessingOptions, InputProcessor};
use crate::metadata_cache::FileMetadataCache;

use super::Action;

/// Runs the external input processor and folds its result into `action`: replaces the input
/// spec, merges inferred outputs into the declared output sets (deduplicating and
/// re-expressing them relative to `working_dir`, slash-normalizing on Windows cross-compiles),
/// and records the shallow-mode deps file as an additional declared output.
pub async fn process_inputs(
    action: &mut Action,
    processor: &dyn InputProcessor,
    working_dir: &Path,
    windows_cross_compile: bool,
) -> Result<(), String> {
    let opts = InputProcessingOptions {
        cmd: action.command.clone(),
        labels: action.labels.clone(),
        toolchain_inputs: action.toolchain_inputs.clone(),
        working_dir: working_dir.to_path_buf(),
        strategy: action.strategy,
        env: Default::default(),
        windows_cross_compile,
    };
    let processed = processor.process_inputs(&opts, &mut action.log).await?;

    action.input_spec = processed.input_spec;
    action
        .command
        .merge_outputs(processed.output_files, processed.output_dirs);
    action.command.normalize_outputs(working_dir, windows_cross_compile);

    if processed.used_shallow_mode {
        if let Some(deps_path) = processed.emitted_dependency_file {
            action.command.output_files.insert(deps_path.clone());
            action.deps_file_path = Some(deps_path);
        }
    }
    Ok(())
}

/// Decides whether a remote cache hit can be trusted. A hit with no deps file (non-shallow
/// inference) is always valid. A shallow-mode hit must pass deps-file verification against
/// current input digests; any verification error or a clean mismatch invalidates the hit so the
/// action falls through to execution.
pub async fn validate_cached_result(
    action: &mut Action,
    deps_parser: &dyn DepsParser,
) -> Result<bool, String> {
    let Some(deps_path) = action.deps_file_path.clone() else {
        return Ok(true);
    };
    deps_parser.verify_deps_file(&deps_path, &mut action.log).await
}

/// After a local win with an ok result, refreshes the deps file for shallow-mode actions,
/// invalidates metadata-cache entries for every declared output (files, and every file nested
/// under a declared output directory), tells the execution context to adopt the local result as
/// the cached one, and folds in the context's updated event times without clobbering the
/// `Result`/`CacheHit` flags the local attempt already recorded.
pub async fn cache_local_result(
    action: &mut Action,
    deps_parser: Option<&dyn DepsParser>,
    metadata_cache: &dyn FileMetadataCache,
    caching_disabled: bool,
) -> Result<(), String> {
    if caching_disabled {
        return Ok(());
    }
    let Some(result) = &action.result else {
        return Ok(());
    };
    if !result.is_ok() {
        return Ok(());
    }

    if let (Some(deps_path), Some(deps_parser)) = (action.deps_file_path.clone(), deps_parser) {
        if let Err(e) = deps_parser.write_deps_file(&deps_path, &mut action.log).await {
            tracing::warn!(error = %e, "failed to refresh deps file after local win");
        }
    }

    let working_dir = action.command.abs_working_dir();
    for rel in action.command.output_files.clone() {
        metadata_cache.delete(&working_dir.join(rel)).await;
    }
    for rel in action.command.output_dirs.clone() {
        invalidate_dir_recursive(&working_dir.join(&rel), metadata_cache).await;
    }

    let Some(ctx) = action.execution_context.clone() else {
        return Ok(());
    };
    if let Err(e) = ctx.update_cached_result().await {
        tracing::warn!(error = %e, "failed to update cached result after local win");
    }

    let preserved_result = action.log.remote.result.clone();
    let preserved_cache_hit = action.log.remote.cache_hit;
    let mut updated = ctx.metadata();
    updated.result = preserved_result;
    updated.cache_hit = preserved_cache_hit;
    action.log.remote = updated;

    Ok(())
}

fn invalidate_dir_recursive<'a>(
    abs_dir: &'a Path,
    metadata_cache: &'a dyn FileMetadataCache,
) -> futures::future::BoxFuture<'a, ()> {
    Box::pin(async move {
        metadata_cache.delete(abs_dir).await;
        let mut entries = match tokio::fs::read_dir(abs_dir).await {
            Ok(entries) => entries,
            Err(_) => return,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            match entry.file_type().await {
                Ok(ft) if ft.is_dir() => invalidate_dir_recursive(&path, metadata_cache).await,
                Ok(_) => metadata_cache.delete(&path).await,
                Err(_) => {}
            }
        }
    })
}

/// The set of declared output files that are also consumed as inputs -- modified in place by
/// the command rather than freshly produced -- and so must be stashed before a compare-mode
/// rerun and restored after. Computed on demand; the caller computes this once per compare-mode
/// run and reuses it across every rerun rather than recomputing it per duplicate.
pub fn in_and_out_files(action: &Action) -> IndexSet<PathBuf> {
    action
        .command
        .output_files
        .iter()
        .filter(|path| action.input_spec.digests.contains_key(*path))
        .cloned()
        .collect()
}

/// Moves every in-and-out file from the working directory into `stash_dir`, preserving its
/// relative path. Call `restore_in_and_out_files` to move them back after the rerun.
pub async fn stash_in_and_out_files(
    action: &Action,
    in_and_out: &IndexSet<PathBuf>,
    stash_dir: &Path,
) -> Result<(), ProcessError> {
    let working_dir = action.command.abs_working_dir();
    for rel in in_and_out {
        let src = working_dir.join(rel);
        if tokio::fs::metadata(&src).await.is_err() {
            continue;
        }
        let dest = stash_dir.join(rel);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProcessError::local(format!("creating stash parent {}: {e}", parent.display())))?;
        }
        tokio::fs::rename(&src, &dest)
            .await
            .map_err(|e| ProcessError::local(format!("stashing in-and-out file {}: {e}", rel.display())))?;
    }
    Ok(())
}

/// Moves every in-and-out file back from `stash_dir` into the working directory and clears its
/// metadata-cache entry, since the restored file's content/mtime may now differ from whatever
/// the rerun wrote.
pub async fn restore_in_and_out_files(
    action: &Action,
    in_and_out: &IndexSet<PathBuf>,
    stash_dir: &Path,
    metadata_cache: &dyn FileMetadataCache,
) -> Result<(), ProcessError> {
    let working_dir = action.command.abs_working_dir();
    for rel in in_and_out {
        let stashed = stash_dir.join(rel);
        if tokio::fs::metadata(&stashed).await.is_err() {
            continue;
        }
        let dest = working_dir.join(rel);
        tokio::fs::rename(&stashed, &dest)
            .await
            .map_err(|e| ProcessError::local(format!("restoring in-and-out file {}: {e}", rel.display())))?;
        metadata_cache.delete(&dest).await;
    }
    Ok(())
}

/// Deletes every declared output (except the deps file itself), then recreates each declared
/// output directory with its original permission bits so a subsequent local run finds it ready.
pub async fn remove_all_outputs(action: &Action) -> Result<(), ProcessError> {
    let working_dir = action.command.abs_working_dir();
    for rel in &action.command.output_files {
        if Some(rel) == action.deps_file_path.as_ref() {
            continue;
        }
        let abs = working_dir.join(rel);
        match tokio::fs::remove_file(&abs).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ProcessError::local(format!("removing output {}: {e}", rel.display()))),
        }
    }

    for rel in &action.command.output_dirs {
        let abs = working_dir.join(rel);
        let permissions = match tokio::fs::metadata(&abs).await {
            Ok(meta) => Some(meta.permissions()),
            Err(_) => None,
        };
        match tokio::fs::remove_dir_all(&abs).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ProcessError::local(format!("removing output directory {}: {e}", rel.display()))),
        }
        tokio::fs::create_dir_all(&abs)
            .await
            .map_err(|e| ProcessError::local(format!("recreating output directory {}: {e}", rel.display())))?;
        if let Some(permissions) = permissions {
            if let Err(e) = tokio::fs::set_permissions(&abs, permissions).await {
                tracing::warn!(dir = %rel.display(), error = %e, "failed to restore output directory permissions");
            }
        }
    }
    Ok(())
}
