// Copyright 2026 Build Acceleration Team.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! A thread-safe cache of per-path file metadata, shared between output staging and the
//! action lifecycle's local-result caching (see `crate::staging`, `crate::action::lifecycle`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::digest::ContentDigest;

/// Metadata recorded for one path: its content digest and mtime if it's a regular file, or
/// `is_directory` if it's a directory, or `err` if the last attempt to stat/digest it failed.
#[derive(Clone, Debug, Default)]
pub struct FileMetadata {
    pub digest: Option<ContentDigest>,
    pub mtime: Option<SystemTime>,
    pub is_directory: bool,
    pub err: Option<Arc<str>>,
}

impl FileMetadata {
    pub fn file(digest: ContentDigest, mtime: SystemTime) -> Self {
        FileMetadata {
            digest: Some(digest),
            mtime: Some(mtime),
            is_directory: false,
            err: None,
        }
    }

    pub fn directory() -> Self {
        FileMetadata {
            is_directory: true,
            ..Default::default()
        }
    }

    pub fn error(msg: impl Into<Arc<str>>) -> Self {
        FileMetadata {
            err: Some(msg.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait FileMetadataCache: Send + Sync {
    async fn get(&self, path: &Path) -> Option<FileMetadata>;
    async fn update(&self, path: &Path, md: FileMetadata);
    async fn delete(&self, path: &Path);
}

/// An in-memory `FileMetadataCache`. Good enough for a single build invocation; a long-lived
/// daemon would back this with something persistent, but that's the collaborator's concern,
/// not the race coordinator's.
#[derive(Default)]
pub struct InMemoryFileMetadataCache {
    inner: Mutex<HashMap<PathBuf, FileMetadata>>,
}

impl InMemoryFileMetadataCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileMetadataCache for InMemoryFileMetadataCache {
    async fn get(&self, path: &Path) -> Option<FileMetadata> {
        self.inner.lock().get(path).cloned()
    }

    async fn update(&self, path: &Path, md: FileMetadata) {
        self.inner.lock().insert(path.to_path_buf(), md);
    }

    async fn delete(&self, path: &Path) {
        self.inner.lock().remove(path);
    }
}
