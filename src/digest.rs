// Copyright 2026 Build Acceleration Team.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Content digests used to detect whether an output changed between a pre-exec snapshot and
//! a post-exec result (see `crate::staging`).

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tokio::io::AsyncReadExt;

/// A SHA-256 content digest plus the size of the content it was computed over, matching the
/// `{hash, size}` pair buck2/reclient carry around for every CAS entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest {
    hash: [u8; 32],
    size: u64,
}

impl ContentDigest {
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let hash: [u8; 32] = hasher.finalize().into();
        ContentDigest {
            hash,
            size: data.len() as u64,
        }
    }

    /// Stream a file's contents through SHA-256 without holding the whole thing in memory.
    pub async fn of_file(path: &Path) -> std::io::Result<Self> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        let hash: [u8; 32] = hasher.finalize().into();
        Ok(ContentDigest { hash, size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.hash)
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.to_hex(), self.size)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
