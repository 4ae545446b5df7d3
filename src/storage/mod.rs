//! Object storage boundary.
//!
//! Raw episodes are read from, and converted datasets written to, a
//! hierarchical store reached only through [`ObjectStore`]. Keys are
//! `/`-separated paths relative to the store root.
//!
//! - [`LocalObjectStore`]: a directory on the local filesystem
//! - [`CliObjectStore`]: an external transfer client run as a child process

pub mod cli;
pub mod local;

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransferError;

pub use cli::{CliObjectStore, CliStoreConfig};
pub use local::LocalObjectStore;

/// One stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    /// Key relative to the store root.
    pub key: String,
    pub size: u64,
}

/// Recursive list / copy-in / copy-out over a hierarchical store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lists every object under `prefix`, recursively, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, TransferError>;

    /// Copies everything under `remote` into the local directory `local`.
    async fn copy_in(&self, remote: &str, local: &Path) -> Result<(), TransferError>;

    /// Copies the local directory `local` to `remote`, recursively.
    async fn copy_out(&self, local: &Path, remote: &str) -> Result<(), TransferError>;

    /// Backend name for logs.
    fn name(&self) -> &str;

    /// First-level directory names directly under `prefix`, sorted.
    async fn list_dirs(&self, prefix: &str) -> Result<Vec<String>, TransferError> {
        let base = normalize_key(prefix)?;
        let dirs: BTreeSet<String> = self
            .list(&base)
            .await?
            .into_iter()
            .filter_map(|entry| {
                let rest = if base.is_empty() {
                    entry.key.as_str()
                } else {
                    entry.key.strip_prefix(&base)?.strip_prefix('/')?
                };
                let (dir, _) = rest.split_once('/')?;
                Some(dir.to_string())
            })
            .collect();
        Ok(dirs.into_iter().collect())
    }
}

/// Trims slashes and rejects keys that escape the store root.
pub fn normalize_key(key: &str) -> Result<String, TransferError> {
    let trimmed = key.trim_matches('/');
    if trimmed.split('/').any(|part| part == "..") {
        return Err(TransferError::InvalidKey {
            key: key.to_string(),
            reason: "'..' is not allowed".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

/// Joins key parts with `/`, skipping empty parts.
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
