//! Local filesystem object store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use super::{normalize_key, ObjectEntry, ObjectStore};
use crate::error::TransferError;

/// Treats a local directory as the store root.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, TransferError> {
        let key = normalize_key(key)?;
        Ok(if key.is_empty() {
            self.root.clone()
        } else {
            self.root.join(key)
        })
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, TransferError> {
        let base = self.resolve(prefix)?;
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || list_files(&root, &base))
            .await
            .map_err(|e| TransferError::Io(std::io::Error::other(e), PathBuf::from(prefix)))?
    }

    async fn copy_in(&self, remote: &str, local: &Path) -> Result<(), TransferError> {
        let source = self.resolve(remote)?;
        if !source.exists() {
            return Err(TransferError::NotFound(remote.to_string()));
        }
        let target = local.to_path_buf();
        tokio::task::spawn_blocking(move || copy_tree(&source, &target))
            .await
            .map_err(|e| TransferError::Io(std::io::Error::other(e), local.to_path_buf()))?
    }

    async fn copy_out(&self, local: &Path, remote: &str) -> Result<(), TransferError> {
        if !local.exists() {
            return Err(TransferError::NotFound(local.display().to_string()));
        }
        let source = local.to_path_buf();
        let target = self.resolve(remote)?;
        tokio::task::spawn_blocking(move || copy_tree(&source, &target))
            .await
            .map_err(|e| TransferError::Io(std::io::Error::other(e), local.to_path_buf()))?
    }

    fn name(&self) -> &str {
        "local"
    }
}

fn list_files(root: &Path, base: &Path) -> Result<Vec<ObjectEntry>, TransferError> {
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in WalkDir::new(base).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| base.to_path_buf());
            TransferError::Io(std::io::Error::other(e), path)
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry
            .metadata()
            .map_err(|e| TransferError::Io(std::io::Error::other(e), entry.path().to_path_buf()))?
            .len();
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        entries.push(ObjectEntry { key, size });
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}

fn copy_tree(source: &Path, target: &Path) -> Result<(), TransferError> {
    if source.is_file() {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TransferError::Io(e, parent.to_path_buf()))?;
        }
        std::fs::copy(source, target).map_err(|e| TransferError::Io(e, source.to_path_buf()))?;
        return Ok(());
    }

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.to_path_buf());
            TransferError::Io(std::io::Error::other(e), path)
        })?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let dest = target.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest).map_err(|e| TransferError::Io(e, dest.clone()))?;
        } else {
            std::fs::copy(entry.path(), &dest)
                .map_err(|e| TransferError::Io(e, entry.path().to_path_buf()))?;
        }
    }
    Ok(())
}
