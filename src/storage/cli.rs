//! Object store backed by an external transfer client.
//!
//! Each operation renders an argument template and runs the configured
//! program as a child process. Placeholders: `{remote}` (full remote URI),
//! `{local}` (local path) and `{concurrency}`.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::Semaphore;

use super::{normalize_key, ObjectEntry, ObjectStore};
use crate::error::TransferError;

/// Transfer client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliStoreConfig {
    pub program: String,
    /// Remote root URI, e.g. `bos://bucket/robot-data`.
    pub root: String,
    /// Parallelism passed to the client for recursive copies.
    pub concurrency: usize,
    /// Maximum client processes running at once from this store.
    pub max_processes: usize,
    pub list_args: Vec<String>,
    pub copy_in_args: Vec<String>,
    pub copy_out_args: Vec<String>,
}

impl Default for CliStoreConfig {
    fn default() -> Self {
        let args = |a: &[&str]| a.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            program: "bcecmd".to_string(),
            root: String::new(),
            concurrency: 8,
            max_processes: 4,
            list_args: args(&["bos", "ls", "-r", "{remote}"]),
            copy_in_args: args(&[
                "bos",
                "cp",
                "-r",
                "-y",
                "--concurrency",
                "{concurrency}",
                "{remote}",
                "{local}",
            ]),
            copy_out_args: args(&[
                "bos",
                "cp",
                "-r",
                "-y",
                "--concurrency",
                "{concurrency}",
                "{local}",
                "{remote}",
            ]),
        }
    }
}

impl CliStoreConfig {
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// Runs the configured transfer client.
#[derive(Debug, Clone)]
pub struct CliObjectStore {
    config: CliStoreConfig,
    permits: Arc<Semaphore>,
}

impl CliObjectStore {
    pub fn new(config: CliStoreConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_processes.max(1)));
        Self { config, permits }
    }

    pub fn config(&self) -> &CliStoreConfig {
        &self.config
    }

    /// Full remote URI of `key`.
    pub fn remote_uri(&self, key: &str) -> Result<String, TransferError> {
        let key = normalize_key(key)?;
        let root = self.config.root.trim_end_matches('/');
        Ok(match (root.is_empty(), key.is_empty()) {
            (true, _) => key,
            (false, true) => root.to_string(),
            (false, false) => format!("{}/{}", root, key),
        })
    }

    /// Check whether the transfer client can be started.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.config.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok()
    }

    async fn run(
        &self,
        template: &[String],
        remote: &str,
        local: Option<&Path>,
    ) -> Result<String, TransferError> {
        let args = render_args(template, remote, local, self.config.concurrency);
        let command = format!("{} {}", self.config.program, args.join(" "));

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| TransferError::Spawn {
                program: self.config.program.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(command = %command, "Running transfer command");
        let output = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| TransferError::Spawn {
                program: self.config.program.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(TransferError::CommandFailed {
                command,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ObjectStore for CliObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, TransferError> {
        let remote = self.remote_uri(prefix)?;
        let stdout = self.run(&self.config.list_args, &remote, None).await?;
        let mut entries = parse_listing(&stdout, &self.config.root, &normalize_key(prefix)?);
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn copy_in(&self, remote: &str, local: &Path) -> Result<(), TransferError> {
        tokio::fs::create_dir_all(local)
            .await
            .map_err(|e| TransferError::Io(e, local.to_path_buf()))?;
        let uri = self.remote_uri(remote)?;
        self.run(&self.config.copy_in_args, &uri, Some(local)).await?;
        tracing::info!(remote = %uri, local = %local.display(), "Downloaded");
        Ok(())
    }

    async fn copy_out(&self, local: &Path, remote: &str) -> Result<(), TransferError> {
        if !local.exists() {
            return Err(TransferError::NotFound(local.display().to_string()));
        }
        let uri = self.remote_uri(remote)?;
        self.run(&self.config.copy_out_args, &uri, Some(local)).await?;
        tracing::info!(local = %local.display(), remote = %uri, "Uploaded");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.config.program
    }
}

fn render_args(
    template: &[String],
    remote: &str,
    local: Option<&Path>,
    concurrency: usize,
) -> Vec<String> {
    let local = local.map(|p| p.display().to_string()).unwrap_or_default();
    template
        .iter()
        .map(|arg| {
            arg.replace("{remote}", remote)
                .replace("{local}", &local)
                .replace("{concurrency}", &concurrency.to_string())
        })
        .collect()
}

/// Parses a recursive listing: one object per line, the key (or full URI)
/// as the last field and the size as the first integer field before it.
/// Directory markers (trailing `/`) are skipped.
pub fn parse_listing(output: &str, root: &str, prefix: &str) -> Vec<ObjectEntry> {
    let root = root.trim_end_matches('/');
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (last, rest) = fields.split_last()?;
            if last.ends_with('/') {
                return None;
            }

            let key = last
                .strip_prefix(root)
                .filter(|_| !root.is_empty())
                .unwrap_or(last)
                .trim_start_matches('/');
            // Some clients list keys relative to the listed prefix.
            let key = if prefix.is_empty() || key.starts_with(prefix) {
                key.to_string()
            } else {
                format!("{}/{}", prefix, key)
            };

            let size = rest.iter().find_map(|f| f.parse::<u64>().ok()).unwrap_or(0);
            Some(ObjectEntry { key, size })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_uri() {
        let store = CliObjectStore::new(CliStoreConfig::default().with_root("bos://bucket/data/"));
        assert_eq!(
            store.remote_uri("/raw/episode_0001").unwrap(),
            "bos://bucket/data/raw/episode_0001"
        );
        assert_eq!(store.remote_uri("").unwrap(), "bos://bucket/data");
    }

    #[test]
    fn test_render_args() {
        let args = render_args(
            &CliStoreConfig::default().copy_in_args,
            "bos://b/raw/e1",
            Some(Path::new("/tmp/e1")),
            16,
        );
        assert_eq!(
            args,
            vec!["bos", "cp", "-r", "-y", "--concurrency", "16", "bos://b/raw/e1", "/tmp/e1"]
        );
    }

    #[test]
    fn test_parse_listing() {
        let output = "\
            2024-05-01 10:00:00  1024  STANDARD  bos://b/data/raw/episode_0001/left.jsonl\n\
            PRE  bos://b/data/raw/episode_0001/cam_high/\n\
            2024-05-01 10:00:01  77  STANDARD  bos://b/data/raw/episode_0001/cam_high/1.jpg\n\
            \n";
        let entries = parse_listing(output, "bos://b/data", "raw/episode_0001");
        assert_eq!(
            entries,
            vec![
                ObjectEntry {
                    key: "raw/episode_0001/left.jsonl".into(),
                    size: 1024
                },
                ObjectEntry {
                    key: "raw/episode_0001/cam_high/1.jpg".into(),
                    size: 77
                },
            ]
        );
    }

    #[test]
    fn test_parse_listing_relative_keys() {
        let entries = parse_listing("12 cam_high/1.jpg\n", "bos://b", "raw/episode_0001");
        assert_eq!(entries[0].key, "raw/episode_0001/cam_high/1.jpg");
        assert_eq!(entries[0].size, 12);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let store = CliObjectStore::new(
            CliStoreConfig::default()
                .with_program("definitely-not-a-transfer-tool")
                .with_root("bos://b"),
        );
        assert!(!store.is_available().await);
        let err = store.list("raw").await.unwrap_err();
        assert!(matches!(err, TransferError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_failed_command_reports_exit_code() {
        let mut config = CliStoreConfig::default().with_program("sh").with_root("bos://b");
        config.list_args = vec!["-c".into(), "echo boom >&2; exit 3".into()];
        let store = CliObjectStore::new(config);

        match store.list("raw").await.unwrap_err() {
            TransferError::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
