//! Error types for episode-forge operations.
//!
//! Defines error types for the major subsystems:
//! - Raw episode loading
//! - Segment detection and time alignment
//! - Dataset export (frame tables, videos, metadata)
//! - Dataset merging
//! - Object storage transfer

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading a raw episode.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Missing stream data for '{stream}': {reason}")]
    MissingStreamData { stream: String, reason: String },

    #[error("Stream '{stream}' changes dimension from {expected} to {actual} at row {row}")]
    InconsistentDimension {
        stream: String,
        expected: usize,
        actual: usize,
        row: usize,
    },

    #[error("Invalid row {row} in '{path}': {reason}")]
    InvalidRow {
        path: PathBuf,
        row: usize,
        reason: String,
    },

    #[error("Unsupported column type for '{column}' in '{path}': {data_type}")]
    UnsupportedColumn {
        path: PathBuf,
        column: String,
        data_type: String,
    },

    #[error("Failed to unpack frame container '{path}': {reason}")]
    Container { path: PathBuf, reason: String },

    #[error("IO error on '{1}': {0}")]
    Io(#[source] std::io::Error, PathBuf),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl LoaderError {
    /// Returns true when the episode is incomplete rather than malformed.
    pub fn is_missing_data(&self) -> bool {
        matches!(self, LoaderError::MissingStreamData { .. })
    }
}

/// Errors that can occur during segment detection or alignment.
#[derive(Debug, Error)]
pub enum AlignError {
    #[error("Reference camera '{0}' not present in episode")]
    MissingReferenceCamera(String),

    #[error("Strategy '{strategy}' requires '{parameter}' to be configured")]
    MissingParameter { strategy: String, parameter: String },

    #[error("Invalid alignment parameter '{parameter}': {reason}")]
    InvalidParameter { parameter: String, reason: String },

    #[error("Segment {segment} frame range {start}..{end} is outside the reference timeline ({len} frames)")]
    SegmentOutOfRange {
        segment: usize,
        start: usize,
        end: usize,
        len: usize,
    },
}

/// Errors that can occur during dataset export.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("No aligned segments to write")]
    NoSegments,

    #[error("Segments disagree on layout: {0}")]
    LayoutMismatch(String),

    #[error("Video encoding failed for '{path}': {reason}")]
    VideoEncoding { path: PathBuf, reason: String },

    #[error("Camera '{camera}' has no frame for record {record}")]
    MissingFrame { camera: String, record: usize },

    #[error("Failed to read image '{path}': {reason}")]
    Image { path: PathBuf, reason: String },

    #[error("Invalid column '{column}': {reason}")]
    InvalidColumn { column: String, reason: String },

    #[error("Invalid dataset metadata: {0}")]
    InvalidMetadata(String),

    #[error("IO error on '{1}': {0}")]
    Io(#[source] std::io::Error, PathBuf),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

/// Errors that can occur while merging datasets.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("No source datasets given")]
    NoSources,

    #[error(
        "Source '{source_path}' feature '{feature}' has dimension {dim}, which exceeds the configured maximum {max}; raise the merge limit for this feature"
    )]
    DimensionOverflow {
        source_path: PathBuf,
        feature: String,
        dim: usize,
        max: usize,
    },

    #[error("No maximum dimension configured for feature '{0}'")]
    MissingLimit(String),

    #[error("Source '{source_path}' has fps {actual}, expected {expected}; pass an explicit fps to override")]
    IncompatibleFps {
        source_path: PathBuf,
        expected: u32,
        actual: u32,
    },

    #[error("Feature '{feature}' has incompatible shapes across sources: {reason}")]
    IncompatibleShape { feature: String, reason: String },

    #[error("Output directory '{0}' is not empty")]
    OutputExists(PathBuf),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("IO error on '{1}': {0}")]
    Io(#[source] std::io::Error, PathBuf),
}

/// Errors that can occur while talking to object storage.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Transfer tool '{program}' could not be started: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Transfer command '{command}' exited with code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("IO error on '{1}': {0}")]
    Io(#[source] std::io::Error, PathBuf),
}
