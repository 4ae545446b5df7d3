//! episode-forge: robot-arm episode conversion engine.
//!
//! Turns raw multi-sensor recordings (high-rate arm streams plus lower-rate
//! camera frames) into LeRobot v2 training datasets, either one episode at
//! a time or as a distributed service driven by a Redis task queue.

// Core modules
pub mod align;
pub mod cli;
pub mod episode;
pub mod error;
pub mod export;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod storage;

// Re-export commonly used error types
pub use error::{AlignError, ExportError, LoaderError, MergeError, TransferError};
