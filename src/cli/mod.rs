//! Command-line interface for episode-forge.
//!
//! Provides commands for local conversion and merging, task publishing,
//! storage scanning, running workers, and inspecting the queue.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
