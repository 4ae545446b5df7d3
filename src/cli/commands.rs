//! CLI command definitions for episode-forge.
//!
//! Local conversion and merging work on plain directories; every other
//! command talks to the Redis task queue and, for scanning and workers, to
//! object storage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::align::StrategyKind;
use crate::export::{FfmpegEncoder, MergeConfig, MergeEngine, VideoEncoder};
use crate::metrics::{export_metrics, init_metrics};
use crate::pipeline::{ConversionConfig, EpisodeConverter};
use crate::scheduler::{
    ConversionTask, EpisodeScanner, QueueConfig, RedisTaskQueue, ScannerConfig, SourceStats,
    TaskQueue, WorkerPool, WorkerPoolConfig,
};
use crate::storage::{CliObjectStore, CliStoreConfig, LocalObjectStore, ObjectStore};

/// Robot-arm episode to LeRobot dataset converter.
#[derive(Parser)]
#[command(name = "episode-forge")]
#[command(about = "Convert raw robot-arm episodes into LeRobot datasets")]
#[command(version)]
#[command(
    long_about = "episode-forge aligns multi-rate arm and camera recordings into LeRobot v2 datasets.\n\nIt runs either locally on one episode directory or as a distributed service: a scanner publishes ready episodes to a Redis queue and a pool of workers converts them.\n\nExample usage:\n  episode-forge convert --input ./episode_0001 --output ./dataset --strategy nearest"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Convert one local raw episode directory into a dataset.
    Convert(ConvertArgs),

    /// Publish conversion tasks for the given episodes.
    Publish(PublishArgs),

    /// Scan object storage for ready episodes and publish them.
    Scan(ScanArgs),

    /// Run a pool of conversion workers until interrupted.
    Worker(WorkerArgs),

    /// Merge several datasets into one, padding vector features.
    Merge(MergeArgs),

    /// Show per-source counters and queue lengths.
    Stats(StatsArgs),

    /// Show the most recent entries of the failure sink.
    Failed(FailedArgs),

    /// Clear the scanner cursor so the next scan starts from the beginning.
    #[command(name = "reset-cursor")]
    ResetCursor(ResetCursorArgs),

    /// Move claimed-but-unreleased tasks back to pending after a crash.
    ///
    /// Run this only while no worker pool is consuming the queue.
    Recover(RecoverArgs),
}

/// Redis connection settings shared by queue commands.
#[derive(clap::Args, Debug, Clone)]
pub struct QueueArgs {
    /// Redis connection URL.
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Prefix of every queue key.
    #[arg(long, env = "EPISODE_FORGE_QUEUE_PREFIX", default_value = "episode_forge")]
    pub queue_prefix: String,

    /// How long a successful conversion suppresses re-publishing, in seconds.
    #[arg(long, env = "EPISODE_FORGE_DEDUP_TTL_SECS", default_value = "604800")]
    pub dedup_ttl_secs: u64,
}

impl QueueArgs {
    fn config(&self) -> QueueConfig {
        QueueConfig {
            redis_url: self.redis_url.clone(),
            ..Default::default()
        }
        .with_prefix(self.queue_prefix.clone())
        .with_dedup_ttl(Duration::from_secs(self.dedup_ttl_secs))
    }

    async fn connect(&self) -> anyhow::Result<Arc<dyn TaskQueue>> {
        let config = self.config();
        config.validate()?;
        let queue = RedisTaskQueue::connect(&config)
            .await
            .with_context(|| format!("connecting to {}", config.redis_url))?;
        Ok(Arc::new(queue))
    }
}

/// Object storage settings.
#[derive(clap::Args, Debug, Clone)]
pub struct StoreArgs {
    /// Storage backend: `cli` (external transfer client) or `local`.
    #[arg(long, env = "EPISODE_FORGE_STORE", default_value = "cli")]
    pub store: String,

    /// Bucket URI for `cli`, directory for `local`.
    #[arg(long, env = "EPISODE_FORGE_STORE_ROOT")]
    pub store_root: String,

    /// Transfer client binary.
    #[arg(long, env = "EPISODE_FORGE_TRANSFER_BIN", default_value = "bcecmd")]
    pub transfer_bin: String,

    /// Parallelism passed to the transfer client.
    #[arg(long, default_value = "8")]
    pub transfer_concurrency: usize,
}

impl StoreArgs {
    async fn build(&self) -> anyhow::Result<Arc<dyn ObjectStore>> {
        match self.store.as_str() {
            "local" => Ok(Arc::new(LocalObjectStore::new(&self.store_root))),
            "cli" => {
                let store = CliObjectStore::new(
                    CliStoreConfig::default()
                        .with_root(self.store_root.clone())
                        .with_program(self.transfer_bin.clone())
                        .with_concurrency(self.transfer_concurrency),
                );
                if !store.is_available().await {
                    warn!(program = %self.transfer_bin, "Transfer client not found on PATH");
                }
                Ok(Arc::new(store))
            }
            other => Err(anyhow::anyhow!(
                "Unknown store backend '{}'; expected 'cli' or 'local'",
                other
            )),
        }
    }
}

/// Arguments for `episode-forge convert`.
#[derive(Parser, Debug)]
pub struct ConvertArgs {
    /// Raw episode directory.
    #[arg(short = 'i', long)]
    pub input: PathBuf,

    /// Output dataset directory.
    #[arg(short = 'o', long)]
    pub output: PathBuf,

    /// Episode id recorded in the metadata; defaults to the input directory name.
    #[arg(long)]
    pub episode_id: Option<String>,

    /// Alignment strategy (nearest, chunking, window, linear).
    #[arg(short = 's', long, default_value = "nearest")]
    pub strategy: StrategyKind,

    /// YAML conversion profile.
    #[arg(short = 'c', long, env = "EPISODE_FORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// JSON object deep-merged over the profile.
    #[arg(long)]
    pub overrides: Option<String>,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `episode-forge publish`.
#[derive(Parser, Debug)]
pub struct PublishArgs {
    /// Episode ids to publish.
    #[arg(required = true)]
    pub episodes: Vec<String>,

    /// Source label used for dedup and counters.
    #[arg(long)]
    pub source: String,

    #[arg(short = 's', long, default_value = "nearest")]
    pub strategy: StrategyKind,

    /// JSON object carried as the task's config overrides.
    #[arg(long)]
    pub overrides: Option<String>,

    /// Publish even if the episode was already converted or queued.
    #[arg(long)]
    pub force: bool,

    #[command(flatten)]
    pub queue: QueueArgs,
}

/// Arguments for `episode-forge scan`.
#[derive(Parser, Debug)]
pub struct ScanArgs {
    /// Storage prefix holding raw episode directories.
    #[arg(long, env = "EPISODE_FORGE_RAW_ROOT", default_value = "")]
    pub raw_root: String,

    #[arg(long)]
    pub source: String,

    #[arg(short = 's', long, default_value = "nearest")]
    pub strategy: StrategyKind,

    #[arg(long)]
    pub overrides: Option<String>,

    /// Regex an episode directory name must match.
    #[arg(long, default_value = r"^episode_\d+$")]
    pub pattern: String,

    /// Minimum number of files before an episode counts as ready.
    #[arg(long, default_value = "1")]
    pub min_files: usize,

    /// Require two listings this many seconds apart to agree.
    #[arg(long)]
    pub stability_wait_secs: Option<u64>,

    /// Run a single scan cycle and exit.
    #[arg(long)]
    pub once: bool,

    /// Ignore the stored cursor for this scan.
    #[arg(long)]
    pub full_scan: bool,

    /// Seconds between scan cycles.
    #[arg(long, env = "EPISODE_FORGE_SCAN_INTERVAL_SECS", default_value = "300")]
    pub interval: u64,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub queue: QueueArgs,
}

/// Arguments for `episode-forge worker`.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Number of concurrent conversions.
    #[arg(short = 'w', long, env = "EPISODE_FORGE_WORKERS", default_value = "8")]
    pub workers: usize,

    #[arg(short = 'c', long, env = "EPISODE_FORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Storage prefix holding raw episode directories.
    #[arg(long, env = "EPISODE_FORGE_RAW_ROOT", default_value = "")]
    pub raw_root: String,

    /// Storage prefix receiving datasets.
    #[arg(long, env = "EPISODE_FORGE_OUTPUT_ROOT", default_value = "lerobot")]
    pub output_root: String,

    /// Local scratch directory for downloads and intermediate files.
    #[arg(long, env = "EPISODE_FORGE_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Milliseconds a worker waits on an empty queue.
    #[arg(long, default_value = "1000")]
    pub poll_interval_ms: u64,

    /// Print the Prometheus metrics text on shutdown.
    #[arg(long)]
    pub dump_metrics: bool,

    /// Re-queue every claimed task before starting. Only safe when this is
    /// the sole pool on the queue.
    #[arg(long)]
    pub recover: bool,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub queue: QueueArgs,
}

/// Arguments for `episode-forge merge`.
#[derive(Parser, Debug)]
pub struct MergeArgs {
    /// Source dataset directories.
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,

    #[arg(short = 'o', long)]
    pub output: PathBuf,

    /// Maximum dimension per feature prefix, e.g. `observation.state=14`.
    #[arg(long = "max-dim", value_parser = parse_limit)]
    pub max_dims: Vec<(String, usize)>,

    /// Output fps; required when sources disagree.
    #[arg(long)]
    pub fps: Option<u32>,

    #[arg(long)]
    pub robot_type: Option<String>,

    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `episode-forge stats`.
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Only show this source.
    #[arg(long)]
    pub source: Option<String>,

    #[arg(short = 'j', long)]
    pub json: bool,

    #[command(flatten)]
    pub queue: QueueArgs,
}

/// Arguments for `episode-forge failed`.
#[derive(Parser, Debug)]
pub struct FailedArgs {
    #[arg(short = 'n', long, default_value = "10")]
    pub limit: usize,

    #[arg(short = 'j', long)]
    pub json: bool,

    #[command(flatten)]
    pub queue: QueueArgs,
}

/// Arguments for `episode-forge reset-cursor`.
#[derive(Parser, Debug)]
pub struct ResetCursorArgs {
    #[command(flatten)]
    pub queue: QueueArgs,
}

/// Arguments for `episode-forge recover`.
#[derive(Parser, Debug)]
pub struct RecoverArgs {
    #[command(flatten)]
    pub queue: QueueArgs,
}

/// Parse command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Convert(args) => run_convert_command(args).await,
        Commands::Publish(args) => run_publish_command(args).await,
        Commands::Scan(args) => run_scan_command(args).await,
        Commands::Worker(args) => run_worker_command(args).await,
        Commands::Merge(args) => run_merge_command(args).await,
        Commands::Stats(args) => run_stats_command(args).await,
        Commands::Failed(args) => run_failed_command(args).await,
        Commands::ResetCursor(args) => run_reset_cursor_command(args).await,
        Commands::Recover(args) => run_recover_command(args).await,
    }
}

// ============================================================================
// Local commands
// ============================================================================

#[derive(Debug, Serialize)]
struct ConvertOutput {
    episode_id: String,
    output: String,
    strategy: String,
    episodes: usize,
    frames: usize,
    dropped_segments: usize,
}

async fn run_convert_command(args: ConvertArgs) -> anyhow::Result<()> {
    if !args.input.is_dir() {
        return Err(anyhow::anyhow!(
            "Input directory does not exist: {}",
            args.input.display()
        ));
    }

    let mut config = load_profile(args.config.as_deref())?;
    if let Some(raw) = &args.overrides {
        config = config.with_overrides(&parse_overrides(raw)?)?;
    }

    let episode_id = match args.episode_id {
        Some(id) => id,
        None => args
            .input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow::anyhow!("Cannot derive an episode id from the input path"))?,
    };

    let encoder: Arc<dyn VideoEncoder> = Arc::new(FfmpegEncoder::new(config.video.clone()));
    let converter = EpisodeConverter::new(config, encoder);
    let outcome = converter
        .convert_local(&episode_id, &args.input, &args.output, args.strategy)
        .await?;

    let output = ConvertOutput {
        episode_id: outcome.episode_id,
        output: args.output.display().to_string(),
        strategy: args.strategy.to_string(),
        episodes: outcome.episodes,
        frames: outcome.frames,
        dropped_segments: outcome.dropped_segments,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Episode:          {}", output.episode_id);
        println!("Strategy:         {}", output.strategy);
        println!("Episodes written: {}", output.episodes);
        println!("Frames written:   {}", output.frames);
        println!("Dropped segments: {}", output.dropped_segments);
        if output.episodes > 0 {
            println!("Output:           {}", output.output);
        } else {
            println!("No segment was long enough; nothing written.");
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct MergeOutput {
    output: String,
    sources: usize,
    episodes: usize,
    frames: usize,
    fps: u32,
    shapes: BTreeMap<String, String>,
}

async fn run_merge_command(args: MergeArgs) -> anyhow::Result<()> {
    let mut config = MergeConfig::default();
    for (prefix, max) in &args.max_dims {
        config = config.with_limit(prefix.clone(), *max);
    }
    if let Some(fps) = args.fps {
        config = config.with_fps(fps);
    }
    config.robot_type = args.robot_type.clone();

    let engine = MergeEngine::new(config);
    let sources = args.sources.clone();
    let output = args.output.clone();
    let summary = tokio::task::spawn_blocking(move || engine.merge(&sources, &output))
        .await
        .context("merge task did not complete")??;

    let output = MergeOutput {
        output: summary.output.display().to_string(),
        sources: summary.sources,
        episodes: summary.episodes,
        frames: summary.frames,
        fps: summary.fps,
        shapes: summary
            .vector_shapes
            .iter()
            .map(|(k, v)| (k.clone(), format!("{:?}", v)))
            .collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Merged {} datasets into {}", output.sources, output.output);
        println!("Episodes: {}", output.episodes);
        println!("Frames:   {}", output.frames);
        println!("FPS:      {}", output.fps);
        for (feature, shape) in &output.shapes {
            println!("  {:<40} {}", feature, shape);
        }
    }
    Ok(())
}

// ============================================================================
// Queue commands
// ============================================================================

async fn run_publish_command(args: PublishArgs) -> anyhow::Result<()> {
    let queue = args.queue.connect().await?;
    let overrides = match &args.overrides {
        Some(raw) => parse_overrides(raw)?,
        None => Map::new(),
    };

    let mut enqueued = 0usize;
    for episode_id in &args.episodes {
        let task = ConversionTask::new(episode_id.clone(), args.source.clone(), args.strategy)
            .with_overrides(overrides.clone());
        let outcome = queue.publish(&task, args.force).await?;
        if outcome.is_enqueued() {
            enqueued += 1;
        }
        println!("{}: {}", episode_id, outcome);
    }

    info!(
        source = %args.source,
        requested = args.episodes.len(),
        enqueued,
        "Publish finished"
    );
    Ok(())
}

async fn run_scan_command(args: ScanArgs) -> anyhow::Result<()> {
    let store = args.store.build().await?;
    let queue = args.queue.connect().await?;

    let config = ScannerConfig {
        root: args.raw_root.clone(),
        source: args.source.clone(),
        strategy: args.strategy,
        config_overrides: match &args.overrides {
            Some(raw) => parse_overrides(raw)?,
            None => Map::new(),
        },
        episode_pattern: args.pattern.clone(),
        min_file_count: args.min_files,
        stability_wait: args.stability_wait_secs.map(Duration::from_secs),
        full_scan: args.full_scan,
        interval: Duration::from_secs(args.interval.max(1)),
    };
    let scanner = EpisodeScanner::new(store, queue, config)?;

    if args.once {
        let report = scanner.scan_once().await?;
        println!(
            "found={} ready={} not_ready={} published={} skipped={} errors={} cursor={}",
            report.found,
            report.ready,
            report.not_ready,
            report.published,
            report.skipped,
            report.errors,
            report.cursor.as_deref().unwrap_or("-")
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping scanner");
            let _ = shutdown_tx.send(());
        }
    });
    scanner.run(shutdown_rx).await;
    Ok(())
}

async fn run_worker_command(args: WorkerArgs) -> anyhow::Result<()> {
    if args.workers == 0 {
        return Err(anyhow::anyhow!("--workers must be at least 1"));
    }
    init_metrics().context("registering metrics")?;

    let config = load_profile(args.config.as_deref())?;
    let store = args.store.build().await?;
    let queue = args.queue.connect().await?;

    let encoder = FfmpegEncoder::new(config.video.clone());
    if !encoder.is_available().await {
        warn!(binary = %config.video.ffmpeg_bin, "ffmpeg not found; video encoding will fail");
    }

    let mut converter = EpisodeConverter::new(config, Arc::new(encoder)).with_store(
        store,
        args.raw_root.clone(),
        args.output_root.clone(),
    );
    if let Some(dir) = &args.work_dir {
        converter = converter.with_work_dir(dir.clone());
    }

    let pool_config = WorkerPoolConfig::new(args.workers)
        .with_poll_interval(Duration::from_millis(args.poll_interval_ms.max(1)))
        .with_recover_on_start(args.recover);
    let mut pool = WorkerPool::new(pool_config, queue, Arc::new(converter));
    pool.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt")?;
    info!("Interrupt received, finishing in-flight conversions");
    pool.shutdown().await?;

    let stats = pool.stats();
    println!(
        "completed={} failed={} success_rate={:.1}% avg_duration={:.1}s",
        stats.tasks_completed,
        stats.tasks_failed,
        stats.success_rate(),
        stats.average_task_duration.as_secs_f64()
    );
    if args.dump_metrics {
        println!("{}", export_metrics());
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatsOutput {
    pending: usize,
    processing: usize,
    failed: usize,
    sources: Vec<SourceStats>,
}

async fn run_stats_command(args: StatsArgs) -> anyhow::Result<()> {
    let queue = args.queue.connect().await?;
    let lengths = queue.queue_stats().await?;

    let names = match &args.source {
        Some(source) => vec![source.clone()],
        None => queue.sources().await?,
    };
    let mut sources = Vec::with_capacity(names.len());
    for name in &names {
        sources.push(queue.stats(name).await?);
    }

    let output = StatsOutput {
        pending: lengths.pending,
        processing: lengths.processing,
        failed: lengths.failed,
        sources,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Pending:    {}", output.pending);
        println!("Processing: {}", output.processing);
        println!("Failed:     {}", output.failed);
        println!();
        println!(
            "{:<24} {:>10} {:>10} {:>10} {:>10}",
            "source", "published", "skipped", "success", "failed"
        );
        for s in &output.sources {
            println!(
                "{:<24} {:>10} {:>10} {:>10} {:>10}",
                s.source, s.published, s.skipped, s.success, s.failed
            );
        }
    }
    Ok(())
}

async fn run_failed_command(args: FailedArgs) -> anyhow::Result<()> {
    let queue = args.queue.connect().await?;
    let entries = queue.peek_failed(args.limit).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Failure sink is empty.");
        return Ok(());
    }
    for entry in &entries {
        println!(
            "{}  {}/{}  [{}]  {}",
            entry.failed_at.to_rfc3339(),
            entry.task.source,
            entry.task.episode_id,
            entry.worker_id.as_deref().unwrap_or("-"),
            entry.error
        );
    }
    Ok(())
}

async fn run_reset_cursor_command(args: ResetCursorArgs) -> anyhow::Result<()> {
    let queue = args.queue.connect().await?;
    let previous = queue.cursor().await?;
    queue.reset_cursor().await?;
    println!(
        "Scan cursor cleared (was {})",
        previous.as_deref().unwrap_or("unset")
    );
    Ok(())
}

async fn run_recover_command(args: RecoverArgs) -> anyhow::Result<()> {
    let queue = args.queue.connect().await?;
    let recovered = queue.recover_processing().await?;
    info!(recovered, "Processing list re-queued");
    println!("Re-queued {} claimed task(s)", recovered);
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn load_profile(path: Option<&Path>) -> anyhow::Result<ConversionConfig> {
    match path {
        Some(path) => ConversionConfig::from_file(path)
            .with_context(|| format!("loading profile {}", path.display())),
        None => Ok(ConversionConfig::default()),
    }
}

fn parse_overrides(raw: &str) -> anyhow::Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("parsing --overrides")? {
        Value::Object(map) => Ok(map),
        _ => Err(anyhow::anyhow!("--overrides must be a JSON object")),
    }
}

fn parse_limit(raw: &str) -> Result<(String, usize), String> {
    let (prefix, max) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected FEATURE=MAX, got '{}'", raw))?;
    let max: usize = max
        .trim()
        .parse()
        .map_err(|_| format!("invalid maximum in '{}'", raw))?;
    if prefix.trim().is_empty() || max == 0 {
        return Err(format!("invalid limit '{}'", raw));
    }
    Ok((prefix.trim().to_string(), max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_publish() {
        let cli = Cli::try_parse_from([
            "episode-forge",
            "publish",
            "episode_0001",
            "episode_0002",
            "--source",
            "bos",
            "--strategy",
            "chunking",
            "--force",
        ])
        .unwrap();

        let Commands::Publish(args) = cli.command else {
            panic!("expected publish");
        };
        assert_eq!(args.episodes, vec!["episode_0001", "episode_0002"]);
        assert_eq!(args.strategy, StrategyKind::Chunking);
        assert!(args.force);
        assert_eq!(args.queue.queue_prefix, "episode_forge");
    }

    #[test]
    fn test_parse_merge_limits() {
        let cli = Cli::try_parse_from([
            "episode-forge",
            "merge",
            "a",
            "b",
            "-o",
            "out",
            "--max-dim",
            "observation.state=14",
            "--max-dim",
            "action=14",
        ])
        .unwrap();

        let Commands::Merge(args) = cli.command else {
            panic!("expected merge");
        };
        assert_eq!(args.sources.len(), 2);
        assert_eq!(
            args.max_dims,
            vec![
                ("observation.state".to_string(), 14),
                ("action".to_string(), 14)
            ]
        );
    }

    #[test]
    fn test_parse_scan_flags() {
        let cli = Cli::try_parse_from([
            "episode-forge",
            "scan",
            "--source",
            "bos",
            "--store-root",
            "bos://bucket/raw",
            "--once",
            "--full-scan",
        ])
        .unwrap();

        let Commands::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert!(args.once);
        assert!(args.full_scan);
        assert_eq!(args.interval, 300);
        assert_eq!(args.store.store, "cli");
    }

    #[test]
    fn test_parse_worker_recovery_is_opt_in() {
        let cli = Cli::try_parse_from(["episode-forge", "worker", "--store-root", "bos://b"]).unwrap();
        let Commands::Worker(args) = cli.command else {
            panic!("expected worker");
        };
        assert!(!args.recover);

        let cli = Cli::try_parse_from([
            "episode-forge",
            "worker",
            "--store-root",
            "bos://b",
            "--recover",
        ])
        .unwrap();
        let Commands::Worker(args) = cli.command else {
            panic!("expected worker");
        };
        assert!(args.recover);

        let cli = Cli::try_parse_from(["episode-forge", "recover"]).unwrap();
        assert!(matches!(cli.command, Commands::Recover(_)));
    }

    #[test]
    fn test_parse_limit() {
        assert_eq!(parse_limit("action=7").unwrap(), ("action".to_string(), 7));
        assert!(parse_limit("action").is_err());
        assert!(parse_limit("action=0").is_err());
        assert!(parse_limit("=3").is_err());
    }

    #[test]
    fn test_parse_overrides() {
        let map = parse_overrides(r#"{"alignment": {"chunk_size": 5}}"#).unwrap();
        assert!(map.contains_key("alignment"));
        assert!(parse_overrides("[1, 2]").is_err());
        assert!(parse_overrides("not json").is_err());
    }

    #[test]
    fn test_unknown_store_backend() {
        let args = StoreArgs {
            store: "ftp".to_string(),
            store_root: String::new(),
            transfer_bin: "bcecmd".to_string(),
            transfer_concurrency: 1,
        };
        let rt = tokio::runtime::Runtime::new().unwrap();
        assert!(rt.block_on(args.build()).is_err());
    }
}
