//! Alignment strategies.
//!
//! Each strategy turns the samples of one arm stream around a reference
//! timestamp into a state estimate and an action entry. Strategies are a
//! closed set, chosen once per task.

use std::fmt;
use std::str::FromStr;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use super::search::{nearest_within, range_between};
use super::segment::{DEFAULT_GAP_FACTOR, DEFAULT_MIN_SEGMENT_FRAMES};
use crate::episode::{StreamView, TimestampNs};
use crate::error::AlignError;

const NANOS_PER_MS: f64 = 1_000_000.0;

/// Strategy name as carried in task messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Nearest,
    Chunking,
    Window,
    Linear,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Nearest => "nearest",
            StrategyKind::Chunking => "chunking",
            StrategyKind::Window => "window",
            StrategyKind::Linear => "linear",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nearest" => Ok(StrategyKind::Nearest),
            "chunking" => Ok(StrategyKind::Chunking),
            "window" => Ok(StrategyKind::Window),
            "linear" => Ok(StrategyKind::Linear),
            _ => Err(format!("Unknown alignment strategy: {}", s)),
        }
    }
}

/// How a chunk is filled past the end of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaddingMode {
    RepeatLast,
    Zero,
}

/// Reducer for the time-window strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Mean,
    Median,
}

/// Alignment and segmentation parameters.
///
/// `padding_mode` and `aggregation` have no default: the strategies that
/// need them refuse to run without an explicit choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    pub tolerance_ms: f64,
    pub chunk_size: usize,
    pub padding_mode: Option<PaddingMode>,
    pub window_ms: f64,
    pub aggregation: Option<Aggregation>,
    pub gap_factor: f64,
    pub min_segment_frames: usize,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            tolerance_ms: 20.0,
            chunk_size: 10,
            padding_mode: None,
            window_ms: 40.0,
            aggregation: None,
            gap_factor: DEFAULT_GAP_FACTOR,
            min_segment_frames: DEFAULT_MIN_SEGMENT_FRAMES,
        }
    }
}

impl AlignmentConfig {
    pub fn tolerance_ns(&self) -> i64 {
        (self.tolerance_ms * NANOS_PER_MS).round() as i64
    }

    pub fn validate(&self) -> Result<(), AlignError> {
        let invalid = |parameter: &str, reason: &str| AlignError::InvalidParameter {
            parameter: parameter.to_string(),
            reason: reason.to_string(),
        };

        if !self.tolerance_ms.is_finite() || self.tolerance_ms < 0.0 {
            return Err(invalid("tolerance_ms", "must be a non-negative number"));
        }
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size", "must be at least 1"));
        }
        if !self.window_ms.is_finite() || self.window_ms <= 0.0 {
            return Err(invalid("window_ms", "must be positive"));
        }
        if !self.gap_factor.is_finite() || self.gap_factor <= 1.0 {
            return Err(invalid("gap_factor", "must be greater than 1"));
        }
        if self.min_segment_frames == 0 {
            return Err(invalid("min_segment_frames", "must be at least 1"));
        }
        Ok(())
    }
}

/// Action entry of one stream in one record.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionValue {
    /// Shape `(d,)`.
    Vector(Vec<f64>),
    /// Shape `(chunk_size, d)`.
    Chunk(Vec<Vec<f64>>),
}

/// A resolved alignment strategy with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum AlignStrategy {
    Nearest,
    Chunking {
        chunk_size: usize,
        padding: PaddingMode,
    },
    Window {
        window_ns: i64,
        aggregation: Aggregation,
    },
    Linear,
}

impl AlignStrategy {
    /// Resolves a strategy name against the configured parameters.
    pub fn from_task(kind: StrategyKind, config: &AlignmentConfig) -> Result<Self, AlignError> {
        config.validate()?;

        let missing = |parameter: &str| AlignError::MissingParameter {
            strategy: kind.to_string(),
            parameter: parameter.to_string(),
        };

        Ok(match kind {
            StrategyKind::Nearest => AlignStrategy::Nearest,
            StrategyKind::Chunking => AlignStrategy::Chunking {
                chunk_size: config.chunk_size,
                padding: config.padding_mode.ok_or_else(|| missing("padding_mode"))?,
            },
            StrategyKind::Window => AlignStrategy::Window {
                window_ns: (config.window_ms * NANOS_PER_MS).round() as i64,
                aggregation: config.aggregation.ok_or_else(|| missing("aggregation"))?,
            },
            StrategyKind::Linear => AlignStrategy::Linear,
        })
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            AlignStrategy::Nearest => StrategyKind::Nearest,
            AlignStrategy::Chunking { .. } => StrategyKind::Chunking,
            AlignStrategy::Window { .. } => StrategyKind::Window,
            AlignStrategy::Linear => StrategyKind::Linear,
        }
    }

    /// How far from a reference timestamp this strategy reads samples.
    ///
    /// Streams are clipped to this reach around each segment.
    pub fn reach_ns(&self, tolerance_ns: i64) -> i64 {
        match self {
            AlignStrategy::Window { window_ns, .. } => tolerance_ns.max(window_ns / 2),
            _ => tolerance_ns,
        }
    }

    /// Chunk length of the action field, if chunked.
    pub fn chunk_size(&self) -> Option<usize> {
        match self {
            AlignStrategy::Chunking { chunk_size, .. } => Some(*chunk_size),
            _ => None,
        }
    }

    /// State estimate at `t`, or `None` when the stream has no usable data.
    pub fn state(&self, view: StreamView<'_>, t: TimestampNs, tolerance_ns: i64) -> Option<Vec<f64>> {
        match self {
            AlignStrategy::Nearest | AlignStrategy::Chunking { .. } => {
                nearest(view, t, tolerance_ns)
            }
            AlignStrategy::Window {
                window_ns,
                aggregation,
            } => window(view, t, *window_ns, *aggregation)
                .or_else(|| nearest(view, t, tolerance_ns)),
            AlignStrategy::Linear => interpolate(view, t, tolerance_ns),
        }
    }

    /// Action entry at `t`; `state` is this strategy's estimate at `t`.
    pub fn action(
        &self,
        view: StreamView<'_>,
        t: TimestampNs,
        tolerance_ns: i64,
        state: Option<&Vec<f64>>,
    ) -> Option<ActionValue> {
        match self {
            AlignStrategy::Chunking {
                chunk_size,
                padding,
            } => chunk(view, t, tolerance_ns, *chunk_size, *padding).map(ActionValue::Chunk),
            _ => state.cloned().map(ActionValue::Vector),
        }
    }
}

/// Nearest sample within tolerance.
pub fn nearest(view: StreamView<'_>, t: TimestampNs, tolerance_ns: i64) -> Option<Vec<f64>> {
    nearest_within(view.timestamps, t, tolerance_ns).map(|i| view.values[i].clone())
}

/// `chunk_size` consecutive samples starting at the nearest match, padded
/// past the end of the view.
pub fn chunk(
    view: StreamView<'_>,
    t: TimestampNs,
    tolerance_ns: i64,
    chunk_size: usize,
    padding: PaddingMode,
) -> Option<Vec<Vec<f64>>> {
    let start = nearest_within(view.timestamps, t, tolerance_ns)?;
    let end = (start + chunk_size).min(view.len());

    let mut entries: Vec<Vec<f64>> = view.values[start..end].to_vec();
    let pad = match padding {
        PaddingMode::RepeatLast => view.values[view.len() - 1].clone(),
        PaddingMode::Zero => vec![0.0; view.values[start].len()],
    };
    entries.resize(chunk_size, pad);
    Some(entries)
}

/// Mean or per-dimension median of samples in `[t - w/2, t + w/2]`.
pub fn window(
    view: StreamView<'_>,
    t: TimestampNs,
    window_ns: i64,
    aggregation: Aggregation,
) -> Option<Vec<f64>> {
    let half = window_ns / 2;
    let range = range_between(view.timestamps, t - half, t + half);
    if range.is_empty() {
        return None;
    }

    let samples = &view.values[range];
    let dim = samples[0].len();
    let n = samples.len() as f64;

    let reduced = (0..dim)
        .map(|d| match aggregation {
            Aggregation::Mean => samples.iter().map(|s| s[d]).sum::<f64>() / n,
            Aggregation::Median => {
                let mut column: Vec<OrderedFloat<f64>> =
                    samples.iter().map(|s| OrderedFloat(s[d])).collect();
                column.sort();
                let mid = column.len() / 2;
                if column.len() % 2 == 0 {
                    (column[mid - 1].0 + column[mid].0) / 2.0
                } else {
                    column[mid].0
                }
            }
        })
        .collect();

    Some(reduced)
}

/// Linear interpolation between the samples bracketing `t`, both within tolerance.
pub fn interpolate(view: StreamView<'_>, t: TimestampNs, tolerance_ns: i64) -> Option<Vec<f64>> {
    let ts = view.timestamps;
    let after = ts.partition_point(|&x| x < t);

    if after < ts.len() && ts[after] == t {
        return Some(view.values[after].clone());
    }
    if after == 0 || after == ts.len() {
        return None;
    }

    let before = after - 1;
    let (t0, t1) = (ts[before], ts[after]);
    if t - t0 > tolerance_ns || t1 - t > tolerance_ns {
        return None;
    }

    let w = (t - t0) as f64 / (t1 - t0) as f64;
    Some(
        view.values[before]
            .iter()
            .zip(&view.values[after])
            .map(|(a, b)| a + (b - a) * w)
            .collect(),
    )
}
