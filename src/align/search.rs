//! Timestamp search over sorted timelines.

use ordered_float::OrderedFloat;

use crate::episode::TimestampNs;

/// Index of the timestamp closest to `t`.
///
/// Ties between an earlier and a later candidate go to the earlier one.
/// Returns `None` for an empty timeline.
pub fn nearest_index(timestamps: &[TimestampNs], t: TimestampNs) -> Option<usize> {
    if timestamps.is_empty() {
        return None;
    }

    let upper = timestamps.partition_point(|&ts| ts < t);
    if upper == 0 {
        return Some(0);
    }
    if upper == timestamps.len() {
        return Some(first_of_run(timestamps, upper - 1));
    }

    let before = upper - 1;
    let d_before = t.abs_diff(timestamps[before]);
    let d_after = timestamps[upper].abs_diff(t);
    if d_before <= d_after {
        Some(first_of_run(timestamps, before))
    } else {
        Some(upper)
    }
}

/// Index of the nearest timestamp, if it lies within `tolerance_ns` of `t`.
pub fn nearest_within(
    timestamps: &[TimestampNs],
    t: TimestampNs,
    tolerance_ns: i64,
) -> Option<usize> {
    nearest_index(timestamps, t).filter(|&i| timestamps[i].abs_diff(t) <= tolerance_ns as u64)
}

/// Half-open index range of timestamps within `[lo, hi]`.
pub fn range_between(
    timestamps: &[TimestampNs],
    lo: TimestampNs,
    hi: TimestampNs,
) -> std::ops::Range<usize> {
    let start = timestamps.partition_point(|&ts| ts < lo);
    let end = timestamps.partition_point(|&ts| ts <= hi).max(start);
    start..end
}

/// Median of successive deltas, averaging the two middle values for an even count.
pub fn median_delta(timestamps: &[TimestampNs]) -> Option<f64> {
    let deltas: Vec<f64> = timestamps
        .windows(2)
        .map(|w| (w[1] - w[0]) as f64)
        .collect();
    median(&deltas)
}

/// Median of `values`; `None` when empty.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<OrderedFloat<f64>> = values.iter().copied().map(OrderedFloat).collect();
    sorted.sort();

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1].0 + sorted[mid].0) / 2.0)
    } else {
        Some(sorted[mid].0)
    }
}

// Walks back over duplicate timestamps so the earliest index wins.
fn first_of_run(timestamps: &[TimestampNs], mut i: usize) -> usize {
    while i > 0 && timestamps[i - 1] == timestamps[i] {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_index_basic() {
        let ts = [0, 10, 20, 30];
        assert_eq!(nearest_index(&ts, -5), Some(0));
        assert_eq!(nearest_index(&ts, 0), Some(0));
        assert_eq!(nearest_index(&ts, 4), Some(0));
        assert_eq!(nearest_index(&ts, 6), Some(1));
        assert_eq!(nearest_index(&ts, 29), Some(3));
        assert_eq!(nearest_index(&ts, 100), Some(3));
        assert_eq!(nearest_index(&[], 1), None);
    }

    #[test]
    fn test_nearest_index_tie_prefers_earlier() {
        let ts = [0, 10, 20];
        assert_eq!(nearest_index(&ts, 5), Some(0));
        assert_eq!(nearest_index(&ts, 15), Some(1));

        let dup = [0, 10, 10, 20];
        assert_eq!(nearest_index(&dup, 10), Some(1));
        assert_eq!(nearest_index(&dup, 11), Some(1));
    }

    #[test]
    fn test_nearest_minimizes_distance_exhaustively() {
        let ts: Vec<i64> = vec![3, 7, 8, 15, 40, 41, 90];
        for t in -10..110 {
            let chosen = nearest_index(&ts, t).unwrap();
            let best = ts.iter().map(|&x| (x - t).abs()).min().unwrap();
            assert_eq!((ts[chosen] - t).abs(), best, "t={t}");
            let first_best = ts.iter().position(|&x| (x - t).abs() == best).unwrap();
            assert_eq!(chosen, first_best, "t={t}");
        }
    }

    #[test]
    fn test_nearest_within_tolerance() {
        let ts = [0, 100];
        assert_eq!(nearest_within(&ts, 20, 20), Some(0));
        assert_eq!(nearest_within(&ts, 50, 20), None);
        assert_eq!(nearest_within(&[], 0, 20), None);
    }

    #[test]
    fn test_range_between() {
        let ts = [0, 10, 20, 30, 40];
        assert_eq!(range_between(&ts, 10, 30), 1..4);
        assert_eq!(range_between(&ts, 11, 19), 2..2);
        assert_eq!(range_between(&ts, 50, 60), 5..5);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median_delta(&[0, 10, 20, 60]), Some(10.0));
        assert_eq!(median_delta(&[0]), None);
    }
}
