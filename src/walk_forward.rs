//! Chronological walk-forward splitting.
//!
//! Trades are ordered by entry timestamp and cut once: everything before the
//! cut is in-sample, everything after is out-of-sample. Rows are never
//! shuffled, so no later outcome can inform an earlier classification.

use serde::{Deserialize, Serialize};

use crate::trade::TradeOutcome;

/// Boundaries of one train/test split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitSummary {
    pub train_trades: usize,
    pub test_trades: usize,
    pub train_start_ts: i64,
    pub test_start_ts: i64,
    pub test_end_ts: i64,
}

/// A chronological split over borrowed trades.
#[derive(Debug, Clone)]
pub struct WalkForwardSplit<'a> {
    pub train: Vec<&'a TradeOutcome>,
    pub test: Vec<&'a TradeOutcome>,
    pub summary: SplitSummary,
}

/// Split rows into train/test at the given fraction (e.g., 2/3 for 67/33).
pub fn train_test_split<T>(rows: &[T], train_fraction: f64) -> (&[T], &[T]) {
    let fraction = if train_fraction.is_finite() { train_fraction.clamp(0.0, 1.0) } else { 1.0 };
    let split_idx = (rows.len() as f64 * fraction).round() as usize;
    let split_idx = split_idx.min(rows.len());
    (&rows[..split_idx], &rows[split_idx..])
}

/// Stable sort by entry time; equal timestamps keep their input order.
pub fn chronological<'a>(trades: &[&'a TradeOutcome]) -> Vec<&'a TradeOutcome> {
    let mut ordered = trades.to_vec();
    ordered.sort_by_key(|t| t.timestamp_ms);
    ordered
}

/// Order chronologically, then split.
pub fn split_chronologically<'a>(trades: &[&'a TradeOutcome], train_fraction: f64) -> WalkForwardSplit<'a> {
    let ordered = chronological(trades);
    let (train, test) = train_test_split(&ordered, train_fraction);
    let summary = SplitSummary {
        train_trades: train.len(),
        test_trades: test.len(),
        train_start_ts: train.first().map(|t| t.timestamp_ms).unwrap_or(0),
        test_start_ts: test.first().map(|t| t.timestamp_ms).unwrap_or(0),
        test_end_ts: test.last().map(|t| t.timestamp_ms).unwrap_or(0),
    };
    WalkForwardSplit {
        train: train.to_vec(),
        test: test.to_vec(),
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::Direction;

    fn trade(i: i64) -> TradeOutcome {
        TradeOutcome::new(&format!("t{i}"), "EUR_USD", Direction::Long, 1.1, 1.101, i * 60_000, "a")
    }

    #[test]
    fn test_train_test_split_proportions() {
        let rows: Vec<u32> = (0..100).collect();
        let (train, test) = train_test_split(&rows, 0.7);
        assert_eq!(train.len(), 70);
        assert_eq!(test.len(), 30);

        let (train, test) = train_test_split(&rows, 2.0 / 3.0);
        assert_eq!(train.len(), 67);
        assert_eq!(test.len(), 33);
    }

    #[test]
    fn test_train_test_split_edge_cases() {
        let rows: Vec<u32> = (0..10).collect();
        let (train, test) = train_test_split(&rows, 1.0);
        assert_eq!(train.len(), 10);
        assert_eq!(test.len(), 0);
        let (train, test) = train_test_split(&rows, 0.0);
        assert_eq!(train.len(), 0);
        assert_eq!(test.len(), 10);
        let (train, _) = train_test_split(&rows, f64::NAN);
        assert_eq!(train.len(), 10);
    }

    #[test]
    fn test_split_orders_by_time_before_cutting() {
        let owned: Vec<TradeOutcome> = [5, 1, 4, 2, 3, 0].into_iter().map(trade).collect();
        let refs: Vec<&TradeOutcome> = owned.iter().collect();
        let split = split_chronologically(&refs, 0.5);

        let train_ts: Vec<i64> = split.train.iter().map(|t| t.timestamp_ms).collect();
        let test_ts: Vec<i64> = split.test.iter().map(|t| t.timestamp_ms).collect();
        assert_eq!(train_ts, vec![0, 60_000, 120_000]);
        assert_eq!(test_ts, vec![180_000, 240_000, 300_000]);
        assert_eq!(split.summary.test_start_ts, 180_000);
        assert_eq!(split.summary.test_end_ts, 300_000);
        assert!(split.summary.train_start_ts < split.summary.test_start_ts);
    }

    #[test]
    fn test_split_summary_json_round_trip() {
        let owned: Vec<TradeOutcome> = (0..9).map(trade).collect();
        let refs: Vec<&TradeOutcome> = owned.iter().collect();
        let summary = split_chronologically(&refs, 2.0 / 3.0).summary;
        let json = serde_json::to_string(&summary).unwrap();
        let back: SplitSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, summary);
    }
}
