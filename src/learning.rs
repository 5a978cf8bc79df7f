//! Indicator learning with walk-forward validation.
//!
//! For each pair, every indicator is judged by how much better trades it
//! confirmed did than the trades around them. Judgement is made on a
//! chronological split: the earlier two thirds set expectations, the later
//! third must confirm them. Nothing here fails on bad data; malformed trades
//! are skipped and indicators without evidence stay neutral.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::LearningConfig;
use crate::indicators::IndicatorKey;
use crate::logging::{log_classification, v_str, ProfileScope};
use crate::regime::{bucket_for_label, group_by_bucket, RegimeBucket};
use crate::reliability::state::SessionState;
use crate::signature::normalize_symbol;
use crate::trade::{Direction, TradeOutcome};
use crate::walk_forward::{split_chronologically, SplitSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Signal,
    Noise,
    Neutral,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Signal => "signal",
            Quality::Noise => "noise",
            Quality::Neutral => "neutral",
        }
    }
}

/// Counts for one indicator inside one partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionStats {
    pub trades: usize,
    pub wins: usize,
    pub confirming: usize,
    pub confirming_wins: usize,
    pub baseline_win_rate: f64,
    pub confirming_win_rate: f64,
    /// Confirming win rate minus this partition's baseline
    pub lift: f64,
}

impl PartitionStats {
    fn measure(trades: &[&TradeOutcome], indicator: IndicatorKey) -> Self {
        let mut stats = PartitionStats::default();
        for trade in trades {
            stats.trades += 1;
            if trade.won {
                stats.wins += 1;
            }
            let confirms = trade
                .signals
                .get(&indicator)
                .map(|s| s.confirms(trade.direction))
                .unwrap_or(false);
            if confirms {
                stats.confirming += 1;
                if trade.won {
                    stats.confirming_wins += 1;
                }
            }
        }
        if stats.trades > 0 {
            stats.baseline_win_rate = stats.wins as f64 / stats.trades as f64;
        }
        if stats.confirming > 0 {
            stats.confirming_win_rate = stats.confirming_wins as f64 / stats.confirming as f64;
            stats.lift = stats.confirming_win_rate - stats.baseline_win_rate;
        }
        stats
    }
}

/// Learned reliability of one indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorReliability {
    pub indicator: IndicatorKey,
    pub quality: Quality,
    /// Soft weight for consensus scoring
    pub weight: f64,
    /// Lift the classification was decided on
    pub lift: f64,
    pub in_sample: PartitionStats,
    pub out_of_sample: PartitionStats,
    /// True when the later partition confirmed the classification
    pub oos_validated: bool,
    pub sample_sufficient: bool,
}

/// Learned reliabilities inside one regime bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeProfile {
    pub bucket: RegimeBucket,
    pub trades: usize,
    pub indicators: BTreeMap<IndicatorKey, IndicatorReliability>,
    pub quality_score: f64,
}

/// Everything learned about one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairIndicatorProfile {
    pub pair: String,
    pub trades: usize,
    /// Trades dropped for unknown direction or unusable prices
    pub skipped: usize,
    /// Win rate over every usable trade
    pub baseline_win_rate: f64,
    pub split: SplitSummary,
    pub indicators: BTreeMap<IndicatorKey, IndicatorReliability>,
    pub regimes: BTreeMap<RegimeBucket, RegimeProfile>,
    pub quality_score: f64,
    pub neutral_weight: f64,
}

impl PairIndicatorProfile {
    pub fn signal_indicators(&self) -> Vec<IndicatorKey> {
        with_quality(&self.indicators, Quality::Signal)
    }

    pub fn noise_indicators(&self) -> Vec<IndicatorKey> {
        with_quality(&self.indicators, Quality::Noise)
    }

    /// Noise set for a regime, falling back to the global set when the
    /// regime has no profile of its own.
    pub fn noise_indicators_for(&self, regime: Option<RegimeBucket>) -> Vec<IndicatorKey> {
        match regime.and_then(|b| self.regimes.get(&b)) {
            Some(profile) => with_quality(&profile.indicators, Quality::Noise),
            None => self.noise_indicators(),
        }
    }

    /// Weight resolution: sample-sufficient regime entry, then
    /// sample-sufficient global entry, then neutral.
    pub fn weight_for(&self, indicator: IndicatorKey, regime: Option<RegimeBucket>) -> f64 {
        let regime_entry = regime
            .and_then(|b| self.regimes.get(&b))
            .and_then(|p| p.indicators.get(&indicator))
            .filter(|r| r.sample_sufficient);
        if let Some(entry) = regime_entry {
            return entry.weight;
        }
        match self.indicators.get(&indicator) {
            Some(entry) if entry.sample_sufficient => entry.weight,
            _ => self.neutral_weight,
        }
    }

    /// Weights for every indicator this profile has seen.
    pub fn weights_for_regime(&self, regime: Option<RegimeBucket>) -> BTreeMap<IndicatorKey, f64> {
        let mut keys: Vec<IndicatorKey> = self.indicators.keys().copied().collect();
        if let Some(profile) = regime.and_then(|b| self.regimes.get(&b)) {
            keys.extend(profile.indicators.keys().copied());
        }
        keys.into_iter()
            .map(|k| (k, self.weight_for(k, regime)))
            .collect()
    }

    /// Weights for a regime label, or `None` while adaptive learning is
    /// switched off. Consumers fall back to default weights on `None`.
    pub fn adaptive_weights(
        &self,
        state: &SessionState,
        regime_label: &str,
    ) -> Option<BTreeMap<IndicatorKey, f64>> {
        if !state.adaptive_learning_enabled() {
            return None;
        }
        Some(self.weights_for_regime(bucket_for_label(regime_label)))
    }
}

fn with_quality(map: &BTreeMap<IndicatorKey, IndicatorReliability>, quality: Quality) -> Vec<IndicatorKey> {
    map.values()
        .filter(|r| r.sample_sufficient && r.quality == quality)
        .map(|r| r.indicator)
        .collect()
}

struct Minimums {
    in_sample: usize,
    oos: usize,
}

fn classify(lift_decisive: f64, lift_in_sample: f64, cfg: &LearningConfig) -> Quality {
    if lift_decisive >= cfg.signal_oos_lift && lift_in_sample >= cfg.signal_in_sample_lift {
        Quality::Signal
    } else if lift_decisive <= cfg.noise_oos_lift {
        Quality::Noise
    } else {
        Quality::Neutral
    }
}

/// Soft weight for a classification.
///
/// Signals land in `[signal_base_weight, cap]`, noise in `[noise_floor, 0.5)`.
pub fn soft_weight(quality: Quality, lift: f64, oos_validated: bool, cfg: &LearningConfig) -> f64 {
    let (gain, cap) = if oos_validated {
        (cfg.validated_gain, cfg.validated_weight_cap)
    } else {
        (cfg.unvalidated_gain, cfg.unvalidated_weight_cap)
    };
    match quality {
        Quality::Signal => (cfg.signal_base_weight + lift.max(0.0) * gain).min(cap),
        Quality::Noise => (cfg.neutral_weight + lift.min(0.0) * gain).max(cfg.noise_floor),
        Quality::Neutral => cfg.neutral_weight,
    }
}

fn assess(
    indicator: IndicatorKey,
    all: &[&TradeOutcome],
    train: &[&TradeOutcome],
    test: &[&TradeOutcome],
    min: &Minimums,
    cfg: &LearningConfig,
) -> IndicatorReliability {
    let in_sample = PartitionStats::measure(train, indicator);
    let out_of_sample = PartitionStats::measure(test, indicator);

    let neutral = |sufficient: bool| IndicatorReliability {
        indicator,
        quality: Quality::Neutral,
        weight: cfg.neutral_weight,
        lift: 0.0,
        in_sample,
        out_of_sample,
        oos_validated: false,
        sample_sufficient: sufficient,
    };

    if out_of_sample.confirming >= min.oos && in_sample.confirming >= min.in_sample {
        let quality = classify(out_of_sample.lift, in_sample.lift, cfg);
        return IndicatorReliability {
            indicator,
            quality,
            weight: soft_weight(quality, out_of_sample.lift, true, cfg),
            lift: out_of_sample.lift,
            in_sample,
            out_of_sample,
            oos_validated: true,
            sample_sufficient: true,
        };
    }

    // Either partition too thin: judge the whole history, unvalidated.
    let full = PartitionStats::measure(all, indicator);
    if full.confirming < min.in_sample {
        return neutral(false);
    }
    let quality = classify(full.lift, full.lift, cfg);
    IndicatorReliability {
        indicator,
        quality,
        weight: soft_weight(quality, full.lift, false, cfg),
        lift: full.lift,
        in_sample,
        out_of_sample,
        oos_validated: false,
        sample_sufficient: true,
    }
}

fn learn_set(
    trades: &[&TradeOutcome],
    min: &Minimums,
    cfg: &LearningConfig,
) -> (SplitSummary, BTreeMap<IndicatorKey, IndicatorReliability>) {
    let split = split_chronologically(trades, cfg.train_fraction);
    let all: Vec<&TradeOutcome> = split.train.iter().chain(split.test.iter()).copied().collect();

    let mut out = BTreeMap::new();
    for indicator in IndicatorKey::ALL {
        if !trades.iter().any(|t| t.signals.contains_key(&indicator)) {
            continue;
        }
        let reliability = assess(indicator, &all, &split.train, &split.test, min, cfg);
        debug_assert!(reliability.weight >= cfg.noise_floor && reliability.weight <= cfg.validated_weight_cap);
        out.insert(indicator, reliability);
    }
    (split.summary, out)
}

/// Quality score in [0, 100] for a set of reliabilities.
pub fn quality_score(indicators: &BTreeMap<IndicatorKey, IndicatorReliability>, trades: usize) -> f64 {
    let judged: Vec<&IndicatorReliability> = indicators.values().filter(|r| r.sample_sufficient).collect();
    if judged.is_empty() {
        return 0.0;
    }
    let n = judged.len() as f64;
    let signals = judged.iter().filter(|r| r.quality == Quality::Signal).count() as f64;
    let noise = judged.iter().filter(|r| r.quality == Quality::Noise).count() as f64;
    let validated = judged.iter().filter(|r| r.oos_validated).count() as f64;
    let depth = (trades as f64 / 100.0).min(1.0);

    let score = 0.4 * (signals / n) + 0.2 * (1.0 - noise / n) + 0.2 * (validated / n) + 0.2 * depth;
    (score * 100.0).clamp(0.0, 100.0)
}

fn usable(trade: &TradeOutcome) -> bool {
    trade.direction != Direction::Unknown && trade.pips().is_some()
}

/// Learn a pair's indicator profile from its trade history.
///
/// Trades for other pairs are ignored, so a mixed history can be passed.
pub fn learn_pair_profile(trades: &[TradeOutcome], pair: &str, cfg: &LearningConfig) -> PairIndicatorProfile {
    let symbol = normalize_symbol(pair);
    let _scope = ProfileScope::with_context("learn_pair_profile", &[("pair", v_str(&symbol))]);

    let for_pair: Vec<&TradeOutcome> = trades.iter().filter(|t| normalize_symbol(&t.pair) == symbol).collect();
    let valid: Vec<&TradeOutcome> = for_pair.iter().copied().filter(|t| usable(t)).collect();
    let skipped = for_pair.len() - valid.len();

    let global_min = Minimums { in_sample: cfg.min_in_sample, oos: cfg.min_oos };
    let (split, indicators) = learn_set(&valid, &global_min, cfg);
    let score = quality_score(&indicators, valid.len());

    let mut regimes = BTreeMap::new();
    let bucket_min = Minimums { in_sample: cfg.min_regime_trades, oos: cfg.min_regime_trades };
    for (bucket, bucket_trades) in group_by_bucket(&valid) {
        if bucket_trades.len() < cfg.min_regime_trades {
            continue;
        }
        let (_, bucket_indicators) = learn_set(&bucket_trades, &bucket_min, cfg);
        let bucket_score = quality_score(&bucket_indicators, bucket_trades.len());
        log_classification(
            &symbol,
            &bucket.key(),
            bucket_trades.len(),
            with_quality(&bucket_indicators, Quality::Signal).len(),
            with_quality(&bucket_indicators, Quality::Noise).len(),
            bucket_score,
        );
        regimes.insert(
            bucket,
            RegimeProfile {
                bucket,
                trades: bucket_trades.len(),
                indicators: bucket_indicators,
                quality_score: bucket_score,
            },
        );
    }

    let profile = PairIndicatorProfile {
        pair: symbol,
        trades: valid.len(),
        skipped,
        baseline_win_rate: if valid.is_empty() {
            0.0
        } else {
            valid.iter().filter(|t| t.won).count() as f64 / valid.len() as f64
        },
        split,
        indicators,
        regimes,
        quality_score: score,
        neutral_weight: cfg.neutral_weight,
    };
    log_classification(
        &profile.pair,
        "global",
        profile.trades,
        profile.signal_indicators().len(),
        profile.noise_indicators().len(),
        profile.quality_score,
    );
    profile
}

/// Learn a profile for every pair present in the history.
pub fn learn_all_pairs(trades: &[TradeOutcome], cfg: &LearningConfig) -> BTreeMap<String, PairIndicatorProfile> {
    let mut pairs: Vec<String> = trades.iter().map(|t| normalize_symbol(&t.pair)).collect();
    pairs.sort();
    pairs.dedup();
    pairs
        .into_iter()
        .map(|p| {
            let profile = learn_pair_profile(trades, &p, cfg);
            (p, profile)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorSignal;

    /// `confirm` decides whether RSI agrees; `win` decides the outcome.
    fn history(n: i64, confirm: impl Fn(i64) -> bool, win: impl Fn(i64) -> bool) -> Vec<TradeOutcome> {
        (0..n)
            .map(|i| {
                let exit = if win(i) { 1.1010 } else { 1.0990 };
                let signal = if confirm(i) { IndicatorSignal::Bullish } else { IndicatorSignal::Bearish };
                TradeOutcome::new(&format!("t{i}"), "EUR/USD", Direction::Long, 1.1000, exit, i * 60_000, "a")
                    .with_signal(IndicatorKey::Rsi, signal)
                    .with_context("london", "trending expansion")
            })
            .collect()
    }

    #[test]
    fn test_partition_stats_lift_against_own_baseline() {
        let trades = history(10, |i| i < 4, |i| i < 4 || i == 9);
        let refs: Vec<&TradeOutcome> = trades.iter().collect();
        let stats = PartitionStats::measure(&refs, IndicatorKey::Rsi);
        assert_eq!(stats.confirming, 4);
        assert_eq!(stats.confirming_wins, 4);
        assert!((stats.baseline_win_rate - 0.5).abs() < 1e-9);
        assert!((stats.lift - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_consistent_edge_is_validated_signal() {
        // Confirming trades win 3 of 4, the rest lose.
        let trades = history(90, |i| i % 2 == 0, |i| i % 2 == 0 && i % 8 != 0);
        let profile = learn_pair_profile(&trades, "EURUSD", &LearningConfig::default());
        let rsi = &profile.indicators[&IndicatorKey::Rsi];
        assert_eq!(rsi.quality, Quality::Signal);
        assert!(rsi.oos_validated);
        assert!(rsi.weight > 0.6 && rsi.weight <= 1.0);
        assert_eq!(profile.signal_indicators(), vec![IndicatorKey::Rsi]);
    }

    #[test]
    fn test_decaying_edge_is_noise() {
        // Confirmation helps early and hurts late.
        let trades = history(90, |i| i % 2 == 0, |i| if i < 60 { i % 2 == 0 } else { i % 2 == 1 });
        let profile = learn_pair_profile(&trades, "EUR_USD", &LearningConfig::default());
        let rsi = &profile.indicators[&IndicatorKey::Rsi];
        assert_eq!(rsi.quality, Quality::Noise);
        assert!(rsi.in_sample.lift > 0.0);
        assert!(rsi.out_of_sample.lift < 0.0);
        assert!(rsi.weight >= 0.05 && rsi.weight < 0.5);
    }

    #[test]
    fn test_thin_oos_falls_back_unvalidated() {
        // Confirmations only in the first two thirds.
        let trades = history(30, |i| i < 20 && i % 2 == 0, |i| i < 20 && i % 2 == 0);
        let profile = learn_pair_profile(&trades, "EUR_USD", &LearningConfig::default());
        let rsi = &profile.indicators[&IndicatorKey::Rsi];
        assert!(rsi.sample_sufficient);
        assert!(!rsi.oos_validated);
        assert_eq!(rsi.quality, Quality::Signal);
        assert!(rsi.weight <= 0.8);
    }

    #[test]
    fn test_thin_in_sample_falls_back_to_full_history() {
        // 8 confirmations before the cut, 6 after: neither partition alone
        // reaches the in-sample minimum, together they do.
        let confirm = |i: i64| (i < 16 && i % 2 == 0) || (20..26).contains(&i);
        let trades = history(30, confirm, confirm);
        let profile = learn_pair_profile(&trades, "EUR_USD", &LearningConfig::default());
        let rsi = &profile.indicators[&IndicatorKey::Rsi];
        assert_eq!(rsi.in_sample.confirming, 8);
        assert_eq!(rsi.out_of_sample.confirming, 6);
        assert!(rsi.sample_sufficient);
        assert!(!rsi.oos_validated);
        assert_eq!(rsi.quality, Quality::Signal);
        assert!(rsi.weight > 0.6 && rsi.weight <= 0.8);
    }

    #[test]
    fn test_too_few_confirmations_is_neutral_insufficient() {
        let trades = history(30, |i| i < 4, |_| true);
        let profile = learn_pair_profile(&trades, "EUR_USD", &LearningConfig::default());
        let rsi = &profile.indicators[&IndicatorKey::Rsi];
        assert_eq!(rsi.quality, Quality::Neutral);
        assert!(!rsi.sample_sufficient);
        assert_eq!(profile.weight_for(IndicatorKey::Rsi, None), 0.5);
    }

    #[test]
    fn test_malformed_trades_are_skipped() {
        let mut trades = history(12, |_| true, |_| true);
        trades.push(TradeOutcome::new("bad", "EUR_USD", Direction::Long, f64::NAN, 1.1, 0, "a"));
        trades.push(TradeOutcome::new("dir", "EUR_USD", Direction::Unknown, 1.1, 1.2, 0, "a"));
        trades.push(TradeOutcome::new("other", "GBP_USD", Direction::Long, 1.1, 1.2, 0, "a"));
        let profile = learn_pair_profile(&trades, "EUR_USD", &LearningConfig::default());
        assert_eq!(profile.trades, 12);
        assert_eq!(profile.skipped, 2);
    }

    #[test]
    fn test_noise_weight_respects_floor() {
        let cfg = LearningConfig::default();
        let w = soft_weight(Quality::Noise, -0.9, true, &cfg);
        assert_eq!(w, cfg.noise_floor);
        let w = soft_weight(Quality::Noise, -0.03, false, &cfg);
        assert!(w < 0.5 && w >= cfg.noise_floor);
    }

    #[test]
    fn test_regime_weight_preferred_over_global() {
        let mut trades = history(90, |i| i % 2 == 0, |i| i % 2 == 0 && i % 8 != 0);
        // A ranging bucket where RSI confirmations lose.
        for i in 0..30 {
            let exit = if i % 2 == 0 { 1.0990 } else { 1.1010 };
            let signal = if i % 2 == 0 { IndicatorSignal::Bullish } else { IndicatorSignal::Bearish };
            trades.push(
                TradeOutcome::new(&format!("r{i}"), "EUR_USD", Direction::Long, 1.1, exit, (100 + i) * 60_000, "a")
                    .with_signal(IndicatorKey::Rsi, signal)
                    .with_context("london", "ranging compression"),
            );
        }
        let profile = learn_pair_profile(&trades, "EUR_USD", &LearningConfig::default());
        let ranging = bucket_for_label("ranging compression");
        let trending = bucket_for_label("trending expansion");

        assert!(profile.weight_for(IndicatorKey::Rsi, ranging) < 0.5);
        assert!(profile.weight_for(IndicatorKey::Rsi, trending) > 0.6);
        assert_eq!(profile.noise_indicators_for(ranging), vec![IndicatorKey::Rsi]);
        // Unseen indicator resolves to neutral.
        assert_eq!(profile.weight_for(IndicatorKey::Macd, ranging), 0.5);
    }

    #[test]
    fn test_adaptive_weights_respect_kill_switch() {
        let trades = history(90, |i| i % 2 == 0, |i| i % 2 == 0);
        let profile = learn_pair_profile(&trades, "EUR_USD", &LearningConfig::default());
        let mut state = SessionState::default();
        assert!(profile.adaptive_weights(&state, "trending").is_some());
        state.set_adaptive_learning(false);
        assert!(profile.adaptive_weights(&state, "trending").is_none());
    }

    #[test]
    fn test_quality_score_bounds() {
        let trades = history(120, |i| i % 2 == 0, |i| i % 2 == 0);
        let profile = learn_pair_profile(&trades, "EUR_USD", &LearningConfig::default());
        assert!(profile.quality_score > 50.0 && profile.quality_score <= 100.0);
        assert_eq!(quality_score(&BTreeMap::new(), 0), 0.0);
    }

    #[test]
    fn test_learn_all_pairs_keys_by_normalized_symbol() {
        let mut trades = history(12, |_| true, |_| true);
        trades.push(TradeOutcome::new("g", "gbp-usd", Direction::Long, 1.2, 1.3, 0, "a"));
        let profiles = learn_all_pairs(&trades, &LearningConfig::default());
        let keys: Vec<&String> = profiles.keys().collect();
        assert_eq!(keys, vec!["EUR_USD", "GBP_USD"]);
    }
}
