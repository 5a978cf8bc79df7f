//! Configuration surface.
//!
//! Every threshold the pipeline uses lives here. Defaults match the
//! documented behaviour; `Config::from_env()` overrides them from the
//! environment and `validate()` refuses inconsistent combinations.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::logging::{log, obj, v_str, Domain, Level};

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// A duration given in `unit_ms` units; values that overflow the
/// millisecond range keep the default.
fn env_ms(key: &str, unit_ms: i64, default_ms: i64) -> i64 {
    env_or::<i64>(key, default_ms / unit_ms).checked_mul(unit_ms).unwrap_or(default_ms)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

// =============================================================================
// Indicator learning
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Minimum confirming trades in the in-sample partition
    pub min_in_sample: usize,
    /// Minimum confirming trades in the out-of-sample partition
    pub min_oos: usize,
    /// Share of the chronologically ordered history used for training
    pub train_fraction: f64,
    pub signal_oos_lift: f64,
    pub signal_in_sample_lift: f64,
    pub noise_oos_lift: f64,
    pub noise_floor: f64,
    pub signal_base_weight: f64,
    pub neutral_weight: f64,
    pub validated_gain: f64,
    pub unvalidated_gain: f64,
    pub validated_weight_cap: f64,
    pub unvalidated_weight_cap: f64,
    /// Trades a regime bucket needs before it gets its own sub-profile
    pub min_regime_trades: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_in_sample: 10,
            min_oos: 5,
            train_fraction: 2.0 / 3.0,
            signal_oos_lift: 0.02,
            signal_in_sample_lift: 0.0,
            noise_oos_lift: -0.03,
            noise_floor: 0.05,
            signal_base_weight: 0.6,
            neutral_weight: 0.5,
            validated_gain: 5.0,
            unvalidated_gain: 2.5,
            validated_weight_cap: 1.0,
            unvalidated_weight_cap: 0.8,
            min_regime_trades: 5,
        }
    }
}

impl LearningConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            min_in_sample: env_or("LEARN_MIN_IN_SAMPLE", d.min_in_sample),
            min_oos: env_or("LEARN_MIN_OOS", d.min_oos),
            train_fraction: env_or("LEARN_TRAIN_FRACTION", d.train_fraction),
            signal_oos_lift: env_or("LEARN_SIGNAL_LIFT", d.signal_oos_lift),
            signal_in_sample_lift: env_or("LEARN_SIGNAL_IS_LIFT", d.signal_in_sample_lift),
            noise_oos_lift: env_or("LEARN_NOISE_LIFT", d.noise_oos_lift),
            noise_floor: env_or("LEARN_NOISE_FLOOR", d.noise_floor),
            signal_base_weight: env_or("LEARN_SIGNAL_BASE_WEIGHT", d.signal_base_weight),
            neutral_weight: d.neutral_weight,
            validated_gain: env_or("LEARN_VALIDATED_GAIN", d.validated_gain),
            unvalidated_gain: env_or("LEARN_UNVALIDATED_GAIN", d.unvalidated_gain),
            validated_weight_cap: env_or("LEARN_VALIDATED_CAP", d.validated_weight_cap),
            unvalidated_weight_cap: env_or("LEARN_UNVALIDATED_CAP", d.unvalidated_weight_cap),
            min_regime_trades: env_or("LEARN_MIN_REGIME_TRADES", d.min_regime_trades),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.min_in_sample == 0 || self.min_oos == 0 || self.min_regime_trades == 0 {
            bail!("learning sample minimums must be positive");
        }
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            bail!("train_fraction must be in (0, 1), got {}", self.train_fraction);
        }
        if !(self.noise_floor > 0.0 && self.noise_floor < self.neutral_weight) {
            bail!(
                "noise_floor must be in (0, {}), got {}",
                self.neutral_weight,
                self.noise_floor
            );
        }
        if self.signal_oos_lift <= self.noise_oos_lift || self.noise_oos_lift >= 0.0 {
            bail!(
                "lift thresholds inconsistent: signal {} noise {}",
                self.signal_oos_lift,
                self.noise_oos_lift
            );
        }
        if self.signal_base_weight <= self.neutral_weight
            || self.unvalidated_weight_cap < self.signal_base_weight
            || self.validated_weight_cap < self.unvalidated_weight_cap
        {
            bail!("signal weight base/caps must satisfy neutral < base <= unvalidated cap <= validated cap");
        }
        if self.validated_gain <= 0.0 || self.unvalidated_gain <= 0.0 {
            bail!("weight gains must be positive");
        }
        Ok(())
    }
}

// =============================================================================
// Agent collaboration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollabConfig {
    pub pairing_window_ms: i64,
    pub soft_min_trades: usize,
    pub hard_min_trades: usize,
    pub soft_min_multiplier: f64,
    pub soft_max_multiplier: f64,
    pub hard_min_multiplier: f64,
    pub hard_max_multiplier: f64,
    /// Multiplier change per unit of paired-minus-solo win rate
    pub adjustment_gain: f64,
    /// Minimum probability change for an adjustment to flip a decision
    pub flip_margin: f64,
    /// Maximum share of decisions flipped inside the budget window
    pub flip_budget_ratio: f64,
    pub flip_budget_window_ms: i64,
    /// Changed decisions kept for the safety rollback check
    pub rollback_lookback: usize,
    /// Relative underperformance that disables soft influence
    pub rollback_threshold: f64,
    /// Pips of paired-over-solo expectancy needed for a synergy label
    pub synergy_margin_pips: f64,
    /// Conflict rate at which a pair is labelled conflicted
    pub conflict_rate_limit: f64,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            pairing_window_ms: 20 * 60 * 1000,
            soft_min_trades: 10,
            hard_min_trades: 40,
            soft_min_multiplier: 0.9,
            soft_max_multiplier: 1.1,
            hard_min_multiplier: 0.75,
            hard_max_multiplier: 1.25,
            adjustment_gain: 1.0,
            flip_margin: 0.02,
            flip_budget_ratio: 0.10,
            flip_budget_window_ms: 24 * 60 * 60 * 1000,
            rollback_lookback: 50,
            rollback_threshold: 0.20,
            synergy_margin_pips: 0.5,
            conflict_rate_limit: 0.5,
        }
    }
}

impl CollabConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            pairing_window_ms: env_ms("PAIR_WINDOW_MINS", 60_000, d.pairing_window_ms),
            soft_min_trades: env_or("SOFT_MIN_TRADES", d.soft_min_trades),
            hard_min_trades: env_or("HARD_MIN_TRADES", d.hard_min_trades),
            soft_min_multiplier: env_or("SOFT_CLAMP_LO", d.soft_min_multiplier),
            soft_max_multiplier: env_or("SOFT_CLAMP_HI", d.soft_max_multiplier),
            hard_min_multiplier: env_or("HARD_CLAMP_LO", d.hard_min_multiplier),
            hard_max_multiplier: env_or("HARD_CLAMP_HI", d.hard_max_multiplier),
            adjustment_gain: env_or("COLLAB_GAIN", d.adjustment_gain),
            flip_margin: env_or("FLIP_MARGIN", d.flip_margin),
            flip_budget_ratio: env_or("FLIP_BUDGET", d.flip_budget_ratio),
            flip_budget_window_ms: env_ms("FLIP_BUDGET_HOURS", 3_600_000, d.flip_budget_window_ms),
            rollback_lookback: env_or("ROLLBACK_LOOKBACK", d.rollback_lookback),
            rollback_threshold: env_or("ROLLBACK_THRESHOLD", d.rollback_threshold),
            synergy_margin_pips: env_or("SYNERGY_MARGIN_PIPS", d.synergy_margin_pips),
            conflict_rate_limit: env_or("CONFLICT_RATE_LIMIT", d.conflict_rate_limit),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.pairing_window_ms <= 0 {
            bail!("pairing window must be positive");
        }
        if self.soft_min_trades == 0 || self.soft_min_trades >= self.hard_min_trades {
            bail!(
                "tier thresholds must satisfy 0 < soft ({}) < hard ({})",
                self.soft_min_trades,
                self.hard_min_trades
            );
        }
        validate_bounds(
            self.soft_min_multiplier,
            self.soft_max_multiplier,
            self.hard_min_multiplier,
            self.hard_max_multiplier,
        )?;
        if !(0.0..=1.0).contains(&self.flip_margin) || !(0.0..=1.0).contains(&self.flip_budget_ratio) {
            bail!("flip margin and flip budget must be in [0, 1]");
        }
        if self.flip_budget_window_ms <= 0 {
            bail!("flip budget window must be positive");
        }
        validate_rollback(self.rollback_lookback, self.rollback_threshold)
    }
}

fn validate_bounds(soft_lo: f64, soft_hi: f64, hard_lo: f64, hard_hi: f64) -> Result<()> {
    if !(soft_lo <= 1.0 && soft_hi >= 1.0) {
        bail!("soft clamp [{soft_lo}, {soft_hi}] must contain 1.0");
    }
    if !(hard_lo > 0.0 && hard_lo <= soft_lo && hard_hi >= soft_hi) {
        bail!("hard clamp [{hard_lo}, {hard_hi}] must be positive and contain the soft clamp");
    }
    Ok(())
}

fn validate_rollback(lookback: usize, threshold: f64) -> Result<()> {
    if lookback == 0 {
        bail!("rollback lookback must be positive");
    }
    if !(threshold > 0.0 && threshold <= 1.0) {
        bail!("rollback threshold must be in (0, 1], got {threshold}");
    }
    Ok(())
}

// =============================================================================
// Coalitions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalitionConfig {
    pub soft_min_trades: usize,
    pub hard_min_trades: usize,
    pub soft_min_multiplier: f64,
    pub soft_max_multiplier: f64,
    pub hard_min_multiplier: f64,
    pub hard_max_multiplier: f64,
    pub adjustment_gain: f64,
    /// Band half-width per standard error of the coalition win rate
    pub band_gain: f64,
    /// Harm rate above which a coalition is never boosted
    pub max_harm_rate: f64,
    pub rollback_lookback: usize,
    pub rollback_threshold: f64,
}

impl Default for CoalitionConfig {
    fn default() -> Self {
        Self {
            soft_min_trades: 10,
            hard_min_trades: 40,
            soft_min_multiplier: 0.9,
            soft_max_multiplier: 1.1,
            hard_min_multiplier: 0.75,
            hard_max_multiplier: 1.25,
            adjustment_gain: 1.0,
            band_gain: 1.0,
            max_harm_rate: 0.6,
            rollback_lookback: 50,
            rollback_threshold: 0.20,
        }
    }
}

impl CoalitionConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            soft_min_trades: env_or("COALITION_SOFT_MIN_TRADES", d.soft_min_trades),
            hard_min_trades: env_or("COALITION_HARD_MIN_TRADES", d.hard_min_trades),
            soft_min_multiplier: env_or("COALITION_SOFT_CLAMP_LO", d.soft_min_multiplier),
            soft_max_multiplier: env_or("COALITION_SOFT_CLAMP_HI", d.soft_max_multiplier),
            hard_min_multiplier: env_or("COALITION_HARD_CLAMP_LO", d.hard_min_multiplier),
            hard_max_multiplier: env_or("COALITION_HARD_CLAMP_HI", d.hard_max_multiplier),
            adjustment_gain: env_or("COALITION_GAIN", d.adjustment_gain),
            band_gain: env_or("COALITION_BAND_GAIN", d.band_gain),
            max_harm_rate: env_or("COALITION_MAX_HARM", d.max_harm_rate),
            rollback_lookback: env_or("COALITION_ROLLBACK_LOOKBACK", d.rollback_lookback),
            rollback_threshold: env_or("COALITION_ROLLBACK_THRESHOLD", d.rollback_threshold),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.soft_min_trades == 0 || self.soft_min_trades >= self.hard_min_trades {
            bail!("coalition tier thresholds must satisfy 0 < soft < hard");
        }
        validate_bounds(
            self.soft_min_multiplier,
            self.soft_max_multiplier,
            self.hard_min_multiplier,
            self.hard_max_multiplier,
        )?;
        if !(0.0..=1.0).contains(&self.max_harm_rate) {
            bail!("max_harm_rate must be in [0, 1]");
        }
        validate_rollback(self.rollback_lookback, self.rollback_threshold)
    }
}

// =============================================================================
// Governance gates
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    Normal,
    LongOnly,
    ShortOnly,
    Halted,
}

impl FromStr for TradingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "normal" | "both" => Ok(TradingMode::Normal),
            "long_only" | "long" => Ok(TradingMode::LongOnly),
            "short_only" | "short" => Ok(TradingMode::ShortOnly),
            "halted" | "halt" | "off" => Ok(TradingMode::Halted),
            other => bail!("unknown trading mode: {other:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub trading_mode: TradingMode,
    /// Physical ceilings for unit validation, in pips
    pub max_spread_pips: f64,
    pub max_atr_pips: f64,
    pub max_friction_pips: f64,
    /// Friction above this share of ATR throttles the proposal
    pub max_friction_atr_ratio: f64,
    pub friction_penalty: f64,
    /// Consensus alignment below this throttles
    pub min_alignment: f64,
    /// Consensus alignment below this rejects
    pub reject_alignment: f64,
    pub alignment_penalty: f64,
    pub exhaustion_penalty: f64,
    pub liquidity_shock_throttle: f64,
    pub liquidity_shock_reject: f64,
    pub liquidity_penalty: f64,
    pub min_session_aggressiveness: f64,
    pub session_penalty: f64,
    /// Consecutive losses in the current sequencing cluster that throttle
    pub max_cluster_losses: u32,
    /// Consecutive losses that reject outright
    pub reject_cluster_losses: u32,
    pub cluster_penalty: f64,
    /// Adjusted win probability below this rejects
    pub min_win_probability: f64,
    /// Probability factor per 100 points of consensus alignment
    pub consensus_influence: f64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Normal,
            max_spread_pips: 50.0,
            max_atr_pips: 1000.0,
            max_friction_pips: 50.0,
            max_friction_atr_ratio: 0.25,
            friction_penalty: 0.85,
            min_alignment: -15.0,
            reject_alignment: -60.0,
            alignment_penalty: 0.85,
            exhaustion_penalty: 0.8,
            liquidity_shock_throttle: 0.3,
            liquidity_shock_reject: 0.6,
            liquidity_penalty: 0.75,
            min_session_aggressiveness: 0.3,
            session_penalty: 0.9,
            max_cluster_losses: 3,
            reject_cluster_losses: 6,
            cluster_penalty: 0.8,
            min_win_probability: 0.40,
            consensus_influence: 0.1,
        }
    }
}

impl GovernanceConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let trading_mode = match std::env::var("TRADING_MODE") {
            Ok(raw) => raw.parse().unwrap_or_else(|err: anyhow::Error| {
                log(
                    Level::Warn,
                    Domain::Config,
                    "invalid_trading_mode",
                    obj(&[("msg", v_str(&err.to_string())), ("fallback", v_str("halted"))]),
                );
                TradingMode::Halted
            }),
            Err(_) => d.trading_mode,
        };
        Self {
            trading_mode,
            max_spread_pips: env_or("MAX_SPREAD_PIPS", d.max_spread_pips),
            max_atr_pips: env_or("MAX_ATR_PIPS", d.max_atr_pips),
            max_friction_pips: env_or("MAX_FRICTION_PIPS", d.max_friction_pips),
            max_friction_atr_ratio: env_or("MAX_FRICTION_ATR", d.max_friction_atr_ratio),
            friction_penalty: d.friction_penalty,
            min_alignment: env_or("MIN_ALIGNMENT", d.min_alignment),
            reject_alignment: env_or("REJECT_ALIGNMENT", d.reject_alignment),
            alignment_penalty: d.alignment_penalty,
            exhaustion_penalty: d.exhaustion_penalty,
            liquidity_shock_throttle: env_or("LIQ_SHOCK_THROTTLE", d.liquidity_shock_throttle),
            liquidity_shock_reject: env_or("LIQ_SHOCK_REJECT", d.liquidity_shock_reject),
            liquidity_penalty: d.liquidity_penalty,
            min_session_aggressiveness: env_or("MIN_SESSION_AGGR", d.min_session_aggressiveness),
            session_penalty: d.session_penalty,
            max_cluster_losses: env_or("MAX_CLUSTER_LOSSES", d.max_cluster_losses),
            reject_cluster_losses: env_or("REJECT_CLUSTER_LOSSES", d.reject_cluster_losses),
            cluster_penalty: d.cluster_penalty,
            min_win_probability: env_or("MIN_WIN_PROB", d.min_win_probability),
            consensus_influence: env_or("CONSENSUS_INFLUENCE", d.consensus_influence),
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("max_spread_pips", self.max_spread_pips),
            ("max_atr_pips", self.max_atr_pips),
            ("max_friction_pips", self.max_friction_pips),
            ("max_friction_atr_ratio", self.max_friction_atr_ratio),
        ] {
            if !(v.is_finite() && v > 0.0) {
                bail!("{name} must be finite and positive, got {v}");
            }
        }
        for (name, v) in [
            ("friction_penalty", self.friction_penalty),
            ("alignment_penalty", self.alignment_penalty),
            ("exhaustion_penalty", self.exhaustion_penalty),
            ("liquidity_penalty", self.liquidity_penalty),
            ("session_penalty", self.session_penalty),
            ("cluster_penalty", self.cluster_penalty),
        ] {
            if !(v > 0.0 && v <= 1.0) {
                bail!("{name} must be in (0, 1], got {v}");
            }
        }
        if self.reject_alignment > self.min_alignment {
            bail!("reject_alignment must not exceed min_alignment");
        }
        if self.liquidity_shock_throttle > self.liquidity_shock_reject {
            bail!("liquidity shock throttle threshold must not exceed the reject threshold");
        }
        if self.max_cluster_losses > self.reject_cluster_losses {
            bail!("max_cluster_losses must not exceed reject_cluster_losses");
        }
        if !(0.0..=1.0).contains(&self.min_win_probability) || !(0.0..=1.0).contains(&self.consensus_influence) {
            bail!("min_win_probability and consensus_influence must be in [0, 1]");
        }
        Ok(())
    }
}

// =============================================================================
// Aggregate
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub learning: LearningConfig,
    pub collab: CollabConfig,
    pub coalition: CoalitionConfig,
    pub governance: GovernanceConfig,
    /// Start with adaptive learning switched on
    pub adaptive_learning: bool,
    /// Start with collaboration/coalition boosting switched on
    pub collaboration_boosting: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            learning: LearningConfig::default(),
            collab: CollabConfig::default(),
            coalition: CoalitionConfig::default(),
            governance: GovernanceConfig::default(),
            adaptive_learning: true,
            collaboration_boosting: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            learning: LearningConfig::from_env(),
            collab: CollabConfig::from_env(),
            coalition: CoalitionConfig::from_env(),
            governance: GovernanceConfig::from_env(),
            adaptive_learning: env_flag("ADAPTIVE_LEARNING", true),
            collaboration_boosting: env_flag("COLLAB_BOOSTING", true),
        }
    }

    /// Reject configurations that would break the pipeline's invariants.
    pub fn validate(&self) -> Result<()> {
        self.learning.validate()?;
        self.collab.validate()?;
        self.coalition.validate()?;
        self.governance.validate()?;
        Ok(())
    }
}
