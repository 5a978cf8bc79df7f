//! Authority routing.
//!
//! Pair statistics become a multiplicative adjustment on an agent's win
//! probability. How far the adjustment may move is bounded by the evidence
//! tier; whether it may change a decision is bounded by the flip margin and
//! the rolling flip budget.

use serde::{Deserialize, Serialize};

use crate::collab::pairing::AgentPairStatistics;
use crate::config::CollabConfig;
use crate::logging::{log, log_budget, obj, v_num, v_str, Domain, Level};
use crate::reliability::state::SessionState;
use crate::signature::EnvironmentKey;

/// Evidence tier. Ordered: None < Soft < Hard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfluenceTier {
    None,
    Soft,
    Hard,
}

impl InfluenceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            InfluenceTier::None => "none",
            InfluenceTier::Soft => "soft",
            InfluenceTier::Hard => "hard",
        }
    }
}

pub fn tier_for(samples: usize, soft_min: usize, hard_min: usize) -> InfluenceTier {
    if samples >= hard_min {
        InfluenceTier::Hard
    } else if samples >= soft_min {
        InfluenceTier::Soft
    } else {
        InfluenceTier::None
    }
}

/// Multiplier bounds for a tier. `None` pins the multiplier at 1.
pub fn tier_bounds(tier: InfluenceTier, cfg: &CollabConfig) -> (f64, f64) {
    match tier {
        InfluenceTier::None => (1.0, 1.0),
        InfluenceTier::Soft => (cfg.soft_min_multiplier, cfg.soft_max_multiplier),
        InfluenceTier::Hard => (cfg.hard_min_multiplier, cfg.hard_max_multiplier),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JustificationSource {
    Pair,
    Coalition,
}

/// What evidence an adjustment rests on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Justification {
    pub source: JustificationSource,
    /// Pair (`a~b`) or coalition (`a+b+c`) key
    pub key: String,
    pub tier: InfluenceTier,
    pub samples: usize,
    pub paired_win_rate: f64,
    pub solo_win_rate: f64,
    /// Set when environment-specific statistics were used
    pub environment: Option<EnvironmentKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityAdjustment {
    pub agent_id: String,
    /// Clamped multiplier to apply
    pub multiplier: f64,
    /// Multiplier before tier clamping
    pub raw_multiplier: f64,
    pub tier: InfluenceTier,
    pub justification: Vec<Justification>,
    /// Why evidence was present but no influence applied
    pub disabled_reason: Option<String>,
}

impl AuthorityAdjustment {
    pub fn neutral(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            multiplier: 1.0,
            raw_multiplier: 1.0,
            tier: InfluenceTier::None,
            justification: Vec::new(),
            disabled_reason: None,
        }
    }

    fn disabled(mut self, reason: &str) -> Self {
        self.multiplier = 1.0;
        self.disabled_reason = Some(reason.to_string());
        self
    }

    pub fn is_active(&self) -> bool {
        self.tier != InfluenceTier::None && self.disabled_reason.is_none()
    }
}

/// Adjustment for `agent_id` when acting alongside `partner_id`.
///
/// Environment-specific pair statistics are used when they reach the soft
/// minimum, measured against the agent's solo baseline in that environment
/// (or its global baseline if it never traded alone there). Otherwise the
/// pair's global statistics decide.
pub fn resolve_adjustment(
    agent_id: &str,
    partner_id: &str,
    stats: &[AgentPairStatistics],
    environment: Option<&EnvironmentKey>,
    state: &SessionState,
    cfg: &CollabConfig,
) -> AuthorityAdjustment {
    let Some(pair) = stats
        .iter()
        .find(|s| s.pair.contains(agent_id) && s.pair.partner_of(agent_id) == Some(partner_id))
    else {
        return AuthorityAdjustment::neutral(agent_id);
    };
    let Some(solo) = pair.solo_for(agent_id) else {
        return AuthorityAdjustment::neutral(agent_id);
    };

    let env_stats = environment
        .and_then(|env| pair.environments.get(env).map(|s| (env, s)))
        .filter(|(_, s)| s.paired.trades >= cfg.soft_min_trades);
    let (paired, solo, env_used) = match env_stats {
        Some((env, s)) => {
            let solo = pair.environment_solo_for(env, agent_id).unwrap_or(solo);
            (&s.paired, solo, Some(env.clone()))
        }
        None => (&pair.paired, solo, None),
    };

    let tier = tier_for(paired.trades, cfg.soft_min_trades, cfg.hard_min_trades);
    let raw = if solo.trades > 0 {
        1.0 + cfg.adjustment_gain * (paired.win_rate - solo.win_rate)
    } else {
        1.0
    };
    let (lo, hi) = tier_bounds(tier, cfg);
    let adjustment = AuthorityAdjustment {
        agent_id: agent_id.to_string(),
        multiplier: raw.clamp(lo, hi),
        raw_multiplier: raw,
        tier,
        justification: vec![Justification {
            source: JustificationSource::Pair,
            key: pair.pair.to_string(),
            tier,
            samples: paired.trades,
            paired_win_rate: paired.win_rate,
            solo_win_rate: solo.win_rate,
            environment: env_used,
        }],
        disabled_reason: None,
    };

    if tier == InfluenceTier::None {
        adjustment.disabled("insufficient_samples")
    } else if !state.collaboration_boosting_enabled() {
        adjustment.disabled("boosting_disabled")
    } else if tier == InfluenceTier::Soft && !state.soft_influence_enabled() {
        adjustment.disabled("soft_influence_rolled_back")
    } else {
        adjustment
    }
}

/// Combine adjustments for one agent: multipliers multiply, and the product
/// is clamped to the bounds of the highest contributing tier.
pub fn compose_adjustments(agent_id: &str, parts: &[AuthorityAdjustment], cfg: &CollabConfig) -> AuthorityAdjustment {
    let active: Vec<&AuthorityAdjustment> = parts.iter().filter(|a| a.is_active()).collect();
    let tier = active.iter().map(|a| a.tier).max().unwrap_or(InfluenceTier::None);
    let raw: f64 = active.iter().map(|a| a.multiplier).product();
    let (lo, hi) = tier_bounds(tier, cfg);
    AuthorityAdjustment {
        agent_id: agent_id.to_string(),
        multiplier: raw.clamp(lo, hi),
        raw_multiplier: raw,
        tier,
        justification: parts.iter().flat_map(|a| a.justification.iter().cloned()).collect(),
        disabled_reason: None,
    }
}

/// One decision put through the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub decision_id: String,
    pub agent_id: String,
    pub timestamp_ms: i64,
    pub base_probability: f64,
    /// Probability at or above which the decision is to take the trade
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    BelowFlipMargin,
    FlipBudgetExceeded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedDecision {
    pub decision_id: String,
    pub agent_id: String,
    pub timestamp_ms: i64,
    pub base_probability: f64,
    /// Probability after the adjustment, before any suppression
    pub proposed_probability: f64,
    /// Probability the decision was finally made on
    pub final_probability: f64,
    pub multiplier: f64,
    pub tier: InfluenceTier,
    pub baseline_take: bool,
    pub take: bool,
    /// Influence reversed the baseline decision
    pub flipped: bool,
    pub suppressed: Option<SuppressionReason>,
}

/// Apply an adjustment to one decision, enforcing the flip margin and the
/// flip budget. Every routed decision counts toward the budget.
pub fn route_decision(
    req: &RouteRequest,
    adjustment: &AuthorityAdjustment,
    state: &mut SessionState,
    cfg: &CollabConfig,
) -> RoutedDecision {
    let base = if req.base_probability.is_finite() { req.base_probability.clamp(0.0, 1.0) } else { 0.0 };
    let multiplier = if adjustment.is_active() { adjustment.multiplier } else { 1.0 };
    let proposed = (base * multiplier).clamp(0.0, 1.0);

    let baseline_take = base >= req.threshold;
    let proposed_take = proposed >= req.threshold;

    let mut suppressed = None;
    let mut flipped = false;
    if proposed_take != baseline_take {
        if (proposed - base).abs() < cfg.flip_margin {
            suppressed = Some(SuppressionReason::BelowFlipMargin);
        } else if !state.flip_budget_mut().allows_flip(req.timestamp_ms) {
            suppressed = Some(SuppressionReason::FlipBudgetExceeded);
            let budget = state.flip_budget();
            log_budget(&req.agent_id, budget.ratio(), budget.max_ratio());
        } else {
            flipped = true;
        }
    }

    let final_probability = if suppressed.is_some() { base } else { proposed };
    state.flip_budget_mut().record(req.timestamp_ms, flipped);

    if flipped {
        log(
            Level::Info,
            Domain::Collab,
            "decision_flipped",
            obj(&[
                ("agent_id", v_str(&req.agent_id)),
                ("decision_id", v_str(&req.decision_id)),
                ("tier", v_str(adjustment.tier.as_str())),
                ("base_probability", v_num(base)),
                ("adjusted_probability", v_num(proposed)),
            ]),
        );
    }

    RoutedDecision {
        decision_id: req.decision_id.clone(),
        agent_id: req.agent_id.clone(),
        timestamp_ms: req.timestamp_ms,
        base_probability: base,
        proposed_probability: proposed,
        final_probability,
        multiplier,
        tier: adjustment.tier,
        baseline_take,
        take: if suppressed.is_some() { baseline_take } else { proposed_take },
        flipped,
        suppressed,
    }
}

/// Feed the realized result of a routed decision to the rollback ledger.
///
/// Only soft-tier flips are recorded: hard-tier influence is never
/// auto-disabled, and decisions that were not changed say nothing about
/// influence. Returns true when this outcome disabled soft influence.
pub fn record_changed_outcome(
    state: &mut SessionState,
    routed: &RoutedDecision,
    realized_pips: f64,
    baseline_expectancy: f64,
) -> bool {
    if !routed.flipped || routed.tier != InfluenceTier::Soft {
        return false;
    }
    state.record_changed_outcome(realized_pips, baseline_expectancy)
}
