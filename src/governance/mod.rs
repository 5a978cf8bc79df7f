//! Trade governance: the last word on a proposal.
//!
//! Gates run in strict priority. Unit validation comes first and ends the
//! evaluation on failure, so garbage inputs never reach a statistical gate.
//! Policy gates come next, then statistical and risk gates. A gate either
//! passes silently or appends a result that rejects or throttles; throttles
//! multiply into the adjusted probability and can only lower it.

pub mod gates;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::collab::router::AuthorityAdjustment;
use crate::config::GovernanceConfig;
use crate::consensus::ConsensusScore;
use crate::logging::{log_decision, log_gate};
use crate::regime::VolatilityPhase;
use crate::trade::Direction;

use gates::*;

const PROBABILITY_WEIGHT: f64 = 0.7;
const ALIGNMENT_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub id: String,
    pub pair: String,
    pub direction: Direction,
    /// Agent's own win probability before governance
    pub base_probability: f64,
    #[serde(default)]
    pub agent_id: String,
}

impl TradeProposal {
    pub fn new(id: &str, pair: &str, direction: Direction, base_probability: f64) -> Self {
        Self {
            id: id.to_string(),
            pair: pair.to_string(),
            direction,
            base_probability,
            agent_id: String::new(),
        }
    }
}

/// Market and session context at proposal time. Costs are in pips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSnapshot {
    pub spread_pips: f64,
    pub atr_pips: f64,
    /// Spread plus commission plus expected slippage
    pub friction_pips: f64,
    /// Consensus score from the proposal's side, [-100, 100]
    pub consensus_alignment: f64,
    pub volatility_phase: Option<VolatilityPhase>,
    pub liquidity_shock_probability: f64,
    /// 0 = dead session, 1 = most active
    pub session_aggressiveness: f64,
    /// Consecutive losses in the current sequencing cluster
    pub cluster_losses: u32,
}

impl Default for ContextSnapshot {
    fn default() -> Self {
        Self {
            spread_pips: 1.0,
            atr_pips: 20.0,
            friction_pips: 1.5,
            consensus_alignment: 0.0,
            volatility_phase: None,
            liquidity_shock_probability: 0.0,
            session_aggressiveness: 0.7,
            cluster_losses: 0,
        }
    }
}

impl ContextSnapshot {
    pub fn with_consensus(mut self, consensus: &ConsensusScore) -> Self {
        self.consensus_alignment = consensus.alignment;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateId {
    UnitConsistency,
    LongOnly,
    ShortOnly,
    Halted,
    FrictionCost,
    ConsensusAlignment,
    VolatilityPhase,
    LiquidityShock,
    SessionAggressiveness,
    SequencingCluster,
    MinimumProbability,
}

impl GateId {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateId::UnitConsistency => "unit_consistency",
            GateId::LongOnly => "long_only",
            GateId::ShortOnly => "short_only",
            GateId::Halted => "halted",
            GateId::FrictionCost => "friction_cost",
            GateId::ConsensusAlignment => "consensus_alignment",
            GateId::VolatilityPhase => "volatility_phase",
            GateId::LiquidityShock => "liquidity_shock",
            GateId::SessionAggressiveness => "session_aggressiveness",
            GateId::SequencingCluster => "sequencing_cluster",
            GateId::MinimumProbability => "minimum_probability",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateEffect {
    Reject,
    Throttle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub gate: GateId,
    pub passed: bool,
    pub effect: GateEffect,
    /// Multiplicative confidence penalty; 1.0 for rejections
    pub penalty: f64,
    pub message: String,
}

impl GateResult {
    pub fn reject(gate: GateId, message: String) -> Self {
        Self { gate, passed: false, effect: GateEffect::Reject, penalty: 1.0, message }
    }

    pub fn throttle(gate: GateId, penalty: f64, message: String) -> Self {
        debug_assert!(penalty > 0.0 && penalty <= 1.0);
        Self { gate, passed: false, effect: GateEffect::Throttle, penalty, message }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Throttled,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Throttled => "throttled",
            Decision::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceDecision {
    pub proposal_id: String,
    pub decision: Decision,
    /// Base probability with consensus and authority applied
    pub unthrottled_probability: f64,
    /// Unthrottled probability times every gate penalty
    pub adjusted_probability: f64,
    pub composite_score: f64,
    pub authority_multiplier: f64,
    pub gates: Vec<GateResult>,
    /// First rejecting gate's message
    pub reason: Option<String>,
    pub audit_hash: String,
}

impl GovernanceDecision {
    pub fn triggered(&self) -> Vec<GateId> {
        self.gates.iter().map(|g| g.gate).collect()
    }

    pub fn is_rejected(&self) -> bool {
        self.decision == Decision::Rejected
    }
}

/// 100 × (0.7 × probability + 0.3 × alignment mapped onto [0, 1]).
pub fn composite_score(probability: f64, alignment: f64) -> f64 {
    let normalized = ((alignment + 100.0) / 200.0).clamp(0.0, 1.0);
    100.0 * (PROBABILITY_WEIGHT * probability + ALIGNMENT_WEIGHT * normalized)
}

fn audit_hash(proposal_id: &str, decision: Decision, gates: &[GateResult]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(proposal_id.as_bytes());
    hasher.update(b"|");
    hasher.update(decision.as_str().as_bytes());
    for gate in gates {
        hasher.update(b"|");
        hasher.update(gate.gate.as_str().as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn finish(
    proposal: &TradeProposal,
    gates: Vec<GateResult>,
    unthrottled: f64,
    adjusted: f64,
    composite: f64,
    authority_multiplier: f64,
) -> GovernanceDecision {
    let decision = if gates.iter().any(|g| g.effect == GateEffect::Reject) {
        Decision::Rejected
    } else if gates.is_empty() {
        Decision::Approved
    } else {
        Decision::Throttled
    };
    let reason = gates
        .iter()
        .find(|g| g.effect == GateEffect::Reject)
        .map(|g| format!("{}: {}", g.gate.as_str(), g.message));

    for gate in &gates {
        let effect = match gate.effect {
            GateEffect::Reject => "reject",
            GateEffect::Throttle => "throttle",
        };
        log_gate(&proposal.id, gate.gate.as_str(), effect, &gate.message);
    }
    let triggered: Vec<&str> = gates.iter().map(|g| g.gate.as_str()).collect();
    log_decision(&proposal.id, decision.as_str(), composite, adjusted, &triggered);

    GovernanceDecision {
        proposal_id: proposal.id.clone(),
        decision,
        unthrottled_probability: unthrottled,
        adjusted_probability: adjusted,
        composite_score: composite,
        authority_multiplier,
        audit_hash: audit_hash(&proposal.id, decision, &gates),
        gates,
        reason,
    }
}

/// Run the gate chain over one proposal.
///
/// `authority` is the composed collaboration/coalition adjustment for the
/// proposing agent; inactive or absent adjustments count as 1.0.
pub fn evaluate(
    proposal: &TradeProposal,
    ctx: &ContextSnapshot,
    authority: Option<&AuthorityAdjustment>,
    cfg: &GovernanceConfig,
) -> GovernanceDecision {
    let authority_multiplier = authority.filter(|a| a.is_active()).map(|a| a.multiplier).unwrap_or(1.0);

    if let Some(unit) = check_units(proposal, ctx, authority_multiplier, cfg) {
        return finish(proposal, vec![unit], 0.0, 0.0, 0.0, authority_multiplier);
    }

    let mut gates: Vec<GateResult> = Vec::new();
    if let Some(policy) = check_policy(proposal.direction, cfg.trading_mode) {
        gates.push(policy);
    }

    let consensus_factor = 1.0 + ctx.consensus_alignment / 100.0 * cfg.consensus_influence;
    let unthrottled = (proposal.base_probability * consensus_factor * authority_multiplier).clamp(0.0, 1.0);

    gates.extend(
        [
            check_friction(ctx, cfg),
            check_alignment(ctx, cfg),
            check_volatility_phase(ctx, cfg),
            check_liquidity(ctx, cfg),
            check_session(ctx, cfg),
            check_sequencing(ctx, cfg),
        ]
        .into_iter()
        .flatten(),
    );

    let penalty: f64 = gates.iter().map(|g| g.penalty).product();
    let adjusted = (unthrottled * penalty).clamp(0.0, unthrottled);
    if let Some(min_prob) = check_min_probability(adjusted, cfg) {
        gates.push(min_prob);
    }

    let composite = composite_score(adjusted, ctx.consensus_alignment);
    debug_assert!(composite <= composite_score(unthrottled, ctx.consensus_alignment) + 1e-9);
    finish(proposal, gates, unthrottled, adjusted, composite, authority_multiplier)
}
