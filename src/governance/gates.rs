//! Individual gate checks.
//!
//! Each check returns `None` when the proposal passes and a `GateResult`
//! when it trips. Checks never look at each other's results; ordering and
//! accumulation live in `evaluate`.

use crate::config::{GovernanceConfig, TradingMode};
use crate::regime::VolatilityPhase;
use crate::trade::Direction;

use super::{ContextSnapshot, GateId, GateResult, TradeProposal};

fn in_range(v: f64, lo_exclusive: f64, hi: f64) -> bool {
    v.is_finite() && v > lo_exclusive && v <= hi
}

/// Structural and unit validation. A failure here ends evaluation.
pub fn check_units(
    proposal: &TradeProposal,
    ctx: &ContextSnapshot,
    authority_multiplier: f64,
    cfg: &GovernanceConfig,
) -> Option<GateResult> {
    let mut problems = Vec::new();
    if proposal.direction == Direction::Unknown {
        problems.push("direction is unknown".to_string());
    }
    if !(proposal.base_probability.is_finite() && (0.0..=1.0).contains(&proposal.base_probability)) {
        problems.push(format!("base probability {} outside [0, 1]", proposal.base_probability));
    }
    for (name, value, max) in [
        ("spread", ctx.spread_pips, cfg.max_spread_pips),
        ("atr", ctx.atr_pips, cfg.max_atr_pips),
        ("friction", ctx.friction_pips, cfg.max_friction_pips),
    ] {
        if !in_range(value, 0.0, max) {
            problems.push(format!("{name} {value} pips outside (0, {max}]"));
        }
    }
    if !(ctx.consensus_alignment.is_finite() && ctx.consensus_alignment.abs() <= 100.0) {
        problems.push(format!("alignment {} outside [-100, 100]", ctx.consensus_alignment));
    }
    for (name, value) in [
        ("liquidity shock probability", ctx.liquidity_shock_probability),
        ("session aggressiveness", ctx.session_aggressiveness),
    ] {
        if !(value.is_finite() && (0.0..=1.0).contains(&value)) {
            problems.push(format!("{name} {value} outside [0, 1]"));
        }
    }
    if !in_range(authority_multiplier, 0.0, f64::MAX) {
        problems.push(format!("authority multiplier {authority_multiplier} not positive"));
    }

    if problems.is_empty() {
        None
    } else {
        Some(GateResult::reject(GateId::UnitConsistency, problems.join("; ")))
    }
}

pub fn check_policy(direction: Direction, mode: TradingMode) -> Option<GateResult> {
    match (mode, direction) {
        (TradingMode::Halted, _) => Some(GateResult::reject(GateId::Halted, "trading is halted".into())),
        (TradingMode::LongOnly, Direction::Short) => {
            Some(GateResult::reject(GateId::LongOnly, "long-only mode blocks short proposals".into()))
        }
        (TradingMode::ShortOnly, Direction::Long) => {
            Some(GateResult::reject(GateId::ShortOnly, "short-only mode blocks long proposals".into()))
        }
        _ => None,
    }
}

pub fn check_friction(ctx: &ContextSnapshot, cfg: &GovernanceConfig) -> Option<GateResult> {
    let ratio = ctx.friction_pips / ctx.atr_pips;
    if ratio >= 1.0 {
        Some(GateResult::reject(
            GateId::FrictionCost,
            format!("friction {:.2} pips consumes the whole ATR {:.2}", ctx.friction_pips, ctx.atr_pips),
        ))
    } else if ratio > cfg.max_friction_atr_ratio {
        Some(GateResult::throttle(
            GateId::FrictionCost,
            cfg.friction_penalty,
            format!("friction/ATR {ratio:.3} above {:.3}", cfg.max_friction_atr_ratio),
        ))
    } else {
        None
    }
}

pub fn check_alignment(ctx: &ContextSnapshot, cfg: &GovernanceConfig) -> Option<GateResult> {
    let a = ctx.consensus_alignment;
    if a < cfg.reject_alignment {
        Some(GateResult::reject(
            GateId::ConsensusAlignment,
            format!("indicator consensus opposes the trade ({a:.1})"),
        ))
    } else if a < cfg.min_alignment {
        Some(GateResult::throttle(
            GateId::ConsensusAlignment,
            cfg.alignment_penalty,
            format!("weak consensus alignment {a:.1}"),
        ))
    } else {
        None
    }
}

pub fn check_volatility_phase(ctx: &ContextSnapshot, cfg: &GovernanceConfig) -> Option<GateResult> {
    match ctx.volatility_phase {
        Some(VolatilityPhase::Exhaustion) => Some(GateResult::throttle(
            GateId::VolatilityPhase,
            cfg.exhaustion_penalty,
            "volatility exhaustion phase".into(),
        )),
        _ => None,
    }
}

pub fn check_liquidity(ctx: &ContextSnapshot, cfg: &GovernanceConfig) -> Option<GateResult> {
    let p = ctx.liquidity_shock_probability;
    if p >= cfg.liquidity_shock_reject {
        Some(GateResult::reject(
            GateId::LiquidityShock,
            format!("liquidity shock probability {p:.2}"),
        ))
    } else if p >= cfg.liquidity_shock_throttle {
        Some(GateResult::throttle(
            GateId::LiquidityShock,
            cfg.liquidity_penalty,
            format!("elevated liquidity shock probability {p:.2}"),
        ))
    } else {
        None
    }
}

pub fn check_session(ctx: &ContextSnapshot, cfg: &GovernanceConfig) -> Option<GateResult> {
    if ctx.session_aggressiveness < cfg.min_session_aggressiveness {
        Some(GateResult::throttle(
            GateId::SessionAggressiveness,
            cfg.session_penalty,
            format!("passive session ({:.2})", ctx.session_aggressiveness),
        ))
    } else {
        None
    }
}

pub fn check_sequencing(ctx: &ContextSnapshot, cfg: &GovernanceConfig) -> Option<GateResult> {
    let losses = ctx.cluster_losses;
    if losses >= cfg.reject_cluster_losses {
        Some(GateResult::reject(
            GateId::SequencingCluster,
            format!("{losses} consecutive losses in the current cluster"),
        ))
    } else if losses >= cfg.max_cluster_losses {
        Some(GateResult::throttle(
            GateId::SequencingCluster,
            cfg.cluster_penalty,
            format!("{losses} consecutive losses"),
        ))
    } else {
        None
    }
}

pub fn check_min_probability(adjusted: f64, cfg: &GovernanceConfig) -> Option<GateResult> {
    if adjusted < cfg.min_win_probability {
        Some(GateResult::reject(
            GateId::MinimumProbability,
            format!("adjusted win probability {adjusted:.3} below {:.3}", cfg.min_win_probability),
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::GateEffect;

    #[test]
    fn test_policy_matrix() {
        assert!(check_policy(Direction::Long, TradingMode::Normal).is_none());
        assert!(check_policy(Direction::Long, TradingMode::LongOnly).is_none());
        assert_eq!(check_policy(Direction::Short, TradingMode::LongOnly).unwrap().gate, GateId::LongOnly);
        assert_eq!(check_policy(Direction::Long, TradingMode::ShortOnly).unwrap().gate, GateId::ShortOnly);
        assert_eq!(check_policy(Direction::Short, TradingMode::Halted).unwrap().gate, GateId::Halted);
    }

    #[test]
    fn test_units_collects_every_problem() {
        let proposal = TradeProposal::new("p", "EUR_USD", Direction::Long, 1.5);
        let ctx = ContextSnapshot { atr_pips: 0.0, spread_pips: f64::NAN, ..ContextSnapshot::default() };
        let r = check_units(&proposal, &ctx, 1.0, &GovernanceConfig::default()).unwrap();
        assert_eq!(r.effect, GateEffect::Reject);
        assert!(r.message.contains("base probability"));
        assert!(r.message.contains("atr"));
        assert!(r.message.contains("spread"));
    }

    #[test]
    fn test_graduated_thresholds() {
        let cfg = GovernanceConfig::default();
        let mut ctx = ContextSnapshot { consensus_alignment: -30.0, ..ContextSnapshot::default() };
        assert_eq!(check_alignment(&ctx, &cfg).unwrap().effect, GateEffect::Throttle);
        ctx.consensus_alignment = -80.0;
        assert_eq!(check_alignment(&ctx, &cfg).unwrap().effect, GateEffect::Reject);

        ctx.cluster_losses = 3;
        assert_eq!(check_sequencing(&ctx, &cfg).unwrap().effect, GateEffect::Throttle);
        ctx.cluster_losses = 6;
        assert_eq!(check_sequencing(&ctx, &cfg).unwrap().effect, GateEffect::Reject);

        ctx.friction_pips = ctx.atr_pips;
        assert_eq!(check_friction(&ctx, &cfg).unwrap().effect, GateEffect::Reject);
    }
}
