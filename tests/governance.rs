//! Integration test: the governance gate chain.

use std::collections::BTreeMap;

use approx::assert_relative_eq;
use proptest::prelude::*;

use tradegate::config::{GovernanceConfig, TradingMode};
use tradegate::consensus::score_consensus;
use tradegate::governance::{composite_score, evaluate, ContextSnapshot, Decision, GateEffect, GateId, TradeProposal};
use tradegate::indicators::{IndicatorKey, IndicatorSignal};
use tradegate::regime::VolatilityPhase;
use tradegate::trade::Direction;

fn long_only() -> GovernanceConfig {
    GovernanceConfig { trading_mode: TradingMode::LongOnly, ..Default::default() }
}

#[test]
fn test_broken_units_report_only_the_unit_gate() {
    let short = TradeProposal::new("p-units", "EUR_USD", Direction::Short, 0.62);
    let ctx = ContextSnapshot { atr_pips: 0.0, ..ContextSnapshot::default() };
    let d = evaluate(&short, &ctx, None, &long_only());

    assert_eq!(d.decision, Decision::Rejected);
    assert_eq!(d.triggered(), vec![GateId::UnitConsistency]);
    assert_eq!(d.adjusted_probability, 0.0);
    assert_eq!(d.composite_score, 0.0);
}

#[test]
fn test_long_only_blocks_clean_short() {
    let short = TradeProposal::new("p-short", "EUR_USD", Direction::Short, 0.62);
    let d = evaluate(&short, &ContextSnapshot::default(), None, &long_only());

    assert_eq!(d.decision, Decision::Rejected);
    assert_eq!(d.triggered(), vec![GateId::LongOnly]);
    assert!(d.reason.as_deref().unwrap_or_default().contains("long-only"));

    // The same mode leaves longs alone.
    let long = TradeProposal::new("p-long", "EUR_USD", Direction::Long, 0.62);
    assert_eq!(evaluate(&long, &ContextSnapshot::default(), None, &long_only()).decision, Decision::Approved);
}

#[test]
fn test_consensus_flows_into_the_decision() {
    let reads: BTreeMap<IndicatorKey, IndicatorSignal> = [
        (IndicatorKey::Rsi, IndicatorSignal::Bearish),
        (IndicatorKey::Macd, IndicatorSignal::Bearish),
        (IndicatorKey::Adx, IndicatorSignal::Bearish),
        (IndicatorKey::Stochastic, IndicatorSignal::Bullish),
    ]
    .into_iter()
    .collect();
    let consensus = score_consensus(&reads, Direction::Long, &[], None, 0.05);
    assert_relative_eq!(consensus.alignment, -50.0, epsilon = 1e-9);

    let ctx = ContextSnapshot::default().with_consensus(&consensus);
    let long = TradeProposal::new("p-consensus", "EUR_USD", Direction::Long, 0.6);
    let d = evaluate(&long, &ctx, None, &GovernanceConfig::default());

    assert_eq!(d.decision, Decision::Throttled);
    assert_eq!(d.triggered(), vec![GateId::ConsensusAlignment]);
    let unthrottled = 0.6 * (1.0 - 0.5 * 0.1);
    assert_relative_eq!(d.unthrottled_probability, unthrottled, epsilon = 1e-12);
    assert_relative_eq!(d.adjusted_probability, unthrottled * 0.85, epsilon = 1e-12);
}

#[test]
fn test_every_gate_can_fire_in_one_pass() {
    let ctx = ContextSnapshot {
        friction_pips: 8.0,
        consensus_alignment: -20.0,
        volatility_phase: Some(VolatilityPhase::Exhaustion),
        liquidity_shock_probability: 0.35,
        session_aggressiveness: 0.1,
        cluster_losses: 4,
        ..ContextSnapshot::default()
    };
    let halted = GovernanceConfig { trading_mode: TradingMode::Halted, ..Default::default() };
    let d = evaluate(&TradeProposal::new("p-all", "GBP_JPY", Direction::Long, 0.9), &ctx, None, &halted);

    assert_eq!(
        d.triggered(),
        vec![
            GateId::Halted,
            GateId::FrictionCost,
            GateId::ConsensusAlignment,
            GateId::VolatilityPhase,
            GateId::LiquidityShock,
            GateId::SessionAggressiveness,
            GateId::SequencingCluster,
            GateId::MinimumProbability,
        ]
    );
    assert!(d.reason.as_deref().unwrap_or_default().starts_with("halted"));
}

fn phase() -> impl Strategy<Value = Option<VolatilityPhase>> {
    prop_oneof![
        Just(None),
        Just(Some(VolatilityPhase::Compression)),
        Just(Some(VolatilityPhase::Expansion)),
        Just(Some(VolatilityPhase::Ignition)),
        Just(Some(VolatilityPhase::Exhaustion)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn gates_never_raise_probability_or_score(
        p in 0.0f64..=1.0,
        alignment in -100.0f64..=100.0,
        atr in 1.0f64..200.0,
        friction in 0.1f64..40.0,
        liquidity in 0.0f64..=1.0,
        session in 0.0f64..=1.0,
        losses in 0u32..10,
        volatility in phase(),
        short in any::<bool>(),
    ) {
        let ctx = ContextSnapshot {
            atr_pips: atr,
            friction_pips: friction,
            consensus_alignment: alignment,
            volatility_phase: volatility,
            liquidity_shock_probability: liquidity,
            session_aggressiveness: session,
            cluster_losses: losses,
            ..ContextSnapshot::default()
        };
        let direction = if short { Direction::Short } else { Direction::Long };
        let d = evaluate(&TradeProposal::new("prop", "EUR_USD", direction, p), &ctx, None, &GovernanceConfig::default());

        prop_assert!(d.adjusted_probability <= d.unthrottled_probability);
        prop_assert!(d.composite_score <= composite_score(d.unthrottled_probability, alignment) + 1e-9);

        let rejected = d.gates.iter().any(|g| g.effect == GateEffect::Reject);
        prop_assert_eq!(rejected, d.decision == Decision::Rejected);
        prop_assert_eq!(d.reason.is_some(), rejected);
        if d.decision == Decision::Approved {
            prop_assert!(d.gates.is_empty());
            prop_assert!(d.adjusted_probability >= 0.40);
        }
    }
}
