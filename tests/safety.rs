//! Integration test: rollback, flip budget and coalition revocation.
//!
//! Drives routed decisions through `SessionState` the way a host would and
//! checks that each kill-switch trips, and only trips, when it should.

use tradegate::coalition::{recommend, CoalitionAction, CoalitionBook, CoalitionKey, CoalitionStats};
use tradegate::collab::{
    compose_adjustments, record_changed_outcome, route_decision, AuthorityAdjustment, InfluenceTier, RouteRequest,
    SuppressionReason,
};
use tradegate::config::{CoalitionConfig, CollabConfig};
use tradegate::metrics::PerformanceStats;
use tradegate::reliability::FlipBudget;
use tradegate::SessionState;

const MINUTE: i64 = 60_000;

fn adjustment(tier: InfluenceTier, multiplier: f64) -> AuthorityAdjustment {
    AuthorityAdjustment {
        multiplier,
        raw_multiplier: multiplier,
        tier,
        ..AuthorityAdjustment::neutral("alpha")
    }
}

fn request(n: usize, base: f64) -> RouteRequest {
    RouteRequest {
        decision_id: format!("d{n}"),
        agent_id: "alpha".into(),
        timestamp_ms: n as i64 * MINUTE,
        base_probability: base,
        threshold: 0.52,
    }
}

/// Route `flips` soft flips, each preceded by nine decisions that stay put,
/// and feed every flip's result to the ledger. Returns whether any record
/// disabled soft influence.
fn run_soft_flips(state: &mut SessionState, flips: usize, realized: f64, baseline: f64) -> bool {
    let cfg = CollabConfig::default();
    let soft = adjustment(InfluenceTier::Soft, 1.1);
    let mut n = 0;
    let mut tripped = false;
    for _ in 0..flips {
        for _ in 0..9 {
            let routed = route_decision(&request(n, 0.7), &soft, state, &cfg);
            assert!(!routed.flipped);
            n += 1;
        }
        let routed = route_decision(&request(n, 0.5), &soft, state, &cfg);
        assert!(routed.flipped, "decision {n} was {:?}", routed.suppressed);
        n += 1;
        tripped |= record_changed_outcome(state, &routed, realized, baseline);
    }
    tripped
}

#[test]
fn test_underperforming_soft_flips_disable_soft_influence() {
    let mut state = SessionState::default();
    let tripped = run_soft_flips(&mut state, 50, 5.0, 10.0);
    assert!(tripped);
    assert!(!state.soft_influence_enabled());

    state.clear_soft_disable();
    assert!(state.soft_influence_enabled());
    assert!(state.soft_breaker().ledger().is_empty());
}

#[test]
fn test_outperforming_soft_flips_keep_soft_influence() {
    let mut state = SessionState::default();
    assert!(!run_soft_flips(&mut state, 50, 12.0, 10.0));
    assert!(state.soft_influence_enabled());
    assert_eq!(state.soft_breaker().ledger().len(), 50);
}

#[test]
fn test_ledger_needs_a_full_lookback() {
    let mut state = SessionState::default();
    assert!(!run_soft_flips(&mut state, 49, -10.0, 10.0));
    assert!(state.soft_influence_enabled());
}

#[test]
fn test_hard_tier_flips_never_reach_the_ledger() {
    let mut state = SessionState::default();
    let cfg = CollabConfig::default();
    let hard = adjustment(InfluenceTier::Hard, 1.25);
    let routed = route_decision(&request(0, 0.5), &hard, &mut state, &cfg);
    assert!(routed.flipped);
    for _ in 0..100 {
        assert!(!record_changed_outcome(&mut state, &routed, -20.0, 10.0));
    }
    assert!(state.soft_breaker().ledger().is_empty());
    assert!(state.soft_influence_enabled());
}

#[test]
fn test_flip_budget_ten_plus_two() {
    let mut budget = FlipBudget::new(24 * 60 * MINUTE, 0.10);
    for i in 0..10 {
        budget.record(i * MINUTE, false);
    }
    budget.record(10 * MINUTE, true);
    assert!(!budget.is_exceeded());
    budget.record(11 * MINUTE, true);
    assert!(budget.is_exceeded());
    let snap = budget.snapshot();
    assert_eq!((snap.decisions, snap.flipped), (12, 2));

    // A day later every decision has aged out.
    assert!(budget.allows_flip(11 * MINUTE + 24 * 60 * MINUTE));
}

#[test]
fn test_exhausted_budget_suppresses_flips() {
    let mut state = SessionState::default();
    let cfg = CollabConfig::default();
    let soft = adjustment(InfluenceTier::Soft, 1.1);

    // One flip out of one decision already exceeds a 10% budget.
    assert!(route_decision(&request(0, 0.5), &soft, &mut state, &cfg).flipped);
    let routed = route_decision(&request(1, 0.5), &soft, &mut state, &cfg);
    assert!(!routed.flipped);
    assert!(!routed.take);
    assert_eq!(routed.suppressed, Some(SuppressionReason::FlipBudgetExceeded));
    assert_eq!(routed.final_probability, routed.base_probability);
}

#[test]
fn test_small_moves_never_flip() {
    let mut state = SessionState::default();
    let routed = route_decision(
        &request(0, 0.515),
        &adjustment(InfluenceTier::Soft, 1.02),
        &mut state,
        &CollabConfig::default(),
    );
    assert_eq!(routed.suppressed, Some(SuppressionReason::BelowFlipMargin));
    assert!(!routed.take);
}

fn strong_coalition(cfg: &CoalitionConfig) -> CoalitionBook {
    let trades = 20;
    let stats = CoalitionStats {
        key: CoalitionKey::new(["gamma", "alpha", "beta"]).expect("valid key"),
        occurrences: trades,
        performance: PerformanceStats { trades, wins: 18, win_rate: 0.9, ..Default::default() },
        solo: PerformanceStats { trades: 60, wins: 30, win_rate: 0.5, ..Default::default() },
        harmful_trades: 2,
        harm_rate: 0.1,
    };
    let rec = recommend(stats, cfg);
    assert_eq!(rec.tier, InfluenceTier::Soft);
    assert_eq!(rec.action, CoalitionAction::Deploy);
    CoalitionBook::new(vec![rec])
}

#[test]
fn test_soft_coalition_is_revoked_after_sustained_harm() {
    let cfg = CoalitionConfig::default();
    let book = strong_coalition(&cfg);
    let key = CoalitionKey::new(["alpha", "beta", "gamma"]).expect("valid key");
    let mut state = SessionState::default();
    assert!((book.multiplier(&key, &state) - 1.1).abs() < 1e-12);

    let revocations: usize = (0..cfg.rollback_lookback)
        .map(|_| book.record_outcome(&key, &mut state, -4.0, 6.0) as usize)
        .sum();
    assert_eq!(revocations, 1);
    assert!(state.is_coalition_revoked(key.as_str()));
    assert_eq!(book.multiplier(&key, &state), 1.0);
    assert_eq!(book.boost(&key, &state), 0.0);
    assert!(!book.adjustment(&key, "alpha", &state).is_active());

    state.restore_coalition(key.as_str());
    assert!(book.adjustment(&key, "alpha", &state).is_active());
}

#[test]
fn test_hard_coalition_outcomes_never_revoke() {
    let mut state = SessionState::default();
    for _ in 0..200 {
        assert!(!state.record_coalition_outcome("alpha+beta", InfluenceTier::Hard, -10.0, 5.0));
    }
    assert!(!state.is_coalition_revoked("alpha+beta"));
}

#[test]
fn test_boosting_toggle_silences_every_adjustment() {
    let cfg = CoalitionConfig::default();
    let book = strong_coalition(&cfg);
    let key = CoalitionKey::new(["alpha", "beta", "gamma"]).expect("valid key");
    let mut state = SessionState::default();
    state.set_collaboration_boosting(false);
    assert_eq!(book.multiplier(&key, &state), 1.0);

    state.set_collaboration_boosting(true);
    state.reset();
    assert!(state.collaboration_boosting_enabled());
    assert!(book.adjustment(&key, "beta", &state).is_active());
}

#[test]
fn test_soft_rollback_silences_soft_coalitions_only() {
    let cfg = CoalitionConfig::default();
    let soft_key = CoalitionKey::new(["alpha", "beta", "gamma"]).expect("valid key");
    let hard_key = CoalitionKey::new(["alpha", "delta"]).expect("valid key");
    let hard = recommend(
        CoalitionStats {
            key: hard_key.clone(),
            occurrences: 50,
            performance: PerformanceStats { trades: 50, wins: 45, win_rate: 0.9, ..Default::default() },
            solo: PerformanceStats { trades: 60, wins: 30, win_rate: 0.5, ..Default::default() },
            harmful_trades: 5,
            harm_rate: 0.1,
        },
        &cfg,
    );
    assert_eq!((hard.tier, hard.action), (InfluenceTier::Hard, CoalitionAction::Deploy));
    let soft = strong_coalition(&cfg).get(&soft_key).cloned().expect("soft coalition");
    let book = CoalitionBook::new(vec![soft, hard]);

    let mut state = SessionState::default();
    assert!(run_soft_flips(&mut state, 50, 2.0, 10.0));
    assert!(!state.soft_influence_enabled());
    assert!(!state.is_coalition_revoked(soft_key.as_str()));

    assert_eq!(book.multiplier(&soft_key, &state), 1.0);
    assert_eq!(book.boost(&soft_key, &state), 0.0);
    let soft_adj = book.adjustment(&soft_key, "alpha", &state);
    assert!(!soft_adj.is_active());
    let composed = compose_adjustments("alpha", &[soft_adj], &CollabConfig::default());
    assert_eq!(composed.multiplier, 1.0);

    assert!((book.multiplier(&hard_key, &state) - 1.25).abs() < 1e-12);
    assert!(book.adjustment(&hard_key, "alpha", &state).is_active());

    state.clear_soft_disable();
    assert!((book.multiplier(&soft_key, &state) - 1.1).abs() < 1e-12);
}
