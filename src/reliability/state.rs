use std::collections::{BTreeMap, BTreeSet};

use crate::collab::router::InfluenceTier;
use crate::config::Config;
use crate::logging::{log, log_rollback, obj, v_str, Domain, Level};
use crate::reliability::budget::FlipBudget;
use crate::reliability::circuit::{ChangedOutcome, RollbackBreaker};

/// Mutable safety state for one governance session.
///
/// Owned by the caller and passed into every entry point that reads a
/// kill-switch or records an outcome. A threaded host wraps it in a mutex.
#[derive(Debug, Clone)]
pub struct SessionState {
    adaptive_learning: bool,
    collaboration_boosting: bool,
    soft_breaker: RollbackBreaker,
    flip_budget: FlipBudget,
    coalition_breakers: BTreeMap<String, RollbackBreaker>,
    revoked_coalitions: BTreeSet<String>,
    coalition_lookback: usize,
    coalition_threshold: f64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl SessionState {
    pub fn new(cfg: &Config) -> Self {
        Self {
            adaptive_learning: cfg.adaptive_learning,
            collaboration_boosting: cfg.collaboration_boosting,
            soft_breaker: RollbackBreaker::new(cfg.collab.rollback_lookback, cfg.collab.rollback_threshold),
            flip_budget: FlipBudget::new(cfg.collab.flip_budget_window_ms, cfg.collab.flip_budget_ratio),
            coalition_breakers: BTreeMap::new(),
            revoked_coalitions: BTreeSet::new(),
            coalition_lookback: cfg.coalition.rollback_lookback,
            coalition_threshold: cfg.coalition.rollback_threshold,
        }
    }

    pub fn adaptive_learning_enabled(&self) -> bool {
        self.adaptive_learning
    }

    pub fn set_adaptive_learning(&mut self, enabled: bool) {
        self.adaptive_learning = enabled;
        log_toggle("adaptive_learning", enabled);
    }

    pub fn collaboration_boosting_enabled(&self) -> bool {
        self.collaboration_boosting
    }

    pub fn set_collaboration_boosting(&mut self, enabled: bool) {
        self.collaboration_boosting = enabled;
        log_toggle("collaboration_boosting", enabled);
    }

    /// False once the soft-tier rollback breaker has opened.
    pub fn soft_influence_enabled(&self) -> bool {
        self.soft_breaker.allow()
    }

    /// Record the realized result of a decision that collaboration changed.
    /// Returns true when this record disabled soft influence.
    pub fn record_changed_outcome(&mut self, realized_pips: f64, baseline_expectancy: f64) -> bool {
        let outcome = ChangedOutcome { realized_pips, baseline_expectancy };
        match self.soft_breaker.record(outcome) {
            Some(check) => {
                log_rollback("soft_influence", check.changed_expectancy, check.baseline_expectancy, check.samples);
                true
            }
            None => false,
        }
    }

    /// Manual re-enable of soft influence after a rollback.
    pub fn clear_soft_disable(&mut self) {
        self.soft_breaker.clear();
        log_toggle("soft_influence", true);
    }

    pub fn soft_breaker(&self) -> &RollbackBreaker {
        &self.soft_breaker
    }

    pub fn flip_budget(&self) -> &FlipBudget {
        &self.flip_budget
    }

    pub fn flip_budget_mut(&mut self) -> &mut FlipBudget {
        &mut self.flip_budget
    }

    /// Record a boosted coalition trade. Soft-tier coalitions are revoked
    /// when their ledger trips; hard-tier ones are only logged.
    pub fn record_coalition_outcome(
        &mut self,
        coalition: &str,
        tier: InfluenceTier,
        realized_pips: f64,
        baseline_expectancy: f64,
    ) -> bool {
        let (lookback, threshold) = (self.coalition_lookback, self.coalition_threshold);
        let breaker = self
            .coalition_breakers
            .entry(coalition.to_string())
            .or_insert_with(|| RollbackBreaker::new(lookback, threshold));
        let Some(check) = breaker.record(ChangedOutcome { realized_pips, baseline_expectancy }) else {
            return false;
        };
        log_rollback(coalition, check.changed_expectancy, check.baseline_expectancy, check.samples);
        if tier == InfluenceTier::Hard {
            // Hard tier keeps its influence; the breaker rearms for the next window.
            breaker.clear();
            return false;
        }
        self.revoked_coalitions.insert(coalition.to_string());
        true
    }

    pub fn is_coalition_revoked(&self, coalition: &str) -> bool {
        self.revoked_coalitions.contains(coalition)
    }

    pub fn restore_coalition(&mut self, coalition: &str) {
        self.revoked_coalitions.remove(coalition);
        if let Some(breaker) = self.coalition_breakers.get_mut(coalition) {
            breaker.clear();
        }
    }

    /// Clear every ledger, budget and revocation. Toggles are kept.
    pub fn reset(&mut self) {
        self.soft_breaker.clear();
        self.flip_budget.reset();
        self.coalition_breakers.clear();
        self.revoked_coalitions.clear();
    }
}

fn log_toggle(switch: &str, enabled: bool) {
    log(
        Level::Info,
        Domain::Safety,
        "toggle",
        obj(&[("switch", v_str(switch)), ("enabled", serde_json::Value::Bool(enabled))]),
    );
}
