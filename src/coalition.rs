//! Coalitions: sets of two or more agents acting in the same window.
//!
//! Each coalition gets the same evidence tiers as agent pairs, a harm rate
//! measured against its members' solo expectancy, and a multiplier band.
//! Boosting can be switched off globally and is revoked per coalition when
//! its boosted trades underperform.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::collab::pairing::{bucket_actions, bucket_members};
use crate::collab::router::{tier_for, AuthorityAdjustment, InfluenceTier, Justification, JustificationSource};
use crate::config::CoalitionConfig;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::metrics::PerformanceStats;
use crate::reliability::state::SessionState;
use crate::trade::{AgentAction, TradeOutcome};

const SEPARATOR: char = '+';

/// Canonical coalition identifier: sorted, deduplicated member ids joined
/// by `+`. Member order never changes the key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoalitionKey(String);

impl CoalitionKey {
    pub fn new<I, S>(members: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ids = BTreeSet::new();
        for raw in members {
            let id = raw.as_ref().trim();
            if id.is_empty() {
                bail!("coalition member id is empty");
            }
            if id.contains(SEPARATOR) {
                bail!("coalition member id {id:?} contains '{SEPARATOR}'");
            }
            ids.insert(id.to_string());
        }
        if ids.len() < 2 {
            bail!("a coalition needs at least two distinct members, got {}", ids.len());
        }
        Ok(Self(ids.into_iter().collect::<Vec<_>>().join("+")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn members(&self) -> Vec<&str> {
        self.0.split(SEPARATOR).collect()
    }

    pub fn size(&self) -> usize {
        self.members().len()
    }

    pub fn contains(&self, agent: &str) -> bool {
        self.members().contains(&agent)
    }
}

impl fmt::Display for CoalitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoalitionStats {
    pub key: CoalitionKey,
    /// Windows in which exactly this member set acted
    pub occurrences: usize,
    pub performance: PerformanceStats,
    /// Members' solo trades, pooled
    pub solo: PerformanceStats,
    pub harmful_trades: usize,
    /// Share of priced coalition trades below the acting agent's solo expectancy
    pub harm_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoalitionAction {
    Deploy,
    Observe,
    Avoid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoalitionRecommendation {
    pub key: CoalitionKey,
    pub tier: InfluenceTier,
    /// Centre of the band, clamped to the tier bounds
    pub multiplier: f64,
    pub band_low: f64,
    pub band_high: f64,
    pub action: CoalitionAction,
    pub reason: String,
    pub stats: CoalitionStats,
}

fn coalition_bounds(tier: InfluenceTier, cfg: &CoalitionConfig) -> (f64, f64) {
    match tier {
        InfluenceTier::None => (1.0, 1.0),
        InfluenceTier::Soft => (cfg.soft_min_multiplier, cfg.soft_max_multiplier),
        InfluenceTier::Hard => (cfg.hard_min_multiplier, cfg.hard_max_multiplier),
    }
}

/// Solo expectancy per agent: trades in windows where it acted alone.
fn solo_baselines<'a>(windows: &[(BTreeSet<&'a str>, Vec<&'a TradeOutcome>)]) -> BTreeMap<&'a str, PerformanceStats> {
    let mut solo: BTreeMap<&str, Vec<&TradeOutcome>> = BTreeMap::new();
    for (members, trades) in windows {
        if members.len() == 1 {
            for &member in members {
                solo.entry(member).or_default().extend(trades.iter().copied());
            }
        }
    }
    solo.into_iter()
        .map(|(agent, trades)| (agent, PerformanceStats::from_trades(trades)))
        .collect()
}

/// Every coalition observed in the action history.
pub fn discover_coalitions(actions: &[AgentAction], window_ms: i64) -> Vec<CoalitionStats> {
    let buckets = bucket_actions(actions, window_ms);
    let windows = bucket_members(&buckets);
    let solo = solo_baselines(&windows);

    let mut grouped: BTreeMap<CoalitionKey, (usize, Vec<&TradeOutcome>)> = BTreeMap::new();
    for (members, trades) in &windows {
        if members.len() < 2 {
            continue;
        }
        // Bucket ids are trimmed, non-empty and cannot contain the separator
        // unless an agent id does; such windows are skipped.
        let Ok(key) = CoalitionKey::new(members.iter()) else {
            continue;
        };
        let entry = grouped.entry(key).or_default();
        entry.0 += 1;
        entry.1.extend(trades.iter().copied());
    }

    grouped
        .into_iter()
        .map(|(key, (occurrences, trades))| {
            let members = key.members();
            let pooled: Vec<PerformanceStats> = members.iter().filter_map(|m| solo.get(m).copied()).collect();
            let solo_stats = pool(&pooled);

            let mut priced = 0usize;
            let mut harmful = 0usize;
            for trade in &trades {
                let Some(pips) = trade.pips() else { continue };
                priced += 1;
                let baseline = solo.get(trade.agent_id.trim()).map(|s| s.expectancy).unwrap_or(0.0);
                if pips < baseline {
                    harmful += 1;
                }
            }
            CoalitionStats {
                key,
                occurrences,
                performance: PerformanceStats::from_trades(trades.iter().copied()),
                solo: solo_stats,
                harmful_trades: harmful,
                harm_rate: if priced == 0 { 0.0 } else { harmful as f64 / priced as f64 },
            }
        })
        .collect()
}

fn pool(parts: &[PerformanceStats]) -> PerformanceStats {
    let trades: usize = parts.iter().map(|p| p.trades).sum();
    if trades == 0 {
        return PerformanceStats::default();
    }
    let wins: usize = parts.iter().map(|p| p.wins).sum();
    let expectancy = parts.iter().map(|p| p.expectancy * p.trades as f64).sum::<f64>() / trades as f64;
    PerformanceStats {
        trades,
        wins,
        win_rate: wins as f64 / trades as f64,
        expectancy,
        ..Default::default()
    }
}

pub fn recommend(stats: CoalitionStats, cfg: &CoalitionConfig) -> CoalitionRecommendation {
    let perf = &stats.performance;
    let tier = tier_for(perf.trades, cfg.soft_min_trades, cfg.hard_min_trades);
    let (lo, hi) = coalition_bounds(tier, cfg);

    let centre = if stats.solo.trades > 0 {
        1.0 + cfg.adjustment_gain * (perf.win_rate - stats.solo.win_rate)
    } else {
        1.0
    };
    let half_width = cfg.band_gain * perf.win_rate_std_error();
    let band_low = (centre - half_width).clamp(lo, hi);
    let band_high = (centre + half_width).clamp(lo, hi);
    let multiplier = centre.clamp(lo, hi);

    let (action, reason) = if tier == InfluenceTier::None {
        (CoalitionAction::Observe, format!("{} trades below the evidence minimum", perf.trades))
    } else if stats.harm_rate > cfg.max_harm_rate {
        (CoalitionAction::Avoid, format!("harm rate {:.2} above {:.2}", stats.harm_rate, cfg.max_harm_rate))
    } else if band_low > 1.0 {
        (CoalitionAction::Deploy, format!("band [{band_low:.3}, {band_high:.3}] above 1"))
    } else if band_high < 1.0 {
        (CoalitionAction::Avoid, format!("band [{band_low:.3}, {band_high:.3}] below 1"))
    } else {
        (CoalitionAction::Observe, format!("band [{band_low:.3}, {band_high:.3}] straddles 1"))
    };

    CoalitionRecommendation {
        key: stats.key.clone(),
        tier,
        multiplier,
        band_low,
        band_high,
        action,
        reason,
        stats,
    }
}

/// Recommendations for every coalition in the history.
pub fn analyze_coalitions(actions: &[AgentAction], window_ms: i64, cfg: &CoalitionConfig) -> Vec<CoalitionRecommendation> {
    discover_coalitions(actions, window_ms)
        .into_iter()
        .map(|stats| {
            let rec = recommend(stats, cfg);
            log(
                Level::Debug,
                Domain::Coalition,
                "coalition",
                obj(&[
                    ("coalition", v_str(rec.key.as_str())),
                    ("tier", v_str(rec.tier.as_str())),
                    ("multiplier", v_num(rec.multiplier)),
                    ("harm_rate", v_num(rec.stats.harm_rate)),
                    ("action", serde_json::json!(rec.action)),
                ]),
            );
            rec
        })
        .collect()
}

/// Read side of coalition influence, gated by session state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoalitionBook {
    recommendations: BTreeMap<CoalitionKey, CoalitionRecommendation>,
}

impl CoalitionBook {
    pub fn new(recommendations: Vec<CoalitionRecommendation>) -> Self {
        Self {
            recommendations: recommendations.into_iter().map(|r| (r.key.clone(), r)).collect(),
        }
    }

    pub fn get(&self, key: &CoalitionKey) -> Option<&CoalitionRecommendation> {
        self.recommendations.get(key)
    }

    pub fn len(&self) -> usize {
        self.recommendations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recommendations.is_empty()
    }

    fn live(&self, key: &CoalitionKey, state: &SessionState) -> Option<&CoalitionRecommendation> {
        if !state.collaboration_boosting_enabled() || state.is_coalition_revoked(key.as_str()) {
            return None;
        }
        self.recommendations.get(key).filter(|r| match r.tier {
            InfluenceTier::None => false,
            // the soft rollback breaker disables soft influence everywhere
            InfluenceTier::Soft => state.soft_influence_enabled() && r.action != CoalitionAction::Observe,
            InfluenceTier::Hard => r.action != CoalitionAction::Observe,
        })
    }

    /// Multiplier to apply; 1.0 whenever influence is off for this coalition.
    pub fn multiplier(&self, key: &CoalitionKey, state: &SessionState) -> f64 {
        self.live(key, state).map(|r| r.multiplier).unwrap_or(1.0)
    }

    /// Positive boost only; 0.0 whenever influence is off or negative.
    pub fn boost(&self, key: &CoalitionKey, state: &SessionState) -> f64 {
        (self.multiplier(key, state) - 1.0).max(0.0)
    }

    /// Coalition influence on one member, in the router's terms.
    pub fn adjustment(&self, key: &CoalitionKey, agent_id: &str, state: &SessionState) -> AuthorityAdjustment {
        if !key.contains(agent_id) {
            return AuthorityAdjustment::neutral(agent_id);
        }
        let Some(rec) = self.live(key, state) else {
            return AuthorityAdjustment::neutral(agent_id);
        };
        AuthorityAdjustment {
            agent_id: agent_id.to_string(),
            multiplier: rec.multiplier,
            raw_multiplier: rec.multiplier,
            tier: rec.tier,
            justification: vec![Justification {
                source: JustificationSource::Coalition,
                key: rec.key.to_string(),
                tier: rec.tier,
                samples: rec.stats.performance.trades,
                paired_win_rate: rec.stats.performance.win_rate,
                solo_win_rate: rec.stats.solo.win_rate,
                environment: None,
            }],
            disabled_reason: None,
        }
    }

    /// Record a boosted trade's result. Returns true when the coalition was
    /// revoked by this record.
    pub fn record_outcome(
        &self,
        key: &CoalitionKey,
        state: &mut SessionState,
        realized_pips: f64,
        baseline_expectancy: f64,
    ) -> bool {
        let Some(rec) = self.recommendations.get(key) else {
            return false;
        };
        state.record_coalition_outcome(key.as_str(), rec.tier, realized_pips, baseline_expectancy)
    }
}
