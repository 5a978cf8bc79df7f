//! Pairwise collaboration statistics.
//!
//! Actions are bucketed into fixed windows per normalized symbol. Two agents
//! are paired in a bucket when both acted there, whether by trading or by
//! recording a shadow decision. Each agent's solo baseline is built from its
//! executed trades in buckets its partner stayed out of.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::config::CollabConfig;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::metrics::PerformanceStats;
use crate::signature::{normalize_symbol, EnvironmentKey};
use crate::trade::{AgentAction, Direction, TradeOutcome};

/// Unordered agent pair, stored sorted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentPair {
    pub first: String,
    pub second: String,
}

impl AgentPair {
    pub fn new(a: &str, b: &str) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self { first: first.to_string(), second: second.to_string() }
    }

    pub fn contains(&self, agent: &str) -> bool {
        self.first == agent || self.second == agent
    }

    pub fn partner_of(&self, agent: &str) -> Option<&str> {
        if self.first == agent {
            Some(&self.second)
        } else if self.second == agent {
            Some(&self.first)
        } else {
            None
        }
    }
}

impl fmt::Display for AgentPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.first, self.second)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeDeltaSummary {
    pub samples: usize,
    pub min_ms: i64,
    pub mean_ms: f64,
    pub max_ms: i64,
}

impl TimeDeltaSummary {
    fn from_deltas(deltas: &[i64]) -> Self {
        if deltas.is_empty() {
            return Self::default();
        }
        let sum: i64 = deltas.iter().sum();
        Self {
            samples: deltas.len(),
            min_ms: deltas.iter().copied().min().unwrap_or(0),
            mean_ms: sum as f64 / deltas.len() as f64,
            max_ms: deltas.iter().copied().max().unwrap_or(0),
        }
    }
}

/// One agent executed while the other explicitly passed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VetoMetrics {
    /// Executed trades that the partner declined
    pub vetoed_trades: usize,
    /// How many of those lost
    pub vetoed_losses: usize,
    /// Share of vetoed trades that lost; 0 without vetoes
    pub accuracy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairLabel {
    Insufficient,
    Synergistic,
    Neutral,
    Conflicted,
    Detrimental,
}

impl PairLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairLabel::Insufficient => "insufficient",
            PairLabel::Synergistic => "synergistic",
            PairLabel::Neutral => "neutral",
            PairLabel::Conflicted => "conflicted",
            PairLabel::Detrimental => "detrimental",
        }
    }
}

/// Paired and solo performance inside one environment key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentStats {
    pub paired: PerformanceStats,
    pub solo_first: PerformanceStats,
    pub solo_second: PerformanceStats,
    /// Paired minus combined solo expectancy; 0 without solo trades here
    pub expectancy_delta: f64,
    pub win_rate_delta: f64,
}

impl EnvironmentStats {
    fn new(paired: PerformanceStats, solo_first: PerformanceStats, solo_second: PerformanceStats) -> Self {
        let combined = combine(&solo_first, &solo_second);
        let (expectancy_delta, win_rate_delta) = if combined.trades == 0 {
            (0.0, 0.0)
        } else {
            (paired.expectancy - combined.expectancy, paired.win_rate - combined.win_rate)
        };
        Self { paired, solo_first, solo_second, expectancy_delta, win_rate_delta }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPairStatistics {
    pub pair: AgentPair,
    /// Buckets where both agents acted
    pub co_occurrences: usize,
    /// Executed trades of either agent inside shared buckets
    pub paired: PerformanceStats,
    pub solo_first: PerformanceStats,
    pub solo_second: PerformanceStats,
    /// Paired minus combined solo expectancy, pips
    pub expectancy_delta: f64,
    /// Paired minus combined solo win rate
    pub win_rate_delta: f64,
    pub conflicts: usize,
    pub conflict_rate: f64,
    pub vetoes: VetoMetrics,
    pub time_deltas: TimeDeltaSummary,
    pub environments: BTreeMap<EnvironmentKey, EnvironmentStats>,
    pub label: PairLabel,
}

impl AgentPairStatistics {
    /// Solo baseline of one member.
    pub fn solo_for(&self, agent: &str) -> Option<&PerformanceStats> {
        if self.pair.first == agent {
            Some(&self.solo_first)
        } else if self.pair.second == agent {
            Some(&self.solo_second)
        } else {
            None
        }
    }

    /// Solo baseline of one member inside `env`, when it traded alone there.
    pub fn environment_solo_for(&self, env: &EnvironmentKey, agent: &str) -> Option<&PerformanceStats> {
        let stats = self.environments.get(env)?;
        let solo = if self.pair.first == agent {
            &stats.solo_first
        } else if self.pair.second == agent {
            &stats.solo_second
        } else {
            return None;
        };
        (solo.trades > 0).then_some(solo)
    }
}

type BucketId = (String, i64);
type Bucket<'a> = BTreeMap<&'a str, Vec<&'a AgentAction>>;

/// Window buckets keyed by (symbol, window index).
pub(crate) fn bucket_actions<'a>(actions: &'a [AgentAction], window_ms: i64) -> BTreeMap<BucketId, Bucket<'a>> {
    let window_ms = window_ms.max(1);
    let mut buckets: BTreeMap<BucketId, Bucket<'a>> = BTreeMap::new();
    for action in actions {
        let agent = action.agent_id().trim();
        if agent.is_empty() {
            continue;
        }
        let id = (normalize_symbol(action.pair()), action.timestamp_ms().div_euclid(window_ms));
        buckets.entry(id).or_default().entry(agent).or_default().push(action);
    }
    buckets
}

fn executed<'a>(actions: &[&'a AgentAction]) -> Vec<&'a TradeOutcome> {
    actions.iter().filter_map(|a| (*a).executed()).collect()
}

fn by_environment<'a>(trades: &[&'a TradeOutcome]) -> BTreeMap<EnvironmentKey, Vec<&'a TradeOutcome>> {
    let mut groups: BTreeMap<EnvironmentKey, Vec<&'a TradeOutcome>> = BTreeMap::new();
    for trade in trades {
        groups.entry(trade.environment_key()).or_default().push(*trade);
    }
    groups
}

fn directions(actions: &[&AgentAction]) -> Vec<Direction> {
    actions.iter().filter_map(|a| a.direction()).collect()
}

fn only_no_ops(actions: &[&AgentAction]) -> bool {
    actions.iter().all(|a| matches!(a, AgentAction::Shadow(s) if s.direction.is_none()))
}

fn min_delta(a: &[&AgentAction], b: &[&AgentAction]) -> Option<i64> {
    a.iter()
        .flat_map(|x| b.iter().map(move |y| (x.timestamp_ms() - y.timestamp_ms()).abs()))
        .min()
}

#[derive(Default)]
struct Accumulator<'a> {
    co_occurrences: usize,
    paired: Vec<&'a TradeOutcome>,
    conflicts: usize,
    vetoed: Vec<&'a TradeOutcome>,
    deltas: Vec<i64>,
}

fn label_for(stats: &AgentPairStatistics, cfg: &CollabConfig) -> PairLabel {
    if stats.paired.trades < cfg.soft_min_trades {
        PairLabel::Insufficient
    } else if stats.conflict_rate >= cfg.conflict_rate_limit {
        PairLabel::Conflicted
    } else if stats.expectancy_delta >= cfg.synergy_margin_pips {
        PairLabel::Synergistic
    } else if stats.expectancy_delta <= -cfg.synergy_margin_pips {
        PairLabel::Detrimental
    } else {
        PairLabel::Neutral
    }
}

/// Statistics for every pair of agents that shared at least one bucket.
pub fn analyze_pairs(actions: &[AgentAction], cfg: &CollabConfig) -> Vec<AgentPairStatistics> {
    let buckets = bucket_actions(actions, cfg.pairing_window_ms);
    let mut acc: BTreeMap<AgentPair, Accumulator> = BTreeMap::new();

    for bucket in buckets.values() {
        let agents: Vec<&str> = bucket.keys().copied().collect();
        for (i, a) in agents.iter().enumerate() {
            for b in &agents[i + 1..] {
                let (acts_a, acts_b) = (&bucket[a], &bucket[b]);
                let entry = acc.entry(AgentPair::new(a, b)).or_default();
                entry.co_occurrences += 1;
                entry.paired.extend(executed(acts_a));
                entry.paired.extend(executed(acts_b));

                let (dirs_a, dirs_b) = (directions(acts_a), directions(acts_b));
                if dirs_a.iter().any(|x| dirs_b.iter().any(|y| x.opposes(*y))) {
                    entry.conflicts += 1;
                }
                if only_no_ops(acts_b) {
                    entry.vetoed.extend(executed(acts_a));
                }
                if only_no_ops(acts_a) {
                    entry.vetoed.extend(executed(acts_b));
                }
                if let Some(d) = min_delta(acts_a, acts_b) {
                    entry.deltas.push(d);
                }
            }
        }
    }

    let solo_trades = |agent: &str, partner: &str| -> Vec<&TradeOutcome> {
        buckets
            .values()
            .filter(|bucket| !bucket.contains_key(partner))
            .filter_map(|bucket| bucket.get(agent))
            .flat_map(|acts| executed(acts))
            .collect()
    };

    let mut out = Vec::with_capacity(acc.len());
    for (pair, a) in acc {
        let paired = PerformanceStats::from_trades(a.paired.iter().copied());
        let alone_first = solo_trades(&pair.first, &pair.second);
        let alone_second = solo_trades(&pair.second, &pair.first);
        let solo_first = PerformanceStats::from_trades(alone_first.iter().copied());
        let solo_second = PerformanceStats::from_trades(alone_second.iter().copied());
        let combined = combine(&solo_first, &solo_second);

        let (env_first, env_second) = (by_environment(&alone_first), by_environment(&alone_second));
        let env_solo = |groups: &BTreeMap<EnvironmentKey, Vec<&TradeOutcome>>, env: &EnvironmentKey| {
            PerformanceStats::from_trades(groups.get(env).into_iter().flatten().copied())
        };
        let environments: BTreeMap<EnvironmentKey, EnvironmentStats> = by_environment(&a.paired)
            .into_iter()
            .map(|(env, trades)| {
                let paired = PerformanceStats::from_trades(trades);
                let stats = EnvironmentStats::new(paired, env_solo(&env_first, &env), env_solo(&env_second, &env));
                (env, stats)
            })
            .collect();

        let vetoed_losses = a.vetoed.iter().filter(|t| !t.won).count();
        let vetoes = VetoMetrics {
            vetoed_trades: a.vetoed.len(),
            vetoed_losses,
            accuracy: if a.vetoed.is_empty() { 0.0 } else { vetoed_losses as f64 / a.vetoed.len() as f64 },
        };

        let mut stats = AgentPairStatistics {
            pair,
            co_occurrences: a.co_occurrences,
            paired,
            solo_first,
            solo_second,
            expectancy_delta: paired.expectancy - combined.expectancy,
            win_rate_delta: paired.win_rate - combined.win_rate,
            conflicts: a.conflicts,
            conflict_rate: a.conflicts as f64 / a.co_occurrences as f64,
            vetoes,
            time_deltas: TimeDeltaSummary::from_deltas(&a.deltas),
            environments,
            label: PairLabel::Insufficient,
        };
        stats.label = label_for(&stats, cfg);

        log(
            Level::Debug,
            Domain::Collab,
            "pair_stats",
            obj(&[
                ("pair", v_str(&stats.pair.to_string())),
                ("paired_trades", serde_json::json!(stats.paired.trades)),
                ("expectancy_delta", v_num(stats.expectancy_delta)),
                ("conflict_rate", v_num(stats.conflict_rate)),
                ("label", v_str(stats.label.as_str())),
            ]),
        );
        out.push(stats);
    }
    out
}

/// Trade-weighted union of two solo baselines.
fn combine(a: &PerformanceStats, b: &PerformanceStats) -> PerformanceStats {
    let trades = a.trades + b.trades;
    if trades == 0 {
        return PerformanceStats::default();
    }
    let w = |x: f64, y: f64| (x * a.trades as f64 + y * b.trades as f64) / trades as f64;
    PerformanceStats {
        trades,
        wins: a.wins + b.wins,
        win_rate: (a.wins + b.wins) as f64 / trades as f64,
        expectancy: w(a.expectancy, b.expectancy),
        avg_win: w(a.avg_win, b.avg_win),
        avg_loss: w(a.avg_loss, b.avg_loss),
        win_loss_ratio: w(a.win_loss_ratio, b.win_loss_ratio),
    }
}

/// Agents present in each bucket, for coalition discovery.
pub(crate) fn bucket_members<'a>(
    buckets: &BTreeMap<BucketId, Bucket<'a>>,
) -> Vec<(BTreeSet<&'a str>, Vec<&'a TradeOutcome>)> {
    buckets
        .values()
        .map(|bucket| {
            let members: BTreeSet<&str> = bucket.keys().copied().collect();
            let trades: Vec<&TradeOutcome> = bucket.values().flat_map(|acts| executed(acts)).collect();
            (members, trades)
        })
        .collect()
}
