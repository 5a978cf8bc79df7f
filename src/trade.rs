//! Trade outcome records and agent actions.
//!
//! Records are immutable inputs: every analysis borrows them and derives
//! new values, nothing writes back.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::indicators::{IndicatorKey, IndicatorSignal};
use crate::signature::{build_environment_key, normalize_symbol, EnvironmentKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    Unknown,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
            Direction::Unknown => "unknown",
        }
    }

    /// +1 long, -1 short, 0 unknown.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
            Direction::Unknown => 0.0,
        }
    }

    pub fn opposes(&self, other: Direction) -> bool {
        matches!(
            (self, other),
            (Direction::Long, Direction::Short) | (Direction::Short, Direction::Long)
        )
    }
}

/// Where a trade was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeEnvironment {
    Live,
    Practice,
    Backtest,
    Shadow,
}

/// One closed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub id: String,
    pub pair: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Entry time, epoch milliseconds
    pub timestamp_ms: i64,
    pub agent_id: String,
    pub environment: TradeEnvironment,
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub regime: String,
    #[serde(default)]
    pub signals: BTreeMap<IndicatorKey, IndicatorSignal>,
    pub won: bool,
}

impl TradeOutcome {
    /// Live trade with `won` derived from the price move. Session and regime
    /// start empty and signals unset.
    pub fn new(
        id: &str,
        pair: &str,
        direction: Direction,
        entry_price: f64,
        exit_price: f64,
        timestamp_ms: i64,
        agent_id: &str,
    ) -> Self {
        let won = (exit_price - entry_price) * direction.sign() > 0.0;
        Self {
            id: id.to_string(),
            pair: pair.to_string(),
            direction,
            entry_price,
            exit_price,
            timestamp_ms,
            agent_id: agent_id.to_string(),
            environment: TradeEnvironment::Live,
            session: String::new(),
            regime: String::new(),
            signals: BTreeMap::new(),
            won,
        }
    }

    pub fn with_signal(mut self, key: IndicatorKey, signal: IndicatorSignal) -> Self {
        self.signals.insert(key, signal);
        self
    }

    pub fn with_context(mut self, session: &str, regime: &str) -> Self {
        self.session = session.to_string();
        self.regime = regime.to_string();
        self
    }

    pub fn with_environment(mut self, environment: TradeEnvironment) -> Self {
        self.environment = environment;
        self
    }

    /// Pip size: 0.01 for JPY-quoted pairs, 0.0001 otherwise.
    pub fn pip_size(&self) -> f64 {
        if normalize_symbol(&self.pair).ends_with("_JPY") {
            0.01
        } else {
            0.0001
        }
    }

    /// Realized result in pips; `None` when prices are unusable.
    pub fn pips(&self) -> Option<f64> {
        if !self.entry_price.is_finite()
            || !self.exit_price.is_finite()
            || self.entry_price <= 0.0
            || self.exit_price <= 0.0
        {
            return None;
        }
        Some((self.exit_price - self.entry_price) * self.direction.sign() / self.pip_size())
    }

    pub fn environment_key(&self) -> EnvironmentKey {
        build_environment_key(&self.pair, &self.session, &self.regime, self.direction.as_str())
    }
}

/// An agent evaluated a market without producing a closed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowDecision {
    pub agent_id: String,
    pub pair: String,
    pub timestamp_ms: i64,
    /// `None` records an explicit no-op (the agent passed on the setup).
    #[serde(default)]
    pub direction: Option<Direction>,
}

/// Everything an agent did that collaboration analysis can see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentAction {
    Executed(TradeOutcome),
    Shadow(ShadowDecision),
}

impl AgentAction {
    pub fn agent_id(&self) -> &str {
        match self {
            AgentAction::Executed(t) => &t.agent_id,
            AgentAction::Shadow(s) => &s.agent_id,
        }
    }

    pub fn pair(&self) -> &str {
        match self {
            AgentAction::Executed(t) => &t.pair,
            AgentAction::Shadow(s) => &s.pair,
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        match self {
            AgentAction::Executed(t) => t.timestamp_ms,
            AgentAction::Shadow(s) => s.timestamp_ms,
        }
    }

    /// Direction taken or leaned; `None` for a no-op shadow.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            AgentAction::Executed(t) => Some(t.direction),
            AgentAction::Shadow(s) => s.direction,
        }
    }

    pub fn executed(&self) -> Option<&TradeOutcome> {
        match self {
            AgentAction::Executed(t) => Some(t),
            AgentAction::Shadow(_) => None,
        }
    }
}

/// Executed trades out of a mixed action list.
pub fn executed_trades(actions: &[AgentAction]) -> Vec<TradeOutcome> {
    actions.iter().filter_map(|a| a.executed().cloned()).collect()
}

/// Read a JSON array of agent actions, as handed over by the persistence
/// collaborator.
pub fn load_actions(path: &Path) -> Result<Vec<AgentAction>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let actions: Vec<AgentAction> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse agent actions in {}", path.display()))?;
    Ok(actions)
}
