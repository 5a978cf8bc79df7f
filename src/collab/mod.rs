//! Agent collaboration: who trades well together, and how much that
//! evidence may move a decision.

pub mod pairing;
pub mod router;

pub use pairing::{
    analyze_pairs, AgentPair, AgentPairStatistics, EnvironmentStats, PairLabel, TimeDeltaSummary, VetoMetrics,
};
pub use router::{
    compose_adjustments, record_changed_outcome, resolve_adjustment, route_decision, tier_for, AuthorityAdjustment,
    InfluenceTier, Justification, RouteRequest, RoutedDecision, SuppressionReason,
};
