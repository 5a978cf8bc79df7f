//! Weighted indicator consensus.
//!
//! Score is `100 * (bullish - bearish) / total`, where every present
//! indicator contributes its weight to the total and its directional read
//! picks the side. Alignment is the score seen from the proposed direction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::indicators::{IndicatorKey, IndicatorSignal};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::trade::Direction;

/// Scores within this distance of zero are neutral.
pub const DEAD_ZONE: f64 = 15.0;
pub const DEFAULT_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusScore {
    /// [-100, 100], positive is bullish
    pub score: f64,
    pub bias: Bias,
    pub confirmations: usize,
    pub contradictions: usize,
    pub neutrals: usize,
    pub bullish_weight: f64,
    pub bearish_weight: f64,
    pub total_weight: f64,
    /// Score signed by the proposed direction; 0 for an unknown direction
    pub alignment: f64,
}

fn resolve_weight(
    key: IndicatorKey,
    noise: &[IndicatorKey],
    weights: Option<&BTreeMap<IndicatorKey, f64>>,
    noise_floor: f64,
) -> f64 {
    if let Some(w) = weights.and_then(|m| m.get(&key)).copied() {
        if w.is_finite() && w >= 0.0 {
            return w;
        }
    }
    if noise.contains(&key) {
        noise_floor
    } else {
        DEFAULT_WEIGHT
    }
}

pub fn bias_for(score: f64) -> Bias {
    if score > DEAD_ZONE {
        Bias::Bullish
    } else if score < -DEAD_ZONE {
        Bias::Bearish
    } else {
        Bias::Neutral
    }
}

pub fn score_consensus(
    signals: &BTreeMap<IndicatorKey, IndicatorSignal>,
    direction: Direction,
    noise: &[IndicatorKey],
    weights: Option<&BTreeMap<IndicatorKey, f64>>,
    noise_floor: f64,
) -> ConsensusScore {
    let mut out = ConsensusScore {
        score: 0.0,
        bias: Bias::Neutral,
        confirmations: 0,
        contradictions: 0,
        neutrals: 0,
        bullish_weight: 0.0,
        bearish_weight: 0.0,
        total_weight: 0.0,
        alignment: 0.0,
    };

    for (&key, &signal) in signals {
        let weight = resolve_weight(key, noise, weights, noise_floor);
        out.total_weight += weight;
        match signal {
            IndicatorSignal::Bullish => out.bullish_weight += weight,
            IndicatorSignal::Bearish => out.bearish_weight += weight,
            IndicatorSignal::Neutral => out.neutrals += 1,
        }
        if signal.confirms(direction) {
            out.confirmations += 1;
        } else if signal.polarity() * direction.sign() < 0.0 {
            out.contradictions += 1;
        }
    }

    if out.total_weight > 0.0 {
        out.score = (100.0 * (out.bullish_weight - out.bearish_weight) / out.total_weight).clamp(-100.0, 100.0);
    }
    out.bias = bias_for(out.score);
    out.alignment = out.score * direction.sign();
    log(
        Level::Trace,
        Domain::Consensus,
        "consensus",
        obj(&[
            ("direction", v_str(direction.as_str())),
            ("score", v_num(out.score)),
            ("confirmations", serde_json::json!(out.confirmations)),
            ("contradictions", serde_json::json!(out.contradictions)),
        ]),
    );
    out
}
