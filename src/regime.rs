//! Regime buckets for indicator learning.
//!
//! A free-form regime label is reduced to one of eight buckets:
//! {trending, ranging} × {compression, expansion, ignition, exhaustion}.
//! Phase keywords are matched first, in precedence order; the trend axis
//! then comes from explicit keywords, with ignition always implying a trend.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::trade::TradeOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendAxis {
    Trending,
    Ranging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityPhase {
    Compression,
    Expansion,
    Ignition,
    Exhaustion,
}

impl VolatilityPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolatilityPhase::Compression => "compression",
            VolatilityPhase::Expansion => "expansion",
            VolatilityPhase::Ignition => "ignition",
            VolatilityPhase::Exhaustion => "exhaustion",
        }
    }
}

/// One of the eight learning buckets. Serialized as its key string
/// (`trending_ignition`) so it can key JSON maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct RegimeBucket {
    pub axis: TrendAxis,
    pub phase: VolatilityPhase,
}

impl RegimeBucket {
    pub const ALL: [RegimeBucket; 8] = [
        RegimeBucket { axis: TrendAxis::Trending, phase: VolatilityPhase::Compression },
        RegimeBucket { axis: TrendAxis::Trending, phase: VolatilityPhase::Expansion },
        RegimeBucket { axis: TrendAxis::Trending, phase: VolatilityPhase::Ignition },
        RegimeBucket { axis: TrendAxis::Trending, phase: VolatilityPhase::Exhaustion },
        RegimeBucket { axis: TrendAxis::Ranging, phase: VolatilityPhase::Compression },
        RegimeBucket { axis: TrendAxis::Ranging, phase: VolatilityPhase::Expansion },
        RegimeBucket { axis: TrendAxis::Ranging, phase: VolatilityPhase::Ignition },
        RegimeBucket { axis: TrendAxis::Ranging, phase: VolatilityPhase::Exhaustion },
    ];

    pub fn new(axis: TrendAxis, phase: VolatilityPhase) -> Self {
        Self { axis, phase }
    }

    pub fn key(&self) -> String {
        let axis = match self.axis {
            TrendAxis::Trending => "trending",
            TrendAxis::Ranging => "ranging",
        };
        format!("{}_{}", axis, self.phase.as_str())
    }
}

impl fmt::Display for RegimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl From<RegimeBucket> for String {
    fn from(bucket: RegimeBucket) -> Self {
        bucket.key()
    }
}

impl TryFrom<String> for RegimeBucket {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RegimeBucket::ALL
            .into_iter()
            .find(|b| b.key() == value)
            .ok_or_else(|| format!("unknown regime bucket: {value}"))
    }
}

const PHASE_KEYWORDS: [(VolatilityPhase, &[&str]); 4] = [
    (VolatilityPhase::Ignition, &["ignit", "breakout", "launch"]),
    (VolatilityPhase::Exhaustion, &["exhaust", "climax", "blowoff", "blow_off", "reversal", "fading"]),
    (VolatilityPhase::Expansion, &["expan", "volatil", "impulse", "extend"]),
    (VolatilityPhase::Compression, &["compress", "squeeze", "quiet", "coil", "consolidat", "tight"]),
];

const TRENDING_KEYWORDS: &[&str] = &["trend", "directional"];
const RANGING_KEYWORDS: &[&str] = &["rang", "chop", "sideways", "mean_rev", "meanrev", "consolidat"];

fn keyword_form(label: &str) -> String {
    label.trim().to_lowercase().replace([' ', '-'], "_")
}

fn phase_in(lower: &str) -> Option<VolatilityPhase> {
    PHASE_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(phase, _)| *phase)
}

fn axis_in(lower: &str, phase: Option<VolatilityPhase>) -> Option<TrendAxis> {
    if phase == Some(VolatilityPhase::Ignition) || TRENDING_KEYWORDS.iter().any(|w| lower.contains(w)) {
        Some(TrendAxis::Trending)
    } else if RANGING_KEYWORDS.iter().any(|w| lower.contains(w)) {
        Some(TrendAxis::Ranging)
    } else {
        None
    }
}

/// Volatility phase named by a free-form label, highest precedence first.
pub fn phase_for_label(label: &str) -> Option<VolatilityPhase> {
    phase_in(&keyword_form(label))
}

/// Trend axis named by a free-form label. Ignition always implies a trend.
pub fn axis_for_label(label: &str) -> Option<TrendAxis> {
    let lower = keyword_form(label);
    axis_in(&lower, phase_in(&lower))
}

/// Derive the bucket for a regime label; `None` when the label carries no
/// recognizable keyword at all.
pub fn bucket_for_label(label: &str) -> Option<RegimeBucket> {
    let lower = keyword_form(label);
    if lower.is_empty() {
        return None;
    }
    let phase = phase_in(&lower);
    let axis = axis_in(&lower, phase);

    match (axis, phase) {
        (Some(axis), Some(phase)) => Some(RegimeBucket::new(axis, phase)),
        (Some(TrendAxis::Trending), None) => {
            Some(RegimeBucket::new(TrendAxis::Trending, VolatilityPhase::Expansion))
        }
        (Some(TrendAxis::Ranging), None) => {
            Some(RegimeBucket::new(TrendAxis::Ranging, VolatilityPhase::Compression))
        }
        (None, Some(phase @ (VolatilityPhase::Expansion | VolatilityPhase::Exhaustion))) => {
            Some(RegimeBucket::new(TrendAxis::Trending, phase))
        }
        (None, Some(phase)) => Some(RegimeBucket::new(TrendAxis::Ranging, phase)),
        (None, None) => None,
    }
}

/// Group trades by bucket, preserving input order inside each bucket.
/// Trades whose label maps to no bucket are left out.
pub fn group_by_bucket<'a>(trades: &[&'a TradeOutcome]) -> BTreeMap<RegimeBucket, Vec<&'a TradeOutcome>> {
    let mut groups: BTreeMap<RegimeBucket, Vec<&'a TradeOutcome>> = BTreeMap::new();
    for trade in trades {
        if let Some(bucket) = bucket_for_label(&trade.regime) {
            groups.entry(bucket).or_default().push(trade);
        }
    }
    groups
}
