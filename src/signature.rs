//! Environment signature canonicalization.
//!
//! Free-form context strings (symbol, session, regime, direction) are mapped
//! onto small closed vocabularies and joined into one [`EnvironmentKey`].
//! Two raw inputs naming the same context produce the same key; no
//! normalized component can contain the `|` separator, so distinct contexts
//! never collide.

use chrono::{DateTime, Timelike};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::regime::{axis_for_label, phase_for_label, TrendAxis, VolatilityPhase};
use crate::trade::Direction;

const SEPARATOR: char = '|';
const UNKNOWN: &str = "unknown";

/// Lowercase and collapse every run of non-alphanumerics to a single `_`.
fn token(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

// =============================================================================
// Symbol
// =============================================================================

/// Canonical pair symbol: `EUR_USD` for six-letter currency codes, otherwise
/// the upper-cased alphanumeric code, `UNKNOWN` when nothing is left.
pub fn normalize_symbol(raw: &str) -> String {
    let compact: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if compact.is_empty() {
        return "UNKNOWN".to_string();
    }
    if compact.len() == 6 && compact.chars().all(|c| c.is_ascii_alphabetic()) {
        return format!("{}_{}", &compact[..3], &compact[3..]);
    }
    compact
}

// =============================================================================
// Session
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Session {
    Asian,
    London,
    NewYork,
    Overlap,
    OffHours,
    Unknown,
}

impl Session {
    pub fn as_str(&self) -> &'static str {
        match self {
            Session::Asian => "asian",
            Session::London => "london",
            Session::NewYork => "new_york",
            Session::Overlap => "overlap",
            Session::OffHours => "off_hours",
            Session::Unknown => UNKNOWN,
        }
    }
}

pub fn normalize_session(raw: &str) -> Session {
    let t = token(raw);
    match t.as_str() {
        "asia" | "asian" | "tokyo" | "sydney" | "asia_pacific" | "apac" | "hong_kong" | "singapore" => {
            Session::Asian
        }
        "london" | "europe" | "european" | "eu" | "frankfurt" | "ldn" => Session::London,
        "new_york" | "newyork" | "ny" | "nyc" | "us" | "usa" | "america" | "american" => Session::NewYork,
        "overlap" | "london_ny" | "london_new_york" | "ny_london" | "london_ny_overlap"
        | "london_new_york_overlap" | "eu_us" => Session::Overlap,
        "off_hours" | "offhours" | "after_hours" | "closed" | "weekend" | "rollover" => Session::OffHours,
        _ if t.contains("overlap") => Session::Overlap,
        _ => Session::Unknown,
    }
}

/// Infer the trading session from a UTC epoch-millisecond timestamp.
pub fn session_from_timestamp(ts_ms: i64) -> Session {
    let Some(dt) = DateTime::from_timestamp_millis(ts_ms) else {
        return Session::Unknown;
    };
    match dt.hour() {
        0..=6 => Session::Asian,
        7..=11 => Session::London,
        12..=15 => Session::Overlap,
        16..=20 => Session::NewYork,
        _ => Session::OffHours,
    }
}

// =============================================================================
// Regime
// =============================================================================

/// Coarse market regime used in environment keys. Indicator learning uses
/// the finer [`crate::regime::RegimeBucket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    Trending,
    Ranging,
    Volatile,
    Quiet,
    Unknown,
}

impl MarketRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::Trending => "trending",
            MarketRegime::Ranging => "ranging",
            MarketRegime::Volatile => "volatile",
            MarketRegime::Quiet => "quiet",
            MarketRegime::Unknown => UNKNOWN,
        }
    }
}

/// Exact synonyms first; compound labels ("trending expansion") fall back to
/// keyword precedence: a trend axis decides, otherwise the volatility phase.
pub fn normalize_regime(raw: &str) -> MarketRegime {
    match token(raw).as_str() {
        "trend" | "trending" | "trend_up" | "trend_down" | "uptrend" | "downtrend" | "trending_up"
        | "trending_down" | "directional" | "breakout" | "impulse" | "ignition" => MarketRegime::Trending,
        "range" | "ranging" | "range_bound" | "rangebound" | "sideways" | "choppy" | "chop"
        | "consolidation" | "mean_reverting" | "mean_reversion" => MarketRegime::Ranging,
        "volatile" | "volatility" | "high_volatility" | "high_vol" | "expansion" | "news" | "spike" => {
            MarketRegime::Volatile
        }
        "quiet" | "calm" | "low_volatility" | "low_vol" | "compression" | "squeeze" | "dead" => {
            MarketRegime::Quiet
        }
        _ => regime_from_keywords(raw),
    }
}

fn regime_from_keywords(raw: &str) -> MarketRegime {
    match (axis_for_label(raw), phase_for_label(raw)) {
        (Some(TrendAxis::Trending), _) => MarketRegime::Trending,
        (Some(TrendAxis::Ranging), _) => MarketRegime::Ranging,
        (None, Some(VolatilityPhase::Compression)) => MarketRegime::Quiet,
        (None, Some(_)) => MarketRegime::Volatile,
        (None, None) => MarketRegime::Unknown,
    }
}

// =============================================================================
// Direction
// =============================================================================

pub fn normalize_direction(raw: &str) -> Direction {
    // numeric forms first: the token pass would strip the sign
    match raw.trim() {
        "1" | "+1" => return Direction::Long,
        "-1" => return Direction::Short,
        _ => {}
    }
    match token(raw).as_str() {
        "long" | "buy" | "bull" | "bullish" | "up" | "call" => Direction::Long,
        "short" | "sell" | "bear" | "bearish" | "down" | "put" => Direction::Short,
        _ => Direction::Unknown,
    }
}

// =============================================================================
// Environment key
// =============================================================================

/// Opaque grouping key: `SYMBOL|session|regime|direction`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentKey(String);

impl EnvironmentKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split back into `(symbol, session, regime, direction)`.
    pub fn parts(&self) -> Option<(&str, &str, &str, &str)> {
        let mut it = self.0.split(SEPARATOR);
        let parts = (it.next()?, it.next()?, it.next()?, it.next()?);
        if it.next().is_some() {
            return None;
        }
        Some(parts)
    }

    /// Short stable digest for log correlation.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..8])
    }
}

impl fmt::Display for EnvironmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn build_environment_key(symbol: &str, session: &str, regime: &str, direction: &str) -> EnvironmentKey {
    let symbol = normalize_symbol(symbol);
    let session = normalize_session(session);
    let regime = normalize_regime(regime);
    let direction = normalize_direction(direction);
    debug_assert!(!symbol.contains(SEPARATOR));
    EnvironmentKey(format!(
        "{symbol}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}",
        session.as_str(),
        regime.as_str(),
        direction.as_str()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_spellings_converge() {
        for raw in ["EUR/USD", "eurusd", "EUR_USD", "eur-usd", " Eur.Usd "] {
            assert_eq!(normalize_symbol(raw), "EUR_USD", "raw={raw:?}");
        }
        assert_eq!(normalize_symbol("BTCUSDT"), "BTCUSDT");
        assert_eq!(normalize_symbol("///"), "UNKNOWN");
    }

    #[test]
    fn test_session_synonyms() {
        assert_eq!(normalize_session("Tokyo"), Session::Asian);
        assert_eq!(normalize_session("NEW YORK"), Session::NewYork);
        assert_eq!(normalize_session("new-york"), Session::NewYork);
        assert_eq!(normalize_session("London/NY overlap"), Session::Overlap);
        assert_eq!(normalize_session("mars"), Session::Unknown);
    }

    #[test]
    fn test_session_from_timestamp_hours() {
        // 2024-01-02 08:00 UTC
        assert_eq!(session_from_timestamp(1_704_182_400_000), Session::London);
        // 2024-01-02 13:00 UTC
        assert_eq!(session_from_timestamp(1_704_200_400_000), Session::Overlap);
        // 2024-01-02 02:00 UTC
        assert_eq!(session_from_timestamp(1_704_160_800_000), Session::Asian);
    }

    #[test]
    fn test_direction_synonyms() {
        assert_eq!(normalize_direction("BUY"), Direction::Long);
        assert_eq!(normalize_direction("bullish"), Direction::Long);
        assert_eq!(normalize_direction("Sell"), Direction::Short);
        assert_eq!(normalize_direction("-1"), Direction::Short);
        assert_eq!(normalize_direction("sideways"), Direction::Unknown);
    }

    #[test]
    fn test_key_same_context_same_key() {
        let a = build_environment_key("EUR/USD", "London", "Trending Up", "BUY");
        let b = build_environment_key("eurusd", "europe", "uptrend", "long");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "EUR_USD|london|trending|long");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_key_different_contexts_differ() {
        let a = build_environment_key("EUR/USD", "London", "trending", "long");
        let b = build_environment_key("EUR/USD", "London", "trending", "short");
        let c = build_environment_key("EUR/GBP", "London", "trending", "long");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_compound_regime_labels() {
        assert_eq!(normalize_regime("trending expansion"), MarketRegime::Trending);
        assert_eq!(normalize_regime("Ranging-Compression"), MarketRegime::Ranging);
        assert_eq!(normalize_regime("volatility spike exhaustion"), MarketRegime::Volatile);
        assert_eq!(normalize_regime("tight coil"), MarketRegime::Quiet);
        assert_eq!(normalize_regime("lunch"), MarketRegime::Unknown);
    }

    #[test]
    fn test_key_parts_round_trip() {
        let key = build_environment_key("gbp/jpy", "ny", "choppy", "sell");
        assert_eq!(key.parts(), Some(("GBP_JPY", "new_york", "ranging", "short")));
    }
}
