//! Indicator vocabulary shared by learning, weighting and consensus.
//!
//! The key set is closed: adding an indicator means adding a variant here,
//! and every `match` over `IndicatorKey` is then checked by the compiler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::trade::Direction;

/// Technical indicators whose directional reads are recorded on trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKey {
    Rsi,
    Macd,
    EmaCross,
    SmaTrend,
    Bollinger,
    Stochastic,
    Adx,
    Ichimoku,
    Cci,
    WilliamsR,
    Momentum,
    Vwap,
    Fibonacci,
    SupportResistance,
}

impl IndicatorKey {
    pub const ALL: [IndicatorKey; 14] = [
        IndicatorKey::Rsi,
        IndicatorKey::Macd,
        IndicatorKey::EmaCross,
        IndicatorKey::SmaTrend,
        IndicatorKey::Bollinger,
        IndicatorKey::Stochastic,
        IndicatorKey::Adx,
        IndicatorKey::Ichimoku,
        IndicatorKey::Cci,
        IndicatorKey::WilliamsR,
        IndicatorKey::Momentum,
        IndicatorKey::Vwap,
        IndicatorKey::Fibonacci,
        IndicatorKey::SupportResistance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorKey::Rsi => "rsi",
            IndicatorKey::Macd => "macd",
            IndicatorKey::EmaCross => "ema_cross",
            IndicatorKey::SmaTrend => "sma_trend",
            IndicatorKey::Bollinger => "bollinger",
            IndicatorKey::Stochastic => "stochastic",
            IndicatorKey::Adx => "adx",
            IndicatorKey::Ichimoku => "ichimoku",
            IndicatorKey::Cci => "cci",
            IndicatorKey::WilliamsR => "williams_r",
            IndicatorKey::Momentum => "momentum",
            IndicatorKey::Vwap => "vwap",
            IndicatorKey::Fibonacci => "fibonacci",
            IndicatorKey::SupportResistance => "support_resistance",
        }
    }
}

impl fmt::Display for IndicatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndicatorKey {
    type Err = anyhow::Error;

    /// Accepts the canonical names plus the spellings upstream signal
    /// generators commonly emit (`EMA`, `bb`, `%R`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        let key = match cleaned.as_str() {
            "rsi" => IndicatorKey::Rsi,
            "macd" => IndicatorKey::Macd,
            "ema" | "emacross" | "emacrossover" => IndicatorKey::EmaCross,
            "sma" | "smatrend" | "ma" | "movingaverage" => IndicatorKey::SmaTrend,
            "bb" | "bollinger" | "bollingerbands" => IndicatorKey::Bollinger,
            "stoch" | "stochastic" => IndicatorKey::Stochastic,
            "adx" | "dmi" => IndicatorKey::Adx,
            "ichimoku" | "cloud" => IndicatorKey::Ichimoku,
            "cci" => IndicatorKey::Cci,
            "williamsr" | "willr" | "r" => IndicatorKey::WilliamsR,
            "momentum" | "mom" | "roc" => IndicatorKey::Momentum,
            "vwap" => IndicatorKey::Vwap,
            "fib" | "fibonacci" => IndicatorKey::Fibonacci,
            "sr" | "supportresistance" | "levels" => IndicatorKey::SupportResistance,
            _ => anyhow::bail!("unknown indicator key: {s:?}"),
        };
        Ok(key)
    }
}

/// Directional read of one indicator at trade entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorSignal {
    Bullish,
    Bearish,
    Neutral,
}

impl IndicatorSignal {
    /// True when the read agrees with the trade direction.
    pub fn confirms(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (IndicatorSignal::Bullish, Direction::Long) | (IndicatorSignal::Bearish, Direction::Short)
        )
    }

    /// +1 bullish, -1 bearish, 0 neutral.
    pub fn polarity(&self) -> f64 {
        match self {
            IndicatorSignal::Bullish => 1.0,
            IndicatorSignal::Bearish => -1.0,
            IndicatorSignal::Neutral => 0.0,
        }
    }
}
