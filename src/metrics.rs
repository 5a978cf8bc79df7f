//! Performance statistics over sets of closed trades.

use serde::{Deserialize, Serialize};

use crate::trade::TradeOutcome;

/// Win/loss profile of a trade set, results in pips.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    /// Mean pips per trade
    pub expectancy: f64,
    pub avg_win: f64,
    /// Mean losing result as a positive number
    pub avg_loss: f64,
    /// avg_win / avg_loss; 0 when there are no losses to divide by
    pub win_loss_ratio: f64,
}

impl PerformanceStats {
    /// Trades without usable prices still count toward win rate but not
    /// toward pip averages.
    pub fn from_trades<'a, I>(trades: I) -> Self
    where
        I: IntoIterator<Item = &'a TradeOutcome>,
    {
        let mut stats = PerformanceStats::default();
        let mut priced = 0usize;
        let mut total = 0.0;
        let mut win_sum = 0.0;
        let mut win_n = 0usize;
        let mut loss_sum = 0.0;
        let mut loss_n = 0usize;

        for trade in trades {
            stats.trades += 1;
            if trade.won {
                stats.wins += 1;
            }
            if let Some(pips) = trade.pips() {
                priced += 1;
                total += pips;
                if pips > 0.0 {
                    win_sum += pips;
                    win_n += 1;
                } else if pips < 0.0 {
                    loss_sum += -pips;
                    loss_n += 1;
                }
            }
        }

        if stats.trades > 0 {
            stats.win_rate = stats.wins as f64 / stats.trades as f64;
        }
        if priced > 0 {
            stats.expectancy = total / priced as f64;
        }
        if win_n > 0 {
            stats.avg_win = win_sum / win_n as f64;
        }
        if loss_n > 0 {
            stats.avg_loss = loss_sum / loss_n as f64;
            stats.win_loss_ratio = stats.avg_win / stats.avg_loss;
        }
        stats
    }

    /// Standard error of the win rate.
    pub fn win_rate_std_error(&self) -> f64 {
        if self.trades == 0 {
            return 0.0;
        }
        (self.win_rate * (1.0 - self.win_rate) / self.trades as f64).sqrt()
    }
}
