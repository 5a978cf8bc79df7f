use serde::Serialize;
use std::collections::VecDeque;

/// Rolling share of decisions that influence flipped.
///
/// The window is driven by decision timestamps, not wall-clock time, so
/// replaying history gives the same answers as running live.
#[derive(Debug, Clone)]
pub struct FlipBudget {
    window_ms: i64,
    max_ratio: f64,
    decisions: VecDeque<(i64, bool)>,
    flipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetSnapshot {
    pub decisions: usize,
    pub flipped: usize,
    pub ratio: f64,
    pub max_ratio: f64,
    pub exceeded: bool,
}

impl FlipBudget {
    pub fn new(window_ms: i64, max_ratio: f64) -> Self {
        Self { window_ms, max_ratio, decisions: VecDeque::new(), flipped: 0 }
    }

    fn evict(&mut self, now_ms: i64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while let Some(&(ts, flipped)) = self.decisions.front() {
            if ts > cutoff {
                break;
            }
            self.decisions.pop_front();
            if flipped {
                self.flipped -= 1;
            }
        }
    }

    /// Record one routed decision.
    pub fn record(&mut self, ts_ms: i64, flipped: bool) {
        self.evict(ts_ms);
        self.decisions.push_back((ts_ms, flipped));
        if flipped {
            self.flipped += 1;
        }
    }

    pub fn ratio(&self) -> f64 {
        if self.decisions.is_empty() {
            return 0.0;
        }
        self.flipped as f64 / self.decisions.len() as f64
    }

    pub fn is_exceeded(&self) -> bool {
        self.ratio() > self.max_ratio
    }

    /// Whether a flip at `now_ms` is allowed once stale decisions age out.
    pub fn allows_flip(&mut self, now_ms: i64) -> bool {
        self.evict(now_ms);
        !self.is_exceeded()
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            decisions: self.decisions.len(),
            flipped: self.flipped,
            ratio: self.ratio(),
            max_ratio: self.max_ratio,
            exceeded: self.is_exceeded(),
        }
    }

    pub fn max_ratio(&self) -> f64 {
        self.max_ratio
    }

    pub fn reset(&mut self) {
        self.decisions.clear();
        self.flipped = 0;
    }
}
