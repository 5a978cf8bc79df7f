use serde::Serialize;

/// Realized result of a decision that influence changed, next to what the
/// unmodified baseline expected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChangedOutcome {
    pub realized_pips: f64,
    pub baseline_expectancy: f64,
}

/// Fixed-capacity ring of changed outcomes, in recording order.
#[derive(Debug, Clone)]
pub struct ChangedTradeLedger {
    buf: Vec<ChangedOutcome>,
    capacity: usize,
    idx: usize,
    filled: bool,
}

impl ChangedTradeLedger {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { buf: Vec::with_capacity(capacity), capacity, idx: 0, filled: false }
    }

    /// Push a value, returning the one it displaced once the ring is full.
    pub fn push(&mut self, value: ChangedOutcome) -> Option<ChangedOutcome> {
        let old = if self.filled {
            Some(std::mem::replace(&mut self.buf[self.idx], value))
        } else {
            self.buf.push(value);
            None
        };
        self.idx = (self.idx + 1) % self.capacity;
        if self.idx == 0 {
            self.filled = true;
        }
        old
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.filled
    }

    pub fn changed_expectancy(&self) -> f64 {
        mean(self.buf.iter().map(|o| o.realized_pips))
    }

    pub fn baseline_expectancy(&self) -> f64 {
        mean(self.buf.iter().map(|o| o.baseline_expectancy))
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.idx = 0;
        self.filled = false;
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    Closed,
    Open,
}

/// Opens when changed decisions underperform their baseline.
///
/// Evaluated only on a full ledger. Stays open until `clear`.
#[derive(Debug, Clone)]
pub struct RollbackBreaker {
    pub state: CircuitState,
    pub threshold: f64,
    pub trips: u32,
    ledger: ChangedTradeLedger,
}

/// Result of a trip check, kept for logging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RollbackCheck {
    pub changed_expectancy: f64,
    pub baseline_expectancy: f64,
    pub samples: usize,
    pub tripped: bool,
}

impl RollbackBreaker {
    pub fn new(lookback: usize, threshold: f64) -> Self {
        Self {
            state: CircuitState::Closed,
            threshold,
            trips: 0,
            ledger: ChangedTradeLedger::new(lookback),
        }
    }

    /// Record one changed outcome. Returns the check when this record
    /// opened the breaker.
    pub fn record(&mut self, outcome: ChangedOutcome) -> Option<RollbackCheck> {
        if !outcome.realized_pips.is_finite() || !outcome.baseline_expectancy.is_finite() {
            return None;
        }
        self.ledger.push(outcome);
        if !self.allow() || !self.ledger.is_full() {
            return None;
        }
        let check = self.check();
        if check.tripped {
            self.state = CircuitState::Open;
            self.trips += 1;
            return Some(check);
        }
        None
    }

    pub fn check(&self) -> RollbackCheck {
        let changed = self.ledger.changed_expectancy();
        let baseline = self.ledger.baseline_expectancy();
        let shortfall = baseline - changed;
        RollbackCheck {
            changed_expectancy: changed,
            baseline_expectancy: baseline,
            samples: self.ledger.len(),
            tripped: self.ledger.is_full() && shortfall > 0.0 && shortfall >= self.threshold * baseline.abs(),
        }
    }

    pub fn allow(&self) -> bool {
        matches!(self.state, CircuitState::Closed)
    }

    pub fn ledger(&self) -> &ChangedTradeLedger {
        &self.ledger
    }

    /// Manual re-enable. The ledger restarts empty.
    pub fn clear(&mut self) {
        self.state = CircuitState::Closed;
        self.ledger.reset();
    }
}
