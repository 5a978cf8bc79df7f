//! Safety machinery shared by collaboration and coalition influence:
//! rollback breakers, the flip budget, and the session state that owns them.

pub mod budget;
pub mod circuit;
pub mod state;

pub use budget::FlipBudget;
pub use circuit::{ChangedOutcome, ChangedTradeLedger, RollbackBreaker};
pub use state::SessionState;
