//! Trade governance core.
//!
//! Pipeline, leaf to root:
//! - `signature` canonicalizes symbol/session/regime/direction into
//!   environment keys
//! - `learning` classifies indicators per pair with walk-forward validation
//! - `consensus` scores current indicator reads with learned weights
//! - `collab` measures agent pairs and routes their authority
//! - `coalition` does the same for larger agent sets
//! - `governance` runs the gate chain that approves, throttles or rejects
//!
//! Mutable safety state lives in `reliability::state::SessionState` and is
//! passed explicitly; everything else is a pure function of its inputs.

pub mod coalition;
pub mod collab;
pub mod config;
pub mod consensus;
pub mod governance;
pub mod indicators;
pub mod learning;
pub mod logging;
pub mod metrics;
pub mod regime;
pub mod reliability;
pub mod signature;
pub mod trade;
pub mod walk_forward;

pub use config::Config;
pub use reliability::state::SessionState;
