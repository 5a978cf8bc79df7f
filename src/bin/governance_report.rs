use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use tradegate::coalition::{analyze_coalitions, CoalitionRecommendation};
use tradegate::collab::{analyze_pairs, AgentPairStatistics};
use tradegate::learning::{learn_all_pairs, PairIndicatorProfile};
use tradegate::logging::{log, obj, v_str, Domain, Level};
use tradegate::trade::{executed_trades, load_actions};
use tradegate::Config;

#[derive(Serialize)]
struct Report {
    actions: usize,
    executed: usize,
    profiles: BTreeMap<String, PairIndicatorProfile>,
    pairs: Vec<AgentPairStatistics>,
    coalitions: Vec<CoalitionRecommendation>,
}

fn main() -> Result<()> {
    let Some(path) = std::env::args().nth(1).map(PathBuf::from) else {
        bail!("usage: governance_report <actions.json>");
    };
    let cfg = Config::from_env();
    cfg.validate().context("invalid configuration")?;

    let actions = load_actions(&path)?;
    log(
        Level::Info,
        Domain::System,
        "report_start",
        obj(&[("path", v_str(&path.display().to_string())), ("actions", serde_json::json!(actions.len()))]),
    );

    let trades = executed_trades(&actions);
    let report = Report {
        actions: actions.len(),
        executed: trades.len(),
        profiles: if cfg.adaptive_learning { learn_all_pairs(&trades, &cfg.learning) } else { BTreeMap::new() },
        pairs: analyze_pairs(&actions, &cfg.collab),
        coalitions: analyze_coalitions(&actions, cfg.collab.pairing_window_ms, &cfg.coalition),
    };

    let out = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
    println!("{out}");
    Ok(())
}
