//! JSON-lines event log.
//!
//! Every record is one line on stderr, and also on
//! `<LOG_DIR>/<run_id>/events.jsonl` when `LOG_DIR` is set. Records carry a
//! process-wide sequence number and run id so a governance session can be
//! replayed and audited. `LOG_LEVEL` and `LOG_DOMAINS` are read once, on the
//! first record.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            other => Err(format!("unknown log level {other:?}")),
        }
    }
}

/// Pipeline stage a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Learning,
    Consensus,
    Collab,
    Coalition,
    Governance,
    /// Rollback breakers, flip budget, kill-switches
    Safety,
    Config,
    System,
    Profile,
}

impl Domain {
    const ALL: [Domain; 9] = [
        Domain::Learning,
        Domain::Consensus,
        Domain::Collab,
        Domain::Coalition,
        Domain::Governance,
        Domain::Safety,
        Domain::Config,
        Domain::System,
        Domain::Profile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Learning => "learning",
            Domain::Consensus => "consensus",
            Domain::Collab => "collab",
            Domain::Coalition => "coalition",
            Domain::Governance => "governance",
            Domain::Safety => "safety",
            Domain::Config => "config",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    fn parse(s: &str) -> Option<Domain> {
        Domain::ALL.into_iter().find(|d| d.as_str() == s.trim())
    }
}

/// Which records get written.
#[derive(Debug, Clone, PartialEq)]
struct Filter {
    min_level: Level,
    /// `None` admits every domain
    domains: Option<Vec<Domain>>,
}

impl Filter {
    fn parse(level: Option<&str>, domains: Option<&str>) -> Self {
        let min_level = level.and_then(|l| l.parse().ok()).unwrap_or(Level::Info);
        let domains = domains
            .filter(|d| !d.trim().eq_ignore_ascii_case("all"))
            .map(|list| list.split(',').filter_map(Domain::parse).collect());
        Self { min_level, domains }
    }

    fn admits(&self, level: Level, domain: Domain) -> bool {
        level >= self.min_level && self.domains.as_ref().map_or(true, |ds| ds.contains(&domain))
    }
}

struct Sink {
    run_id: String,
    filter: Filter,
    file: Option<Mutex<BufWriter<File>>>,
}

static SEQ: AtomicU64 = AtomicU64::new(0);
static SINK: OnceLock<Sink> = OnceLock::new();

fn open_events_file(run_id: &str) -> Option<Mutex<BufWriter<File>>> {
    let dir = PathBuf::from(std::env::var("LOG_DIR").ok()?).join(run_id);
    let opened = fs::create_dir_all(&dir).and_then(|_| File::create(dir.join("events.jsonl")));
    match opened {
        Ok(file) => Some(Mutex::new(BufWriter::new(file))),
        Err(err) => {
            eprintln!("[log] events file unavailable under {}: {err}", dir.display());
            None
        }
    }
}

fn sink() -> &'static Sink {
    SINK.get_or_init(|| {
        let run_id = std::env::var("RUN_ID").unwrap_or_else(|_| {
            format!("gov-{}-{}", Utc::now().timestamp_millis(), std::process::id())
        });
        let filter = Filter::parse(
            std::env::var("LOG_LEVEL").ok().as_deref(),
            std::env::var("LOG_DOMAINS").ok().as_deref(),
        );
        let file = open_events_file(&run_id);
        Sink { run_id, filter, file }
    })
}

/// Keys hoisted out of `data` so records can be joined on them.
const CORRELATION_KEYS: [&str; 5] = ["pair", "agent_id", "proposal_id", "coalition", "msg"];

#[derive(Serialize)]
struct Record<'a> {
    ts: String,
    run_id: &'a str,
    seq: u64,
    lvl: Level,
    domain: &'static str,
    event: &'a str,
    #[serde(flatten)]
    correlation: Map<String, Value>,
    data: Map<String, Value>,
}

fn build_record<'a>(
    run_id: &'a str,
    level: Level,
    domain: Domain,
    event: &'a str,
    mut data: Map<String, Value>,
) -> Record<'a> {
    let correlation = CORRELATION_KEYS
        .iter()
        .filter_map(|k| data.remove(*k).map(|v| (k.to_string(), v)))
        .collect();
    Record {
        ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        run_id,
        seq: SEQ.fetch_add(1, Ordering::Relaxed),
        lvl: level,
        domain: domain.as_str(),
        event,
        correlation,
        data,
    }
}

/// Emit one structured record.
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let sink = sink();
    if !sink.filter.admits(level, domain) {
        return;
    }
    let record = build_record(&sink.run_id, level, domain, event, fields);
    let Ok(line) = serde_json::to_string(&record) else {
        return;
    };
    if let Some(file) = &sink.file {
        if let Ok(mut w) = file.lock() {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }
    eprintln!("{line}");
}

// ---------------------------------------------------------------------------
// Domain helpers
// ---------------------------------------------------------------------------

/// Summary of one indicator learning pass for a pair or pair/regime bucket.
pub fn log_classification(pair: &str, bucket: &str, trades: usize, signals: usize, noise: usize, quality_score: f64) {
    log(
        Level::Debug,
        Domain::Learning,
        "classification",
        obj(&[
            ("pair", v_str(pair)),
            ("bucket", v_str(bucket)),
            ("trades", json!(trades)),
            ("signals", json!(signals)),
            ("noise", json!(noise)),
            ("quality_score", v_num(quality_score)),
        ]),
    );
}

pub fn log_gate(proposal_id: &str, gate: &str, effect: &str, message: &str) {
    log(
        Level::Debug,
        Domain::Governance,
        "gate",
        obj(&[
            ("proposal_id", v_str(proposal_id)),
            ("gate", v_str(gate)),
            ("effect", v_str(effect)),
            ("msg", v_str(message)),
        ]),
    );
}

/// Rejections log at info, everything else at debug.
pub fn log_decision(proposal_id: &str, decision: &str, composite_score: f64, adjusted_probability: f64, triggered: &[&str]) {
    let level = if decision == "rejected" { Level::Info } else { Level::Debug };
    log(
        level,
        Domain::Governance,
        "decision",
        obj(&[
            ("proposal_id", v_str(proposal_id)),
            ("decision", v_str(decision)),
            ("composite_score", v_num(composite_score)),
            ("adjusted_probability", v_num(adjusted_probability)),
            ("triggered", json!(triggered)),
        ]),
    );
}

/// A safety breaker tripped and some influence is now off.
pub fn log_rollback(scope: &str, changed_expectancy: f64, baseline_expectancy: f64, samples: usize) {
    log(
        Level::Warn,
        Domain::Safety,
        "rollback_tripped",
        obj(&[
            ("scope", v_str(scope)),
            ("changed_expectancy", v_num(changed_expectancy)),
            ("baseline_expectancy", v_num(baseline_expectancy)),
            ("samples", json!(samples)),
        ]),
    );
}

pub fn log_budget(agent_id: &str, flip_ratio: f64, max_ratio: f64) {
    log(
        Level::Warn,
        Domain::Safety,
        "flip_suppressed",
        obj(&[
            ("agent_id", v_str(agent_id)),
            ("flip_ratio", v_num(flip_ratio)),
            ("max_ratio", v_num(max_ratio)),
        ]),
    );
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

/// Non-finite numbers become `null` rather than breaking the line.
pub fn v_num(n: f64) -> Value {
    json!(n)
}

/// Emits a trace-level timing record when dropped.
pub struct ProfileScope {
    label: &'static str,
    fields: Map<String, Value>,
    started: Instant,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        Self::with_context(label, &[])
    }

    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        Self { label, fields: obj(fields), started: Instant::now() }
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let mut fields = std::mem::take(&mut self.fields);
        fields.insert("label".into(), v_str(self.label));
        fields.insert("elapsed_ms".into(), v_num(self.started.elapsed().as_secs_f64() * 1e3));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}
