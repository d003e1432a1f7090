//! Symbolic-execution corroboration
//!
//! Asks an external engine whether the transaction sequence of a candidate
//! proof is feasible. Verdicts are advisory evidence attached to the job and
//! never change a dynamic-test outcome.

use super::cancel::CancelHandle;
use super::job::{CandidateProof, TargetProject};
use crate::error::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

lazy_static::lazy_static! {
    static ref PRANK: Regex =
        Regex::new(r"vm\.(startPrank|prank|stopPrank)\s*\(([^)]*)\)").expect("prank pattern is valid");
    static ref EXTERNAL_CALL: Regex = Regex::new(
        r"\b([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)\s*(?:\{\s*value\s*:\s*([^}]+?)\s*\})?\s*\("
    )
    .expect("call pattern is valid");
}

/// Receivers that are test scaffolding rather than transactions
const SCAFFOLDING: &[&str] = &["vm", "console", "console2", "abi", "this", "super", "msg", "block", "tx"];

/// One transaction of an exploit sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStep {
    /// Pranked sender, if any
    pub caller: Option<String>,
    /// Receiver expression
    pub target: String,
    pub function: String,
    /// Attached value expression
    pub value: Option<String>,
}

/// Extract the transaction sequence of a proof, in source order
pub fn extract_transactions(proof: &CandidateProof) -> Vec<TransactionStep> {
    enum Event {
        Prank(String, String),
        Call(TransactionStep),
    }
    let mut events: Vec<(usize, Event)> = Vec::new();
    for cap in PRANK.captures_iter(&proof.source) {
        let start = cap.get(0).map(|m| m.start()).unwrap_or(0);
        let kind = cap.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
        let arg = cap.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
        events.push((start, Event::Prank(kind, arg)));
    }
    for cap in EXTERNAL_CALL.captures_iter(&proof.source) {
        let target = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
        if SCAFFOLDING.contains(&target) {
            continue;
        }
        let start = cap.get(0).map(|m| m.start()).unwrap_or(0);
        events.push((
            start,
            Event::Call(TransactionStep {
                caller: None,
                target: target.to_string(),
                function: cap.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
                value: cap.get(3).map(|m| m.as_str().to_string()),
            }),
        ));
    }
    events.sort_by_key(|(start, _)| *start);

    let mut steps = Vec::new();
    let mut sticky: Option<String> = None;
    let mut once: Option<String> = None;
    for (_, event) in events {
        match event {
            Event::Prank(kind, arg) => match kind.as_str() {
                "prank" => once = Some(arg),
                "startPrank" => sticky = Some(arg),
                _ => sticky = None,
            },
            Event::Call(mut step) => {
                step.caller = once.take().or_else(|| sticky.clone());
                steps.push(step);
            }
        }
    }
    steps
}

/// Engine answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Feasibility {
    Feasible,
    Infeasible,
    Unknown,
}

/// Verdict attached to a job record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolicVerdict {
    pub engine: String,
    pub feasibility: Feasibility,
    pub detail: String,
    pub elapsed_ms: u64,
}

/// External symbolic engine
#[async_trait]
pub trait SymbolicEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn check_feasibility(
        &self,
        target: &TargetProject,
        steps: &[TransactionStep],
    ) -> Result<Feasibility>;
}

/// Runs an engine under its own timeout and folds every failure into `Unknown`
#[derive(Clone)]
pub struct SymbolicAdapter {
    engine: Arc<dyn SymbolicEngine>,
    timeout: Duration,
}

impl SymbolicAdapter {
    pub fn new(engine: Arc<dyn SymbolicEngine>, timeout: Duration) -> Self {
        SymbolicAdapter { engine, timeout }
    }

    /// Ask for path-feasibility of the proof's transaction sequence
    pub async fn corroborate(
        &self,
        target: &TargetProject,
        proof: &CandidateProof,
        cancel: &CancelHandle,
    ) -> SymbolicVerdict {
        let steps = extract_transactions(proof);
        let started = Instant::now();
        let (feasibility, detail) = tokio::select! {
            checked = tokio::time::timeout(self.timeout, self.engine.check_feasibility(target, &steps)) => {
                match checked {
                    Ok(Ok(feasibility)) => (feasibility, format!("{} transaction(s) checked", steps.len())),
                    Ok(Err(e)) => {
                        warn!(engine = %self.engine.name(), error = %e, "symbolic engine failed");
                        (Feasibility::Unknown, e.to_string())
                    }
                    Err(_) => (Feasibility::Unknown, format!("timed out after {:?}", self.timeout)),
                }
            }
            _ = cancel.cancelled() => (Feasibility::Unknown, "cancelled".to_string()),
        };
        let verdict = SymbolicVerdict {
            engine: self.engine.name().to_string(),
            feasibility,
            detail,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        debug!(engine = %verdict.engine, feasibility = ?verdict.feasibility, "symbolic verdict");
        verdict
    }
}
