//! Verification job records and their state machine

use super::symbolic::SymbolicVerdict;
use super::toolchain::FailureKind;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Where the target project comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetProject {
    /// A project directory copied into the sandbox
    Directory(PathBuf),
    /// Relative path -> contents, written into the sandbox
    Files(BTreeMap<String, String>),
}

/// Executable test artifact asserting an exploit's success condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateProof {
    /// File stem; the proof lands at `test/<name>.t.sol`
    pub name: String,
    /// Solidity source of the test contract
    pub source: String,
    /// Test function whose pass verifies the exploit
    pub test_function: String,
}

impl CandidateProof {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        test_function: impl Into<String>,
    ) -> Self {
        CandidateProof {
            name: name.into(),
            source: source.into(),
            test_function: test_function.into(),
        }
    }

    /// Sandbox-relative path of the proof file
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from("test").join(format!("{}.t.sol", self.name))
    }
}

/// Verification request from the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub target: TargetProject,
    pub proof: CandidateProof,
}

/// Job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Provisioning,
    Assembling,
    Running,
    /// The exploit test passed (terminal)
    Verified,
    /// The attempt produced a proof-quality failure
    Failed,
    RefinementRequested,
    /// Not verified within the retry budget (terminal)
    ExhaustedRetries,
    /// Sandbox could not be provisioned (terminal)
    ProvisionError,
    /// Target and proof could not be materialized (terminal)
    AssemblyError,
    /// Cancelled by the caller (terminal)
    Cancelled,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Verified
                | JobState::ExhaustedRetries
                | JobState::ProvisionError
                | JobState::AssemblyError
                | JobState::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition(self, next: JobState) -> bool {
        use JobState::*;
        if next == Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Pending, Provisioning)
                | (Provisioning, Assembling)
                | (Provisioning, ProvisionError)
                | (Assembling, Running)
                | (Assembling, AssemblyError)
                | (Running, Verified)
                | (Running, Failed)
                | (Running, ProvisionError)
                | (Failed, RefinementRequested)
                | (Failed, ExhaustedRetries)
                | (RefinementRequested, Provisioning)
                | (RefinementRequested, ExhaustedRetries)
        )
    }
}

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: JobState,
    pub to: JobState,
    pub at: DateTime<Utc>,
}

/// What one attempt ended with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Passed,
    Failed(FailureKind),
    /// Tooling fault: provisioning or assembly
    Fault(String),
    Cancelled,
}

/// Record of one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt index
    pub index: u32,
    /// Sandbox the attempt ran in, if one was provisioned
    pub sandbox_id: Option<String>,
    pub proof: CandidateProof,
    pub outcome: AttemptOutcome,
    /// Raw compiler/test output
    pub log: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// A verification job and its full history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationJob {
    pub id: Uuid,
    pub target: TargetProject,
    /// Proof of the current attempt
    pub proof: CandidateProof,
    /// Number of attempts started
    pub attempt: u32,
    state: JobState,
    pub history: Vec<Transition>,
    pub attempts: Vec<AttemptRecord>,
    pub symbolic: Option<SymbolicVerdict>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VerificationJob {
    pub fn new(request: VerificationRequest) -> Self {
        let now = Utc::now();
        VerificationJob {
            id: Uuid::new_v4(),
            target: request.target,
            proof: request.proof,
            attempt: 0,
            state: JobState::Pending,
            history: Vec::new(),
            attempts: Vec::new(),
            symbolic: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition(next) {
            return Err(Error::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        self.history.push(Transition {
            from: self.state,
            to: next,
            at: now,
        });
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    /// Every sandbox used by this job, in attempt order
    pub fn sandbox_ids(&self) -> Vec<String> {
        self.attempts
            .iter()
            .filter_map(|a| a.sandbox_id.clone())
            .collect()
    }

    /// Final result record
    pub fn result(&self, error: Option<String>) -> VerificationResult {
        VerificationResult {
            job_id: self.id,
            status: self.state,
            attempts: self.attempt,
            logs: self.attempts.iter().map(|a| a.log.clone()).collect(),
            sandbox_ids: self.sandbox_ids(),
            symbolic: self.symbolic.clone(),
            error,
            history: self.history.clone(),
        }
    }
}

/// Result reported for a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub job_id: Uuid,
    /// Terminal status
    pub status: JobState,
    /// Number of attempts executed
    pub attempts: u32,
    /// Log of every attempt
    pub logs: Vec<String>,
    pub sandbox_ids: Vec<String>,
    /// Advisory symbolic-execution verdict
    pub symbolic: Option<SymbolicVerdict>,
    /// Tooling error that ended the job, if any
    pub error: Option<String>,
    pub history: Vec<Transition>,
}

impl VerificationResult {
    pub fn verified(&self) -> bool {
        self.status == JobState::Verified
    }
}
