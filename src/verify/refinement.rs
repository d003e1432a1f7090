//! Bounded refinement of candidate proofs

use super::cancel::CancelHandle;
use super::job::{AttemptOutcome, CandidateProof, JobState, VerificationJob, VerificationResult};
use super::orchestrator::VerificationOrchestrator;
use super::toolchain::FailureKind;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Feedback handed to the proof generator after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementAttempt {
    pub job_id: Uuid,
    /// 1-based index of the attempt that failed
    pub attempt_index: u32,
    pub prior_proof: CandidateProof,
    pub failure: FailureKind,
    /// Raw compiler/test output of the failed attempt
    pub failure_log: String,
}

/// External generator of candidate proofs
#[async_trait]
pub trait ProofGenerator: Send + Sync {
    /// Produce a new candidate, or `None` to stop refining
    async fn refine(&self, attempt: &RefinementAttempt) -> Result<Option<CandidateProof>>;
}

/// Generator that never refines
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRefinement;

#[async_trait]
impl ProofGenerator for NoRefinement {
    async fn refine(&self, _attempt: &RefinementAttempt) -> Result<Option<CandidateProof>> {
        Ok(None)
    }
}

/// Drives one job through at most `retry_budget` attempts
#[derive(Debug, Clone, Copy)]
pub struct RefinementLoop {
    retry_budget: u32,
}

impl RefinementLoop {
    pub fn new(retry_budget: u32) -> Self {
        RefinementLoop { retry_budget }
    }

    pub fn retry_budget(&self) -> u32 {
        self.retry_budget
    }

    /// Run attempts strictly in sequence until a terminal state
    pub async fn drive(
        &self,
        orchestrator: &VerificationOrchestrator,
        job: &mut VerificationJob,
        generator: &dyn ProofGenerator,
        cancel: &CancelHandle,
    ) -> Result<VerificationResult> {
        let mut error = None;
        loop {
            let outcome = orchestrator.run_attempt(job, cancel).await?;
            let failure = match outcome {
                AttemptOutcome::Failed(kind) => kind,
                AttemptOutcome::Fault(message) => {
                    error = Some(message);
                    break;
                }
                AttemptOutcome::Passed | AttemptOutcome::Cancelled => break,
            };

            if job.attempt >= self.retry_budget {
                job.transition(JobState::ExhaustedRetries)?;
                break;
            }
            job.transition(JobState::RefinementRequested)?;
            let request = RefinementAttempt {
                job_id: job.id,
                attempt_index: job.attempt,
                prior_proof: job.proof.clone(),
                failure,
                failure_log: job.attempts.last().map(|a| a.log.clone()).unwrap_or_default(),
            };

            let refined = tokio::select! {
                refined = generator.refine(&request) => refined,
                _ = cancel.cancelled() => {
                    job.transition(JobState::Cancelled)?;
                    break;
                }
            };
            match refined {
                Ok(Some(proof)) => {
                    info!(job_id = %job.id, attempt = job.attempt + 1, "refined candidate received");
                    job.proof = proof;
                }
                Ok(None) => {
                    info!(job_id = %job.id, attempt = job.attempt, "generator declined to refine");
                    job.transition(JobState::ExhaustedRetries)?;
                    break;
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "proof generator failed");
                    error = Some(e.to_string());
                    job.transition(JobState::ExhaustedRetries)?;
                    break;
                }
            }
        }
        Ok(job.result(error))
    }
}
