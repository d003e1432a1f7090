use super::cancel::CancelHandle;
use super::job::{
    AttemptOutcome, AttemptRecord, JobState, VerificationJob, VerificationRequest,
    VerificationResult,
};
use super::refinement::{ProofGenerator, RefinementLoop};
use super::sandbox::{LocalSandboxProvider, RunLimits, RunOutput, Sandbox, SandboxProvider};
use super::symbolic::{SymbolicAdapter, SymbolicEngine};
use super::toolchain::{FailureKind, TestOutcome};
use crate::config::{Config, VerificationConfig};
use crate::error::{Error, Result};
use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// What happened inside a provisioned sandbox
enum Staged {
    AssemblyFailed(Error),
    Ran(RunOutput),
    RunFailed(Error),
}

/// Runs verification jobs, each attempt in its own sandbox
///
/// Attempts of one job run strictly in sequence; distinct jobs are independent.
pub struct VerificationOrchestrator {
    provider: Arc<dyn SandboxProvider>,
    config: VerificationConfig,
    symbolic: Option<SymbolicAdapter>,
    confirm_inconclusive: bool,
    archive: Mutex<Vec<VerificationJob>>,
}

impl VerificationOrchestrator {
    pub fn new(provider: Arc<dyn SandboxProvider>, config: VerificationConfig) -> Self {
        VerificationOrchestrator {
            provider,
            config,
            symbolic: None,
            confirm_inconclusive: false,
            archive: Mutex::new(Vec::new()),
        }
    }

    /// Build from a loaded configuration, sandboxing with the pinned local toolchain
    ///
    /// The engine is consulted only when `symbolic.enabled` is set.
    pub fn from_config(config: &Config, engine: Option<Arc<dyn SymbolicEngine>>) -> Self {
        let provider = Arc::new(LocalSandboxProvider::new(config.verification.toolchain.clone()));
        Self::from_config_with_provider(provider, config, engine)
    }

    /// Like [`from_config`](Self::from_config), with a caller-supplied sandbox provider
    pub fn from_config_with_provider(
        provider: Arc<dyn SandboxProvider>,
        config: &Config,
        engine: Option<Arc<dyn SymbolicEngine>>,
    ) -> Self {
        let orchestrator = Self::new(provider, config.verification.clone());
        match engine {
            Some(engine) if config.symbolic.enabled => {
                let adapter = SymbolicAdapter::new(engine, config.symbolic.timeout());
                orchestrator.with_symbolic(adapter, config.symbolic.confirm_inconclusive)
            }
            _ => orchestrator,
        }
    }

    /// Attach a symbolic adapter; `confirm_inconclusive` also consults it after timeouts
    pub fn with_symbolic(mut self, adapter: SymbolicAdapter, confirm_inconclusive: bool) -> Self {
        self.symbolic = Some(adapter);
        self.confirm_inconclusive = confirm_inconclusive;
        self
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Jobs that reached a terminal state, in completion order
    pub fn archived(&self) -> Vec<VerificationJob> {
        self.archive.lock().clone()
    }

    fn record(
        &self,
        job: &mut VerificationJob,
        sandbox_id: Option<String>,
        outcome: AttemptOutcome,
        log: String,
        started_at: chrono::DateTime<Utc>,
    ) {
        job.attempts.push(AttemptRecord {
            index: job.attempt,
            sandbox_id,
            proof: job.proof.clone(),
            outcome,
            log,
            started_at,
            finished_at: Utc::now(),
        });
    }

    async fn stage(
        &self,
        job: &mut VerificationJob,
        sandbox: &mut dyn Sandbox,
        cancel: &CancelHandle,
    ) -> Result<Staged> {
        if let Err(e) = sandbox.assemble(&job.target, &job.proof).await {
            return Ok(Staged::AssemblyFailed(e));
        }
        if cancel.is_cancelled() {
            return Ok(Staged::RunFailed(Error::Cancelled));
        }
        job.transition(JobState::Running)?;
        let limits = RunLimits {
            timeout: self.config.test_timeout(),
            gas_limit: self.config.gas_limit,
        };
        Ok(match sandbox.run(&job.proof, limits, cancel).await {
            Ok(output) => Staged::Ran(output),
            Err(e) => Staged::RunFailed(e),
        })
    }

    /// Run one attempt: provision, assemble, run, and always tear down
    ///
    /// Leaves the job in `Verified`, `Failed`, `ProvisionError`, `AssemblyError`
    /// or `Cancelled`.
    pub async fn run_attempt(
        &self,
        job: &mut VerificationJob,
        cancel: &CancelHandle,
    ) -> Result<AttemptOutcome> {
        if cancel.is_cancelled() {
            job.transition(JobState::Cancelled)?;
            return Ok(AttemptOutcome::Cancelled);
        }
        job.attempt += 1;
        let started_at = Utc::now();
        job.transition(JobState::Provisioning)?;

        let provisioned = tokio::select! {
            provisioned = tokio::time::timeout(
                self.config.provision_timeout(),
                self.provider.provision(job.id),
            ) => {
                provisioned.unwrap_or_else(|_| Err(Error::provision("provisioning timed out")))
            }
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };
        let mut sandbox = match provisioned {
            Ok(sandbox) => sandbox,
            Err(Error::Cancelled) => {
                job.transition(JobState::Cancelled)?;
                self.record(job, None, AttemptOutcome::Cancelled, String::new(), started_at);
                return Ok(AttemptOutcome::Cancelled);
            }
            Err(e) => {
                warn!(job_id = %job.id, attempt = job.attempt, error = %e, "provisioning failed");
                job.transition(JobState::ProvisionError)?;
                let message = e.to_string();
                let outcome = AttemptOutcome::Fault(message.clone());
                self.record(job, None, outcome, message.clone(), started_at);
                return Ok(AttemptOutcome::Fault(message));
            }
        };
        let sandbox_id = sandbox.id().to_string();
        debug!(
            job_id = %job.id,
            sandbox_id = %sandbox_id,
            attempt = job.attempt,
            "attempt started"
        );

        let staged = match job.transition(JobState::Assembling) {
            Ok(()) => self.stage(job, sandbox.as_mut(), cancel).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sandbox.teardown().await {
            warn!(
                job_id = %job.id,
                sandbox_id = %sandbox_id,
                error = %e,
                "sandbox teardown failed"
            );
        }
        drop(sandbox);

        let (next, outcome, log) = match staged? {
            Staged::AssemblyFailed(e) => {
                let message = e.to_string();
                (JobState::AssemblyError, AttemptOutcome::Fault(message.clone()), message)
            }
            Staged::RunFailed(Error::Cancelled) => {
                (JobState::Cancelled, AttemptOutcome::Cancelled, String::new())
            }
            Staged::RunFailed(e) => {
                let message = e.to_string();
                (JobState::ProvisionError, AttemptOutcome::Fault(message.clone()), message)
            }
            Staged::Ran(output) => match output.outcome {
                TestOutcome::Passed => (JobState::Verified, AttemptOutcome::Passed, output.log),
                TestOutcome::Failed(kind) => {
                    (JobState::Failed, AttemptOutcome::Failed(kind), output.log)
                }
            },
        };
        job.transition(next)?;
        info!(
            job_id = %job.id,
            sandbox_id = %sandbox_id,
            attempt = job.attempt,
            state = %next,
            "attempt finished"
        );
        self.record(job, Some(sandbox_id), outcome.clone(), log, started_at);
        Ok(outcome)
    }

    /// Verify one request, refining failed candidates within the retry budget
    pub async fn verify(
        &self,
        request: VerificationRequest,
        generator: &dyn ProofGenerator,
        cancel: &CancelHandle,
    ) -> Result<VerificationResult> {
        let mut job = VerificationJob::new(request);
        info!(job_id = %job.id, proof = %job.proof.name, "verification job created");
        let mut result = RefinementLoop::new(self.config.retry_budget)
            .drive(self, &mut job, generator, cancel)
            .await?;

        if let Some(adapter) = &self.symbolic {
            let inconclusive = job.state() == JobState::ExhaustedRetries
                && matches!(
                    job.attempts.last().map(|a| &a.outcome),
                    Some(AttemptOutcome::Failed(FailureKind::TimeoutFailure))
                );
            if job.state() == JobState::Verified || (self.confirm_inconclusive && inconclusive) {
                let verdict = adapter.corroborate(&job.target, &job.proof, cancel).await;
                job.symbolic = Some(verdict.clone());
                result.symbolic = Some(verdict);
            }
        }

        info!(
            job_id = %job.id,
            status = %result.status,
            attempts = result.attempts,
            "verification job finished"
        );
        self.archive.lock().push(job);
        Ok(result)
    }

    /// Verify independent requests concurrently, at most `max_concurrent_jobs` at once
    ///
    /// Results are returned in request order.
    pub async fn verify_all(
        self: &Arc<Self>,
        requests: Vec<(VerificationRequest, Arc<dyn ProofGenerator>)>,
        cancel: &CancelHandle,
    ) -> Vec<Result<VerificationResult>> {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_jobs.max(1)));
        let handles = requests.into_iter().map(|(request, generator)| {
            let orchestrator = Arc::clone(self);
            let permits = Arc::clone(&permits);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Cancelled)?;
                orchestrator.verify(request, generator.as_ref(), &cancel).await
            })
        });
        join_all(handles)
            .await
            .into_iter()
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(Error::ToolchainError(format!("verification task failed: {}", e)))
                })
            })
            .collect()
    }
}
