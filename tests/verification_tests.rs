//! Verification orchestration tests
//!
//! A scripted sandbox stands in for the forge toolchain: the candidate's source
//! decides what the "test run" prints, and the real output parser classifies it.

use anchorproof::config::{Config, VerificationConfig};
use anchorproof::verify::{
    deregister_sandbox, is_live, parse_test_output, register_sandbox, AttemptOutcome,
    CancelHandle, CandidateProof, Feasibility, FailureKind, JobState, NoRefinement, ProofGenerator,
    RefinementAttempt, RunLimits, RunOutput, Sandbox, SandboxProvider, SymbolicAdapter,
    SymbolicEngine, TargetProject, TestOutcome, TransactionStep, VerificationOrchestrator,
    VerificationRequest,
};
use anchorproof::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

// ============================================================================
// SCRIPTED SANDBOX
// ============================================================================

#[derive(Default)]
struct ScriptedProvider {
    provisioned: AtomicUsize,
    fail_provisioning: bool,
}

#[async_trait]
impl SandboxProvider for ScriptedProvider {
    async fn provision(&self, job_id: Uuid) -> Result<Box<dyn Sandbox>> {
        if self.fail_provisioning {
            return Err(Error::ProvisionError("toolchain not installed".to_string()));
        }
        let n = self.provisioned.fetch_add(1, Ordering::SeqCst);
        let id = format!("scripted-{}-{}", job_id.simple(), n);
        register_sandbox(&id, PathBuf::from("/nonexistent").join(&id));
        Ok(Box::new(ScriptedSandbox {
            id,
            files: BTreeMap::new(),
        }))
    }
}

struct ScriptedSandbox {
    id: String,
    files: BTreeMap<String, String>,
}

impl ScriptedSandbox {
    fn script(&self, proof: &CandidateProof) -> String {
        let test = &proof.test_function;
        if proof.source.contains("COMPILE_ERROR") {
            format!("[{}]\nCompiler run failed:\nError (2314): Expected ';'", self.id)
        } else if proof.source.contains("PASS") {
            format!("[{}]\n[PASS] {}() (gas: 51234)", self.id, test)
        } else {
            format!("[{}]\n[FAIL: assertion failed] {}() (gas: 4410)", self.id, test)
        }
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn assemble(&mut self, target: &TargetProject, proof: &CandidateProof) -> Result<()> {
        if let TargetProject::Files(files) = target {
            self.files.extend(files.clone());
        }
        let path = proof.relative_path().to_string_lossy().into_owned();
        if self.files.contains_key(&path) {
            return Err(Error::AssemblyError(format!("{} already exists", path)));
        }
        self.files.insert(path, proof.source.clone());
        Ok(())
    }

    async fn run(
        &mut self,
        proof: &CandidateProof,
        limits: RunLimits,
        cancel: &CancelHandle,
    ) -> Result<RunOutput> {
        let started = Instant::now();
        let hang = proof.source.contains("HANG");
        let work = async {
            if hang {
                tokio::time::sleep(Duration::from_secs(30)).await;
            } else {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::select! {
            finished = tokio::time::timeout(limits.timeout, work) => {
                if finished.is_err() {
                    return Ok(RunOutput {
                        outcome: TestOutcome::Failed(FailureKind::TimeoutFailure),
                        log: format!("[{}] timed out", self.id),
                        elapsed: started.elapsed(),
                    });
                }
            }
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        }
        let log = self.script(proof);
        Ok(RunOutput {
            outcome: parse_test_output(&log, &proof.test_function),
            log,
            elapsed: started.elapsed(),
        })
    }

    async fn teardown(&mut self) -> Result<()> {
        self.files.clear();
        deregister_sandbox(&self.id);
        Ok(())
    }
}

/// Hands out queued candidates and remembers what it was asked
#[derive(Default)]
struct ScriptedGenerator {
    queue: Mutex<VecDeque<CandidateProof>>,
    seen: Mutex<Vec<RefinementAttempt>>,
}

impl ScriptedGenerator {
    fn with(proofs: Vec<CandidateProof>) -> Self {
        ScriptedGenerator {
            queue: Mutex::new(proofs.into()),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ProofGenerator for ScriptedGenerator {
    async fn refine(&self, attempt: &RefinementAttempt) -> Result<Option<CandidateProof>> {
        self.seen.lock().push(attempt.clone());
        Ok(self.queue.lock().pop_front())
    }
}

struct FixedEngine(Feasibility);

#[async_trait]
impl SymbolicEngine for FixedEngine {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn check_feasibility(&self, _: &TargetProject, _: &[TransactionStep]) -> Result<Feasibility> {
        Ok(self.0)
    }
}

fn proof(name: &str, body: &str) -> CandidateProof {
    CandidateProof::new(
        name,
        format!("contract {} {{ function testExploit() public {{ /* {} */ }} }}", name, body),
        "testExploit",
    )
}

fn request(candidate: CandidateProof) -> VerificationRequest {
    let mut files = BTreeMap::new();
    files.insert("src/Vault.sol".to_string(), "contract Vault {}".to_string());
    VerificationRequest {
        target: TargetProject::Files(files),
        proof: candidate,
    }
}

fn orchestrator(config: VerificationConfig) -> VerificationOrchestrator {
    VerificationOrchestrator::new(Arc::new(ScriptedProvider::default()), config)
}

fn assert_no_leaks(ids: &[String]) {
    for id in ids {
        assert!(!is_live(id), "sandbox {} outlived its attempt", id);
    }
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_passing_proof_verifies_first_time() {
    let orchestrator = orchestrator(VerificationConfig::default());
    let result = orchestrator
        .verify(request(proof("Exploit", "PASS")), &NoRefinement, &CancelHandle::new())
        .await
        .unwrap();

    assert_eq!(result.status, JobState::Verified);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.sandbox_ids.len(), 1);
    assert!(result.logs[0].contains("[PASS] testExploit()"));
    assert_no_leaks(&result.sandbox_ids);

    let states: Vec<JobState> = result.history.iter().map(|t| t.to).collect();
    assert_eq!(
        states,
        vec![
            JobState::Provisioning,
            JobState::Assembling,
            JobState::Running,
            JobState::Verified
        ]
    );
}

#[tokio::test]
async fn test_compile_error_refined_into_passing_proof() {
    let orchestrator = orchestrator(VerificationConfig::default());
    let generator = ScriptedGenerator::with(vec![proof("Exploit", "PASS")]);
    let result = orchestrator
        .verify(
            request(proof("Exploit", "COMPILE_ERROR")),
            &generator,
            &CancelHandle::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.status, JobState::Verified);
    assert_eq!(result.attempts, 2);

    let seen = generator.seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].failure, FailureKind::CompilationError);
    assert_eq!(seen[0].attempt_index, 1);
    assert!(seen[0].failure_log.contains("Compiler run failed"));

    // every attempt gets its own sandbox
    assert_eq!(result.sandbox_ids.len(), 2);
    assert_ne!(result.sandbox_ids[0], result.sandbox_ids[1]);
    assert_no_leaks(&result.sandbox_ids);
}

#[tokio::test]
async fn test_retry_budget_exhausted() {
    let config = VerificationConfig {
        retry_budget: 3,
        ..Default::default()
    };
    let orchestrator = orchestrator(config);
    let generator = ScriptedGenerator::with(vec![
        proof("Exploit", "FAIL again"),
        proof("Exploit", "FAIL once more"),
        proof("Exploit", "PASS too late"),
    ]);
    let result = orchestrator
        .verify(request(proof("Exploit", "FAIL")), &generator, &CancelHandle::new())
        .await
        .unwrap();

    assert_eq!(result.status, JobState::ExhaustedRetries);
    assert_eq!(result.attempts, 3);
    assert!(!result.verified());
    assert!(result.history.iter().all(|t| t.to != JobState::Verified));
    // the budget is spent before the third refinement is requested
    assert_eq!(generator.seen.lock().len(), 2);
    assert_eq!(generator.queue.lock().len(), 1);
    assert_no_leaks(&result.sandbox_ids);
}

#[tokio::test]
async fn test_declined_refinement_stops_early() {
    let orchestrator = orchestrator(VerificationConfig::default());
    let result = orchestrator
        .verify(request(proof("Exploit", "FAIL")), &NoRefinement, &CancelHandle::new())
        .await
        .unwrap();
    assert_eq!(result.status, JobState::ExhaustedRetries);
    assert_eq!(result.attempts, 1);
}

struct BrokenGenerator;

#[async_trait]
impl ProofGenerator for BrokenGenerator {
    async fn refine(&self, _: &RefinementAttempt) -> Result<Option<CandidateProof>> {
        Err(Error::GeneratorError("model offline".to_string()))
    }
}

#[tokio::test]
async fn test_generator_failure_is_reported_not_verified() {
    let orchestrator = orchestrator(VerificationConfig::default());
    let result = orchestrator
        .verify(request(proof("Exploit", "FAIL")), &BrokenGenerator, &CancelHandle::new())
        .await
        .unwrap();
    assert_eq!(result.status, JobState::ExhaustedRetries);
    assert_eq!(result.attempts, 1);
    assert!(result.error.unwrap().contains("model offline"));
}

#[tokio::test]
async fn test_concurrent_jobs_stay_isolated() {
    let orchestrator = Arc::new(orchestrator(VerificationConfig {
        max_concurrent_jobs: 3,
        ..Default::default()
    }));
    let bodies = ["PASS", "FAIL", "PASS", "COMPILE_ERROR", "PASS"];
    let requests: Vec<(VerificationRequest, Arc<dyn ProofGenerator>)> = bodies
        .iter()
        .enumerate()
        .map(|(i, body)| {
            let generator: Arc<dyn ProofGenerator> = Arc::new(NoRefinement);
            (request(proof(&format!("Exploit{}", i), body)), generator)
        })
        .collect();

    let results = orchestrator.verify_all(requests, &CancelHandle::new()).await;
    assert_eq!(results.len(), 5);

    let mut all_ids = Vec::new();
    for (body, result) in bodies.iter().zip(results) {
        let result = result.unwrap();
        let expected = if *body == "PASS" {
            JobState::Verified
        } else {
            JobState::ExhaustedRetries
        };
        assert_eq!(result.status, expected);
        assert_eq!(result.sandbox_ids.len(), 1);
        let own = &result.sandbox_ids[0];
        assert!(result.logs[0].contains(own.as_str()));
        assert!(own.contains(&result.job_id.simple().to_string()));
        all_ids.push(own.clone());
    }

    let mut unique = all_ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 5);
    assert_no_leaks(&all_ids);
    assert_eq!(orchestrator.archived().len(), 5);
}

// ============================================================================
// FAULTS
// ============================================================================

#[tokio::test]
async fn test_provision_failure_is_terminal() {
    let provider = ScriptedProvider {
        fail_provisioning: true,
        ..Default::default()
    };
    let orchestrator = VerificationOrchestrator::new(Arc::new(provider), VerificationConfig::default());
    let generator = ScriptedGenerator::with(vec![proof("Exploit", "PASS")]);
    let result = orchestrator
        .verify(request(proof("Exploit", "PASS")), &generator, &CancelHandle::new())
        .await
        .unwrap();

    assert_eq!(result.status, JobState::ProvisionError);
    assert!(result.sandbox_ids.is_empty());
    assert!(result.error.unwrap().contains("toolchain not installed"));
    assert!(generator.seen.lock().is_empty());
}

#[tokio::test]
async fn test_conflicting_proof_path_is_assembly_error() {
    let candidate = proof("Exploit", "PASS");
    let mut target = request(candidate.clone());
    if let TargetProject::Files(files) = &mut target.target {
        files.insert(
            candidate.relative_path().to_string_lossy().into_owned(),
            "// existing".to_string(),
        );
    }
    let orchestrator = orchestrator(VerificationConfig::default());
    let result = orchestrator
        .verify(target, &NoRefinement, &CancelHandle::new())
        .await
        .unwrap();

    assert_eq!(result.status, JobState::AssemblyError);
    assert_eq!(result.attempts, 1);
    assert!(result.error.is_some());
    assert_no_leaks(&result.sandbox_ids);
}

#[tokio::test]
async fn test_hanging_proof_times_out() {
    let config = VerificationConfig {
        test_timeout_secs: 1,
        retry_budget: 1,
        ..Default::default()
    };
    let orchestrator = orchestrator(config);
    let started = Instant::now();
    let result = orchestrator
        .verify(request(proof("Exploit", "HANG")), &NoRefinement, &CancelHandle::new())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(result.status, JobState::ExhaustedRetries);
    let job = &orchestrator.archived()[0];
    assert!(matches!(
        job.attempts[0].outcome,
        AttemptOutcome::Failed(FailureKind::TimeoutFailure)
    ));
    assert_no_leaks(&result.sandbox_ids);
}

#[tokio::test]
async fn test_cancel_during_run() {
    let orchestrator = Arc::new(orchestrator(VerificationConfig::default()));
    let cancel = CancelHandle::new();
    let task = {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            orchestrator
                .verify(request(proof("Exploit", "HANG")), &NoRefinement, &cancel)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("cancellation is prompt")
        .unwrap()
        .unwrap();
    assert_eq!(result.status, JobState::Cancelled);
    assert_no_leaks(&result.sandbox_ids);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let orchestrator = orchestrator(VerificationConfig::default());
    let cancel = CancelHandle::new();
    cancel.cancel();
    let result = orchestrator
        .verify(request(proof("Exploit", "PASS")), &NoRefinement, &cancel)
        .await
        .unwrap();
    assert_eq!(result.status, JobState::Cancelled);
    assert_eq!(result.attempts, 0);
}

// ============================================================================
// SYMBOLIC CORROBORATION
// ============================================================================

#[tokio::test]
async fn test_symbolic_verdict_is_advisory() {
    let adapter = SymbolicAdapter::new(Arc::new(FixedEngine(Feasibility::Infeasible)), Duration::from_secs(5));
    let orchestrator = orchestrator(VerificationConfig::default()).with_symbolic(adapter, false);
    let result = orchestrator
        .verify(request(proof("Exploit", "PASS")), &NoRefinement, &CancelHandle::new())
        .await
        .unwrap();

    // a disagreeing engine never downgrades an executed pass
    assert_eq!(result.status, JobState::Verified);
    let verdict = result.symbolic.unwrap();
    assert_eq!(verdict.engine, "fixed");
    assert_eq!(verdict.feasibility, Feasibility::Infeasible);
}

#[tokio::test]
async fn test_symbolic_never_upgrades_timeout() {
    let config = VerificationConfig {
        test_timeout_secs: 1,
        retry_budget: 1,
        ..Default::default()
    };
    let adapter = SymbolicAdapter::new(Arc::new(FixedEngine(Feasibility::Feasible)), Duration::from_secs(5));
    let orchestrator = orchestrator(config).with_symbolic(adapter, true);
    let result = orchestrator
        .verify(request(proof("Exploit", "HANG")), &NoRefinement, &CancelHandle::new())
        .await
        .unwrap();

    assert_eq!(result.status, JobState::ExhaustedRetries);
    assert_eq!(result.symbolic.unwrap().feasibility, Feasibility::Feasible);
}

#[tokio::test]
async fn test_symbolic_skipped_for_plain_failures() {
    let adapter = SymbolicAdapter::new(Arc::new(FixedEngine(Feasibility::Feasible)), Duration::from_secs(5));
    let orchestrator = orchestrator(VerificationConfig::default()).with_symbolic(adapter, true);
    let result = orchestrator
        .verify(request(proof("Exploit", "FAIL")), &NoRefinement, &CancelHandle::new())
        .await
        .unwrap();
    assert_eq!(result.status, JobState::ExhaustedRetries);
    assert!(result.symbolic.is_none());
}

// ============================================================================
// CONFIGURED ORCHESTRATOR
// ============================================================================

const CONFIRMING: &str = r#"{
    "verification": {"retry_budget": 1, "test_timeout_secs": 1},
    "symbolic": {"enabled": true, "timeout_secs": 5, "confirm_inconclusive": true}
}"#;

fn configured(json: &str, engine: Option<Arc<dyn SymbolicEngine>>) -> VerificationOrchestrator {
    let config = Config::from_json(json).unwrap();
    VerificationOrchestrator::from_config_with_provider(
        Arc::new(ScriptedProvider::default()),
        &config,
        engine,
    )
}

#[tokio::test]
async fn test_configured_confirmation_reaches_verify() {
    let engine: Arc<dyn SymbolicEngine> = Arc::new(FixedEngine(Feasibility::Feasible));
    let orchestrator = configured(CONFIRMING, Some(engine));
    assert_eq!(orchestrator.config().retry_budget, 1);

    let result = orchestrator
        .verify(request(proof("Exploit", "HANG")), &NoRefinement, &CancelHandle::new())
        .await
        .unwrap();
    assert_eq!(result.status, JobState::ExhaustedRetries);
    assert_eq!(result.symbolic.unwrap().feasibility, Feasibility::Feasible);
}

#[tokio::test]
async fn test_disabled_symbolic_config_ignores_engine() {
    let json = CONFIRMING.replace("\"enabled\": true", "\"enabled\": false");
    let engine: Arc<dyn SymbolicEngine> = Arc::new(FixedEngine(Feasibility::Feasible));
    let orchestrator = configured(&json, Some(engine));

    let result = orchestrator
        .verify(request(proof("Exploit", "HANG")), &NoRefinement, &CancelHandle::new())
        .await
        .unwrap();
    assert_eq!(result.status, JobState::ExhaustedRetries);
    assert!(result.symbolic.is_none());
}

#[test]
fn test_from_config_pins_configured_toolchain() {
    let config = Config::from_json(
        r#"{"verification": {"toolchain": {"program": "/opt/forge", "version": "0.2.0"}}}"#,
    )
    .unwrap();
    let orchestrator = VerificationOrchestrator::from_config(&config, None);
    let toolchain = &orchestrator.config().toolchain;
    assert_eq!(toolchain.program, "/opt/forge");
    assert_eq!(toolchain.version.as_deref(), Some("0.2.0"));
}
