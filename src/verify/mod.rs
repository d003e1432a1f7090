//! Sandboxed verification of candidate exploit proofs
//!
//! A [`VerificationOrchestrator`] moves each [`VerificationJob`] through
//! `Pending → Provisioning → Assembling → Running → {Verified | Failed}`, with
//! every attempt in a fresh single-use [`Sandbox`]. Failed attempts are fed back
//! to a [`ProofGenerator`] by the [`RefinementLoop`] until the retry budget runs
//! out. A [`SymbolicAdapter`] may attach advisory evidence to the record.
//!
//! ```ignore
//! let provider = Arc::new(LocalSandboxProvider::new(ToolchainSpec::forge()));
//! let orchestrator = VerificationOrchestrator::new(provider, VerificationConfig::default());
//! let result = orchestrator.verify(request, &NoRefinement, &CancelHandle::new()).await?;
//! ```

mod cancel;
mod job;
mod orchestrator;
mod refinement;
mod sandbox;
mod symbolic;
mod toolchain;

pub use cancel::CancelHandle;
pub use job::{
    AttemptOutcome, AttemptRecord, CandidateProof, JobState, TargetProject, Transition,
    VerificationJob, VerificationRequest, VerificationResult,
};
pub use orchestrator::VerificationOrchestrator;
pub use refinement::{NoRefinement, ProofGenerator, RefinementAttempt, RefinementLoop};
pub use sandbox::{
    deregister_sandbox, is_live, live_sandboxes, register_sandbox, LocalSandbox,
    LocalSandboxProvider, RunLimits, RunOutput, Sandbox, SandboxProvider,
};
pub use symbolic::{
    extract_transactions, Feasibility, SymbolicAdapter, SymbolicEngine, SymbolicVerdict,
    TransactionStep,
};
pub use toolchain::{parse_test_output, FailureKind, TestOutcome, ToolchainSpec};
