//! # anchorproof - Anchor-Aware Program Graphs and Exploit-Proof Verification for Solidity
//!
//! anchorproof finds security-relevant code regions ("anchors") in Solidity
//! sources, slices the statements that are control-, data- or call-dependent on
//! them, fuses those slices into a typed **heterogeneous program graph** (HPG),
//! and verifies candidate exploit proofs against the target project in
//! isolated, single-use sandboxes with a bounded refinement loop.
//!
//! ## Features
//!
//! - **Solidity front end** - hand-written scanner and recursive-descent parser
//!   into an index-addressed arena with stable node ids
//! - **Declarative anchors** - versioned, JSON-loadable vocabulary; a built-in
//!   default covers value transfers, unchecked calls, `delegatecall`, timestamp
//!   and block-number dependence, `tx.origin` auth, `selfdestruct`, weak
//!   randomness and inline assembly
//! - **Dependency analysis** - per-function CFG with basic blocks, reaching
//!   definitions over storage-slot identity, call and inheritance resolution
//! - **Bounded slicing** - deterministic breadth-first closure; every edge a
//!   bound cut off is recorded
//! - **HPG artifact** - self-describing JSON node/edge table
//! - **Verification** - `forge test` in ephemeral sandboxes, timeouts,
//!   cancellation, concurrent jobs and advisory symbolic corroboration
//!
//! ## Quick Start
//!
//! ```rust
//! use anchorproof::config::AnalysisConfig;
//! use anchorproof::{Analyzer, AnchorVocabulary, SourceFile};
//!
//! # fn main() -> anchorproof::Result<()> {
//! let source = r#"
//!     contract Vault {
//!         mapping(address => uint) balances;
//!         function withdraw() public {
//!             uint amount = balances[msg.sender];
//!             (bool ok, ) = msg.sender.call{value: amount}("");
//!             require(ok);
//!             balances[msg.sender] = 0;
//!         }
//!     }
//! "#;
//!
//! let analyzer = Analyzer::new(AnalysisConfig::default(), AnchorVocabulary::builtin());
//! let report = analyzer.analyze_sources(&[SourceFile::new("Vault.sol", source)])?;
//!
//! assert!(report.anchors.iter().any(|a| a.category == "external-value-call"));
//! let json = report.artifact().to_json()?;
//! assert!(json.contains("anchorproof-hpg"));
//! # Ok(())
//! # }
//! ```
//!
//! ### Verifying a Candidate Proof
//!
//! ```rust,no_run
//! use anchorproof::config::VerificationConfig;
//! use anchorproof::verify::{
//!     CancelHandle, CandidateProof, LocalSandboxProvider, NoRefinement, TargetProject,
//!     ToolchainSpec, VerificationOrchestrator, VerificationRequest,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> anchorproof::Result<()> {
//! let provider = Arc::new(LocalSandboxProvider::new(ToolchainSpec::forge()));
//! let orchestrator = VerificationOrchestrator::new(provider, VerificationConfig::default());
//! let request = VerificationRequest {
//!     target: TargetProject::Directory("./vault".into()),
//!     proof: CandidateProof::new("Exploit", "/* forge test */", "testExploit"),
//! };
//! let result = orchestrator
//!     .verify(request, &NoRefinement, &CancelHandle::new())
//!     .await?;
//! println!("{} after {} attempt(s)", result.status, result.attempts);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Sources → Scanner → Parser → Program ─┬→ AnchorMatcher ─────┐
//!                                       └→ DependencyGraph ───┴→ Slicer → HpgAssembler → artifact
//!
//! CandidateProof → VerificationOrchestrator → Sandbox → Verified | Failed → RefinementLoop
//! ```
//!
//! ### Main Components
//!
//! - [`Scanner`] / [`SolidityParser`] - source text to syntax arena
//! - [`AnchorMatcher`] - vocabulary matching
//! - [`DependencyGraph`] - CFG, DFG, calls and inheritance
//! - [`Slicer`] - anchor slices with recorded boundaries
//! - [`Hpg`] / [`HpgArtifact`] - the typed graph and its serialized form
//! - [`Analyzer`] - the whole analysis run
//! - [`verify::VerificationOrchestrator`] - job state machine and sandboxes
//!
//! The library emits `tracing` events and never installs a subscriber.

#![allow(clippy::only_used_in_recursion)] // False positive for recursive helper functions
#![allow(clippy::collapsible_match)] // Separate error handling for clarity

/// Version of the anchorproof crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod analysis;
pub mod anchor;
pub mod config;
pub mod error;
pub mod hpg;
pub mod lexer;
pub mod parallel;
pub mod parser;
pub mod pipeline;
pub mod project;
pub mod slicer;
pub mod verify;

// Re-export main types
pub use analysis::{CallGraph, DependencyGraph, FunctionCfg, UnresolvedReferenceWarning, VarKey};
pub use anchor::{AnchorMatcher, AnchorOccurrence, AnchorPattern, AnchorVocabulary};
pub use config::Config;
pub use error::{Error, ErrorSeverity, Result};
pub use hpg::{Hpg, HpgArtifact, HpgAssembler, HpgEdgeType, HpgNodeType};
pub use lexer::{Scanner, Token, TokenKind};
pub use parser::{Ast, NodeId, NodeKind, Program, SolidityParser, SourceFile};
pub use pipeline::{AnalysisReport, Analyzer};
pub use slicer::{Slice, SliceBoundary, SliceConfig, Slicer};
