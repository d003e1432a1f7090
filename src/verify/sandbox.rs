//! Ephemeral, single-use execution environments
//!
//! Every attempt runs in its own sandbox. A sandbox owns a private workspace
//! and is torn down when the attempt leaves `Running`, whatever the outcome.

use super::cancel::CancelHandle;
use super::job::{CandidateProof, TargetProject};
use super::toolchain::{parse_test_output, FailureKind, TestOutcome, ToolchainSpec};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

lazy_static::lazy_static! {
    /// Workspaces of every sandbox not yet torn down, by sandbox id
    static ref LIVE_SANDBOXES: DashMap<String, PathBuf> = DashMap::new();
}

/// Ids of sandboxes that are still alive in this process
pub fn live_sandboxes() -> Vec<String> {
    let mut ids: Vec<String> = LIVE_SANDBOXES.iter().map(|e| e.key().clone()).collect();
    ids.sort();
    ids
}

/// Whether a sandbox is still alive
pub fn is_live(sandbox_id: &str) -> bool {
    LIVE_SANDBOXES.contains_key(sandbox_id)
}

/// Register a sandbox in the process-wide live set
///
/// Custom [`Sandbox`] implementations call this on provisioning and
/// [`deregister_sandbox`] on teardown so leak checks cover them too.
pub fn register_sandbox(sandbox_id: &str, workspace: PathBuf) {
    LIVE_SANDBOXES.insert(sandbox_id.to_string(), workspace);
}

/// Remove a sandbox from the live set
pub fn deregister_sandbox(sandbox_id: &str) {
    LIVE_SANDBOXES.remove(sandbox_id);
}

/// Bounds of one test invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    /// Wall-clock budget
    pub timeout: Duration,
    /// Gas budget passed to the toolchain
    pub gas_limit: Option<u64>,
}

/// Captured result of one test invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub outcome: TestOutcome,
    /// Combined stdout and stderr
    pub log: String,
    pub elapsed: Duration,
}

/// Provisions sandboxes
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Acquire a fresh sandbox for `job_id`
    ///
    /// Failure is a [`Error::ProvisionError`].
    async fn provision(&self, job_id: Uuid) -> Result<Box<dyn Sandbox>>;
}

/// An isolated workspace with a pinned toolchain
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Unique sandbox id
    fn id(&self) -> &str;

    /// Materialize the target project and the candidate proof
    async fn assemble(&mut self, target: &TargetProject, proof: &CandidateProof) -> Result<()>;

    /// Run the proof's test function
    ///
    /// A timeout is reported as a [`FailureKind::TimeoutFailure`] outcome; a
    /// cancellation as [`Error::Cancelled`].
    async fn run(
        &mut self,
        proof: &CandidateProof,
        limits: RunLimits,
        cancel: &CancelHandle,
    ) -> Result<RunOutput>;

    /// Destroy the workspace; calling it again is a no-op
    async fn teardown(&mut self) -> Result<()>;
}

/// Provider of [`LocalSandbox`]es in temporary directories
#[derive(Debug, Clone)]
pub struct LocalSandboxProvider {
    toolchain: ToolchainSpec,
    root: Option<PathBuf>,
    check_timeout: Duration,
}

impl LocalSandboxProvider {
    pub fn new(toolchain: ToolchainSpec) -> Self {
        LocalSandboxProvider {
            toolchain,
            root: None,
            check_timeout: Duration::from_secs(30),
        }
    }

    /// Create workspaces under `root` instead of the system temp directory
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Budget for the toolchain version check
    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    async fn check_toolchain(&self) -> Result<String> {
        let output = tokio::time::timeout(
            self.check_timeout,
            Command::new(&self.toolchain.program)
                .arg("--version")
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| Error::provision(format!("{} --version timed out", self.toolchain.program)))?
        .map_err(|e| Error::provision(format!("toolchain {} unavailable: {}", self.toolchain.program, e)))?;

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            return Err(Error::provision(format!(
                "{} --version exited with {}",
                self.toolchain.program, output.status
            )));
        }
        if !self.toolchain.version_matches(&version) {
            return Err(Error::provision(format!(
                "toolchain version '{}' does not match pinned '{}'",
                version,
                self.toolchain.version.as_deref().unwrap_or_default()
            )));
        }
        Ok(version)
    }
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    async fn provision(&self, job_id: Uuid) -> Result<Box<dyn Sandbox>> {
        let version = self.check_toolchain().await?;
        let id = Uuid::new_v4().to_string();
        let mut builder = tempfile::Builder::new();
        builder.prefix(&id);
        let dir = match &self.root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| Error::provision(e.to_string()))?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| Error::provision(format!("cannot create workspace: {}", e)))?;

        register_sandbox(&id, dir.path().to_path_buf());
        debug!(job_id = %job_id, sandbox_id = %id, toolchain = %version, "provisioned sandbox");
        Ok(Box::new(LocalSandbox {
            id,
            dir: Some(dir),
            toolchain: self.toolchain.clone(),
        }))
    }
}

/// Sandbox backed by a temporary directory and a local toolchain
#[derive(Debug)]
pub struct LocalSandbox {
    id: String,
    dir: Option<TempDir>,
    toolchain: ToolchainSpec,
}

impl LocalSandbox {
    fn workspace(&self) -> Result<&Path> {
        self.dir
            .as_ref()
            .map(TempDir::path)
            .ok_or_else(|| Error::assembly(format!("sandbox {} was torn down", self.id)))
    }
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    let located =
        |path: &Path, e: std::io::Error| Error::assembly(format!("{}: {}", path.display(), e));
    std::fs::create_dir_all(to).map_err(|e| located(to, e))?;
    let entries = std::fs::read_dir(from).map_err(|e| located(from, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::assembly(e.to_string()))?;
        let path = entry.path();
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }
        let dest = to.join(&name);
        if path.is_dir() {
            copy_tree(&path, &dest)?;
        } else {
            std::fs::copy(&path, &dest).map_err(|e| located(&path, e))?;
        }
    }
    Ok(())
}

fn write_file(root: &Path, relative: &Path, contents: &str) -> Result<()> {
    let escapes = relative.components().any(|c| c == std::path::Component::ParentDir);
    if relative.is_absolute() || escapes {
        return Err(Error::assembly(format!(
            "path escapes the sandbox: {}",
            relative.display()
        )));
    }
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::assembly(format!("{}: {}", parent.display(), e)))?;
    }
    std::fs::write(&path, contents)
        .map_err(|e| Error::assembly(format!("{}: {}", path.display(), e)))
}

/// Lay out the target and the proof under `root`; runs on the blocking pool
fn materialize(root: &Path, target: &TargetProject, proof_path: &Path, source: &str) -> Result<()> {
    match target {
        TargetProject::Directory(dir) => {
            if !dir.is_dir() {
                return Err(Error::assembly(format!(
                    "target project not found: {}",
                    dir.display()
                )));
            }
            copy_tree(dir, root)?;
        }
        TargetProject::Files(files) => {
            for (relative, contents) in files {
                write_file(root, Path::new(relative), contents)?;
            }
        }
    }
    if root.join(proof_path).exists() {
        return Err(Error::assembly(format!(
            "proof file conflicts with an existing file: {}",
            proof_path.display()
        )));
    }
    write_file(root, proof_path, source)
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn assemble(&mut self, target: &TargetProject, proof: &CandidateProof) -> Result<()> {
        let root = self.workspace()?.to_path_buf();
        let proof_path = proof.relative_path();
        let (target, source, dest) = (target.clone(), proof.source.clone(), proof_path.clone());
        tokio::task::spawn_blocking(move || materialize(&root, &target, &dest, &source))
            .await
            .map_err(|e| Error::assembly(format!("assembly task failed: {}", e)))??;
        debug!(sandbox_id = %self.id, proof = %proof_path.display(), "assembled sandbox");
        Ok(())
    }

    async fn run(
        &mut self,
        proof: &CandidateProof,
        limits: RunLimits,
        cancel: &CancelHandle,
    ) -> Result<RunOutput> {
        let root = self.workspace()?.to_path_buf();
        let args = self.toolchain.test_command_args(&proof.test_function, limits.gas_limit);
        let child = Command::new(&self.toolchain.program)
            .args(&args)
            .current_dir(&root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ToolchainError(format!("{}: {}", self.toolchain.program, e)))?;

        let started = Instant::now();
        // Dropping the child future kills the process
        tokio::select! {
            waited = tokio::time::timeout(limits.timeout, child.wait_with_output()) => {
                let elapsed = started.elapsed();
                match waited {
                    Ok(Ok(output)) => {
                        let log = format!(
                            "sandbox {}\n{}{}",
                            self.id,
                            String::from_utf8_lossy(&output.stdout),
                            String::from_utf8_lossy(&output.stderr)
                        );
                        Ok(RunOutput {
                            outcome: parse_test_output(&log, &proof.test_function),
                            log,
                            elapsed,
                        })
                    }
                    Ok(Err(e)) => Err(Error::ToolchainError(e.to_string())),
                    Err(_) => {
                        warn!(sandbox_id = %self.id, timeout = ?limits.timeout, "test run timed out");
                        Ok(RunOutput {
                            outcome: TestOutcome::Failed(FailureKind::TimeoutFailure),
                            log: format!("sandbox {}\ntimed out after {:?}", self.id, limits.timeout),
                            elapsed,
                        })
                    }
                }
            }
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    async fn teardown(&mut self) -> Result<()> {
        deregister_sandbox(&self.id);
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            dir.close().map_err(|e| Error::io(&path, e))?;
            debug!(sandbox_id = %self.id, "sandbox torn down");
        }
        Ok(())
    }
}

impl Drop for LocalSandbox {
    fn drop(&mut self) {
        // TempDir removes the workspace itself
        deregister_sandbox(&self.id);
    }
}
