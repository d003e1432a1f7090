//! Pinned test toolchain and parsing of its output

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static::lazy_static! {
    static ref COMPILE_FAILURE: Regex =
        Regex::new(r"(?m)^\s*(Compiler run failed|Error \(\d+\))").expect("compile pattern is valid");
    static ref TEST_RESULT: Regex =
        Regex::new(r"(?m)^\s*\[(PASS|FAIL[^\]]*)\]\s+([A-Za-z_$][A-Za-z0-9_$]*)\(")
            .expect("result pattern is valid");
}

/// Test toolchain invoked inside a sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainSpec {
    /// Executable name or path (default: `forge`)
    pub program: String,
    /// Version string that `<program> --version` must contain; unpinned when `None`
    pub version: Option<String>,
    /// Arguments selecting the test subcommand (default: `["test"]`)
    pub test_args: Vec<String>,
    /// Flag selecting a single test function
    pub match_flag: String,
    /// Flag carrying the gas budget, if the toolchain has one
    pub gas_flag: Option<String>,
}

impl Default for ToolchainSpec {
    fn default() -> Self {
        Self::forge()
    }
}

impl ToolchainSpec {
    /// Foundry's `forge test`
    pub fn forge() -> Self {
        ToolchainSpec {
            program: "forge".to_string(),
            version: None,
            test_args: vec!["test".to_string(), "-vvv".to_string()],
            match_flag: "--match-test".to_string(),
            gas_flag: Some("--gas-limit".to_string()),
        }
    }

    /// Pin a version
    pub fn pinned(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Full argument list for running one test function
    pub fn test_command_args(&self, test_function: &str, gas_limit: Option<u64>) -> Vec<String> {
        let mut args = self.test_args.clone();
        args.push(self.match_flag.clone());
        args.push(test_function.to_string());
        if let (Some(flag), Some(gas)) = (&self.gas_flag, gas_limit) {
            args.push(flag.clone());
            args.push(gas.to_string());
        }
        args
    }

    /// Whether `--version` output satisfies the pin
    pub fn version_matches(&self, output: &str) -> bool {
        match &self.version {
            Some(pinned) => output.contains(pinned.as_str()),
            None => true,
        }
    }
}

/// Proof-quality failure; these drive refinement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// The proof or target does not compile
    CompilationError,
    /// The exploit test ran and an assertion failed
    AssertionFailure,
    /// The exploit test reverted
    Revert,
    /// The run exceeded its wall-clock budget
    TimeoutFailure,
    /// The designated test function never ran
    MissingTest,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::CompilationError => "CompilationError",
            FailureKind::AssertionFailure => "AssertionFailure",
            FailureKind::Revert => "Revert",
            FailureKind::TimeoutFailure => "TimeoutFailure",
            FailureKind::MissingTest => "MissingTest",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of one test invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestOutcome {
    /// The designated test passed
    Passed,
    /// It did not
    Failed(FailureKind),
}

impl TestOutcome {
    pub fn passed(self) -> bool {
        self == TestOutcome::Passed
    }
}

/// Classify combined toolchain output for `test_function`
pub fn parse_test_output(output: &str, test_function: &str) -> TestOutcome {
    if COMPILE_FAILURE.is_match(output) {
        return TestOutcome::Failed(FailureKind::CompilationError);
    }
    for cap in TEST_RESULT.captures_iter(output) {
        let name = cap.get(2).map(|m| m.as_str()).unwrap_or_default();
        if name != test_function {
            continue;
        }
        let status = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
        if status == "PASS" {
            return TestOutcome::Passed;
        }
        return if status.to_ascii_lowercase().contains("revert") {
            TestOutcome::Failed(FailureKind::Revert)
        } else {
            TestOutcome::Failed(FailureKind::AssertionFailure)
        };
    }
    TestOutcome::Failed(FailureKind::MissingTest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_line() {
        let out = "Ran 2 tests for test/Exploit.t.sol:ExploitTest\n\
                   [PASS] testOther() (gas: 100)\n\
                   [PASS] testExploit() (gas: 43120)\n\
                   Suite result: ok. 2 passed";
        assert_eq!(parse_test_output(out, "testExploit"), TestOutcome::Passed);
    }

    #[test]
    fn test_failure_kinds() {
        let assertion = "[FAIL: assertion failed: 0 != 1] testExploit() (gas: 9)";
        assert_eq!(
            parse_test_output(assertion, "testExploit"),
            TestOutcome::Failed(FailureKind::AssertionFailure)
        );
        let revert = "[FAIL. Reason: revert: not owner] testExploit() (gas: 9)";
        assert_eq!(
            parse_test_output(revert, "testExploit"),
            TestOutcome::Failed(FailureKind::Revert)
        );
        let compile = "Compiling 3 files\nError (7576): Undeclared identifier.\n";
        assert_eq!(
            parse_test_output(compile, "testExploit"),
            TestOutcome::Failed(FailureKind::CompilationError)
        );
        assert_eq!(
            parse_test_output("[PASS] testOther() (gas: 1)", "testExploit"),
            TestOutcome::Failed(FailureKind::MissingTest)
        );
    }

    #[test]
    fn test_command_args() {
        let spec = ToolchainSpec::forge().pinned("1.0.0");
        assert_eq!(
            spec.test_command_args("testExploit", Some(30_000_000)),
            vec!["test", "-vvv", "--match-test", "testExploit", "--gas-limit", "30000000"]
        );
        assert!(spec.version_matches("forge Version: 1.0.0-stable"));
        assert!(!spec.version_matches("forge 0.2.0 (abc 2024-01-01)"));
        assert!(ToolchainSpec::forge().version_matches("anything"));
    }
}
