//! Error types for anchorproof

use crate::parser::NodeId;
use thiserror::Error;

/// anchorproof errors
#[derive(Error, Debug, Clone)]
pub enum Error {
    // Parse errors
    /// Syntax error encountered while lexing or parsing a source unit
    ///
    /// **Triggered by:** Malformed Solidity (unbalanced braces, unknown characters)
    /// **Example:** `function f( {` (missing closing parenthesis)
    /// **Scope:** Aborts the offending source unit only
    #[error("Syntax error in {file} at line {line}, column {col}: {message}")]
    SyntaxError {
        /// Source file the error was found in
        file: String,
        /// Line number where error occurred
        line: usize,
        /// Column number where error occurred
        col: usize,
        /// Error description
        message: String,
    },

    /// Unexpected end of file during parsing
    #[error("Unexpected end of file in {file}")]
    UnexpectedEof {
        /// Source file that ended early
        file: String,
    },

    // Input errors
    /// The project path is not a Solidity file or directory
    #[error("Invalid source path: {0}")]
    InvalidSourcePath(String),

    /// Filesystem operation failed
    #[error("I/O error on {path}: {message}")]
    Io {
        /// Path involved in the failed operation
        path: String,
        /// Error description
        message: String,
    },

    /// Anchor vocabulary could not be loaded
    #[error("Invalid anchor vocabulary: {0}")]
    VocabularyError(String),

    /// Configuration could not be loaded or failed validation
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    // Analysis errors
    /// An anchor could not be sliced
    #[error("Slicing failed for anchor on node {node}: {reason}")]
    SliceError {
        /// Anchored node
        node: NodeId,
        /// Failure reason
        reason: String,
    },

    /// An edge or node would break a program-graph invariant
    #[error("Graph invariant violated: {0}")]
    GraphInvariant(String),

    /// Serialized graph artifact is malformed
    #[error("Malformed HPG artifact: {0}")]
    ArtifactFormat(String),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Worker pool could not be created
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    // Verification errors
    /// Sandbox could not be provisioned (resource exhaustion, toolchain missing)
    ///
    /// **Recovery:** Not retried by the refinement loop, surfaced to the caller
    #[error("Provisioning failed: {0}")]
    ProvisionError(String),

    /// Target project and candidate proof could not be materialized
    #[error("Assembly failed: {0}")]
    AssemblyError(String),

    /// Test toolchain could not be invoked
    #[error("Toolchain error: {0}")]
    ToolchainError(String),

    /// Job state machine received an illegal transition
    #[error("Invalid job transition from {from} to {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Symbolic engine failed
    #[error("Symbolic engine error: {0}")]
    SymbolicError(String),

    /// Proof generator failed to produce a candidate
    #[error("Proof generator error: {0}")]
    GeneratorError(String),

    /// Operation was cancelled by the caller
    #[error("Cancelled")]
    Cancelled,
}

/// Error severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Fatal error that cannot be recovered from
    Fatal,
    /// Recoverable error that may be retried
    Recoverable,
    /// Warning that doesn't prevent execution
    Warning,
}

impl Error {
    /// Create an I/O error for a path
    pub fn io(path: impl AsRef<std::path::Path>, err: impl std::fmt::Display) -> Self {
        Error::Io {
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }

    /// Create a graph invariant error with a message
    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::GraphInvariant(msg.into())
    }

    /// Create a provisioning error with a message
    pub fn provision(msg: impl Into<String>) -> Self {
        Error::ProvisionError(msg.into())
    }

    /// Create an assembly error with a message
    pub fn assembly(msg: impl Into<String>) -> Self {
        Error::AssemblyError(msg.into())
    }

    /// Classify error severity
    pub fn classify(&self) -> ErrorSeverity {
        match self {
            Error::SyntaxError { .. } => ErrorSeverity::Fatal,
            Error::UnexpectedEof { .. } => ErrorSeverity::Fatal,
            Error::ProvisionError(_) => ErrorSeverity::Fatal,
            Error::AssemblyError(_) => ErrorSeverity::Fatal,
            Error::GraphInvariant(_) => ErrorSeverity::Fatal,
            Error::ArtifactFormat(_) => ErrorSeverity::Fatal,
            Error::ConfigError(_) => ErrorSeverity::Fatal,
            Error::VocabularyError(_) => ErrorSeverity::Fatal,

            Error::ToolchainError(_) => ErrorSeverity::Recoverable,
            Error::SymbolicError(_) => ErrorSeverity::Recoverable,
            Error::GeneratorError(_) => ErrorSeverity::Recoverable,

            Error::SliceError { .. } => ErrorSeverity::Warning,
            Error::Cancelled => ErrorSeverity::Warning,

            _ => ErrorSeverity::Recoverable,
        }
    }

    /// Whether the error is scoped to a single job or anchor rather than the whole run
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Error::SyntaxError { .. }
                | Error::UnexpectedEof { .. }
                | Error::SliceError { .. }
                | Error::ProvisionError(_)
                | Error::AssemblyError(_)
                | Error::Cancelled
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type for anchorproof operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_message_includes_location() {
        let err = Error::SyntaxError {
            file: "Vault.sol".to_string(),
            line: 4,
            col: 9,
            message: "expected ';'".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Vault.sol"));
        assert!(msg.contains("line 4"));
        assert_eq!(err.classify(), ErrorSeverity::Fatal);
        assert!(err.is_local());
    }

    #[test]
    fn test_tooling_faults_are_fatal() {
        assert_eq!(
            Error::provision("forge missing").classify(),
            ErrorSeverity::Fatal
        );
        assert_eq!(
            Error::assembly("file conflict").classify(),
            ErrorSeverity::Fatal
        );
        assert_eq!(
            Error::GeneratorError("model offline".into()).classify(),
            ErrorSeverity::Recoverable
        );
    }
}
