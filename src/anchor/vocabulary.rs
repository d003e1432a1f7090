//! Anchor vocabulary: versioned, declarative code patterns
//!
//! A vocabulary is plain data so it can be authored as JSON. It is loaded once per
//! run and shared read-only between workers behind an [`Arc`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Syntactic shape a predicate applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// A call expression, matched on its callee path
    Call,
    /// A member access such as `block.timestamp`
    Member,
    /// A bare identifier such as `now`
    Identifier,
    /// An inline assembly block
    Assembly,
}

/// Contextual role the matched expression must play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// No constraint
    #[default]
    Any,
    /// A call whose result is thrown away by an expression statement
    ResultDiscarded,
    /// Inside a branch condition or a `require`/`assert` argument
    InCondition,
}

/// One declarative match rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorPredicate {
    /// Node shape
    pub kind: PatternKind,
    /// Required tail of the dotted access path (`["block", "timestamp"]`, `["call"]`)
    #[serde(default)]
    pub path_suffix: Vec<String>,
    /// For calls: at least one of these call options (`value`, `gas`) must be given
    #[serde(default)]
    pub call_options: Vec<String>,
    /// For calls: exact number of positional arguments
    #[serde(default)]
    pub arity: Option<usize>,
    /// Contextual role
    #[serde(default)]
    pub role: Role,
}

impl AnchorPredicate {
    fn new(kind: PatternKind, path: &[&str]) -> Self {
        AnchorPredicate {
            kind,
            path_suffix: path.iter().map(|s| s.to_string()).collect(),
            call_options: Vec::new(),
            arity: None,
            role: Role::Any,
        }
    }

    fn with_options(mut self, options: &[&str]) -> Self {
        self.call_options = options.iter().map(|s| s.to_string()).collect();
        self
    }

    fn with_arity(mut self, arity: usize) -> Self {
        self.arity = Some(arity);
        self
    }

    fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }
}

/// Named pattern; matches when any of its predicates matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorPattern {
    /// Unique pattern id
    pub id: String,
    /// Vulnerability category tag (`unchecked-call`, `timestamp-dependence`, ...)
    pub category: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Alternatives
    pub predicates: Vec<AnchorPredicate>,
}

/// Versioned pattern list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorVocabulary {
    /// Vocabulary version
    pub version: String,
    /// Patterns in priority order
    pub patterns: Vec<AnchorPattern>,
}

lazy_static::lazy_static! {
    /// Built-in default vocabulary, shared process-wide
    static ref BUILTIN_VOCABULARY: Arc<AnchorVocabulary> = Arc::new(default_vocabulary());
}

fn pattern(id: &str, category: &str, description: &str, predicates: Vec<AnchorPredicate>) -> AnchorPattern {
    AnchorPattern {
        id: id.to_string(),
        category: category.to_string(),
        description: description.to_string(),
        predicates,
    }
}

fn default_vocabulary() -> AnchorVocabulary {
    use PatternKind::*;
    let p = AnchorPredicate::new;
    AnchorVocabulary {
        version: "1.0.0".to_string(),
        patterns: vec![
            pattern(
                "external-value-call",
                "external-value-call",
                "low-level call transferring ether",
                vec![
                    p(Call, &["call"]).with_options(&["value"]),
                    p(Call, &["call", "value"]),
                    p(Call, &["send"]).with_arity(1),
                    p(Call, &["transfer"]).with_arity(1),
                ],
            ),
            pattern(
                "unchecked-call",
                "unchecked-call",
                "low-level call whose success flag is discarded",
                vec![
                    p(Call, &["call"]).with_role(Role::ResultDiscarded),
                    p(Call, &["send"]).with_role(Role::ResultDiscarded),
                    p(Call, &["delegatecall"]).with_role(Role::ResultDiscarded),
                ],
            ),
            pattern(
                "delegatecall",
                "delegatecall",
                "delegatecall into another contract",
                vec![p(Call, &["delegatecall"])],
            ),
            pattern(
                "timestamp-dependence",
                "timestamp-dependence",
                "logic depending on the block timestamp",
                vec![p(Member, &["block", "timestamp"]), p(Identifier, &["now"])],
            ),
            pattern(
                "block-number-dependence",
                "block-number-dependence",
                "logic depending on the block number",
                vec![p(Member, &["block", "number"])],
            ),
            pattern(
                "tx-origin-auth",
                "tx-origin-auth",
                "authorization through tx.origin",
                vec![p(Member, &["tx", "origin"]).with_role(Role::InCondition)],
            ),
            pattern(
                "selfdestruct",
                "selfdestruct",
                "contract destruction",
                vec![p(Call, &["selfdestruct"]), p(Call, &["suicide"])],
            ),
            pattern(
                "weak-randomness",
                "weak-randomness",
                "randomness derived from block data",
                vec![
                    p(Call, &["blockhash"]),
                    p(Member, &["block", "blockhash"]),
                    p(Member, &["block", "prevrandao"]),
                    p(Member, &["block", "difficulty"]),
                ],
            ),
            pattern(
                "inline-assembly",
                "inline-assembly",
                "inline assembly block",
                vec![p(Assembly, &[])],
            ),
        ],
    }
}

impl AnchorVocabulary {
    /// Built-in vocabulary
    pub fn builtin() -> Arc<AnchorVocabulary> {
        Arc::clone(&BUILTIN_VOCABULARY)
    }

    /// Parse and validate a vocabulary from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let vocabulary: AnchorVocabulary =
            serde_json::from_str(text).map_err(|e| Error::VocabularyError(e.to_string()))?;
        vocabulary.validate()?;
        Ok(vocabulary)
    }

    /// Load and validate a vocabulary from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json(&text)
    }

    /// Check structural well-formedness
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(Error::VocabularyError("missing version".to_string()));
        }
        let mut seen = HashSet::new();
        for pattern in &self.patterns {
            if !seen.insert(pattern.id.as_str()) {
                return Err(Error::VocabularyError(format!(
                    "duplicate pattern id '{}'",
                    pattern.id
                )));
            }
            if pattern.predicates.is_empty() {
                return Err(Error::VocabularyError(format!(
                    "pattern '{}' has no predicates",
                    pattern.id
                )));
            }
            for predicate in &pattern.predicates {
                if predicate.kind != PatternKind::Assembly && predicate.path_suffix.is_empty() {
                    return Err(Error::VocabularyError(format!(
                        "pattern '{}' has a {:?} predicate without a path",
                        pattern.id, predicate.kind
                    )));
                }
            }
        }
        Ok(())
    }

    /// Pattern by id
    pub fn pattern(&self, id: &str) -> Option<&AnchorPattern> {
        self.patterns.iter().find(|p| p.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_is_shared_and_valid() {
        let a = AnchorVocabulary::builtin();
        let b = AnchorVocabulary::builtin();
        assert!(Arc::ptr_eq(&a, &b));
        a.validate().unwrap();
        assert!(a.pattern("unchecked-call").is_some());
    }

    #[test]
    fn test_from_json_with_defaults() {
        let vocab = AnchorVocabulary::from_json(
            r#"{"version": "2", "patterns": [
                {"id": "ts", "category": "timestamp-dependence",
                 "predicates": [{"kind": "member", "path_suffix": ["block", "timestamp"]}]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(vocab.patterns[0].predicates[0].role, Role::Any);
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let err = AnchorVocabulary::from_json(
            r#"{"version": "1", "patterns": [
                {"id": "a", "category": "x", "predicates": [{"kind": "assembly"}]},
                {"id": "a", "category": "y", "predicates": [{"kind": "assembly"}]}
            ]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::VocabularyError(_)));
    }
}
