//! Anchor matching
//!
//! Locates security-relevant code regions by scanning the syntax tree against a
//! vocabulary of declarative patterns.

mod matcher;
mod vocabulary;

pub use matcher::{AnchorMatcher, AnchorOccurrence};
pub use vocabulary::{AnchorPattern, AnchorPredicate, AnchorVocabulary, PatternKind, Role};
