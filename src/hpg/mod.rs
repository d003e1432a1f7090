//! Heterogeneous program graph
//!
//! Fuses syntax, control flow, data flow, calls and inheritance over the union of
//! an analysis run's slices into one typed multigraph, and serializes it as a
//! self-contained JSON artifact.

mod artifact;
mod assembler;
mod graph;

pub use artifact::{HpgArtifact, ARTIFACT_FORMAT, ARTIFACT_VERSION};
pub use assembler::HpgAssembler;
pub use graph::{Hpg, HpgEdge, HpgEdgeType, HpgNode, HpgNodeType, NodeFeatures};
