use super::graph::{Hpg, HpgEdge, HpgNode};
use crate::anchor::AnchorOccurrence;
use crate::error::{Error, Result};
use crate::slicer::SliceBoundary;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Format tag of the artifact document
pub const ARTIFACT_FORMAT: &str = "anchorproof-hpg";

/// Artifact schema version
pub const ARTIFACT_VERSION: u32 = 1;

/// Self-describing HPG document handed to downstream detectors and generators
///
/// Sufficient to rebuild the graph without the analyzed sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HpgArtifact {
    pub format: String,
    pub version: u32,
    /// SHA-256 over the analyzed sources
    pub source_digest: String,
    pub nodes: Vec<HpgNode>,
    pub edges: Vec<HpgEdge>,
    #[serde(default)]
    pub anchors: Vec<AnchorOccurrence>,
    #[serde(default)]
    pub boundaries: Vec<SliceBoundary>,
}

impl HpgArtifact {
    /// Snapshot a graph
    pub fn from_graph(hpg: &Hpg, source_digest: impl Into<String>) -> Self {
        HpgArtifact {
            format: ARTIFACT_FORMAT.to_string(),
            version: ARTIFACT_VERSION,
            source_digest: source_digest.into(),
            nodes: hpg.nodes().cloned().collect(),
            edges: hpg.edges().copied().collect(),
            anchors: hpg.anchors.clone(),
            boundaries: hpg.boundaries.clone(),
        }
    }

    /// Rebuild the graph, re-checking every invariant
    pub fn into_graph(self) -> Result<Hpg> {
        if self.format != ARTIFACT_FORMAT {
            return Err(Error::ArtifactFormat(format!(
                "expected format '{}', found '{}'",
                ARTIFACT_FORMAT, self.format
            )));
        }
        if self.version > ARTIFACT_VERSION {
            return Err(Error::ArtifactFormat(format!(
                "unsupported artifact version {}",
                self.version
            )));
        }
        let mut hpg = Hpg::new();
        for node in self.nodes {
            hpg.add_node(node)?;
        }
        for edge in self.edges {
            hpg.add_edge(edge.edge_type, edge.source, edge.target)?;
        }
        hpg.validate()?;
        hpg.anchors = self.anchors;
        hpg.boundaries = self.boundaries;
        Ok(hpg)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Write the artifact as one JSON file, creating parent directories
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
        }
        std::fs::write(path, self.to_json()?).map_err(|e| Error::io(path, e))
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json(&text)
    }
}

impl Hpg {
    /// Serialize to the artifact JSON document
    pub fn encode(&self, source_digest: &str) -> Result<String> {
        HpgArtifact::from_graph(self, source_digest).to_json()
    }

    /// Decode an artifact JSON document, returning the graph and its source digest
    pub fn decode(text: &str) -> Result<(Hpg, String)> {
        let artifact = HpgArtifact::from_json(text)?;
        let digest = artifact.source_digest.clone();
        Ok((artifact.into_graph()?, digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hpg::{HpgEdgeType, HpgNodeType, NodeFeatures};
    use crate::parser::NodeId;

    fn small_graph() -> Hpg {
        let mut hpg = Hpg::new();
        for (id, node_type, function) in [
            (0, HpgNodeType::Contract, None),
            (1, HpgNodeType::Function, None),
            (2, HpgNodeType::Statement, Some(NodeId(1))),
            (3, HpgNodeType::Statement, Some(NodeId(1))),
        ] {
            hpg.add_node(HpgNode {
                id: NodeId(id),
                node_type,
                function,
                features: NodeFeatures {
                    kind: "x".into(),
                    ..Default::default()
                },
            })
            .unwrap();
        }
        hpg.add_edge(HpgEdgeType::AstChildOf, NodeId(1), NodeId(0)).unwrap();
        hpg.add_edge(HpgEdgeType::AstChildOf, NodeId(2), NodeId(1)).unwrap();
        hpg.add_edge(HpgEdgeType::AstChildOf, NodeId(3), NodeId(1)).unwrap();
        hpg.add_edge(HpgEdgeType::CfgNext, NodeId(2), NodeId(3)).unwrap();
        hpg.add_edge(HpgEdgeType::DfgReaches, NodeId(3), NodeId(2)).unwrap();
        hpg
    }

    #[test]
    fn test_encode_decode() {
        let hpg = small_graph();
        let text = hpg.encode("abc").unwrap();
        assert!(text.contains("\"cfg_next\""));
        let (decoded, digest) = Hpg::decode(&text).unwrap();
        assert_eq!(digest, "abc");
        assert_eq!(decoded, hpg);
    }

    #[test]
    fn test_wrong_format_tag_is_rejected() {
        let mut artifact = HpgArtifact::from_graph(&small_graph(), "abc");
        artifact.format = "something-else".into();
        let err = artifact.into_graph().unwrap_err();
        assert!(matches!(err, Error::ArtifactFormat(_)));
    }

    #[test]
    fn test_tampered_edge_is_rejected() {
        let mut artifact = HpgArtifact::from_graph(&small_graph(), "abc");
        artifact.edges.push(HpgEdge {
            edge_type: HpgEdgeType::InheritsFrom,
            source: NodeId(2),
            target: NodeId(0),
        });
        assert!(matches!(
            artifact.into_graph().unwrap_err(),
            Error::GraphInvariant(_)
        ));
    }

    #[test]
    fn test_write_and_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outputs").join("p.hpg.json");
        let artifact = HpgArtifact::from_graph(&small_graph(), "abc");
        artifact.write_to(&path).unwrap();
        assert_eq!(HpgArtifact::read_from(&path).unwrap(), artifact);
    }
}
