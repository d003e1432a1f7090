//! End-to-end analysis run
//!
//! sources → parse → anchors + dependencies → slices → HPG artifact

use crate::analysis::{DependencyGraph, UnresolvedReferenceWarning};
use crate::anchor::{AnchorMatcher, AnchorOccurrence, AnchorVocabulary};
use crate::config::{AnalysisConfig, Config};
use crate::error::{Error, Result};
use crate::hpg::{Hpg, HpgArtifact, HpgAssembler};
use crate::parser::{ParseFailure, Program, SourceFile};
use crate::project;
use crate::slicer::{Slice, SliceBoundaryReached, Slicer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// An anchor that could not be sliced
#[derive(Debug, Clone)]
pub struct AnchorFailure {
    pub anchor: AnchorOccurrence,
    pub error: Error,
}

/// Everything one run produced
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub program: Program,
    /// Entry file of a project run
    pub entry_point: Option<PathBuf>,
    pub anchors: Vec<AnchorOccurrence>,
    /// Slices of the anchors that sliced successfully
    pub slices: Vec<Slice>,
    pub anchor_failures: Vec<AnchorFailure>,
    pub warnings: Vec<UnresolvedReferenceWarning>,
    pub hpg: Hpg,
}

impl AnalysisReport {
    /// Units that failed to parse
    pub fn parse_failures(&self) -> &[ParseFailure] {
        &self.program.failures
    }

    /// Markers of slices cut short by a bound
    pub fn boundary_markers(&self) -> Vec<SliceBoundaryReached> {
        self.slices.iter().filter_map(Slice::boundary_reached).collect()
    }

    /// Self-contained artifact of the run's graph
    pub fn artifact(&self) -> HpgArtifact {
        HpgArtifact::from_graph(&self.hpg, self.program.digest.clone())
    }
}

/// Builds program graphs from Solidity sources
pub struct Analyzer {
    config: AnalysisConfig,
    vocabulary: Arc<AnchorVocabulary>,
}

impl Analyzer {
    pub fn new(config: AnalysisConfig, vocabulary: Arc<AnchorVocabulary>) -> Self {
        Analyzer { config, vocabulary }
    }

    /// Analyzer for a full configuration, loading its vocabulary
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.analysis.clone(), config.load_vocabulary()?))
    }

    /// Analyze in-memory sources
    pub fn analyze_sources(&self, sources: &[SourceFile]) -> Result<AnalysisReport> {
        let program = Program::parse(sources, &self.config.parallel)?;
        let anchors = AnchorMatcher::new(Arc::clone(&self.vocabulary)).find_anchors(&program);
        let deps = DependencyGraph::build(&program, &self.config.parallel)?;

        let slicer = Slicer::new(&program, &deps, self.config.slice);
        let outcomes = slicer.slice_all(&anchors, &self.config.parallel)?;
        let mut slices = Vec::new();
        let mut anchor_failures = Vec::new();
        for (anchor, outcome) in anchors.iter().zip(outcomes) {
            match outcome {
                Ok(slice) => slices.push(slice),
                Err(error) => {
                    warn!(anchor = %anchor.node, pattern = %anchor.pattern_id, error = %error, "anchor not sliced");
                    anchor_failures.push(AnchorFailure {
                        anchor: anchor.clone(),
                        error,
                    });
                }
            }
        }

        let hpg = HpgAssembler::new(&program, &deps).assemble(&slices)?;
        let warnings = deps.calls.warnings.clone();
        info!(
            units = program.units.len(),
            parse_failures = program.failures.len(),
            anchors = anchors.len(),
            slices = slices.len(),
            nodes = hpg.node_count(),
            edges = hpg.edge_count(),
            "analysis complete"
        );
        Ok(AnalysisReport {
            program,
            entry_point: None,
            anchors,
            slices,
            anchor_failures,
            warnings,
            hpg,
        })
    }

    /// Analyze a `.sol` file or every `.sol` file under a directory
    pub fn analyze_path(&self, path: &Path) -> Result<AnalysisReport> {
        let files = project::collect_sources(path)?;
        let sources = project::load_sources(&files)?;
        let mut report = self.analyze_sources(&sources)?;
        report.entry_point = project::select_entry_point(&files);
        Ok(report)
    }

    /// Write the run's artifact to `<output_dir>/<slug>.hpg.json`
    pub fn write_artifact(&self, report: &AnalysisReport, project_path: &Path) -> Result<PathBuf> {
        let path = self
            .config
            .output_dir
            .join(project::artifact_file_name(project_path));
        report.artifact().write_to(&path)?;
        info!(path = %path.display(), "artifact written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::ParallelConfig;

    fn analyzer() -> Analyzer {
        let config = AnalysisConfig {
            parallel: ParallelConfig::sequential(),
            ..Default::default()
        };
        Analyzer::new(config, AnchorVocabulary::builtin())
    }

    #[test]
    fn test_bad_unit_does_not_abort_run() {
        let sources = vec![
            SourceFile::new("Good.sol", "contract Good { function f() public { selfdestruct(payable(msg.sender)); } }"),
            SourceFile::new("Bad.sol", "contract Bad { function ( }"),
        ];
        let report = analyzer().analyze_sources(&sources).unwrap();
        assert_eq!(report.parse_failures().len(), 1);
        assert_eq!(report.parse_failures()[0].path, "Bad.sol");
        assert!(!report.anchors.is_empty());
        assert_eq!(report.slices.len(), report.anchors.len());
    }

    #[test]
    fn test_analyze_directory_and_write_artifact() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Vault.sol"),
            "contract Vault { function f() public { require(tx.origin == msg.sender); } }",
        )
        .unwrap();
        let out = tempfile::tempdir().unwrap();
        let config = AnalysisConfig {
            parallel: ParallelConfig::sequential(),
            output_dir: out.path().to_path_buf(),
            ..Default::default()
        };
        let analyzer = Analyzer::new(config, AnchorVocabulary::builtin());
        let report = analyzer.analyze_path(dir.path()).unwrap();
        assert!(report.entry_point.is_some());
        let path = analyzer.write_artifact(&report, dir.path()).unwrap();
        assert!(path.to_string_lossy().ends_with(".hpg.json"));

        let artifact = HpgArtifact::read_from(&path).unwrap();
        assert_eq!(artifact.source_digest, report.program.digest);
        let hpg = artifact.into_graph().unwrap();
        assert_eq!(hpg.node_type_counts(), report.hpg.node_type_counts());
    }
}
