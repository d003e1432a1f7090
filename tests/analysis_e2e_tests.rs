/// End-to-end analysis tests
/// Demonstrates: Parser → Anchors + Dependencies → Slicer → HPG → artifact
use anchorproof::config::AnalysisConfig;
use anchorproof::hpg::HpgNodeType;
use anchorproof::parallel::ParallelConfig;
use anchorproof::slicer::BoundaryReason;
use anchorproof::{
    Analyzer, AnchorVocabulary, Error, Hpg, HpgArtifact, HpgEdgeType, NodeId, SliceConfig,
    SourceFile,
};

const BANK: &str = r#"
pragma solidity ^0.8.0;

contract Bank {
    mapping(address => uint256) public balances;

    function deposit() external payable {
        balances[msg.sender] += msg.value;
    }

    function withdraw() external {
        uint256 amount = balances[msg.sender];
        (bool ok, ) = msg.sender.call{value: amount}("");
        require(ok, "transfer failed");
        balances[msg.sender] = 0;
    }
}
"#;

fn analyzer(slice: SliceConfig) -> Analyzer {
    let config = AnalysisConfig {
        slice,
        parallel: ParallelConfig::default(),
        ..Default::default()
    };
    Analyzer::new(config, AnchorVocabulary::builtin())
}

#[test]
fn test_value_call_followed_by_state_write() {
    let report = analyzer(SliceConfig::default())
        .analyze_sources(&[SourceFile::new("Bank.sol", BANK)])
        .unwrap();

    let anchor = report
        .anchors
        .iter()
        .find(|a| a.category == "external-value-call")
        .expect("value call is anchored");
    let slice = report
        .slices
        .iter()
        .find(|s| s.anchor == *anchor)
        .unwrap();

    // the call statement and the later write to the same slot
    let ast = &report.program.ast;
    let write = ast
        .iter()
        .filter(|n| n.kind.is_cfg_statement())
        .map(|n| n.id)
        .filter(|&id| report.program.ast.enclosing_function(id) == anchor.function)
        .last()
        .unwrap();
    assert!(slice.contains(anchor.node));
    assert!(slice.contains(write));

    let hpg = &report.hpg;
    let statements = hpg
        .nodes()
        .filter(|n| n.node_type == HpgNodeType::Statement && n.features.in_slice)
        .count();
    assert!(statements >= 2);
    let has_cfg = hpg.edges().any(|e| e.edge_type == HpgEdgeType::CfgNext);
    let has_dfg = hpg.edges().any(|e| e.edge_type == HpgEdgeType::DfgReaches);
    assert!(has_cfg && has_dfg);
    assert!(hpg.has_edge(HpgEdgeType::Calls, anchor.node, NodeId::UNRESOLVED));
}

#[test]
fn test_artifact_round_trip_preserves_graph() {
    let report = analyzer(SliceConfig::default())
        .analyze_sources(&[SourceFile::new("Bank.sol", BANK)])
        .unwrap();
    let text = report.hpg.encode(&report.program.digest).unwrap();
    let (decoded, digest) = Hpg::decode(&text).unwrap();

    assert_eq!(digest, report.program.digest);
    assert_eq!(decoded.node_type_counts(), report.hpg.node_type_counts());
    assert_eq!(decoded.edge_type_counts(), report.hpg.edge_type_counts());
    let before: Vec<_> = report.hpg.edges().copied().collect();
    let after: Vec<_> = decoded.edges().copied().collect();
    assert_eq!(before, after);
}

#[test]
fn test_artifact_edges_are_sorted_and_unique() {
    let report = analyzer(SliceConfig::default())
        .analyze_sources(&[SourceFile::new("Bank.sol", BANK)])
        .unwrap();
    let artifact = report.artifact();
    assert_eq!(artifact.format, "anchorproof-hpg");
    assert!(artifact.edges.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_tampered_artifact_is_rejected() {
    let report = analyzer(SliceConfig::default())
        .analyze_sources(&[SourceFile::new("Bank.sol", BANK)])
        .unwrap();
    let mut artifact: HpgArtifact = report.artifact();
    let statement = artifact
        .nodes
        .iter()
        .find(|n| n.node_type == HpgNodeType::Statement)
        .unwrap()
        .id;
    artifact
        .edges
        .retain(|e| !(e.edge_type == HpgEdgeType::AstChildOf && e.source == statement));
    let err = artifact.into_graph().unwrap_err();
    assert!(matches!(err, Error::GraphInvariant(_)));
}

#[test]
fn test_bounds_are_recorded_not_silent() {
    let tight = SliceConfig {
        max_depth: 1,
        max_nodes: 256,
    };
    let report = analyzer(tight)
        .analyze_sources(&[SourceFile::new("Bank.sol", BANK)])
        .unwrap();
    let markers = report.boundary_markers();
    assert!(!markers.is_empty());
    assert!(report
        .hpg
        .boundaries
        .iter()
        .all(|b| b.reason == BoundaryReason::MaxDepth));
}

#[test]
fn test_ids_unique_across_units_and_failures_isolated() {
    let sources = vec![
        SourceFile::new("Bank.sol", BANK),
        SourceFile::new("Broken.sol", "contract Broken { function f( { }"),
        SourceFile::new(
            "Clock.sol",
            "contract Clock { uint last; function tick() public { if (block.timestamp > last) { last = block.timestamp; } } }",
        ),
    ];
    let report = analyzer(SliceConfig::default()).analyze_sources(&sources).unwrap();

    assert_eq!(report.program.units.len(), 2);
    assert_eq!(report.parse_failures().len(), 1);
    match &report.parse_failures()[0].error {
        Error::SyntaxError { file, line, .. } => {
            assert_eq!(file, "Broken.sol");
            assert_eq!(*line, 1);
        }
        other => panic!("unexpected error {:?}", other),
    }

    let ids: Vec<NodeId> = report.program.ast.iter().map(|n| n.id).collect();
    let mut sorted = ids.clone();
    sorted.dedup();
    assert_eq!(ids.len(), sorted.len());
    assert!(report
        .anchors
        .iter()
        .any(|a| a.category == "timestamp-dependence"));
}

#[test]
fn test_unresolved_targets_are_warned() {
    let source = r#"
        interface IOracle { function price() external view returns (uint); }
        contract Market {
            address oracle;
            function quote() public returns (uint) {
                (bool ok, bytes memory data) = oracle.delegatecall(abi.encodeWithSignature("price()"));
                require(ok);
                return data.length;
            }
        }"#;
    let report = analyzer(SliceConfig::default())
        .analyze_sources(&[SourceFile::new("Market.sol", source)])
        .unwrap();
    assert!(report.anchors.iter().any(|a| a.category == "delegatecall"));
    assert!(!report.warnings.is_empty());
    let sentinel = report.hpg.node(NodeId::UNRESOLVED).unwrap();
    assert!(sentinel.features.unresolved);
}

#[test]
fn test_custom_vocabulary() {
    let vocabulary = AnchorVocabulary::from_json(
        r#"{
            "version": "test-1",
            "patterns": [{
                "id": "ecrecover-use",
                "category": "signature",
                "description": "signature recovery",
                "predicates": [{"kind": "call", "path_suffix": ["ecrecover"]}]
            }]
        }"#,
    )
    .unwrap();
    let analyzer = Analyzer::new(AnalysisConfig::default(), std::sync::Arc::new(vocabulary));
    let report = analyzer
        .analyze_sources(&[SourceFile::new(
            "Sig.sol",
            "contract Sig { function who(bytes32 h, uint8 v, bytes32 r, bytes32 s) public pure returns (address) { return ecrecover(h, v, r, s); } }",
        )])
        .unwrap();
    assert_eq!(report.anchors.len(), 1);
    assert_eq!(report.anchors[0].category, "signature");
}
