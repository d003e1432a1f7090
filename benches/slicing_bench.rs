use anchorproof::analysis::DependencyGraph;
use anchorproof::parallel::ParallelConfig;
use anchorproof::{AnchorMatcher, AnchorVocabulary, HpgAssembler, Program, SliceConfig, Slicer};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Contract with `n` functions, each a read / external call / write sequence
fn generate_contract(n: usize) -> String {
    let mut source = String::from("contract Bench {\n    mapping(address => uint) balances;\n    uint total;\n");
    for i in 0..n {
        source.push_str(&format!(
            r#"
    function step{i}(address to) public {{
        uint amount = balances[to];
        if (amount > {i}) {{
            total += amount;
        }}
        (bool ok, ) = to.call{{value: amount}}("");
        require(ok);
        balances[to] = 0;
    }}
"#
        ));
    }
    source.push_str("}\n");
    source
}

fn bench_slicing(c: &mut Criterion) {
    let mut group = c.benchmark_group("slicing");

    for size in [10, 50, 200].iter() {
        let source = generate_contract(*size);
        let program = Program::from_source("Bench.sol", &source).unwrap();
        let deps = DependencyGraph::build(&program, &ParallelConfig::default()).unwrap();
        let anchors = AnchorMatcher::new(AnchorVocabulary::builtin()).find_anchors(&program);
        let slicer = Slicer::new(&program, &deps, SliceConfig::default());

        group.bench_with_input(BenchmarkId::new("sequential", size), size, |b, _| {
            b.iter(|| {
                let slices = slicer
                    .slice_all(&anchors, &ParallelConfig::sequential())
                    .unwrap();
                black_box(slices.len())
            });
        });

        group.bench_with_input(BenchmarkId::new("parallel", size), size, |b, _| {
            b.iter(|| {
                let slices = slicer
                    .slice_all(&anchors, &ParallelConfig::default())
                    .unwrap();
                black_box(slices.len())
            });
        });
    }

    group.finish();
}

fn bench_full_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");

    for size in [10, 50].iter() {
        let source = generate_contract(*size);
        group.bench_with_input(BenchmarkId::new("parse_analyze_assemble", size), size, |b, _| {
            b.iter(|| {
                let program = Program::from_source("Bench.sol", &source).unwrap();
                let deps = DependencyGraph::build(&program, &ParallelConfig::default()).unwrap();
                let anchors = AnchorMatcher::new(AnchorVocabulary::builtin()).find_anchors(&program);
                let slicer = Slicer::new(&program, &deps, SliceConfig::default());
                let slices: Vec<_> = anchors
                    .iter()
                    .filter_map(|a| slicer.slice(a).ok())
                    .collect();
                let hpg = HpgAssembler::new(&program, &deps).assemble(&slices).unwrap();
                black_box(hpg.edge_count())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_slicing, bench_full_pipeline);
criterion_main!(benches);
