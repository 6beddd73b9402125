//! Benchmarks for graph construction and network adjustment

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use leveling_adjust::{ConditionalAdjuster, NetworkAdjuster, ParametricAdjuster};
use leveling_core::ToleranceTable;
use leveling_graph::{LoopAnalyzer, ObservationGraph};
use leveling_test::{Layout, NetworkSimulator, SimConfig};

fn grid(rows: usize, cols: usize) -> leveling_test::SimulatedNetwork {
    let config = SimConfig::light().with_layout(Layout::Grid { rows, cols });
    NetworkSimulator::new(config).generate()
}

fn bench_graph_build(c: &mut Criterion) {
    let network = grid(10, 10);

    c.bench_function("graph_build_10x10", |b| {
        b.iter(|| black_box(ObservationGraph::build(black_box(&network.observations)).is_ok()))
    });
}

fn bench_find_loops(c: &mut Criterion) {
    let network = grid(10, 10);
    let Ok(graph) = ObservationGraph::build(&network.observations) else {
        return;
    };

    c.bench_function("find_loops_10x10", |b| b.iter(|| black_box(graph.find_loops().len())));
}

fn bench_loop_analysis(c: &mut Criterion) {
    let network = grid(10, 10);
    let table = ToleranceTable::default();
    let Ok(graph) = ObservationGraph::build(&network.observations) else {
        return;
    };

    c.bench_function("analyze_loops_10x10", |b| {
        b.iter(|| black_box(LoopAnalyzer::new(&table).analyze_loops(&graph).loops.len()))
    });
}

fn bench_parametric(c: &mut Criterion) {
    let adjuster = ParametricAdjuster::default();

    for (rows, cols) in [(4, 4), (8, 8)] {
        let network = grid(rows, cols);
        c.bench_function(&format!("parametric_{}x{}", rows, cols), |b| {
            b.iter(|| {
                black_box(
                    adjuster
                        .adjust(black_box(&network.observations), &network.fixed)
                        .is_ok(),
                )
            })
        });
    }
}

fn bench_conditional(c: &mut Criterion) {
    let adjuster = ConditionalAdjuster::default();

    for (rows, cols) in [(4, 4), (8, 8)] {
        let network = grid(rows, cols);
        c.bench_function(&format!("conditional_{}x{}", rows, cols), |b| {
            b.iter(|| {
                black_box(
                    adjuster
                        .adjust(black_box(&network.observations), &network.fixed)
                        .is_ok(),
                )
            })
        });
    }
}

criterion_group!(
    benches,
    bench_graph_build,
    bench_find_loops,
    bench_loop_analysis,
    bench_parametric,
    bench_conditional,
);

criterion_main!(benches);
