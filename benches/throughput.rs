use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stage_sync::workload::{dataflow_chain, LockstepWorkload};
use stage_sync::{PipelineConfig, TracingReporter};
use std::sync::Arc;
use std::time::Duration;

fn benchmark_lockstep_three_stage(c: &mut Criterion) {
    let config = PipelineConfig::default();
    c.bench_function("lockstep_three_stage_5000_items", |b| {
        b.iter(|| {
            let workload = LockstepWorkload::new(&config, false, |builder| builder.drain_on_completion(true))
                .expect("Build failed");
            let result = workload.run().expect("Run failed");
            black_box(*result.value())
        });
    });
}

fn benchmark_lockstep_with_monitor(c: &mut Criterion) {
    let config = PipelineConfig::default();
    c.bench_function("lockstep_four_stage_5000_items", |b| {
        b.iter(|| {
            let workload = LockstepWorkload::new(&config, true, |builder| builder.drain_on_completion(true))
                .expect("Build failed");
            let result = workload.run().expect("Run failed");
            black_box(*result.value())
        });
    });
}

fn benchmark_dataflow(c: &mut Criterion) {
    let config = PipelineConfig::default();
    c.bench_function("dataflow_three_stage_5000_items", |b| {
        b.iter(|| {
            let chain = dataflow_chain(&config, Arc::new(TracingReporter)).expect("Build failed");
            let result = chain.run().expect("Run failed");
            black_box(*result.value())
        });
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = benchmark_lockstep_three_stage, benchmark_lockstep_with_monitor, benchmark_dataflow
);
criterion_main!(benches);
