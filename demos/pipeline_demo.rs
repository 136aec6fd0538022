//! Numeric pipeline run three ways over the same seeded value stream
//!
//! 1. Lock-step: Generator → Filter → Reducer
//! 2. Lock-step with a Monitor stage, logged to `pipeline_log.txt`
//! 3. Dataflow: Producer → Filter → Consumer over bounded queues
//!
//! Usage: cargo run --example pipeline_demo --release [config.toml]
//!
//! Set `RUST_LOG=stage_sync=debug` to see per-tick activity.

use stage_sync::workload::{self, dataflow_chain, LockstepWorkload, Tally};
use stage_sync::{FileReporter, PipelineConfig, TracingReporter};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    println!("Numeric Stage Pipeline");
    println!("======================");
    println!(
        "{} ticks x {} values in [1, 100], keeping even values above 20 (seed {})",
        config.ticks, config.batch_size, config.seed
    );
    println!();

    let generated = workload::values(config.seed, config.total_items() as usize);
    let expected = Tally::of_retained(&generated);

    // 1. three-stage lock-step
    let workload = LockstepWorkload::new(&config, false, |builder| builder.drain_on_completion(true))?;
    let result = workload.run()?;
    println!("=== Three-Stage Pipeline ===");
    println!("Final result: {}", result.value());
    println!("{}", result.summary());
    println!();

    // 2. four-stage lock-step with monitor and log file
    let reporter = Arc::new(FileReporter::new("pipeline_log.txt"));
    let workload = LockstepWorkload::new(&config, true, |builder| {
        builder.with_reporter(reporter.clone()).drain_on_completion(true)
    })?;
    let samples = workload.samples.clone();
    let result = workload.run()?;
    println!("=== Four-Stage Pipeline ===");
    println!("Final result: {}", result.value());
    if let Some(samples) = samples {
        println!("Monitor samples: {}", samples.len());
    }
    println!("Log written to {}", reporter.path().display());
    println!();

    // 3. queue-based dataflow
    let chain = dataflow_chain(&config, Arc::new(TracingReporter))?;
    let result = chain.run()?;
    let tally = *result.value();
    println!("=== Queue-Based Pipeline ===");
    println!("Items consumed: {}", tally.count);
    println!("Final result: {}", tally.sum);
    println!("{}", result.summary());
    println!();

    println!("Expected: {} items summing to {}", expected.count, expected.sum);
    Ok(())
}
