//! Numeric payload used by the demo, benches and tests.
//!
//! Values are drawn uniformly from `1..=100` by a seeded generator; the filter
//! keeps even values above 20 and the reducer sums what survives.

use crate::buffer::{Accumulator, SharedBuffer};
use crate::config::PipelineConfig;
use crate::dataflow::{DataflowBuilder, DataflowChain};
use crate::error::Result;
use crate::lockstep::{LockstepBuilder, LockstepPipeline};
use crate::pipeline::PipelineResult;
use crate::report::Reporter;
use crate::stage::{
    DataflowConsumer, DataflowFilter, DataflowProducer, Filter, Generator, Monitor, Reducer, SampleLog,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::RangeInclusive;
use std::sync::Arc;

/// Range every generated value falls in
pub const VALUE_RANGE: RangeInclusive<i32> = 1..=100;

/// The filter predicate: even and greater than 20
pub fn is_retained(value: &i32) -> bool {
    value % 2 == 0 && *value > 20
}

/// Deterministic value generator for `seed`
pub fn value_stream(seed: u64) -> impl FnMut() -> i32 + Send {
    let mut rng = StdRng::seed_from_u64(seed);
    move || rng.gen_range(VALUE_RANGE)
}

/// The first `n` values of the stream for `seed`
pub fn values(seed: u64, n: usize) -> Vec<i32> {
    let mut next = value_stream(seed);
    (0..n).map(|_| next()).collect()
}

/// Count and sum of the values a consumer received
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub count: u64,
    pub sum: i64,
}

impl Tally {
    /// Tally of the retained values among `values`
    pub fn of_retained<'a>(values: impl IntoIterator<Item = &'a i32>) -> Self {
        values
            .into_iter()
            .filter(|v| is_retained(v))
            .fold(Tally::default(), |mut tally, v| {
                tally.add(*v);
                tally
            })
    }

    fn add(&mut self, value: i32) {
        self.count += 1;
        self.sum += i64::from(value);
    }
}

/// Generator → Filter → Reducer (→ Monitor) over shared buffers
pub struct LockstepWorkload {
    pub pipeline: LockstepPipeline,
    pub raw: SharedBuffer<i32>,
    pub filtered: SharedBuffer<i32>,
    pub accumulator: Accumulator<i64>,
    /// Present when the pipeline includes a monitor stage
    pub samples: Option<SampleLog<i64>>,
}

impl LockstepWorkload {
    /// Build the 3-stage pipeline, or the 4-stage one with `with_monitor`
    ///
    /// `customize` can adjust the builder (reporter, stop flag, drain) before
    /// it is validated.
    pub fn new(
        config: &PipelineConfig,
        with_monitor: bool,
        customize: impl FnOnce(LockstepBuilder) -> LockstepBuilder,
    ) -> Result<Self> {
        config.validate()?;

        let raw = SharedBuffer::new();
        let filtered = SharedBuffer::new();
        let accumulator = Accumulator::new(0i64);

        let mut builder = LockstepBuilder::new(config.ticks)
            .add_stage(Generator::new(raw.clone(), config.batch_size, value_stream(config.seed)))
            .add_stage(Filter::new(
                raw.clone(),
                filtered.clone(),
                config.batch_size,
                |v: i32| is_retained(&v).then_some(v),
            ))
            .add_stage(Reducer::new(
                filtered.clone(),
                accumulator.clone(),
                |sum: &mut i64, v: i32| *sum += i64::from(v),
            ));

        let mut samples = None;
        if with_monitor {
            let monitor = Monitor::new(
                raw.clone(),
                filtered.clone(),
                accumulator.clone(),
                config.monitor_interval,
            );
            samples = Some(monitor.sample_log());
            builder = builder.add_stage(monitor);
        }

        Ok(Self {
            pipeline: customize(builder).build()?,
            raw,
            filtered,
            accumulator,
            samples,
        })
    }

    pub fn run(self) -> Result<PipelineResult<i64>> {
        self.pipeline.run(&self.accumulator)
    }
}

/// Producer → Filter → Consumer over bounded queues
pub fn dataflow_chain(config: &PipelineConfig, reporter: Arc<dyn Reporter>) -> Result<DataflowChain<i32, Tally>> {
    config.validate()?;

    DataflowBuilder::new(
        DataflowProducer::new(config.total_items(), value_stream(config.seed)),
        config.queue_capacity,
    )
    .then(DataflowFilter::new(is_retained), config.queue_capacity)
    .with_reporter(reporter)
    .sink(DataflowConsumer::new(Tally::default(), |tally: &mut Tally, v: i32| tally.add(v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_in_range() {
        let sample = values(7, 1000);
        assert!(sample.iter().all(|v| VALUE_RANGE.contains(v)));
    }

    #[test]
    fn test_stream_is_deterministic() {
        assert_eq!(values(3, 20), values(3, 20));
    }

    #[test]
    fn test_predicate() {
        assert!(is_retained(&22));
        assert!(!is_retained(&20));
        assert!(!is_retained(&23));
        assert!(!is_retained(&4));
    }

    #[test]
    fn test_tally_of_retained() {
        let tally = Tally::of_retained(&[10, 22, 23, 100]);
        assert_eq!(tally, Tally { count: 2, sum: 122 });
    }
}
