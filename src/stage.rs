use crate::buffer::{Accumulator, SharedBuffer};
use crate::error::Result;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// The built-in stage variants, plus a catch-all for user stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Generator,
    Filter,
    Reducer,
    Monitor,
    DataflowProducer,
    DataflowFilter,
    DataflowConsumer,
    Custom,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StageKind::Generator => "Generator",
            StageKind::Filter => "Filter",
            StageKind::Reducer => "Reducer",
            StageKind::Monitor => "Monitor",
            StageKind::DataflowProducer => "Producer",
            StageKind::DataflowFilter => "Filter",
            StageKind::DataflowConsumer => "Consumer",
            StageKind::Custom => "Custom",
        };
        f.write_str(label)
    }
}

/// A stage driven by the lock-step scheduler, once per tick
pub trait TickStage: Send {
    /// Do this tick's work and describe it for the reporter
    fn process(&mut self, tick: u64) -> Result<String>;

    /// Called before the first tick
    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called during the optional drain phase after the last tick
    ///
    /// Returns a description of the drained work, if any was done.
    fn on_drain(&mut self) -> Result<Option<String>> {
        Ok(None)
    }

    /// Called when the stage is shutting down
    fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    /// Get a human-readable name for this stage
    fn name(&self) -> &str {
        "stage"
    }

    fn kind(&self) -> StageKind {
        StageKind::Custom
    }
}

/// Head of a dataflow chain: yields items until exhausted
pub trait Source<T>: Send {
    /// Next item, or `None` once the source is exhausted
    fn next_item(&mut self) -> Result<Option<T>>;

    fn name(&self) -> &str {
        "producer"
    }

    fn kind(&self) -> StageKind {
        StageKind::DataflowProducer
    }
}

/// Intermediate dataflow stage: forwards, rewrites or drops each item
pub trait Transform<T>: Send {
    fn apply(&mut self, item: T) -> Result<Option<T>>;

    fn name(&self) -> &str {
        "transform"
    }

    fn kind(&self) -> StageKind {
        StageKind::Custom
    }
}

/// Tail of a dataflow chain: folds every item into a value
pub trait Sink<T, A>: Send {
    fn consume(&mut self, item: T) -> Result<()>;

    /// Current folded value
    fn value(&self) -> A;

    fn name(&self) -> &str {
        "consumer"
    }

    fn kind(&self) -> StageKind {
        StageKind::DataflowConsumer
    }
}

/// Appends a fixed-size batch to its output buffer every tick
pub struct Generator<T, G>
where
    G: FnMut() -> T + Send,
{
    name: String,
    output: SharedBuffer<T>,
    batch_size: usize,
    source: G,
}

impl<T, G> Generator<T, G>
where
    T: Send,
    G: FnMut() -> T + Send,
{
    pub fn new(output: SharedBuffer<T>, batch_size: usize, source: G) -> Self {
        Self {
            name: "generator".to_string(),
            output,
            batch_size,
            source,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T, G> TickStage for Generator<T, G>
where
    T: Send,
    G: FnMut() -> T + Send,
{
    fn process(&mut self, _tick: u64) -> Result<String> {
        let batch: Vec<T> = (0..self.batch_size).map(|_| (self.source)()).collect();
        self.output.extend(batch);
        Ok(format!("Generated data batch ({} items)", self.batch_size))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Generator
    }
}

/// Takes up to `take` items per tick from its input, keeps or rewrites each,
/// and appends the survivors to its output
///
/// Never waits for more input: a short buffer yields a short batch.
pub struct Filter<T, U, F>
where
    F: FnMut(T) -> Option<U> + Send,
{
    name: String,
    input: SharedBuffer<T>,
    output: SharedBuffer<U>,
    take: usize,
    transform: F,
}

impl<T, U, F> Filter<T, U, F>
where
    T: Send,
    U: Send,
    F: FnMut(T) -> Option<U> + Send,
{
    pub fn new(input: SharedBuffer<T>, output: SharedBuffer<U>, take: usize, transform: F) -> Self {
        Self {
            name: "filter".to_string(),
            input,
            output,
            take,
            transform,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn pass(&mut self, batch: Vec<T>) -> (usize, usize) {
        let taken = batch.len();
        let kept: Vec<U> = batch.into_iter().filter_map(&mut self.transform).collect();
        let passed = kept.len();
        self.output.extend(kept);
        (taken, passed)
    }
}

impl<T, U, F> TickStage for Filter<T, U, F>
where
    T: Send,
    U: Send,
    F: FnMut(T) -> Option<U> + Send,
{
    fn process(&mut self, _tick: u64) -> Result<String> {
        let batch = self.input.drain_up_to(self.take);
        let (taken, passed) = self.pass(batch);
        Ok(format!("Filtered data ({passed} of {taken} kept)"))
    }

    fn on_drain(&mut self) -> Result<Option<String>> {
        let batch = self.input.drain_all();
        let (taken, passed) = self.pass(batch);
        Ok(Some(format!("Drained filter input ({passed} of {taken} kept)")))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Filter
    }
}

/// Drains its whole input every tick and folds it into an accumulator
pub struct Reducer<T, A, F>
where
    F: FnMut(&mut A, T) + Send,
{
    name: String,
    input: SharedBuffer<T>,
    accumulator: Accumulator<A>,
    fold: F,
}

impl<T, A, F> Reducer<T, A, F>
where
    T: Send,
    A: Send,
    F: FnMut(&mut A, T) + Send,
{
    pub fn new(input: SharedBuffer<T>, accumulator: Accumulator<A>, fold: F) -> Self {
        Self {
            name: "reducer".to_string(),
            input,
            accumulator,
            fold,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn reduce(&mut self) -> usize {
        let batch = self.input.drain_all();
        let count = batch.len();
        let fold = &mut self.fold;
        self.accumulator.update(|acc| {
            for item in batch {
                fold(acc, item);
            }
        });
        count
    }
}

impl<T, A, F> TickStage for Reducer<T, A, F>
where
    T: Send,
    A: Send,
    F: FnMut(&mut A, T) + Send,
{
    fn process(&mut self, _tick: u64) -> Result<String> {
        let count = self.reduce();
        Ok(format!("Reduced data ({count} items)"))
    }

    fn on_drain(&mut self) -> Result<Option<String>> {
        let count = self.reduce();
        Ok(Some(format!("Drained reducer input ({count} items)")))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Reducer
    }
}

/// One observation taken by a [`Monitor`]
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSample<A> {
    pub tick: u64,
    pub raw_len: usize,
    pub filtered_len: usize,
    pub value: A,
}

/// Shared log of monitor observations
#[derive(Debug)]
pub struct SampleLog<A> {
    samples: Arc<Mutex<Vec<MonitorSample<A>>>>,
}

impl<A> Clone for SampleLog<A> {
    fn clone(&self) -> Self {
        Self {
            samples: Arc::clone(&self.samples),
        }
    }
}

impl<A: Clone> SampleLog<A> {
    fn new() -> Self {
        Self {
            samples: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Copy of every sample recorded so far
    pub fn samples(&self) -> Vec<MonitorSample<A>> {
        self.samples.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Observes buffer lengths and the accumulator every tick, mutating nothing
pub struct Monitor<T, U, A> {
    name: String,
    raw: SharedBuffer<T>,
    filtered: SharedBuffer<U>,
    accumulator: Accumulator<A>,
    interval: u64,
    log: SampleLog<A>,
}

impl<T, U, A> Monitor<T, U, A>
where
    A: Clone + fmt::Debug + Send,
{
    /// Create a monitor that logs a health line every `interval` ticks
    pub fn new(
        raw: SharedBuffer<T>,
        filtered: SharedBuffer<U>,
        accumulator: Accumulator<A>,
        interval: u64,
    ) -> Self {
        Self {
            name: "monitor".to_string(),
            raw,
            filtered,
            accumulator,
            interval: interval.max(1),
            log: SampleLog::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Handle to the samples this monitor records
    pub fn sample_log(&self) -> SampleLog<A> {
        self.log.clone()
    }
}

impl<T, U, A> TickStage for Monitor<T, U, A>
where
    T: Send,
    U: Send,
    A: Clone + fmt::Debug + Send,
{
    fn process(&mut self, tick: u64) -> Result<String> {
        let raw_len = self.raw.len();
        let filtered_len = self.filtered.len();
        let value = self.accumulator.get();

        if tick % self.interval == 0 {
            tracing::info!(
                tick,
                raw_len,
                filtered_len,
                result = ?value,
                "Pipeline health"
            );
        }

        self.log.samples.lock().push(MonitorSample {
            tick,
            raw_len,
            filtered_len,
            value,
        });
        Ok("Monitored pipeline".to_string())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Monitor
    }
}

/// Yields exactly `count` items from a generator function
pub struct DataflowProducer<G> {
    name: String,
    count: u64,
    produced: u64,
    source: G,
}

impl<G> DataflowProducer<G> {
    pub fn new(count: u64, source: G) -> Self {
        Self {
            name: "producer".to_string(),
            count,
            produced: 0,
            source,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T, G> Source<T> for DataflowProducer<G>
where
    G: FnMut() -> T + Send,
{
    fn next_item(&mut self) -> Result<Option<T>> {
        if self.produced == self.count {
            return Ok(None);
        }
        self.produced += 1;
        Ok(Some((self.source)()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A filtering stage that passes through items matching a predicate
#[derive(Debug)]
pub struct DataflowFilter<P> {
    name: String,
    predicate: P,
}

impl<P> DataflowFilter<P> {
    pub fn new(predicate: P) -> Self {
        Self {
            name: "filter".to_string(),
            predicate,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T, P> Transform<T> for DataflowFilter<P>
where
    P: FnMut(&T) -> bool + Send,
{
    fn apply(&mut self, item: T) -> Result<Option<T>> {
        if (self.predicate)(&item) {
            Ok(Some(item))
        } else {
            Ok(None)
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::DataflowFilter
    }
}

/// Folds every received item into a local accumulator
pub struct DataflowConsumer<A, F> {
    name: String,
    value: A,
    fold: F,
}

impl<A, F> DataflowConsumer<A, F> {
    pub fn new(initial: A, fold: F) -> Self {
        Self {
            name: "consumer".to_string(),
            value: initial,
            fold,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T, A, F> Sink<T, A> for DataflowConsumer<A, F>
where
    A: Clone + Send,
    F: FnMut(&mut A, T) + Send,
{
    fn consume(&mut self, item: T) -> Result<()> {
        (self.fold)(&mut self.value, item);
        Ok(())
    }

    fn value(&self) -> A {
        self.value.clone()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_appends_batch() {
        let raw = SharedBuffer::new();
        let mut next = 0;
        let mut stage = Generator::new(raw.clone(), 4, move || {
            next += 1;
            next
        });
        stage.process(0).unwrap();
        stage.process(1).unwrap();
        assert_eq!(raw.snapshot(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(stage.kind(), StageKind::Generator);
    }

    #[test]
    fn test_filter_takes_at_most_batch() {
        let raw = SharedBuffer::new();
        let filtered = SharedBuffer::new();
        raw.extend(1..=10);
        let mut stage = Filter::new(raw.clone(), filtered.clone(), 4, |v: i32| {
            (v % 2 == 0).then_some(v)
        });

        stage.process(0).unwrap();
        assert_eq!(filtered.snapshot(), vec![2, 4]);
        assert_eq!(raw.len(), 6);

        stage.on_drain().unwrap();
        assert_eq!(filtered.snapshot(), vec![2, 4, 6, 8, 10]);
        assert!(raw.is_empty());
    }

    #[test]
    fn test_reducer_drains_everything() {
        let filtered = SharedBuffer::new();
        let acc = Accumulator::new(0i64);
        filtered.extend([10, 20, 30]);
        let mut stage = Reducer::new(filtered.clone(), acc.clone(), |sum: &mut i64, v: i32| {
            *sum += i64::from(v)
        });
        stage.process(0).unwrap();
        assert_eq!(acc.get(), 60);
        assert!(filtered.is_empty());
    }

    #[test]
    fn test_monitor_records_without_mutating() {
        let raw = SharedBuffer::new();
        let filtered = SharedBuffer::new();
        let acc = Accumulator::new(5i64);
        raw.extend([1, 2, 3]);
        filtered.push(4);

        let mut stage = Monitor::new(raw.clone(), filtered.clone(), acc.clone(), 10);
        let log = stage.sample_log();
        stage.process(0).unwrap();

        assert_eq!(
            log.samples(),
            vec![MonitorSample {
                tick: 0,
                raw_len: 3,
                filtered_len: 1,
                value: 5
            }]
        );
        assert_eq!(raw.len(), 3);
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn test_dataflow_producer_stops_after_count() {
        let mut producer = DataflowProducer::new(3, || 7u8);
        let mut items = Vec::new();
        while let Some(item) = producer.next_item().unwrap() {
            items.push(item);
        }
        assert_eq!(items, vec![7, 7, 7]);
        assert_eq!(producer.next_item().unwrap(), None);
    }

    #[test]
    fn test_dataflow_filter_and_consumer() {
        let mut filter = DataflowFilter::new(|v: &u32| *v > 5);
        assert_eq!(filter.apply(3).unwrap(), None);
        assert_eq!(filter.apply(7).unwrap(), Some(7));

        let mut consumer = DataflowConsumer::new(0u64, |sum: &mut u64, v: u32| {
            *sum += u64::from(v)
        });
        consumer.consume(7).unwrap();
        consumer.consume(9).unwrap();
        assert_eq!(Sink::<u32, u64>::value(&consumer), 16);
    }
}
