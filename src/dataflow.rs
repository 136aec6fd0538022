//! Dataflow stage scheduler.
//!
//! Stages are chained by [`BoundedQueue`]s and each runs at its own pace on
//! its own thread. The source closes its outbound queue when exhausted; every
//! transform closes its outbound queue once its inbound queue reports end of
//! stream, so shutdown travels downstream exactly once per queue. A failing
//! stage closes every queue: downstream stages drain what is buffered,
//! upstream stages find their outbound queue closed and stop. An item a stage
//! was holding when its outbound queue closed is counted as undelivered.

use crate::error::{PipelineError, Result};
use crate::once::OnceInit;
use crate::pipeline::{guarded, FailureSlot, PipelineResult, StageFailure, StageReport, StageStatus};
use crate::queue::BoundedQueue;
use crate::report::{Reporter, StageEvent, TracingReporter};
use crate::stage::{Sink, Source, StageKind, Transform};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Builder for dataflow chains
pub struct DataflowBuilder<T> {
    source: Box<dyn Source<T>>,
    source_capacity: usize,
    transforms: Vec<(Box<dyn Transform<T>>, usize)>,
    reporter: Arc<dyn Reporter>,
}

impl<T: Send + 'static> DataflowBuilder<T> {
    /// Start a chain whose source feeds a queue of `capacity` items
    pub fn new(source: impl Source<T> + 'static, capacity: usize) -> Self {
        Self {
            source: Box::new(source),
            source_capacity: capacity,
            transforms: Vec::new(),
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Append a transform whose output queue holds `capacity` items
    pub fn then(mut self, transform: impl Transform<T> + 'static, capacity: usize) -> Self {
        self.transforms.push((Box::new(transform), capacity));
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Terminate the chain with `sink` and allocate its queues
    pub fn sink<A>(self, sink: impl Sink<T, A> + 'static) -> Result<DataflowChain<T, A>> {
        let mut queues = Vec::with_capacity(self.transforms.len() + 1);
        queues.push(BoundedQueue::new(self.source_capacity)?);

        let mut transforms = Vec::with_capacity(self.transforms.len());
        for (transform, capacity) in self.transforms {
            queues.push(BoundedQueue::new(capacity)?);
            transforms.push(transform);
        }

        Ok(DataflowChain {
            source: self.source,
            transforms,
            sink: Box::new(sink),
            queues,
            reporter: self.reporter,
        })
    }
}

/// Closes every queue of a dataflow chain from outside the run
pub struct ShutdownHandle<T> {
    queues: Vec<BoundedQueue<T>>,
}

impl<T> Clone for ShutdownHandle<T> {
    fn clone(&self) -> Self {
        Self {
            queues: self.queues.clone(),
        }
    }
}

impl<T> ShutdownHandle<T> {
    pub fn close_all(&self) {
        tracing::info!(queues = self.queues.len(), "Closing all dataflow queues");
        for queue in &self.queues {
            queue.close();
        }
    }
}

/// A validated dataflow chain, ready to run once
pub struct DataflowChain<T, A> {
    source: Box<dyn Source<T>>,
    transforms: Vec<Box<dyn Transform<T>>>,
    sink: Box<dyn Sink<T, A>>,
    queues: Vec<BoundedQueue<T>>,
    reporter: Arc<dyn Reporter>,
}

impl<T, A> DataflowChain<T, A>
where
    T: Send,
    A: Send,
{
    /// Number of stages, source and sink included
    pub fn stage_count(&self) -> usize {
        self.transforms.len() + 2
    }

    /// The queues between stages, source side first
    pub fn queues(&self) -> &[BoundedQueue<T>] {
        &self.queues
    }

    /// Handle for cancelling the run by closing every queue
    pub fn shutdown_handle(&self) -> ShutdownHandle<T> {
        ShutdownHandle {
            queues: self.queues.clone(),
        }
    }

    /// Run every stage until the chain has drained
    ///
    /// Returns `Err` only for initialization and thread failures. A stage
    /// failure yields a partial [`PipelineResult`] naming the stage and the
    /// sequence number of the item it failed on.
    pub fn run(self) -> Result<PipelineResult<A>> {
        let DataflowChain {
            source,
            transforms,
            sink,
            queues,
            reporter,
        } = self;

        let stage_count = transforms.len() + 2;
        tracing::info!(stages = stage_count, "Starting queue-based pipeline");

        let init = OnceInit::new();
        let failures = FailureSlot::new();
        let stranded = AtomicUsize::new(0);
        let shared = FlowShared {
            queues: &queues,
            stranded: &stranded,
            reporter: reporter.as_ref(),
            init: &init,
            failures: &failures,
            started: Instant::now(),
        };

        let (source_out, transform_outs, sink_out) = crossbeam::scope(|scope| {
            let source_handle = scope.spawn(move |_| run_source(1, source, shared));
            let transform_handles: Vec<_> = transforms
                .into_iter()
                .enumerate()
                .map(|(idx, transform)| scope.spawn(move |_| run_transform(idx + 2, idx, transform, shared)))
                .collect();
            let sink_handle = scope.spawn(move |_| run_sink(stage_count, sink, shared));

            (
                source_handle.join(),
                transform_handles.into_iter().map(|h| h.join()).collect::<Vec<_>>(),
                sink_handle.join(),
            )
        })
        .map_err(|_| PipelineError::ThreadError("dataflow scope panicked".into()))?;

        let join_failed = |_: Box<dyn Any + Send>| PipelineError::ThreadError("Join failed".into());
        let mut reports = Vec::with_capacity(stage_count);
        reports.push(source_out.map_err(join_failed)??);
        for outcome in transform_outs {
            reports.push(outcome.map_err(join_failed)??);
        }
        let (sink_report, value) = sink_out.map_err(join_failed)??;
        reports.push(sink_report);

        let buffered: usize = queues.iter().map(|q| q.drain().len()).sum();
        let undelivered = buffered + stranded.load(Ordering::SeqCst);
        if undelivered > 0 {
            tracing::warn!(undelivered, "Items left in queues after shutdown");
        }

        let result = PipelineResult::new(
            value,
            reports,
            failures.take(),
            undelivered,
            shared.started.elapsed(),
        );
        reporter.on_finish(&result.summary());
        Ok(result)
    }
}

/// Run a dataflow chain to completion
pub fn run_dataflow<T: Send, A: Send>(chain: DataflowChain<T, A>) -> Result<PipelineResult<A>> {
    chain.run()
}

/// Run-wide resources every stage thread borrows
struct FlowShared<'a, T> {
    queues: &'a [BoundedQueue<T>],
    /// Items rejected by a closed outbound queue
    stranded: &'a AtomicUsize,
    reporter: &'a dyn Reporter,
    init: &'a OnceInit,
    failures: &'a FailureSlot,
    started: Instant,
}

impl<T> Clone for FlowShared<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FlowShared<'_, T> {}

impl<T> FlowShared<'_, T> {
    fn report(&self, stage_id: usize, stage: &str, sequence: u64, activity: &str) {
        self.reporter.record(&StageEvent {
            stage_id,
            stage,
            sequence,
            activity,
            elapsed: self.started.elapsed(),
        });
    }

    /// Hand `item` to `queue`; false if the queue was closed and the item kept
    fn forward(&self, queue: &BoundedQueue<T>, item: T) -> bool {
        match queue.enqueue_or_return(item) {
            Ok(()) => true,
            Err(_stranded) => {
                self.stranded.fetch_add(1, Ordering::SeqCst);
                false
            }
        }
    }

    /// Record the failure and shut every queue
    fn fail(&self, stage_id: usize, stage: &str, position: u64, error: &PipelineError) {
        self.failures
            .record(StageFailure::new(stage_id, stage, position, error));
        for queue in self.queues {
            queue.close();
        }
    }

    fn finish(&self, id: usize, name: String, kind: StageKind, status: StageStatus, processed: u64) -> StageReport {
        tracing::info!(stage_id = id, stage = %name, processed, ?status, "Queue {} completed", kind);
        StageReport {
            id,
            name,
            kind,
            status,
            processed,
        }
    }
}

fn run_source<T>(id: usize, mut source: Box<dyn Source<T>>, shared: FlowShared<'_, T>) -> Result<StageReport> {
    let name = source.name().to_string();
    let kind = source.kind();
    shared.init.call_once(|| shared.reporter.on_start())?;

    let output = &shared.queues[0];
    let mut produced = 0;
    let mut status = StageStatus::Completed;

    loop {
        match guarded(|| source.next_item()) {
            Ok(Some(item)) => {
                let position = produced;
                produced += 1;
                if !shared.forward(output, item) {
                    status = StageStatus::Stopped { position };
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                shared.fail(id, &name, produced, &e);
                status = StageStatus::Failed { position: produced };
                break;
            }
        }
    }

    output.close();
    shared.report(id, &name, produced, &format!("Produced {produced} items"));
    Ok(shared.finish(id, name, kind, status, produced))
}

fn run_transform<T>(
    id: usize,
    index: usize,
    mut transform: Box<dyn Transform<T>>,
    shared: FlowShared<'_, T>,
) -> Result<StageReport> {
    let name = transform.name().to_string();
    let kind = transform.kind();
    shared.init.call_once(|| shared.reporter.on_start())?;

    let input = &shared.queues[index];
    let output = &shared.queues[index + 1];
    let mut seen = 0;
    let mut passed = 0;
    let mut status = StageStatus::Completed;

    while let Some(item) = input.dequeue() {
        let position = seen;
        seen += 1;
        match guarded(|| transform.apply(item)) {
            Ok(Some(out)) => {
                if !shared.forward(output, out) {
                    status = StageStatus::Stopped { position };
                    break;
                }
                passed += 1;
            }
            Ok(None) => {}
            Err(e) => {
                shared.fail(id, &name, position, &e);
                status = StageStatus::Failed { position };
                break;
            }
        }
    }

    output.close();
    shared.report(id, &name, seen, &format!("Passed {passed} of {seen} items"));
    Ok(shared.finish(id, name, kind, status, seen))
}

fn run_sink<T, A>(id: usize, mut sink: Box<dyn Sink<T, A>>, shared: FlowShared<'_, T>) -> Result<(StageReport, A)> {
    let name = sink.name().to_string();
    let kind = sink.kind();
    shared.init.call_once(|| shared.reporter.on_start())?;

    let input = shared
        .queues
        .last()
        .ok_or_else(|| PipelineError::invalid("dataflow chain has no queues"))?;
    let mut consumed = 0;
    let mut status = StageStatus::Completed;

    while let Some(item) = input.dequeue() {
        match guarded(|| sink.consume(item)) {
            Ok(()) => consumed += 1,
            Err(e) => {
                shared.fail(id, &name, consumed, &e);
                status = StageStatus::Failed { position: consumed };
                break;
            }
        }
    }

    shared.report(id, &name, consumed, &format!("Consumed {consumed} items"));
    let value = sink.value();
    Ok((shared.finish(id, name, kind, status, consumed), value))
}
