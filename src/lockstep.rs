//! Lock-step stage scheduler.
//!
//! Every stage runs on its own thread and meets the others at a shared
//! [`Barrier`] once per tick, so tick `t` writes are visible to every tick
//! `t + 1` read. The barrier leader decides once per round whether the run
//! must halt (a stage failed or a stop was requested); all stages see the
//! same verdict and leave at the same round, so nobody is left waiting on a
//! barrier that can no longer fill.

use crate::barrier::Barrier;
use crate::buffer::Accumulator;
use crate::error::{PipelineError, Result};
use crate::once::OnceInit;
use crate::pipeline::{guarded, FailureSlot, PipelineResult, StageFailure, StageReport, StageStatus, StopFlag};
use crate::report::{Reporter, StageEvent, TracingReporter};
use crate::stage::TickStage;
use std::sync::Arc;
use std::time::Instant;

/// Builder for lock-step pipelines
pub struct LockstepBuilder {
    ticks: u64,
    stages: Vec<Box<dyn TickStage>>,
    reporter: Arc<dyn Reporter>,
    stop: StopFlag,
    drain: bool,
}

impl LockstepBuilder {
    /// Create a builder for a run of `ticks` rounds
    pub fn new(ticks: u64) -> Self {
        Self {
            ticks,
            stages: Vec::new(),
            reporter: Arc::new(TracingReporter),
            stop: StopFlag::new(),
            drain: false,
        }
    }

    /// Add a stage; stages run in the order they are added
    pub fn add_stage(self, stage: impl TickStage + 'static) -> Self {
        self.add_boxed_stage(Box::new(stage))
    }

    pub fn add_boxed_stage(mut self, stage: Box<dyn TickStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Share a stop flag the caller can raise while the run is in flight
    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    /// Run one extra round per stage after the last tick, in pipeline order,
    /// letting each stage flush what it still holds
    pub fn drain_on_completion(mut self, enable: bool) -> Self {
        self.drain = enable;
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Result<LockstepPipeline> {
        if self.ticks == 0 {
            return Err(PipelineError::invalid("tick count must be positive"));
        }
        if self.stages.is_empty() {
            return Err(PipelineError::invalid("cannot run a pipeline with no stages"));
        }

        let barrier = Barrier::new(self.stages.len())?;
        Ok(LockstepPipeline {
            ticks: self.ticks,
            stages: self.stages,
            barrier,
            reporter: self.reporter,
            stop: self.stop,
            drain: self.drain,
        })
    }
}

/// A validated lock-step pipeline, ready to run once
pub struct LockstepPipeline {
    ticks: u64,
    stages: Vec<Box<dyn TickStage>>,
    barrier: Barrier,
    reporter: Arc<dyn Reporter>,
    stop: StopFlag,
    drain: bool,
}

impl LockstepPipeline {
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Handle for requesting an early stop
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Run every stage to completion and read the final accumulator value
    ///
    /// Returns `Err` only for initialization and thread failures. A stage
    /// failure yields a partial [`PipelineResult`] naming the stage and tick.
    pub fn run<A: Clone>(self, accumulator: &Accumulator<A>) -> Result<PipelineResult<A>> {
        let LockstepPipeline {
            ticks,
            stages,
            barrier,
            reporter,
            stop,
            drain,
        } = self;

        let stage_count = stages.len();
        tracing::info!(stages = stage_count, ticks, "Starting {}-stage pipeline", stage_count);

        let init = OnceInit::new();
        let failures = FailureSlot::new();
        let shared = TickShared {
            ticks,
            stage_count,
            drain,
            barrier: &barrier,
            reporter: reporter.as_ref(),
            init: &init,
            failures: &failures,
            stop: &stop,
            started: Instant::now(),
        };

        let outcomes = crossbeam::scope(|scope| {
            let handles: Vec<_> = stages
                .into_iter()
                .enumerate()
                .map(|(idx, stage)| scope.spawn(move |_| run_tick_stage(idx + 1, stage, shared)))
                .collect();
            handles.into_iter().map(|h| h.join()).collect::<Vec<_>>()
        })
        .map_err(|_| PipelineError::ThreadError("lock-step scope panicked".into()))?;

        let mut reports = Vec::with_capacity(stage_count);
        for outcome in outcomes {
            let report = outcome.map_err(|_| PipelineError::ThreadError("Join failed".into()))??;
            reports.push(report);
        }

        let result = PipelineResult::new(
            accumulator.get(),
            reports,
            failures.take(),
            0,
            shared.started.elapsed(),
        );
        reporter.on_finish(&result.summary());
        Ok(result)
    }
}

/// Run `stages` for `ticks` rounds with default reporting
///
/// There is no drain phase: items a stage has not consumed by the last tick
/// stay in their shared buffers. Use [`LockstepBuilder::drain_on_completion`]
/// to have every stage flush them before the run ends.
pub fn run_lockstep<A: Clone>(
    stages: Vec<Box<dyn TickStage>>,
    ticks: u64,
    accumulator: &Accumulator<A>,
) -> Result<PipelineResult<A>> {
    stages
        .into_iter()
        .fold(LockstepBuilder::new(ticks), LockstepBuilder::add_boxed_stage)
        .build()?
        .run(accumulator)
}

/// Run-wide resources every stage thread borrows
#[derive(Clone, Copy)]
struct TickShared<'a> {
    ticks: u64,
    stage_count: usize,
    drain: bool,
    barrier: &'a Barrier,
    reporter: &'a dyn Reporter,
    init: &'a OnceInit,
    failures: &'a FailureSlot,
    stop: &'a StopFlag,
    started: Instant,
}

impl TickShared<'_> {
    fn should_halt(&self) -> bool {
        self.failures.is_tripped() || self.stop.is_stop_requested()
    }

    /// Rendezvous with every other stage; true when the run must halt
    fn synchronize(&self) -> bool {
        self.barrier.wait_deciding(|| self.should_halt()).verdict()
    }

    fn report(&self, stage_id: usize, stage: &str, sequence: u64, activity: &str) {
        self.reporter.record(&StageEvent {
            stage_id,
            stage,
            sequence,
            activity,
            elapsed: self.started.elapsed(),
        });
    }

    fn fail(&self, stage_id: usize, stage: &str, position: u64, error: &PipelineError) {
        self.failures
            .record(StageFailure::new(stage_id, stage, position, error));
    }
}

fn run_tick_stage(id: usize, mut stage: Box<dyn TickStage>, shared: TickShared<'_>) -> Result<StageReport> {
    let name = stage.name().to_string();
    let kind = stage.kind();

    shared.init.call_once(|| shared.reporter.on_start())?;
    tracing::info!(stage_id = id, stage = %name, "Stage {} ({}) starting", id, kind);

    let mut failed = None;
    if let Err(e) = guarded(|| stage.on_start()) {
        shared.fail(id, &name, 0, &e);
        failed = Some(0);
    }

    let mut processed = 0;
    let mut halted_at = None;
    for tick in 0..shared.ticks {
        if failed.is_none() {
            match guarded(|| stage.process(tick)) {
                Ok(activity) => {
                    processed += 1;
                    shared.report(id, &name, tick, &activity);
                }
                Err(e) => {
                    shared.fail(id, &name, tick, &e);
                    failed = Some(tick);
                }
            }
        }

        if shared.synchronize() {
            halted_at = Some(tick);
            break;
        }
    }

    let mut drain_halted = false;
    if shared.drain && halted_at.is_none() {
        for turn in 0..shared.stage_count {
            if turn + 1 == id && failed.is_none() {
                match guarded(|| stage.on_drain()) {
                    Ok(Some(activity)) => shared.report(id, &name, shared.ticks, &activity),
                    Ok(None) => {}
                    Err(e) => {
                        shared.fail(id, &name, shared.ticks, &e);
                        failed = Some(shared.ticks);
                    }
                }
            }

            if shared.synchronize() {
                drain_halted = turn + 1 < shared.stage_count;
                break;
            }
        }
    }

    if let Err(e) = guarded(|| stage.on_shutdown()) {
        tracing::warn!(stage_id = id, stage = %name, "Shutdown hook failed: {}", e);
    }

    let status = match (failed, halted_at) {
        (Some(position), _) => StageStatus::Failed { position },
        (None, Some(tick)) if tick + 1 < shared.ticks => StageStatus::Stopped { position: tick },
        (None, _) if drain_halted => StageStatus::Stopped {
            position: shared.ticks,
        },
        _ => StageStatus::Completed,
    };
    tracing::info!(stage_id = id, stage = %name, ?status, "Stage {} ({}) finished", id, kind);

    Ok(StageReport {
        id,
        name,
        kind,
        status,
        processed,
    })
}
