use crate::error::{PipelineError, Result};
use crate::stage::StageKind;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How a stage left the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// Ran to the natural end of its input or tick count
    Completed,
    /// Left early on a stop request or because a neighbour shut down
    Stopped { position: u64 },
    /// Its own work failed at `position` (tick or item sequence number)
    Failed { position: u64 },
}

/// Per-stage summary of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    /// 1-based position in the pipeline
    pub id: usize,
    pub name: String,
    pub kind: StageKind,
    pub status: StageStatus,
    /// Ticks processed (lock-step) or items handled (dataflow)
    pub processed: u64,
}

impl StageReport {
    pub fn is_completed(&self) -> bool {
        self.status == StageStatus::Completed
    }
}

/// The first stage failure observed during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage_id: usize,
    pub stage: String,
    pub position: u64,
    pub message: String,
}

impl StageFailure {
    pub(crate) fn new(stage_id: usize, stage: &str, position: u64, error: &PipelineError) -> Self {
        Self {
            stage_id,
            stage: stage.to_string(),
            position,
            message: error.to_string(),
        }
    }

    pub fn to_error(&self) -> PipelineError {
        PipelineError::StageFailed {
            stage: self.stage.clone(),
            position: self.position,
            message: self.message.clone(),
        }
    }
}

/// Outcome of a lock-step or dataflow run
#[derive(Debug, Clone)]
pub struct PipelineResult<A> {
    value: A,
    stages: Vec<StageReport>,
    failure: Option<StageFailure>,
    undelivered: usize,
    elapsed: Duration,
}

impl<A> PipelineResult<A> {
    pub(crate) fn new(
        value: A,
        stages: Vec<StageReport>,
        failure: Option<StageFailure>,
        undelivered: usize,
        elapsed: Duration,
    ) -> Self {
        Self {
            value,
            stages,
            failure,
            undelivered,
            elapsed,
        }
    }

    /// Final value, or the partial value at the time the run ended early
    pub fn value(&self) -> &A {
        &self.value
    }

    /// True when any stage failed or stopped before its natural end
    pub fn is_partial(&self) -> bool {
        self.failure.is_some() || self.stages.iter().any(|s| !s.is_completed())
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        self.failure.as_ref()
    }

    /// Reports in pipeline order
    pub fn stages(&self) -> &[StageReport] {
        &self.stages
    }

    /// Look up a stage report by name
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Items left in dataflow queues, or held by a stage whose outbound queue
    /// closed, when the run ended
    pub fn undelivered(&self) -> usize {
        self.undelivered
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// The final value, or an error if the run did not complete
    pub fn into_value(self) -> Result<A> {
        if let Some(failure) = &self.failure {
            return Err(failure.to_error());
        }
        if self.is_partial() {
            return Err(PipelineError::Stopped);
        }
        Ok(self.value)
    }

    /// One-line human-readable outcome
    pub fn summary(&self) -> String {
        let completed = self.stages.iter().filter(|s| s.is_completed()).count();
        match &self.failure {
            Some(failure) => format!(
                "Stage {} ({}) failed at position {}: {}. Partial result after {:.3}s",
                failure.stage_id,
                failure.stage,
                failure.position,
                failure.message,
                self.elapsed.as_secs_f64()
            ),
            None => format!(
                "{}/{} stages completed in {:.3}s",
                completed,
                self.stages.len(),
                self.elapsed.as_secs_f64()
            ),
        }
    }
}

/// Cooperative stop request shared with a running pipeline
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    requested: Arc<AtomicBool>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the pipeline to stop at the end of the current tick
    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Keeps the first failure reported by any stage of a run
#[derive(Debug, Default)]
pub(crate) struct FailureSlot {
    first: Mutex<Option<StageFailure>>,
    tripped: AtomicBool,
}

impl FailureSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Store `failure` unless one is already stored
    pub(crate) fn record(&self, failure: StageFailure) {
        tracing::warn!(
            stage_id = failure.stage_id,
            stage = %failure.stage,
            position = failure.position,
            "Stage failed: {}",
            failure.message
        );
        let mut first = self.first.lock();
        if first.is_none() {
            *first = Some(failure);
            self.tripped.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    pub(crate) fn take(&self) -> Option<StageFailure> {
        self.first.lock().take()
    }
}

/// Run stage code, turning a panic into a stage error
pub(crate) fn guarded<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(PipelineError::stage(format!(
            "panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(name: &str, status: StageStatus) -> StageReport {
        StageReport {
            id: 1,
            name: name.to_string(),
            kind: StageKind::Custom,
            status,
            processed: 0,
        }
    }

    #[test]
    fn test_complete_result_yields_value() {
        let result = PipelineResult::new(
            42,
            vec![report("a", StageStatus::Completed)],
            None,
            0,
            Duration::ZERO,
        );
        assert!(!result.is_partial());
        assert_eq!(result.into_value().unwrap(), 42);
    }

    #[test]
    fn test_failed_result_is_partial() {
        let failure = StageFailure::new(2, "filter", 7, &PipelineError::stage("bad input"));
        let result = PipelineResult::new(
            3,
            vec![
                report("gen", StageStatus::Completed),
                report("filter", StageStatus::Failed { position: 7 }),
            ],
            Some(failure),
            0,
            Duration::ZERO,
        );
        assert!(result.is_partial());
        assert_eq!(*result.value(), 3);
        assert!(result.summary().contains("failed at position 7"));
        match result.into_value() {
            Err(PipelineError::StageFailed { stage, position, .. }) => {
                assert_eq!(stage, "filter");
                assert_eq!(position, 7);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_stopped_result_is_error() {
        let result = PipelineResult::new(
            0,
            vec![report("a", StageStatus::Stopped { position: 1 })],
            None,
            0,
            Duration::ZERO,
        );
        assert!(matches!(result.into_value(), Err(PipelineError::Stopped)));
    }

    #[test]
    fn test_failure_slot_keeps_first() {
        let slot = FailureSlot::new();
        assert!(!slot.is_tripped());
        slot.record(StageFailure::new(1, "a", 0, &PipelineError::stage("first")));
        slot.record(StageFailure::new(2, "b", 5, &PipelineError::stage("second")));
        assert!(slot.is_tripped());
        assert_eq!(slot.take().unwrap().stage, "a");
    }

    #[test]
    fn test_guarded_catches_panic() {
        let result: Result<()> = guarded(|| panic!("stage blew up"));
        match result {
            Err(PipelineError::StageError(message)) => assert!(message.contains("stage blew up")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
