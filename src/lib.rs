//! Coordination primitives and a staged-pipeline runtime.
//!
//! This crate moves opaque items through a sequence of stages under one of
//! two synchronization disciplines:
//!
//! - **Lock-step**: every stage runs on its own thread, exchanges data through
//!   lock-guarded [`SharedBuffer`]s and meets the others at a [`Barrier`] once
//!   per tick.
//! - **Dataflow**: stages are decoupled and connected by [`BoundedQueue`]s;
//!   each runs at its own pace and stops once its input is closed and empty.
//!
//! # Features
//!
//! - Generation-guarded reusable barrier
//! - Bounded MPMC blocking queue with cooperative close and drain
//! - One-time initializer that poisons on failure
//! - Cooperative stop and first-failure reporting with partial results
//! - Pluggable reporters (`tracing` events or an append-only log file)
//!
//! # Example
//!
//! ```ignore
//! use stage_sync::{Accumulator, Filter, Generator, LockstepBuilder, Reducer, SharedBuffer};
//!
//! let raw = SharedBuffer::new();
//! let kept = SharedBuffer::new();
//! let sum = Accumulator::new(0i64);
//!
//! let result = LockstepBuilder::new(100)
//!     .add_stage(Generator::new(raw.clone(), 50, || 42i32))
//!     .add_stage(Filter::new(raw.clone(), kept.clone(), 50, |v: i32| (v > 20).then_some(v)))
//!     .add_stage(Reducer::new(kept.clone(), sum.clone(), |s: &mut i64, v: i32| *s += i64::from(v)))
//!     .build()?
//!     .run(&sum)?;
//!
//! println!("{}", result.summary());
//! ```

pub mod barrier;
pub mod buffer;
pub mod config;
pub mod dataflow;
pub mod error;
pub mod lockstep;
pub mod once;
pub mod pipeline;
pub mod queue;
pub mod report;
pub mod stage;
pub mod workload;

// Re-exports for convenience
pub use barrier::{Barrier, BarrierWaitResult};
pub use buffer::{Accumulator, SharedBuffer};
pub use config::PipelineConfig;
pub use dataflow::{run_dataflow, DataflowBuilder, DataflowChain, ShutdownHandle};
pub use error::{PipelineError, Result};
pub use lockstep::{run_lockstep, LockstepBuilder, LockstepPipeline};
pub use once::OnceInit;
pub use pipeline::{PipelineResult, StageFailure, StageReport, StageStatus, StopFlag};
pub use queue::BoundedQueue;
pub use report::{FileReporter, Reporter, StageEvent, TracingReporter};
pub use stage::{
    DataflowConsumer, DataflowFilter, DataflowProducer, Filter, Generator, Monitor, MonitorSample, Reducer,
    SampleLog, Sink, Source, StageKind, TickStage, Transform,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
