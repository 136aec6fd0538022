//! Reusable rendezvous barrier.
//!
//! A [`Barrier`] blocks each caller of [`Barrier::wait`] until `parties`
//! callers have arrived in the current generation, then releases all of them
//! together and opens the next generation. Waiters sleep until the generation
//! they entered with has moved on, so a participant that re-enters `wait`
//! quickly can never slip through the round it just left.

use crate::error::{PipelineError, Result};
use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    verdict: bool,
}

/// N-party reusable barrier built on a mutex/condvar pair
#[derive(Debug)]
pub struct Barrier {
    parties: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

/// Outcome of one [`Barrier::wait`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    leader: bool,
    generation: u64,
    verdict: bool,
}

impl BarrierWaitResult {
    /// True for the participant whose arrival completed the round
    pub fn is_leader(&self) -> bool {
        self.leader
    }

    /// Generation of the round this call took part in
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Value decided by the leader for this round (false for plain `wait`)
    pub fn verdict(&self) -> bool {
        self.verdict
    }
}

impl Barrier {
    /// Create a barrier for `parties` participants
    pub fn new(parties: usize) -> Result<Self> {
        if parties == 0 {
            return Err(PipelineError::invalid("barrier needs at least one party"));
        }

        Ok(Self {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                verdict: false,
            }),
            cvar: Condvar::new(),
        })
    }

    /// Number of participants per round
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Number of completed rounds
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Block until every participant has arrived in this round
    pub fn wait(&self) -> BarrierWaitResult {
        self.wait_deciding(|| false)
    }

    /// Like [`wait`](Self::wait), but the last arriver evaluates `decide`
    /// while still holding the barrier lock. Every participant of the round
    /// receives the same verdict.
    ///
    /// The verdict stays readable until the next round completes, and that
    /// cannot happen before every released waiter has re-arrived.
    pub fn wait_deciding<F>(&self, decide: F) -> BarrierWaitResult
    where
        F: FnOnce() -> bool,
    {
        let mut state = self.state.lock();
        let generation = state.generation;
        state.arrived += 1;

        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            state.verdict = decide();
            self.cvar.notify_all();
            return BarrierWaitResult {
                leader: true,
                generation,
                verdict: state.verdict,
            };
        }

        while state.generation == generation {
            self.cvar.wait(&mut state);
        }

        BarrierWaitResult {
            leader: false,
            generation,
            verdict: state.verdict,
        }
    }
}
