//! One-time initialization guard.
//!
//! [`OnceInit::call_once`] runs a fallible setup action for the first caller
//! only. Every caller, the first included, returns only after the action has
//! finished. A failed (or panicking) action leaves the guard poisoned for
//! good; there is no retry.

use crate::error::{PipelineError, Result};
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
enum InitState {
    Pending,
    Running,
    Completed,
    Poisoned(String),
}

/// Runs a shared setup action exactly once across racing callers
#[derive(Debug)]
pub struct OnceInit {
    state: Mutex<InitState>,
    cvar: Condvar,
}

/// Poisons the guard if the action unwinds before finishing
struct PanicGuard<'a> {
    init: &'a OnceInit,
    finished: bool,
}

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.init
                .settle(InitState::Poisoned("setup action panicked".to_string()));
        }
    }
}

impl OnceInit {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InitState::Pending),
            cvar: Condvar::new(),
        }
    }

    /// Run `action` if no caller has run it yet, then wait for its completion
    ///
    /// The caller that ran a failing action receives
    /// [`PipelineError::InitializationFailed`] with the action's error as the
    /// source. Every other caller receives the same variant without a source.
    pub fn call_once<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut state = self.state.lock();
        loop {
            match &*state {
                InitState::Completed => return Ok(()),
                InitState::Poisoned(reason) => {
                    return Err(PipelineError::InitializationFailed {
                        reason: reason.clone(),
                        source: None,
                    })
                }
                InitState::Pending => break,
                InitState::Running => {}
            }
            self.cvar.wait(&mut state);
        }
        *state = InitState::Running;
        drop(state);

        let mut guard = PanicGuard {
            init: self,
            finished: false,
        };
        let outcome = action();
        guard.finished = true;

        match outcome {
            Ok(()) => {
                self.settle(InitState::Completed);
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                self.settle(InitState::Poisoned(reason.clone()));
                Err(PipelineError::InitializationFailed {
                    reason,
                    source: Some(Box::new(err)),
                })
            }
        }
    }

    /// Whether the action has run to success
    pub fn is_completed(&self) -> bool {
        *self.state.lock() == InitState::Completed
    }

    /// Whether the action failed or panicked
    pub fn is_poisoned(&self) -> bool {
        matches!(*self.state.lock(), InitState::Poisoned(_))
    }

    fn settle(&self, outcome: InitState) {
        *self.state.lock() = outcome;
        self.cvar.notify_all();
    }
}

impl Default for OnceInit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_action_runs_once() {
        let init = OnceInit::new();
        let runs = AtomicUsize::new(0);
        for _ in 0..3 {
            init.call_once(|| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(init.is_completed());
    }

    #[test]
    fn test_racing_callers_wait_for_completion() {
        let init = Arc::new(OnceInit::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let init = Arc::clone(&init);
                let runs = Arc::clone(&runs);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    init.call_once(|| {
                        runs.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(30));
                        done.store(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .unwrap();
                    // completion must be visible to every caller on return
                    done.load(Ordering::SeqCst)
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_poisons() {
        let init = OnceInit::new();
        let first = init.call_once(|| Err(PipelineError::stage("no log file")));
        match first {
            Err(PipelineError::InitializationFailed { reason, source }) => {
                assert!(reason.contains("no log file"));
                assert!(source.is_some());
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let second = init.call_once(|| Ok(()));
        match second {
            Err(PipelineError::InitializationFailed { source, .. }) => assert!(source.is_none()),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(init.is_poisoned());
    }

    #[test]
    fn test_panicking_action_poisons() {
        let init = Arc::new(OnceInit::new());
        let panicking = {
            let init = Arc::clone(&init);
            thread::spawn(move || init.call_once(|| panic!("boom")))
        };
        assert!(panicking.join().is_err());

        let result = init.call_once(|| Ok(()));
        assert!(matches!(
            result,
            Err(PipelineError::InitializationFailed { .. })
        ));
    }
}
