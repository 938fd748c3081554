//! Run lifecycle state machine.
//!
//! A `Run` is one complete execution of the monitored target. Its state moves
//! strictly forward: NotStarted → Running → Ending → Terminated. The
//! Running→Ending edge is the single-entry guard for the whole harness — two
//! independent termination sources (natural target teardown and the external
//! end signal) can both fire, possibly on different threads, and only the
//! first may proceed to the coverage dump.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::SystemTime;

use uuid::Uuid;

/// Callback fired by a termination source when the run should end.
///
/// Both the monitored target proxy and the end-signal receiver hold a weak
/// back-reference to a listener; the controller implements it. Implementations
/// must tolerate being invoked more than once — deduplication lives behind
/// the run's state guard, not in the sources.
pub trait TerminationListener: Send + Sync {
    fn on_run_end(&self);
}

/// Lifecycle states of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    NotStarted = 0,
    Running = 1,
    Ending = 2,
    Terminated = 3,
}

impl RunState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => RunState::NotStarted,
            1 => RunState::Running,
            2 => RunState::Ending,
            _ => RunState::Terminated,
        }
    }
}

/// One logical test execution, owned exclusively by the controller.
#[derive(Debug)]
pub struct Run {
    id: Uuid,
    started_at: SystemTime,
    state: AtomicU8,
}

impl Run {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: SystemTime::now(),
            state: AtomicU8::new(RunState::NotStarted as u8),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// NotStarted → Running. Returns false if the run was already started.
    pub fn begin(&self) -> bool {
        self.state
            .compare_exchange(
                RunState::NotStarted as u8,
                RunState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Running → Ending. The compare-and-set that arbitrates the race between
    /// termination sources: exactly one caller wins.
    pub fn try_begin_end(&self) -> bool {
        self.state
            .compare_exchange(
                RunState::Running as u8,
                RunState::Ending as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Ending → Terminated. Called by the winner after the coverage dump
    /// completed (successfully or not).
    pub fn mark_terminated(&self) {
        let _ = self.state.compare_exchange(
            RunState::Ending as u8,
            RunState::Terminated as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

impl Default for Run {
    fn default() -> Self {
        Self::new()
    }
}
