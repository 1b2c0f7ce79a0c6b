//! ==============================================================================
//! jobs.rs - single-flight job slots
//! ==============================================================================
//!
//! purpose:
//!     process-wide state for report and export jobs, one slot per kind.
//!
//! state machine (per kind):
//!
//! ```text
//!     Idle ──try_begin──> Running ──complete──> Ready ──take──> Idle
//!                            │                    │
//!                            └──fail / drop──> Idle   └──try_begin──> Running
//!
//!     `try_begin` checks and flips the state under one lock, so two
//!     near-simultaneous starts can never both win. the returned `RunGuard`
//!     puts the slot back to Idle when dropped without `complete`/`fail`,
//!     which covers early returns and panics inside the job task.
//! ```
//!
//! relationships:
//!     - used by: report/mod.rs (ReportAggregator), export.rs (ExportOrchestrator)
//!
//! ==============================================================================

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Idle,
    Running,
    Ready,
}

struct Slot<T> {
    state: JobState,
    output: Option<T>,
    last_error: Option<String>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            state: JobState::Idle,
            output: None,
            last_error: None,
        }
    }
}

pub struct JobBoard<K, T> {
    slots: Arc<Mutex<HashMap<K, Slot<T>>>>,
}

impl<K, T> Clone for JobBoard<K, T> {
    fn clone(&self) -> Self {
        Self { slots: self.slots.clone() }
    }
}

impl<K, T> Default for JobBoard<K, T> {
    fn default() -> Self {
        Self { slots: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl<K, T> JobBoard<K, T>
where
    K: Copy + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    // a panic while holding the lock leaves the map itself consistent
    fn lock(&self) -> MutexGuard<'_, HashMap<K, Slot<T>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// claim the slot for `kind`; None when a run is already in flight
    pub fn try_begin(&self, kind: K) -> Option<RunGuard<K, T>> {
        let mut slots = self.lock();
        let slot = slots.entry(kind).or_default();
        if slot.state == JobState::Running {
            return None;
        }
        slot.state = JobState::Running;
        slot.last_error = None;
        Some(RunGuard {
            board: self.clone(),
            kind,
            finished: false,
        })
    }

    pub fn state(&self, kind: K) -> JobState {
        self.lock().get(&kind).map_or(JobState::Idle, |slot| slot.state)
    }

    /// hand the finished output to the caller and return the slot to Idle
    pub fn take(&self, kind: K) -> Option<T> {
        let mut slots = self.lock();
        let slot = slots.get_mut(&kind)?;
        if slot.state != JobState::Ready {
            return None;
        }
        slot.state = JobState::Idle;
        slot.output.take()
    }

    pub fn last_error(&self, kind: K) -> Option<String> {
        self.lock().get(&kind).and_then(|slot| slot.last_error.clone())
    }

    /// kinds currently running
    pub fn running(&self) -> Vec<K> {
        self.lock()
            .iter()
            .filter(|(_, slot)| slot.state == JobState::Running)
            .map(|(kind, _)| *kind)
            .collect()
    }

    fn finish(&self, kind: K, outcome: std::result::Result<T, String>) {
        let mut slots = self.lock();
        let slot = slots.entry(kind).or_default();
        match outcome {
            Ok(output) => {
                slot.state = JobState::Ready;
                slot.output = Some(output);
            }
            Err(error) => {
                slot.state = JobState::Idle;
                slot.last_error = Some(error);
            }
        }
    }
}

impl<K, T> JobBoard<K, T>
where
    K: Copy + Eq + Hash,
    T: Clone,
{
    /// a copy of the output while the slot is Ready
    pub fn peek(&self, kind: K) -> Option<T> {
        let slots = self.lock();
        let slot = slots.get(&kind)?;
        match slot.state {
            JobState::Ready => slot.output.clone(),
            _ => None,
        }
    }
}

/// exclusive right to finish one run of one job kind
pub struct RunGuard<K, T>
where
    K: Copy + Eq + Hash,
{
    board: JobBoard<K, T>,
    kind: K,
    finished: bool,
}

impl<K, T> RunGuard<K, T>
where
    K: Copy + Eq + Hash,
{
    pub fn kind(&self) -> K {
        self.kind
    }

    pub fn complete(mut self, output: T) {
        self.finished = true;
        self.board.finish(self.kind, Ok(output));
    }

    pub fn fail(mut self, error: impl ToString) {
        self.finished = true;
        self.board.finish(self.kind, Err(error.to_string()));
    }
}

impl<K, T> Drop for RunGuard<K, T>
where
    K: Copy + Eq + Hash,
{
    fn drop(&mut self) {
        if !self.finished {
            self.board
                .finish(self.kind, Err("job ended without producing a result".to_string()));
        }
    }
}
