use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{AttentivenessState, SessionRecord};

use super::tracker::StateTracker;

#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    #[default]
    Inactive,
    Starting,
    Active,
    Stopping,
}

/// What the display layer sees of the controller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub status: AttentivenessState,
    pub elapsed_secs: u64,
    pub samples: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub last_record: Option<SessionRecord>,
    pub last_error: Option<String>,
}

/// Mutable state of the controller, guarded by a single mutex.
///
/// `generation` changes whenever a session begins or ends; async work
/// captures it up front and must find it unchanged (with the phase still
/// `Active`) before touching anything.
#[derive(Debug, Default)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub tracker: StateTracker,
    pub elapsed_secs: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub generation: u64,
    pub last_record: Option<SessionRecord>,
    pub last_error: Option<String>,
    pass_gate: Arc<AtomicBool>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_live(&self, generation: u64) -> bool {
        self.phase == SessionPhase::Active && self.generation == generation
    }

    /// Resets everything for a new session and returns its generation.
    /// The phase is left at `Starting`; the caller activates it.
    pub fn begin(&mut self, started_at: DateTime<Utc>) -> u64 {
        self.phase = SessionPhase::Starting;
        self.tracker.begin();
        self.elapsed_secs = 0;
        self.started_at = Some(started_at);
        self.generation = self.generation.wrapping_add(1);
        self.last_record = None;
        self.last_error = None;
        // A fresh gate, so a pass left over from the previous session cannot
        // release this session's gate.
        self.pass_gate = Arc::new(AtomicBool::new(false));
        self.generation
    }

    /// Claims the right to run one analysis pass, if none is in flight.
    pub fn try_begin_pass(&self) -> Option<PassGuard> {
        PassGuard::acquire(&self.pass_gate)
    }

    /// Returns to `Inactive`/`Idle` and invalidates outstanding work.
    pub fn finish(&mut self) {
        self.phase = SessionPhase::Inactive;
        self.tracker.discard();
        self.started_at = None;
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            status: self.tracker.current(),
            elapsed_secs: self.elapsed_secs,
            samples: self.tracker.log().len(),
            started_at: self.started_at,
            last_record: self.last_record.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Held for the duration of one analysis pass; releases the gate on drop,
/// including when the pass future is cancelled.
#[derive(Debug)]
pub struct PassGuard {
    gate: Arc<AtomicBool>,
}

impl PassGuard {
    fn acquire(gate: &Arc<AtomicBool>) -> Option<Self> {
        gate.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                gate: Arc::clone(gate),
            })
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.gate.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_is_inactive_and_idle() {
        let state = SessionState::new();
        assert_eq!(state.phase, SessionPhase::Inactive);
        assert_eq!(state.snapshot().status, AttentivenessState::Idle);
    }

    #[test]
    fn begin_bumps_generation_and_resets() {
        let mut state = SessionState::new();
        state.elapsed_secs = 99;
        state.last_error = Some("old".into());

        let generation = state.begin(Utc::now());
        assert_eq!(state.phase, SessionPhase::Starting);
        assert!(!state.is_live(generation));

        state.phase = SessionPhase::Active;
        assert!(state.is_live(generation));
        assert_eq!(state.elapsed_secs, 0);
        assert_eq!(state.last_error, None);
        assert_eq!(state.tracker.current(), AttentivenessState::Analyzing);

        state.finish();
        assert!(!state.is_live(generation));
        assert_eq!(state.phase, SessionPhase::Inactive);
        assert_eq!(state.tracker.current(), AttentivenessState::Idle);
    }

    #[test]
    fn only_one_pass_at_a_time() {
        let state = SessionState::new();
        let guard = state.try_begin_pass().unwrap();
        assert!(state.try_begin_pass().is_none());
        drop(guard);
        assert!(state.try_begin_pass().is_some());
    }

    #[test]
    fn stale_guard_does_not_release_new_session_gate() {
        let mut state = SessionState::new();
        state.begin(Utc::now());
        let stale = state.try_begin_pass().unwrap();

        state.begin(Utc::now());
        let current = state.try_begin_pass().unwrap();
        drop(stale);

        assert!(state.try_begin_pass().is_none());
        drop(current);
    }
}
