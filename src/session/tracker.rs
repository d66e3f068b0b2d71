use chrono::{DateTime, Utc};

use crate::models::{AttentivenessState, Frame, LogEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: AttentivenessState,
    pub next: AttentivenessState,
    /// Crossed into Distracted or Away from any other state.
    pub negative_edge: bool,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.previous != self.next
    }
}

/// Next state for a new classification. Re-entering the same negative state
/// is not an edge; moving between the two negative states is.
pub fn transition(previous: AttentivenessState, classification: AttentivenessState) -> Transition {
    Transition {
        previous,
        next: classification,
        negative_edge: classification.is_negative() && classification != previous,
    }
}

/// Current attentiveness plus the append-only log of one session.
#[derive(Debug, Default)]
pub struct StateTracker {
    current: AttentivenessState,
    log: Vec<LogEntry>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> AttentivenessState {
        self.current
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    /// Clears the log and enters `Analyzing` for a fresh session.
    pub fn begin(&mut self) {
        self.log.clear();
        self.current = AttentivenessState::Analyzing;
    }

    /// Applies a classification and appends it to the log.
    pub fn record(
        &mut self,
        timestamp: DateTime<Utc>,
        classification: AttentivenessState,
        frame: Frame,
    ) -> Transition {
        let step = transition(self.current, classification);
        self.current = step.next;

        // Keep the log ordered even if the wall clock steps backwards.
        let timestamp = match self.log.last() {
            Some(last) if last.timestamp > timestamp => last.timestamp,
            _ => timestamp,
        };
        self.log.push(LogEntry::new(timestamp, classification, frame));
        step
    }

    /// Hands the log over and returns to `Idle`.
    pub fn take_log(&mut self) -> Vec<LogEntry> {
        self.current = AttentivenessState::Idle;
        std::mem::take(&mut self.log)
    }

    /// Drops the log without handing it anywhere and returns to `Idle`.
    pub fn discard(&mut self) {
        self.current = AttentivenessState::Idle;
        self.log.clear();
    }
}
