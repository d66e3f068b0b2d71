//! The focus session: timers, the attentiveness state machine and the
//! end-of-session report.

pub mod aggregator;
pub mod controller;
pub mod events;
pub mod state;
pub mod tracker;

pub use aggregator::{Aggregation, Aggregator, SessionInsights};
pub use controller::{Collaborators, PassOutcome, SessionController};
pub use events::SessionEvent;
pub use state::{SessionPhase, SessionSnapshot};
pub use tracker::{StateTracker, Transition};
