mod attentiveness;
mod audio;
mod frame;
mod session;

pub use attentiveness::AttentivenessState;
pub use audio::AudioClip;
pub use frame::Frame;
pub use session::{LogEntry, SessionRecord};
