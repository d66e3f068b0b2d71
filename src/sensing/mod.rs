mod frame_source;
mod sampler;

pub use frame_source::{normalize_frame, FileFrameSource, FrameSource};
pub use sampler::Sampler;
