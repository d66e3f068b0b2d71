use std::{sync::Arc, time::Duration};

use tokio::time::{timeout, Instant};

use crate::models::Frame;

use super::FrameSource;

// Set to false to silence per-tick capture logging
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Requests one still per analysis tick. Every failure mode collapses to a
/// miss: the caller skips the tick and the session carries on.
#[derive(Clone)]
pub struct Sampler {
    source: Arc<dyn FrameSource>,
    capture_timeout: Duration,
}

impl Sampler {
    pub fn new(source: Arc<dyn FrameSource>, capture_timeout: Duration) -> Self {
        Self {
            source,
            capture_timeout,
        }
    }

    pub async fn sample(&self) -> Option<Frame> {
        let started = Instant::now();
        match timeout(self.capture_timeout, self.source.capture()).await {
            Ok(Ok(Some(frame))) => {
                log_debug!(
                    "Captured frame: {} bytes in {}ms",
                    frame.len(),
                    started.elapsed().as_millis()
                );
                Some(frame)
            }
            Ok(Ok(None)) => {
                log_debug!("Capture produced no frame; skipping tick");
                None
            }
            Ok(Err(err)) => {
                log_warn!("Capture failed; skipping tick: {err:#}");
                None
            }
            Err(_) => {
                log_warn!(
                    "Capture timed out (> {}s); skipping tick",
                    self.capture_timeout.as_secs()
                );
                None
            }
        }
    }
}
