mod playback;

pub use playback::{AudioPlayer, RodioPlayer};

use std::sync::{Arc, Mutex};

use anyhow::Result;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::task::JoinHandle;

use crate::inference::SpeechSynthesizer;

// Set to false to silence feedback logging
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub const ENCOURAGEMENTS: [&str; 4] = [
    "Let's step back into focus. You've got this.",
    "Deep breath. Bring your attention back to the task.",
    "Your goals are waiting - let's lean back in.",
    "Friendly reminder: refocus and keep your momentum.",
];

/// Uniform choice over the message catalog. Seed it for reproducible picks.
pub struct MessagePicker {
    rng: Mutex<StdRng>,
}

impl MessagePicker {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn pick<'a>(&self, catalog: &'a [String]) -> Option<&'a str> {
        if catalog.is_empty() {
            return None;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let index = rng.gen_range(0..catalog.len());
        Some(catalog[index].as_str())
    }
}

/// Speaks an encouragement when the user drifts off.
///
/// Delivery is best-effort: synthesis and playback errors are logged here and
/// never reach the session.
#[derive(Clone)]
pub struct FeedbackDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    speech: Arc<dyn SpeechSynthesizer>,
    player: Arc<dyn AudioPlayer>,
    picker: MessagePicker,
    catalog: Vec<String>,
}

impl FeedbackDispatcher {
    pub fn new(
        speech: Arc<dyn SpeechSynthesizer>,
        player: Arc<dyn AudioPlayer>,
        picker: MessagePicker,
    ) -> Self {
        Self::with_catalog(
            speech,
            player,
            picker,
            ENCOURAGEMENTS.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// An empty catalog falls back to the built-in encouragements.
    pub fn with_catalog(
        speech: Arc<dyn SpeechSynthesizer>,
        player: Arc<dyn AudioPlayer>,
        picker: MessagePicker,
        catalog: Vec<String>,
    ) -> Self {
        let catalog = if catalog.is_empty() {
            ENCOURAGEMENTS.iter().map(|s| s.to_string()).collect()
        } else {
            catalog
        };

        Self {
            inner: Arc::new(DispatcherInner {
                speech,
                player,
                picker,
                catalog,
            }),
        }
    }

    pub fn choose_message(&self) -> String {
        self.inner
            .picker
            .pick(&self.inner.catalog)
            .unwrap_or(ENCOURAGEMENTS[0])
            .to_string()
    }

    /// Spawns delivery of one randomly chosen message and returns at once.
    /// Callers drop the handle; tests may await it.
    pub fn dispatch(&self) -> JoinHandle<()> {
        let message = self.choose_message();
        let this = self.clone();
        tokio::spawn(async move { this.deliver(&message).await })
    }

    pub async fn deliver(&self, message: &str) {
        match self.speak(message).await {
            Ok(()) => log_info!("Delivered feedback: {message:?}"),
            Err(err) => log_warn!("Voice feedback failed: {err:#}"),
        }
    }

    async fn speak(&self, message: &str) -> Result<()> {
        let clip = self.inner.speech.synthesize(message).await?;
        self.inner.player.play(clip).await?;
        Ok(())
    }
}
