use std::io::Cursor;

use async_trait::async_trait;
use rodio::{buffer::SamplesBuffer, Decoder, OutputStream, Sink, Source};

use crate::error::PlaybackError;
use crate::models::AudioClip;

/// Raw TTS output is 24 kHz mono signed 16-bit little-endian PCM.
const DEFAULT_PCM_RATE: u32 = 24_000;

type BoxedSource = Box<dyn Source<Item = i16> + Send>;

#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Plays the clip to completion.
    async fn play(&self, clip: AudioClip) -> Result<(), PlaybackError>;
}

/// Opens the default output device for the duration of one clip.
///
/// `OutputStream` is not `Send`, so each clip is played on a blocking worker
/// that owns the stream and sink; both are dropped when the worker returns,
/// whether playback finished or failed.
pub struct RodioPlayer {
    volume: f32,
}

impl RodioPlayer {
    pub fn new(volume: f32) -> Self {
        Self {
            volume: volume.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl AudioPlayer for RodioPlayer {
    async fn play(&self, clip: AudioClip) -> Result<(), PlaybackError> {
        let volume = self.volume;
        tokio::task::spawn_blocking(move || play_blocking(clip, volume))
            .await
            .map_err(|err| PlaybackError::Output(format!("playback worker failed: {err}")))?
    }
}

fn play_blocking(clip: AudioClip, volume: f32) -> Result<(), PlaybackError> {
    let source = decode_clip(clip)?;

    let (_stream, handle) = OutputStream::try_default()
        .map_err(|e| PlaybackError::Output(format!("Failed to create audio output stream: {e}")))?;
    let sink = Sink::try_new(&handle)
        .map_err(|e| PlaybackError::Output(format!("Failed to create audio sink: {e}")))?;

    sink.set_volume(volume);
    sink.append(source);
    sink.sleep_until_end();
    Ok(())
}

/// Picks a decoder for the clip: PCM when the mime type says so, otherwise a
/// container decoder (wav/mp3/ogg/flac), falling back to PCM at the default rate.
pub(crate) fn decode_clip(clip: AudioClip) -> Result<BoxedSource, PlaybackError> {
    if clip.is_empty() {
        return Err(PlaybackError::Decode("audio clip is empty".into()));
    }

    if let Some(rate) = clip.mime_type.as_deref().and_then(pcm_sample_rate) {
        return Ok(pcm_source(&clip.bytes, rate));
    }

    match Decoder::new(Cursor::new(clip.bytes.clone())) {
        Ok(decoder) => Ok(Box::new(decoder)),
        Err(err) => {
            log::debug!("Container decode failed ({err}); treating clip as raw PCM");
            if clip.bytes.len() % 2 != 0 {
                return Err(PlaybackError::Decode(format!(
                    "not a known container and odd PCM length: {err}"
                )));
            }
            Ok(pcm_source(&clip.bytes, DEFAULT_PCM_RATE))
        }
    }
}

/// Sample rate for raw PCM mime types such as `audio/L16;codec=pcm;rate=24000`.
fn pcm_sample_rate(mime_type: &str) -> Option<u32> {
    let mut params = mime_type.split(';').map(str::trim);
    let essence = params.next()?.to_ascii_lowercase();
    if essence != "audio/l16" && essence != "audio/pcm" {
        return None;
    }

    let rate = params
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(DEFAULT_PCM_RATE);
    Some(rate)
}

fn pcm_source(bytes: &[u8], sample_rate: u32) -> BoxedSource {
    let samples: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Box::new(SamplesBuffer::new(1, sample_rate, samples))
}
