use std::{
    io::Cursor,
    path::PathBuf,
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, ImageFormat};

use crate::models::Frame;

const MAX_FRAME_WIDTH: u32 = 640;

/// Produces one still image on demand. `Ok(None)` is a transient miss.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture(&self) -> Result<Option<Frame>>;
}

/// Reads the most recent still written to disk by an external capture tool
/// (for example a webcam snapshot loop) and normalizes it to a small JPEG.
pub struct FileFrameSource {
    path: PathBuf,
    max_age: Option<Duration>,
}

impl FileFrameSource {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            max_age: None,
        }
    }

    /// Frames older than `max_age` are treated as missing, so a stalled
    /// capture tool does not keep feeding the same picture.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }
}

#[async_trait]
impl FrameSource for FileFrameSource {
    async fn capture(&self) -> Result<Option<Frame>> {
        let path = self.path.clone();
        let max_age = self.max_age;

        tokio::task::spawn_blocking(move || {
            let metadata = match std::fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to stat {}", path.display()))
                }
            };

            if let (Some(max_age), Ok(modified)) = (max_age, metadata.modified()) {
                let age = SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or_default();
                if age > max_age {
                    log::debug!("Frame at {} is {}s old; skipping", path.display(), age.as_secs());
                    return Ok(None);
                }
            }

            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read frame {}", path.display()))?;
            normalize_frame(&bytes).map(Some)
        })
        .await
        .context("frame capture worker join failed")?
    }
}

/// Decodes any supported image, bounds its width and re-encodes it as JPEG.
pub fn normalize_frame(bytes: &[u8]) -> Result<Frame> {
    let img = image::load_from_memory(bytes).context("failed to decode captured frame")?;
    let img = if img.width() > MAX_FRAME_WIDTH {
        let height = (u64::from(img.height()) * u64::from(MAX_FRAME_WIDTH) / u64::from(img.width()))
            .max(1) as u32;
        img.resize_exact(MAX_FRAME_WIDTH, height, FilterType::Triangle)
    } else {
        img
    };

    // The JPEG encoder rejects alpha channels.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut encoded = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut encoded), ImageFormat::Jpeg)
        .context("failed to encode frame as JPEG")?;
    Ok(Frame::jpeg(encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([10, 200, 30, 255]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn normalizes_large_png_to_bounded_jpeg() {
        let frame = normalize_frame(&png_bytes(1280, 720)).unwrap();
        assert_eq!(frame.mime_type, "image/jpeg");

        let decoded = image::load_from_memory(frame.bytes()).unwrap();
        assert_eq!(decoded.width(), MAX_FRAME_WIDTH);
        assert_eq!(decoded.height(), 360);
    }

    #[test]
    fn garbage_bytes_are_an_error() {
        assert!(normalize_frame(b"definitely not an image").is_err());
    }

    #[tokio::test]
    async fn missing_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileFrameSource::new(dir.path().join("latest.png"));
        assert!(source.capture().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.png");
        std::fs::write(&path, png_bytes(32, 24)).unwrap();

        let source = FileFrameSource::new(path).with_max_age(Duration::from_secs(3600));
        let frame = source.capture().await.unwrap().unwrap();
        assert!(!frame.is_empty());
    }
}
