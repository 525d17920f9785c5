//! Frame sources

use crate::error::{Result, TrackingError};
use annotrack_core::FrameIndex;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::info;

/// A decoded video frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: FrameIndex,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: FrameIndex, image: RgbImage) -> Self {
        Self { index, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn area(&self) -> f64 {
        f64::from(self.width()) * f64::from(self.height())
    }
}

/// Random-access video frames.
pub trait FrameSource: Send {
    fn frame_count(&self) -> u64;

    /// Native frame rate, if known
    fn fps(&self) -> Option<f64>;

    fn dimensions(&self) -> (u32, u32);

    /// `Ok(None)` past the end of the video.
    fn read(&mut self, index: FrameIndex) -> Result<Option<Frame>>;
}

const FRAME_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Directory of extracted frame images, ordered by file name.
#[derive(Debug)]
pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    dimensions: (u32, u32),
    fps: Option<f64>,
}

impl ImageSequenceSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| TrackingError::Source(format!("Cannot open frame directory {:?}: {}", dir, e)))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_frame = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_frame && path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        let first = files
            .first()
            .ok_or_else(|| TrackingError::Source(format!("No frame images in {:?}", dir)))?;
        let dimensions = image::image_dimensions(first)?;
        info!("Opened {} frames of {}x{} from {:?}", files.len(), dimensions.0, dimensions.1, dir);
        Ok(Self {
            dir,
            files,
            dimensions,
            fps: None,
        })
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FrameSource for ImageSequenceSource {
    fn frame_count(&self) -> u64 {
        self.files.len() as u64
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn read(&mut self, index: FrameIndex) -> Result<Option<Frame>> {
        let Some(path) = usize::try_from(index).ok().and_then(|i| self.files.get(i)) else {
            return Ok(None);
        };
        let image = image::open(path)?.to_rgb8();
        Ok(Some(Frame::new(index, image)))
    }
}

/// Frames held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryFrameSource {
    frames: Vec<RgbImage>,
    fps: Option<f64>,
}

impl MemoryFrameSource {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self { frames, fps: None }
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }
}

impl FrameSource for MemoryFrameSource {
    fn frame_count(&self) -> u64 {
        self.frames.len() as u64
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        self.frames.first().map(|f| f.dimensions()).unwrap_or((0, 0))
    }

    fn read(&mut self, index: FrameIndex) -> Result<Option<Frame>> {
        Ok(usize::try_from(index)
            .ok()
            .and_then(|i| self.frames.get(i))
            .map(|image| Frame::new(index, image.clone())))
    }
}
