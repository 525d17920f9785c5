//! Output sinks for recorded visualization frames

use crate::error::{Result, TrackingError};
use annotrack_core::FrameIndex;
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use tracing::info;

pub trait VideoSink: Send {
    fn write(&mut self, frame: FrameIndex, image: &RgbImage) -> Result<()>;

    /// Release the output. Called once on every exit path of a run.
    fn finish(&mut self) -> Result<()>;
}

/// Writes `<dir>/<frame:09>.png` per frame.
#[derive(Debug)]
pub struct PngSequenceSink {
    dir: PathBuf,
    written: usize,
    finished: bool,
}

impl PngSequenceSink {
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| TrackingError::Sink(format!("Cannot create output directory {:?}: {}", dir, e)))?;
        Ok(Self {
            dir,
            written: 0,
            finished: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl VideoSink for PngSequenceSink {
    fn write(&mut self, frame: FrameIndex, image: &RgbImage) -> Result<()> {
        if self.finished {
            return Err(TrackingError::Sink("sink already finished".to_string()));
        }
        let path = self.dir.join(format!("{:09}.png", frame));
        image
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|e| TrackingError::Sink(format!("Cannot write {:?}: {}", path, e)))?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if !self.finished {
            self.finished = true;
            info!("Recorded {} frames to {:?}", self.written, self.dir);
        }
        Ok(())
    }
}
