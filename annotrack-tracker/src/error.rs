//! Error types for annotrack-tracker

use crate::stop::StopMessage;
use annotrack_core::Error as CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Frame source error: {0}")]
    Source(String),

    #[error("Video sink error: {0}")]
    Sink(String),

    #[error("Segmentation engine error: {0}")]
    Engine(String),

    #[error("Recovery segmenter error: {0}")]
    Recovery(String),

    #[error("Optical flow error: {0}")]
    Flow(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// A run failed after it started; `resume` names the last saved frame
    #[error("{source}\n{resume}")]
    Interrupted {
        source: Box<TrackingError>,
        resume: StopMessage,
    },
}

impl TrackingError {
    /// Restart point of a run that failed mid-way
    pub fn resume_point(&self) -> Option<&StopMessage> {
        match self {
            TrackingError::Interrupted { resume, .. } => Some(resume),
            _ => None,
        }
    }
}

impl From<TrackingError> for CoreError {
    fn from(err: TrackingError) -> Self {
        match err {
            TrackingError::Core(inner) => inner,
            other => CoreError::Storage(format!("Tracking error: {}", other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackingError>;
