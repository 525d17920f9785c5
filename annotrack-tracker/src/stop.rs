//! Cooperative cancellation and resumable stop messages

use annotrack_core::FrameIndex;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Separator between the human text and the resume frame
pub const DELIMITER: char = '#';

/// Shared stop flag, polled once per frame.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    stopped: Arc<RwLock<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        *self.stopped.write() = true;
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.read()
    }

    pub fn reset(&self) {
        *self.stopped.write() = false;
    }
}

/// Why a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndOfRange,
    EndOfVideo,
    Cancelled,
    /// Too many instances lost to keep tracking
    Fatal { missing: Vec<String> },
    /// The start frame is already the last frame
    AlreadyComplete,
}

/// `"<text>#<frame>"`, where the frame is the resume point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopMessage {
    pub text: String,
    pub frame: FrameIndex,
}

impl StopMessage {
    pub fn new(text: impl Into<String>, frame: FrameIndex) -> Self {
        Self {
            text: text.into(),
            frame,
        }
    }

    pub fn stopped_at(frame: FrameIndex) -> Self {
        Self::new("Stop at frame:\n", frame)
    }

    pub fn already_complete(frame: FrameIndex) -> Self {
        Self::new(
            "Please edit a frame and restart. The last frame prediction already exists:",
            frame,
        )
    }

    pub fn missing_instances(frame: FrameIndex, missing_count: usize, missing: &[String]) -> Self {
        Self::new(
            format!(
                "There are {} missing instance(s) in the current frame ({}).\n\n\
                 Here is the list of instances missing or occluded in the current frame:\n\
                 Some occluded instances will be recovered automatically in the later frame:\n{}",
                missing_count,
                frame,
                missing.join(", ")
            ),
            frame,
        )
    }

    /// Split at the last delimiter; `None` without a numeric frame suffix.
    pub fn parse(message: &str) -> Option<Self> {
        let (text, frame) = message.rsplit_once(DELIMITER)?;
        let frame = frame.trim().parse().ok()?;
        Some(Self::new(text, frame))
    }
}

impl fmt::Display for StopMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.text, DELIMITER, self.frame)
    }
}
