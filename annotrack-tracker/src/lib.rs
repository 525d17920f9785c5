//! annotrack-tracker: video instance tracking and occlusion recovery
//!
//! Drives an external memory-augmented segmentation engine through a video,
//! watches for lost instances, re-prompts a recovery segmenter from cached
//! boxes and persists every frame through the annotation store.

pub mod error;
pub mod config;
pub mod models;
pub mod frames;
pub mod sink;
pub mod processing;
pub mod visualize;
pub mod stop;
pub mod controller;

pub use error::TrackingError;
pub use config::{PresencePolicy, TrackingConfig};
pub use models::{FlowField, OpticalFlowProvider, ProbabilityMasks, RecoverySegmenter, SegmentationEngine, Segmented};
pub use frames::{Frame, FrameSource, ImageSequenceSource, MemoryFrameSource};
pub use sink::{PngSequenceSink, VideoSink};
pub use processing::{BboxCache, PresenceTracker, SummaryWriter, TrackingState};
pub use stop::{StopMessage, StopReason, StopSignal};
pub use controller::{PropagationController, RunReport, RunRequest};
