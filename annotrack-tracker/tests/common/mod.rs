//! Scripted collaborators shared by the controller tests

#![allow(dead_code)]

use annotrack_core::{BBox, FrameIndex, LabelMap, Mask};
use annotrack_tracker::error::Result;
use annotrack_tracker::{
    FlowField, Frame, MemoryFrameSource, OpticalFlowProvider, ProbabilityMasks, RecoverySegmenter, SegmentationEngine,
    Segmented, StopSignal, TrackingError, VideoSink,
};
use image::RgbImage;
use parking_lot::Mutex;
use std::sync::Arc;

pub const WIDTH: u32 = 100;
pub const HEIGHT: u32 = 100;

pub fn square(x0: u32, y0: u32, side: u32) -> Mask {
    Mask::from_fn(WIDTH, HEIGHT, |x, y| x >= x0 && x < x0 + side && y >= y0 && y < y0 + side)
}

pub fn label_map(instances: &[(u16, Mask)]) -> LabelMap {
    LabelMap::from_masks(WIDTH, HEIGHT, instances.iter().map(|(id, mask)| (*id, mask)))
}

pub fn blank_video(frames: usize) -> MemoryFrameSource {
    MemoryFrameSource::new(vec![RgbImage::new(WIDTH, HEIGHT); frames]).with_fps(10.0)
}

#[derive(Debug, Clone)]
pub struct EngineCall {
    pub frame: FrameIndex,
    /// Seed planes for reseed calls
    pub seed: Option<Vec<Mask>>,
}

/// Returns a fixed id map per frame.
pub struct ScriptedEngine {
    pub frames: Vec<LabelMap>,
    pub calls: Arc<Mutex<Vec<EngineCall>>>,
    pub fail_at: Option<FrameIndex>,
    pub stop_at: Option<(FrameIndex, StopSignal)>,
}

impl ScriptedEngine {
    pub fn new(frames: Vec<LabelMap>) -> Self {
        Self {
            frames,
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_at: None,
            stop_at: None,
        }
    }

    fn predict(&self, frame: &Frame) -> Result<ProbabilityMasks> {
        if self.fail_at == Some(frame.index) {
            return Err(TrackingError::Engine("device lost".to_string()));
        }
        if let Some((at, signal)) = &self.stop_at {
            if *at == frame.index {
                signal.stop();
            }
        }
        let map = &self.frames[frame.index as usize];
        let num_objects = map.instance_ids().last().copied().unwrap_or(0);
        Ok(ProbabilityMasks::from_label_map(map, num_objects))
    }
}

impl SegmentationEngine for ScriptedEngine {
    fn reseed(&mut self, frame: &Frame, masks: &[Mask]) -> Result<ProbabilityMasks> {
        self.calls.lock().push(EngineCall {
            frame: frame.index,
            seed: Some(masks.to_vec()),
        });
        self.predict(frame)
    }

    fn step(&mut self, frame: &Frame) -> Result<ProbabilityMasks> {
        self.calls.lock().push(EngineCall {
            frame: frame.index,
            seed: None,
        });
        self.predict(frame)
    }
}

/// Returns the same mask and score for every prompt.
pub struct ScriptedRecovery {
    pub mask: Mask,
    pub score: f64,
    pub prompts: Arc<Mutex<Vec<(FrameIndex, BBox)>>>,
}

impl ScriptedRecovery {
    pub fn new(mask: Mask, score: f64) -> Self {
        Self {
            mask,
            score,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl RecoverySegmenter for ScriptedRecovery {
    fn segment(&mut self, frame: &Frame, prompt: &BBox) -> Result<Segmented> {
        self.prompts.lock().push((frame.index, *prompt));
        Ok(Segmented {
            mask: self.mask.clone(),
            score: self.score,
        })
    }
}

/// Uniform flow of `(dx, dy)` everywhere.
pub struct UniformFlow {
    pub dx: f32,
    pub dy: f32,
}

impl OpticalFlowProvider for UniformFlow {
    fn compute(&mut self, _prev: &Frame, frame: &Frame) -> Result<FlowField> {
        Ok(FlowField {
            width: frame.width(),
            height: frame.height(),
            vectors: vec![(self.dx, self.dy); (frame.width() * frame.height()) as usize],
            color: RgbImage::from_pixel(frame.width(), frame.height(), image::Rgb([40, 40, 40])),
        })
    }
}

#[derive(Default)]
pub struct CollectingSink {
    pub frames: Vec<FrameIndex>,
    pub finished: usize,
}

impl VideoSink for CollectingSink {
    fn write(&mut self, frame: FrameIndex, _image: &RgbImage) -> Result<()> {
        self.frames.push(frame);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished += 1;
        Ok(())
    }
}
