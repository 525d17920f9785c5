//! Contracts of the external models driven by the controller

pub mod replay;

pub use replay::ReplayEngine;

use crate::error::{Result, TrackingError};
use crate::frames::Frame;
use annotrack_core::{BBox, LabelMap, Mask};
use image::RgbImage;

/// Per-pixel class probabilities. Plane 0 is background, plane `k` is the
/// instance with id `k`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityMasks {
    width: u32,
    height: u32,
    planes: Vec<Vec<f32>>,
}

impl ProbabilityMasks {
    pub fn new(width: u32, height: u32, planes: Vec<Vec<f32>>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if planes.is_empty() {
            return Err(TrackingError::Engine("prediction has no background plane".to_string()));
        }
        if let Some(bad) = planes.iter().position(|p| p.len() != expected) {
            return Err(TrackingError::Engine(format!(
                "plane {} has {} values, expected {}",
                bad,
                planes[bad].len(),
                expected
            )));
        }
        Ok(Self { width, height, planes })
    }

    /// Certain prediction equal to `map`, with planes for ids `0..=num_objects`.
    pub fn from_label_map(map: &LabelMap, num_objects: u16) -> Self {
        let planes = (0..=num_objects)
            .map(|id| map.ids().iter().map(|v| if *v == id { 1.0 } else { 0.0 }).collect())
            .collect();
        Self {
            width: map.width(),
            height: map.height(),
            planes,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn num_objects(&self) -> usize {
        self.planes.len() - 1
    }

    pub fn planes(&self) -> &[Vec<f32>] {
        &self.planes
    }

    /// Arg-max over planes; ties go to the lower id.
    pub fn to_label_map(&self) -> LabelMap {
        let pixels = self.width as usize * self.height as usize;
        let mut map = LabelMap::new(self.width, self.height);
        for idx in 0..pixels {
            let mut best = 0usize;
            let mut best_p = self.planes[0][idx];
            for (k, plane) in self.planes.iter().enumerate().skip(1) {
                if plane[idx] > best_p {
                    best = k;
                    best_p = plane[idx];
                }
            }
            if best != 0 {
                let x = (idx % self.width as usize) as u32;
                let y = (idx / self.width as usize) as u32;
                map.set(x, y, best as u16);
            }
        }
        map
    }
}

/// Recovery segmenter output
#[derive(Debug, Clone, PartialEq)]
pub struct Segmented {
    pub mask: Mask,
    /// Model's own quality estimate
    pub score: f64,
}

/// Dense optical flow between two frames plus its colour rendering.
#[derive(Debug, Clone)]
pub struct FlowField {
    pub width: u32,
    pub height: u32,
    /// Row-major `(dx, dy)` per pixel
    pub vectors: Vec<(f32, f32)>,
    pub color: RgbImage,
}

impl FlowField {
    pub fn magnitude(&self, x: u32, y: u32) -> f32 {
        if x >= self.width || y >= self.height {
            return 0.0;
        }
        let (dx, dy) = self.vectors[y as usize * self.width as usize + x as usize];
        (dx * dx + dy * dy).sqrt()
    }

    /// Mean flow magnitude over the mask; `None` for an empty or mismatched mask.
    pub fn mean_magnitude(&self, mask: &Mask) -> Option<f64> {
        if mask.width() != self.width || mask.height() != self.height {
            return None;
        }
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for (bit, (dx, dy)) in mask.bits().iter().zip(&self.vectors) {
            if *bit {
                sum += f64::from((dx * dx + dy * dy).sqrt());
                count += 1;
            }
        }
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }
}

/// Memory-augmented video segmentation engine. Its temporal memory is
/// owned by the implementation.
pub trait SegmentationEngine: Send {
    /// Reset memory from one mask per instance id (`masks[k]` is id `k + 1`)
    /// and predict `frame`.
    fn reseed(&mut self, frame: &Frame, masks: &[Mask]) -> Result<ProbabilityMasks>;

    /// Predict `frame` from memory.
    fn step(&mut self, frame: &Frame) -> Result<ProbabilityMasks>;
}

/// Prompt-based segmenter used to re-acquire lost instances.
pub trait RecoverySegmenter: Send {
    fn segment(&mut self, frame: &Frame, prompt: &BBox) -> Result<Segmented>;
}

pub trait OpticalFlowProvider: Send {
    fn compute(&mut self, prev: &Frame, frame: &Frame) -> Result<FlowField>;
}
