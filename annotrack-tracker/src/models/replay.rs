//! Engine that replays precomputed id masks

use super::{ProbabilityMasks, SegmentationEngine};
use crate::error::{Result, TrackingError};
use crate::frames::Frame;
use annotrack_core::{FrameIndex, LabelMap, Mask};
use annotrack_storage::frame_number_from_path;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Serves one grayscale id-mask PNG per frame (pixel value = instance id),
/// matched to frames by the number in the file name.
pub struct ReplayEngine {
    masks: BTreeMap<FrameIndex, PathBuf>,
}

impl ReplayEngine {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| TrackingError::Engine(format!("Cannot open mask directory {:?}: {}", dir, e)))?;
        let mut masks = BTreeMap::new();
        for entry in entries {
            let path = entry?.path();
            let is_png = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("png"))
                .unwrap_or(false);
            if !is_png {
                continue;
            }
            if let Some(frame) = frame_number_from_path(&path) {
                masks.insert(frame, path);
            }
        }
        info!("Replaying {} precomputed masks from {:?}", masks.len(), dir);
        Ok(Self { masks })
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    fn load(&self, frame: FrameIndex) -> Result<Option<LabelMap>> {
        match self.masks.get(&frame) {
            Some(path) => Ok(Some(LabelMap::from_gray(&image::open(path)?.to_luma8()))),
            None => Ok(None),
        }
    }
}

fn prediction(map: &LabelMap) -> ProbabilityMasks {
    let num_objects = map.instance_ids().last().copied().unwrap_or(0);
    ProbabilityMasks::from_label_map(map, num_objects)
}

impl SegmentationEngine for ReplayEngine {
    fn reseed(&mut self, frame: &Frame, masks: &[Mask]) -> Result<ProbabilityMasks> {
        if let Some(map) = self.load(frame.index)? {
            return Ok(prediction(&map));
        }
        debug!("No precomputed mask for frame {}, echoing the seed", frame.index);
        let seeded = masks.iter().enumerate().map(|(k, mask)| ((k + 1) as u16, mask));
        Ok(prediction(&LabelMap::from_masks(frame.width(), frame.height(), seeded)))
    }

    fn step(&mut self, frame: &Frame) -> Result<ProbabilityMasks> {
        self.load(frame.index)?
            .map(|map| prediction(&map))
            .ok_or_else(|| TrackingError::Engine(format!("No precomputed mask for frame {}", frame.index)))
    }
}
