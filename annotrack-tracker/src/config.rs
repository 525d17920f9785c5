//! Configuration for annotrack-tracker

use crate::error::{Result, TrackingError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How a frame with missing instances is judged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresencePolicy {
    /// Stop expecting lost instances the first time recovery fails
    pub shrink_on_first_loss: bool,
    /// Halt on any unrecovered loss while no occlusion has been seen
    pub halt_on_loss_without_occlusion: bool,
    /// Halt when fewer than this share of the expected instances remain
    pub min_observed_ratio: f64,
}

impl Default for PresencePolicy {
    fn default() -> Self {
        Self {
            shrink_on_first_loss: true,
            halt_on_loss_without_occlusion: true,
            min_observed_ratio: 0.5,
        }
    }
}

/// Propagation run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Reseed the engine every N frames (disabled when 1)
    pub mem_every: u64,
    /// Frames to process after the start frame
    pub frames_to_propagate: u64,
    /// Minimum (exclusive) recovery quality score
    pub recovery_score_threshold: f64,
    /// Polygon simplification tolerance in pixels
    pub polygon_epsilon: f64,
    /// Bbox cache capacity, `mem_every * 10` when unset
    pub bbox_cache_size: Option<usize>,
    /// Smallest admitted box, as a share of the frame area (exclusive)
    pub min_box_area_ratio: f64,
    /// Largest admitted box, as a share of the frame area (inclusive)
    pub max_box_area_ratio: f64,
    pub presence: PresencePolicy,
    /// Write an overlay frame per processed frame
    pub recording: bool,
    /// Save colour id masks every N frames
    pub debug_every: Option<u64>,
    /// Embed frame images into annotation records
    pub embed_image: bool,
    /// Store each instance mask alongside its polygon
    pub persist_masks: bool,
    /// Frame rate used when the source reports none
    pub fallback_fps: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            mem_every: 5,
            frames_to_propagate: 60,
            recovery_score_threshold: 0.88,
            polygon_epsilon: 2.0,
            bbox_cache_size: None,
            min_box_area_ratio: 0.0002,
            max_box_area_ratio: 0.5,
            presence: PresencePolicy::default(),
            recording: false,
            debug_every: None,
            embed_image: false,
            persist_masks: false,
            fallback_fps: 30.0,
        }
    }
}

impl TrackingConfig {
    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.mem_every == 0 {
            return Err("mem_every must be at least 1".to_string());
        }

        if !(0.0..=1.0).contains(&self.recovery_score_threshold) {
            return Err("Recovery score threshold must be between 0.0 and 1.0".to_string());
        }

        if !self.polygon_epsilon.is_finite() || self.polygon_epsilon <= 0.0 {
            return Err("Polygon epsilon must be positive".to_string());
        }

        if let Some(0) = self.bbox_cache_size {
            return Err("Bbox cache size must be at least 1".to_string());
        }

        if !(0.0..=1.0).contains(&self.min_box_area_ratio) || !(0.0..=1.0).contains(&self.max_box_area_ratio) {
            return Err("Box area ratios must be between 0.0 and 1.0".to_string());
        }

        if self.min_box_area_ratio >= self.max_box_area_ratio {
            return Err("Minimum box area ratio must be below the maximum".to_string());
        }

        let ratio = self.presence.min_observed_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err("Minimum observed ratio must be in (0.0, 1.0]".to_string());
        }

        if let Some(0) = self.debug_every {
            return Err("debug_every must be at least 1".to_string());
        }

        if !self.fallback_fps.is_finite() || self.fallback_fps <= 0.0 {
            return Err("Fallback fps must be positive".to_string());
        }

        Ok(())
    }

    /// Effective bbox cache capacity
    pub fn cache_capacity(&self) -> usize {
        self.bbox_cache_size
            .unwrap_or_else(|| (self.mem_every as usize).saturating_mul(10))
            .max(1)
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file and validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        let config: Self = match extension.as_str() {
            "toml" => toml::from_str(&content).map_err(|e| TrackingError::Config(e.to_string()))?,
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| TrackingError::Config(e.to_string()))?,
            other => {
                return Err(TrackingError::Config(format!(
                    "Unsupported config format '{}' for {:?}",
                    other, path
                )))
            }
        };
        config.validate().map_err(TrackingError::Config)?;
        Ok(config)
    }
}
