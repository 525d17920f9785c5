//! Box-prompted re-acquisition of lost instances

use super::bbox_cache::BboxCache;
use crate::frames::Frame;
use crate::models::RecoverySegmenter;
use annotrack_core::Mask;
use tracing::{debug, info, warn};

/// Try to re-segment every missing label from its most recent cached box.
///
/// Results are kept only when the segmenter's score is strictly above
/// `threshold`. Segmenter failures skip the label.
pub fn recover_instances(
    segmenter: &mut dyn RecoverySegmenter,
    cache: &BboxCache,
    frame: &Frame,
    missing: &[String],
    threshold: f64,
) -> Vec<(String, Mask)> {
    let mut recovered = Vec::new();
    for label in missing {
        let Some(prompt) = cache.most_recent(label) else {
            debug!("No cached box to recover {} at frame {}", label, frame.index);
            continue;
        };
        let segmented = match segmenter.segment(frame, &prompt) {
            Ok(segmented) => segmented,
            Err(e) => {
                warn!("Recovery of {} failed at frame {}: {}", label, frame.index, e);
                continue;
            }
        };
        info!(
            "Box prompt recovery of {} at frame {} scored {:.3} (threshold {:.2})",
            label, frame.index, segmented.score, threshold
        );
        if segmented.mask.width() != frame.width() || segmented.mask.height() != frame.height() {
            warn!(
                "Recovered mask for {} is {}x{}, frame is {}x{}",
                label,
                segmented.mask.width(),
                segmented.mask.height(),
                frame.width(),
                frame.height()
            );
            continue;
        }
        if segmented.score > threshold && !segmented.mask.is_empty() {
            recovered.push((label.clone(), segmented.mask));
        }
    }
    recovered
}
