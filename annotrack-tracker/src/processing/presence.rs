//! Expected vs. observed instance bookkeeping

use crate::config::PresencePolicy;
use annotrack_core::FrameIndex;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Per-run tracking state owned by the controller
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingState {
    pub expected_instance_count: usize,
    pub instance_labels: BTreeSet<String>,
    pub has_occlusion: bool,
    pub current_frame: FrameIndex,
    pub need_full_reseed: bool,
    /// Losses that recovery could not repair
    pub unrecovered_losses: u64,
}

impl TrackingState {
    pub fn new(instance_labels: BTreeSet<String>, start_frame: FrameIndex) -> Self {
        Self {
            expected_instance_count: instance_labels.len(),
            instance_labels,
            has_occlusion: false,
            current_frame: start_frame,
            need_full_reseed: false,
            unrecovered_losses: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceVerdict {
    Healthy,
    /// At least one lost instance was re-acquired
    PartialRecovery { recovered: Vec<String> },
    /// Instances are missing but tracking continues
    Occluded { missing: Vec<String> },
    /// Tracking must stop
    Fatal { missing: Vec<String> },
}

#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    policy: PresencePolicy,
}

impl PresenceTracker {
    pub fn new(policy: PresencePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PresencePolicy {
        &self.policy
    }

    /// Expected labels absent from `observed`, sorted.
    pub fn missing(&self, state: &TrackingState, observed: &BTreeSet<String>) -> Vec<String> {
        state.instance_labels.difference(observed).cloned().collect()
    }

    /// Judge a frame after the recovery attempt and update `state`.
    ///
    /// `observed` holds the labels the engine produced, `recovered` the
    /// missing labels restored by recovery.
    pub fn classify(
        &self,
        state: &mut TrackingState,
        observed: &BTreeSet<String>,
        recovered: &[String],
    ) -> PresenceVerdict {
        let missing = self.missing(state, observed);
        if missing.is_empty() {
            return PresenceVerdict::Healthy;
        }
        let still_missing: Vec<String> = missing.iter().filter(|m| !recovered.contains(m)).cloned().collect();

        if recovered.is_empty() {
            state.has_occlusion = true;
            let first_loss = state.unrecovered_losses == 0;
            state.unrecovered_losses += 1;
            let present = state.expected_instance_count.saturating_sub(missing.len());
            let floor = state.expected_instance_count as f64 * self.policy.min_observed_ratio;
            if first_loss && self.policy.shrink_on_first_loss && present as f64 >= floor {
                info!(
                    "Expecting {} instances instead of {} from frame {}, dropped {:?}",
                    present, state.expected_instance_count, state.current_frame, missing
                );
                for label in &missing {
                    state.instance_labels.remove(label);
                }
                state.expected_instance_count = state.instance_labels.len();
                return PresenceVerdict::Occluded { missing: still_missing };
            }
        } else {
            state.need_full_reseed = true;
        }

        let present = state.expected_instance_count.saturating_sub(still_missing.len());
        if present < state.expected_instance_count {
            let below_ratio = (present as f64) < state.expected_instance_count as f64 * self.policy.min_observed_ratio;
            let unexplained = self.policy.halt_on_loss_without_occlusion && !state.has_occlusion;
            if below_ratio || unexplained {
                warn!(
                    "Tracking lost at frame {}: {} of {} instances present",
                    state.current_frame, present, state.expected_instance_count
                );
                return PresenceVerdict::Fatal { missing: still_missing };
            }
        }

        if recovered.is_empty() {
            PresenceVerdict::Occluded { missing: still_missing }
        } else {
            PresenceVerdict::PartialRecovery {
                recovered: recovered.to_vec(),
            }
        }
    }
}
