//! Per-frame processing stages

pub mod bbox_cache;
pub mod presence;
pub mod recovery;
pub mod summary;

pub use bbox_cache::{BboxCache, BoxAdmission, CachedBox};
pub use presence::{PresenceTracker, PresenceVerdict, TrackingState};
pub use recovery::recover_instances;
pub use summary::{summary_path_for, SummaryRow, SummaryWriter};
