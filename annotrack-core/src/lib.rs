//! annotrack-core: shared data model for per-frame video annotation
//!
//! Frames, shapes, binary instance masks and the per-frame annotation
//! record that the storage and tracker crates exchange.

pub mod error;
pub mod types;
pub mod mask;
pub mod shape;
pub mod record;

pub use error::{Error, Result};
pub use types::{BBox, FrameIndex, Point};
pub use mask::{LabelMap, Mask};
pub use shape::{Shape, ShapeType};
pub use record::{AnnotationRecord, JsonMap, LABEL_FORMAT_VERSION};
