//! annotrack-storage: per-frame annotation persistence
//!
//! Label-keyed shape merging, the frame-indexed append log, the
//! path-indexed label file fallback and the writer that picks between them.

pub mod naming;
pub mod merge;
pub mod store;
pub mod label_file;
pub mod writer;

pub use naming::{frame_label_path, frame_number_from_path, manual_edit_exists, store_path, video_folder};
pub use merge::{merge_record, merge_shapes, SaveRequest};
pub use store::AnnotationStore;
pub use label_file::LabelFile;
pub use writer::{AnnotationWriter, SaveOutcome, WriteStrategy};
