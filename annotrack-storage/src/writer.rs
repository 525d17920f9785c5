//! Save strategy selection for a target label path

use crate::label_file::LabelFile;
use crate::merge::{merge_record, SaveRequest};
use crate::naming::{frame_number_from_path, manual_edit_exists};
use crate::store::AnnotationStore;
use annotrack_core::{AnnotationRecord, FrameIndex, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// How a target path is persisted, fixed when the writer is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStrategy {
    /// The path names a frame: records go to the folder's annotation log.
    FrameIndexed { frame: FrameIndex, folder: PathBuf },
    /// No frame in the name: one merged document at the exact path.
    PathIndexed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    /// Image and label file both exist; manual edits are never overwritten.
    SkippedManualEdit,
}

#[derive(Debug, Clone)]
pub struct AnnotationWriter {
    path: PathBuf,
    strategy: WriteStrategy,
}

impl AnnotationWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let strategy = match frame_number_from_path(&path) {
            Some(frame) => WriteStrategy::FrameIndexed {
                frame,
                folder: path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(".")),
            },
            None => WriteStrategy::PathIndexed,
        };
        Self { path, strategy }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn strategy(&self) -> &WriteStrategy {
        &self.strategy
    }

    /// Save, opening the folder store when frame-indexed.
    pub fn save(&self, request: &SaveRequest) -> Result<SaveOutcome> {
        match &self.strategy {
            WriteStrategy::FrameIndexed { folder, .. } => {
                let mut store = AnnotationStore::open(folder)?;
                self.save_with(&mut store, request)
            }
            WriteStrategy::PathIndexed => self.save_with_file(request),
        }
    }

    /// Save through an already opened store.
    pub fn save_with(&self, store: &mut AnnotationStore, request: &SaveRequest) -> Result<SaveOutcome> {
        if self.is_manual_edit() {
            return Ok(SaveOutcome::SkippedManualEdit);
        }
        match &self.strategy {
            WriteStrategy::FrameIndexed { frame, .. } => {
                store.put(*frame, request)?;
                debug!("Saved frame {} to {:?}", frame, store.path());
                Ok(SaveOutcome::Written)
            }
            WriteStrategy::PathIndexed => self.save_with_file(request),
        }
    }

    /// Current merged state of the target, if any.
    pub fn load(&self) -> Result<Option<AnnotationRecord>> {
        match &self.strategy {
            WriteStrategy::FrameIndexed { frame, folder } => Ok(AnnotationStore::open(folder)?.get(*frame).cloned()),
            WriteStrategy::PathIndexed => Ok(LabelFile::load(&self.path).map(|file| file.into_record(0))),
        }
    }

    fn is_manual_edit(&self) -> bool {
        if manual_edit_exists(&self.path) {
            info!("Keeping manually edited annotation {:?}", self.path);
            return true;
        }
        false
    }

    fn save_with_file(&self, request: &SaveRequest) -> Result<SaveOutcome> {
        if self.is_manual_edit() {
            return Ok(SaveOutcome::SkippedManualEdit);
        }
        let existing = LabelFile::load(&self.path).map(|file| file.into_record(0));
        let payload = request.resolve_image_data();
        let merged = merge_record(existing.as_ref(), 0, request, payload);
        LabelFile::from_record(merged).save(&self.path)?;
        debug!("Saved label file {:?}", self.path);
        Ok(SaveOutcome::Written)
    }
}
