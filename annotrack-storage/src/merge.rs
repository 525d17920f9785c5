//! Label-keyed merging of shapes and records

use annotrack_core::{AnnotationRecord, FrameIndex, JsonMap, Shape, LABEL_FORMAT_VERSION};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use indexmap::IndexMap;
use std::fs;
use tracing::warn;

/// Merge `incoming` into `existing` by label.
///
/// A label present in both takes the incoming shape at the position it was
/// first seen; novel labels are appended; untouched labels are kept.
pub fn merge_shapes(existing: &[Shape], incoming: &[Shape]) -> Vec<Shape> {
    let mut merged: IndexMap<&str, &Shape> = IndexMap::with_capacity(existing.len() + incoming.len());
    for shape in existing.iter().chain(incoming) {
        merged.insert(shape.label.as_str(), shape);
    }
    merged.into_values().cloned().collect()
}

/// Arguments of a save. `None` fields fall back to the stored record.
#[derive(Debug, Clone, Default)]
pub struct SaveRequest {
    pub shapes: Vec<Shape>,
    pub image_path: Option<String>,
    pub image_height: u32,
    pub image_width: u32,
    pub flags: Option<JsonMap>,
    pub caption: Option<String>,
    pub other_data: Option<JsonMap>,
    pub image_data: Option<Vec<u8>>,
    pub embed_image: bool,
}

impl SaveRequest {
    pub fn new(shapes: Vec<Shape>, image_height: u32, image_width: u32) -> Self {
        Self {
            shapes,
            image_height,
            image_width,
            ..Default::default()
        }
    }

    pub fn with_image_path(mut self, path: impl Into<String>) -> Self {
        self.image_path = Some(path.into());
        self
    }

    pub fn with_flags(mut self, flags: JsonMap) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn with_other_data(mut self, other_data: JsonMap) -> Self {
        self.other_data = Some(other_data);
        self
    }

    pub fn with_image_data(mut self, bytes: Vec<u8>) -> Self {
        self.image_data = Some(bytes);
        self
    }

    pub fn embed_image(mut self, embed: bool) -> Self {
        self.embed_image = embed;
        self
    }

    /// Base64 payload to embed: explicit bytes first, then the file at
    /// `image_path` when embedding is on. Unreadable images are skipped.
    pub fn resolve_image_data(&self) -> Option<String> {
        if let Some(bytes) = &self.image_data {
            return Some(STANDARD.encode(bytes));
        }
        if !self.embed_image {
            return None;
        }
        let path = self.image_path.as_ref()?;
        match fs::read(path) {
            Ok(bytes) => Some(STANDARD.encode(bytes)),
            Err(e) => {
                warn!("Cannot embed image {}: {}", path, e);
                None
            }
        }
    }
}

/// Apply `request` on top of `existing`. Explicit values override stored
/// ones, stored values override absent ones.
pub fn merge_record(
    existing: Option<&AnnotationRecord>,
    frame: FrameIndex,
    request: &SaveRequest,
    image_data: Option<String>,
) -> AnnotationRecord {
    let mut record = match existing {
        Some(prior) => prior.clone(),
        None => AnnotationRecord::new(frame, request.image_height, request.image_width),
    };
    record.frame = frame;
    if record.version.is_empty() {
        record.version = LABEL_FORMAT_VERSION.to_string();
    }
    record.shapes = merge_shapes(&record.shapes, &request.shapes);

    if request.image_height > 0 {
        record.image_height = request.image_height;
    }
    if request.image_width > 0 {
        record.image_width = request.image_width;
    }
    if let Some(path) = &request.image_path {
        record.image_path = Some(path.clone());
    }
    if let Some(flags) = &request.flags {
        record.flags = flags.clone();
    }
    if let Some(caption) = &request.caption {
        record.caption = Some(caption.clone());
    }
    if let Some(other) = &request.other_data {
        for (key, value) in other {
            record.other_data.insert(key.clone(), value.clone());
        }
    }
    if image_data.is_some() {
        record.image_data = image_data;
    }
    record
}
