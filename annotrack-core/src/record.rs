//! Per-frame persisted annotation record

use crate::shape::Shape;
use crate::types::FrameIndex;
use serde::{Deserialize, Serialize};

/// Free-form JSON object used for flags and extra data.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Label-format version written into new records.
pub const LABEL_FORMAT_VERSION: &str = "5.4.1";

/// One frame's annotation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRecord {
    pub frame: FrameIndex,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub image_height: u32,
    #[serde(default)]
    pub image_width: u32,
    #[serde(default)]
    pub shapes: Vec<Shape>,
    #[serde(default)]
    pub flags: JsonMap,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub other_data: JsonMap,
    /// Base64 image payload, only when embedding was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
}

fn default_version() -> String {
    LABEL_FORMAT_VERSION.to_string()
}

impl AnnotationRecord {
    pub fn new(frame: FrameIndex, image_height: u32, image_width: u32) -> Self {
        Self {
            frame,
            version: default_version(),
            image_path: None,
            image_height,
            image_width,
            shapes: Vec::new(),
            flags: JsonMap::new(),
            caption: None,
            other_data: JsonMap::new(),
            image_data: None,
        }
    }

    pub fn shape(&self, label: &str) -> Option<&Shape> {
        self.shapes.iter().find(|s| s.label == label)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.shapes.iter().map(|s| s.label.as_str()).collect()
    }
}
