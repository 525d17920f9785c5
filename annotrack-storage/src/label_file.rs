//! Path-indexed label documents

use annotrack_core::{AnnotationRecord, FrameIndex, JsonMap, Result, Shape, LABEL_FORMAT_VERSION};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::warn;

/// A standalone label document. Extra top-level keys round-trip through
/// `other_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelFile {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub flags: JsonMap,
    #[serde(default)]
    pub shapes: Vec<Shape>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub image_data: Option<String>,
    #[serde(default)]
    pub image_height: Option<u32>,
    #[serde(default)]
    pub image_width: Option<u32>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(flatten)]
    pub other_data: JsonMap,
}

fn default_version() -> String {
    LABEL_FORMAT_VERSION.to_string()
}

impl LabelFile {
    /// Existing document at `path`; missing or corrupt files give `None`.
    pub fn load(path: &Path) -> Option<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cannot read label file {:?}: {}", path, e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("Ignoring corrupt label file {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn into_record(self, frame: FrameIndex) -> AnnotationRecord {
        AnnotationRecord {
            frame,
            version: self.version,
            image_path: self.image_path,
            image_height: self.image_height.unwrap_or(0),
            image_width: self.image_width.unwrap_or(0),
            shapes: self.shapes,
            flags: self.flags,
            caption: self.caption,
            other_data: self.other_data,
            image_data: self.image_data,
        }
    }

    pub fn from_record(record: AnnotationRecord) -> Self {
        let mut other_data = record.other_data;
        other_data.remove("frame");
        Self {
            version: record.version,
            flags: record.flags,
            shapes: record.shapes,
            image_path: record.image_path,
            image_data: record.image_data,
            image_height: Some(record.image_height),
            image_width: Some(record.image_width),
            caption: record.caption,
            other_data,
        }
    }
}
