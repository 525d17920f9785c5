//! Labeled geometric annotations

use crate::mask::Mask;
use crate::record::JsonMap;
use crate::types::{BBox, Point};
use serde::{Deserialize, Deserializer, Serialize};

/// Geometry kind of a [`Shape`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
    Point,
    Rectangle,
    #[default]
    Polygon,
}

/// One labeled annotation. The label is unique within a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub label: String,
    pub points: Vec<Point>,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub shape_type: ShapeType,
    #[serde(default)]
    pub flags: JsonMap,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Authoritative source of `points` when present.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "mask_codec")]
    pub mask: Option<Mask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_labels: Option<Vec<i64>>,
    #[serde(flatten)]
    pub other_data: JsonMap,
}

fn default_visible() -> bool {
    true
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Shape {
    pub fn new(label: impl Into<String>, shape_type: ShapeType, points: Vec<Point>) -> Self {
        Self {
            label: label.into(),
            points,
            group_id: None,
            shape_type,
            flags: JsonMap::new(),
            description: String::new(),
            visible: true,
            mask: None,
            point_labels: None,
            other_data: JsonMap::new(),
        }
    }

    /// Polygon vectorized from `mask`; `None` when the mask has no foreground.
    pub fn polygon_from_mask(label: impl Into<String>, mask: &Mask, epsilon: f64) -> Option<Self> {
        let points = mask.to_polygon(epsilon);
        if points.is_empty() {
            return None;
        }
        Some(Self::new(label, ShapeType::Polygon, points))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn bbox(&self) -> Option<BBox> {
        BBox::from_points(&self.points)
    }
}

mod mask_codec {
    use crate::mask::Mask;
    use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(mask: &Option<Mask>, serializer: S) -> Result<S::Ok, S::Error> {
        match mask {
            Some(mask) => {
                let encoded = mask.to_png_base64().map_err(S::Error::custom)?;
                serializer.serialize_some(&encoded)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Mask>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) if !encoded.is_empty() => Mask::from_png_base64(&encoded).map(Some).map_err(D::Error::custom),
            _ => Ok(None),
        }
    }
}
