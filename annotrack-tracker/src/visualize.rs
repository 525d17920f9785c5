//! Colour id masks, overlays and flow composites

use crate::error::Result;
use crate::models::FlowField;
use annotrack_core::{LabelMap, Mask};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

/// Opacity of instance colours in overlays
pub const OVERLAY_ALPHA: f32 = 0.5;

/// Weight of the flow colour image in composites
pub const FLOW_WEIGHT: f32 = 0.5;

/// PASCAL VOC colour of an instance id (0 is black).
pub fn palette(id: u16) -> Rgb<u8> {
    let mut c = u32::from(id);
    let (mut r, mut g, mut b) = (0u8, 0u8, 0u8);
    for shift in (0..8).rev() {
        r |= ((c & 1) as u8) << shift;
        g |= (((c >> 1) & 1) as u8) << shift;
        b |= (((c >> 2) & 1) as u8) << shift;
        c >>= 3;
    }
    Rgb([r, g, b])
}

pub fn color_id_mask(map: &LabelMap) -> RgbImage {
    RgbImage::from_fn(map.width(), map.height(), |x, y| palette(map.get(x, y)))
}

/// Blend instance colours into `frame` and outline each instance in black.
pub fn overlay(frame: &RgbImage, map: &LabelMap, alpha: f32) -> RgbImage {
    let mut out = frame.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let id = map.get(x, y);
        if id != 0 {
            let color = palette(id);
            for c in 0..3 {
                let blended = f32::from(pixel.0[c]) * (1.0 - alpha) + f32::from(color.0[c]) * alpha;
                pixel.0[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        } else if touches_instance(map, x, y) {
            *pixel = Rgb([0, 0, 0]);
        }
    }
    out
}

fn touches_instance(map: &LabelMap, x: u32, y: u32) -> bool {
    let neighbors = [
        (x.wrapping_sub(1), y),
        (x + 1, y),
        (x, y.wrapping_sub(1)),
        (x, y + 1),
    ];
    neighbors.iter().any(|(nx, ny)| map.get(*nx, *ny) != 0)
}

/// Add the flow colour image, restricted to `foreground`, with saturation.
pub fn composite_flow(visualization: &RgbImage, flow: &FlowField, foreground: &Mask) -> RgbImage {
    let mut out = visualization.clone();
    if flow.color.dimensions() != out.dimensions() {
        return out;
    }
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if !foreground.get(x, y) {
            continue;
        }
        let flow_pixel = flow.color.get_pixel(x, y);
        for c in 0..3 {
            let sum = f32::from(pixel.0[c]) + f32::from(flow_pixel.0[c]) * FLOW_WEIGHT;
            pixel.0[c] = sum.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Recording frame: overlay plus the masked flow when available.
pub fn render_frame(frame: &RgbImage, map: &LabelMap, flow: Option<&FlowField>) -> RgbImage {
    let visualization = overlay(frame, map, OVERLAY_ALPHA);
    match flow {
        Some(flow) => composite_flow(&visualization, flow, &map.foreground()),
        None => visualization,
    }
}

/// Save `<stem>_mask.png` and `<stem>_mask_frame.png` next to a label path.
pub fn save_debug_masks(label_path: &Path, frame: &RgbImage, map: &LabelMap) -> Result<(PathBuf, PathBuf)> {
    let stem = label_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".to_string());
    let dir = label_path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mask_path = dir.join(format!("{}_mask.png", stem));
    let frame_path = dir.join(format!("{}_mask_frame.png", stem));
    color_id_mask(map).save(&mask_path)?;
    overlay(frame, map, OVERLAY_ALPHA).save(&frame_path)?;
    Ok((mask_path, frame_path))
}
