//! Binary instance masks, dense id maps and mask vectorization

use crate::error::{Error, Result};
use crate::types::{BBox, Point};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{codecs::png::PngEncoder, ColorType, GrayImage, ImageEncoder};
use std::collections::{BTreeSet, VecDeque};

/// 8-neighbourhood, clockwise (image y axis points down) starting west.
const NEIGHBORS: [(i64, i64); 8] = [
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
];

/// Row-major boolean mask, `true` = foreground.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl Mask {
    /// Empty (all background) mask
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    pub fn from_bits(width: u32, height: u32, bits: Vec<bool>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if bits.len() != expected {
            return Err(Error::InvalidMask(format!(
                "expected {} pixels for {}x{}, got {}",
                expected,
                width,
                height,
                bits.len()
            )));
        }
        Ok(Self { width, height, bits })
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> bool) -> Self {
        let mut bits = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                bits.push(f(x, y));
            }
        }
        Self { width, height, bits }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    /// Out-of-bounds reads are background.
    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.bits[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if x < self.width && y < self.height {
            let idx = self.index(x, y);
            self.bits[idx] = value;
        }
    }

    pub fn area(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.bits.iter().any(|b| *b)
    }

    /// Pixel extents of the foreground.
    pub fn bbox(&self) -> Option<BBox> {
        let mut bbox: Option<BBox> = None;
        for (idx, _) in self.bits.iter().enumerate().filter(|(_, b)| **b) {
            let x = (idx % self.width as usize) as f64;
            let y = (idx / self.width as usize) as f64;
            bbox = Some(match bbox {
                None => BBox::new(x, y, x, y),
                Some(b) => BBox::new(b.min_x.min(x), b.min_y.min(y), b.max_x.max(x), b.max_y.max(y)),
            });
        }
        bbox
    }

    /// Integer moment centroid `(m10 / m00, m01 / m00)`; `None` for an empty mask.
    pub fn centroid(&self) -> Option<(i64, i64)> {
        let mut count: u64 = 0;
        let mut sum_x: u64 = 0;
        let mut sum_y: u64 = 0;
        for (idx, _) in self.bits.iter().enumerate().filter(|(_, b)| **b) {
            count += 1;
            sum_x += (idx % self.width as usize) as u64;
            sum_y += (idx / self.width as usize) as u64;
        }
        if count == 0 {
            return None;
        }
        Some(((sum_x / count) as i64, (sum_y / count) as i64))
    }

    /// Largest 8-connected foreground component. Ties keep the first in raster order.
    pub fn largest_component(&self) -> Mask {
        let mut labels: Vec<u32> = vec![0; self.bits.len()];
        let mut best: Option<(u32, usize)> = None;
        let mut next_label = 1u32;
        let mut queue = VecDeque::new();

        for start in 0..self.bits.len() {
            if !self.bits[start] || labels[start] != 0 {
                continue;
            }
            let label = next_label;
            next_label += 1;
            let mut size = 0usize;
            labels[start] = label;
            queue.push_back(start);
            while let Some(idx) = queue.pop_front() {
                size += 1;
                let x = (idx % self.width as usize) as i64;
                let y = (idx / self.width as usize) as i64;
                for (dx, dy) in NEIGHBORS {
                    if let Some(n) = self.checked_index(x + dx, y + dy) {
                        if self.bits[n] && labels[n] == 0 {
                            labels[n] = label;
                            queue.push_back(n);
                        }
                    }
                }
            }
            if best.map_or(true, |(_, best_size)| size > best_size) {
                best = Some((label, size));
            }
        }

        let keep = best.map(|(label, _)| label).unwrap_or(0);
        Mask {
            width: self.width,
            height: self.height,
            bits: labels.iter().map(|l| keep != 0 && *l == keep).collect(),
        }
    }

    /// Outer boundary of the largest component by Moore-neighbour tracing,
    /// as pixel coordinates in clockwise order.
    pub fn outer_contour(&self) -> Vec<Point> {
        let component = self.largest_component();
        let Some(start_idx) = component.bits.iter().position(|b| *b) else {
            return Vec::new();
        };
        let inside = |x: i64, y: i64| component.checked_index(x, y).map_or(false, |i| component.bits[i]);

        let start = (
            (start_idx % self.width as usize) as i64,
            (start_idx / self.width as usize) as i64,
        );
        let mut contour = vec![start];
        let mut current = start;
        // The raster scan guarantees the west neighbour of `start` is background.
        let mut backtrack = 0usize;
        let limit = component.area() * 8 + 8;

        for _ in 0..limit {
            let mut found = None;
            for step in 1..=8 {
                let dir = (backtrack + step) % 8;
                let (dx, dy) = NEIGHBORS[dir];
                let next = (current.0 + dx, current.1 + dy);
                if inside(next.0, next.1) {
                    let (px, py) = NEIGHBORS[(dir + 7) % 8];
                    let prev = (current.0 + px, current.1 + py);
                    found = Some((next, direction_of(prev.0 - next.0, prev.1 - next.1)));
                    break;
                }
            }
            let Some((next, next_backtrack)) = found else {
                break;
            };
            if current == start && contour.len() > 1 && next == contour[1] {
                break;
            }
            contour.push(next);
            current = next;
            backtrack = next_backtrack;
        }

        if contour.len() > 1 && contour.first() == contour.last() {
            contour.pop();
        }
        contour
            .into_iter()
            .map(|(x, y)| Point::new(x as f64, y as f64))
            .collect()
    }

    /// Simplified outer polygon (Douglas-Peucker with tolerance `epsilon`).
    pub fn to_polygon(&self, epsilon: f64) -> Vec<Point> {
        simplify_closed(&self.outer_contour(), epsilon)
    }

    /// Single-channel PNG (foreground = 1) encoded as base64.
    pub fn to_png_base64(&self) -> Result<String> {
        let raw: Vec<u8> = self.bits.iter().map(|b| u8::from(*b)).collect();
        let mut png = Vec::new();
        PngEncoder::new(&mut png).write_image(&raw, self.width, self.height, ColorType::L8)?;
        Ok(STANDARD.encode(png))
    }

    /// Decode a base64 PNG; any non-zero pixel of the first channel is foreground.
    pub fn from_png_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::InvalidMask(format!("invalid base64 mask: {}", e)))?;
        let gray = image::load_from_memory(&bytes)?.to_luma8();
        Ok(Self::from_gray(&gray))
    }

    pub fn from_gray(img: &GrayImage) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            bits: img.pixels().map(|p| p.0[0] != 0).collect(),
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    fn checked_index(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            None
        } else {
            Some(y as usize * self.width as usize + x as usize)
        }
    }
}

fn direction_of(dx: i64, dy: i64) -> usize {
    NEIGHBORS.iter().position(|d| *d == (dx, dy)).unwrap_or(0)
}

fn perpendicular_distance(p: Point, a: Point, b: Point) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        return ((p.x - a.x).powi(2) + (p.y - a.y).powi(2)).sqrt();
    }
    ((p.x - a.x) * dy - (p.y - a.y) * dx).abs() / len
}

/// Marks the points of `points[start..=end]` that survive simplification.
fn reduce(points: &[Point], keep: &mut [bool], start: usize, end: usize, epsilon: f64) {
    let mut stack = vec![(start, end)];
    while let Some((s, e)) = stack.pop() {
        if e <= s + 1 {
            continue;
        }
        let mut max_dist = 0.0;
        let mut split = s;
        for i in s + 1..e {
            let d = perpendicular_distance(points[i], points[s], points[e]);
            if d > max_dist {
                max_dist = d;
                split = i;
            }
        }
        if max_dist > epsilon {
            keep[split] = true;
            stack.push((s, split));
            stack.push((split, e));
        }
    }
}

/// Douglas-Peucker over a closed ring, anchored at the first point and the
/// point farthest from it.
pub fn simplify_closed(points: &[Point], epsilon: f64) -> Vec<Point> {
    let n = points.len();
    if n < 4 || epsilon <= 0.0 {
        return points.to_vec();
    }
    let first = points[0];
    let far = (1..n)
        .max_by(|a, b| {
            let da = (points[*a].x - first.x).powi(2) + (points[*a].y - first.y).powi(2);
            let db = (points[*b].x - first.x).powi(2) + (points[*b].y - first.y).powi(2);
            da.total_cmp(&db)
        })
        .unwrap_or(1);

    let mut ring = points.to_vec();
    ring.push(first);
    let mut keep = vec![false; n + 1];
    keep[0] = true;
    keep[far] = true;
    keep[n] = true;
    reduce(&ring, &mut keep, 0, far, epsilon);
    reduce(&ring, &mut keep, far, n, epsilon);

    ring[..n]
        .iter()
        .zip(&keep[..n])
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

/// Dense per-pixel instance ids, 0 = background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    width: u32,
    height: u32,
    ids: Vec<u16>,
}

impl LabelMap {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ids: vec![0; width as usize * height as usize],
        }
    }

    pub fn from_ids(width: u32, height: u32, ids: Vec<u16>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if ids.len() != expected {
            return Err(Error::InvalidMask(format!(
                "expected {} ids for {}x{}, got {}",
                expected,
                width,
                height,
                ids.len()
            )));
        }
        Ok(Self { width, height, ids })
    }

    /// Grayscale id image, pixel value = instance id.
    pub fn from_gray(img: &GrayImage) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            ids: img.pixels().map(|p| u16::from(p.0[0])).collect(),
        }
    }

    /// Paints masks in order; later masks win on overlap. Masks of another
    /// size are ignored.
    pub fn from_masks<'a>(width: u32, height: u32, masks: impl IntoIterator<Item = (u16, &'a Mask)>) -> Self {
        let mut map = Self::new(width, height);
        for (id, mask) in masks {
            if mask.width != width || mask.height != height {
                continue;
            }
            for (slot, bit) in map.ids.iter_mut().zip(&mask.bits) {
                if *bit {
                    *slot = id;
                }
            }
        }
        map
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn ids(&self) -> &[u16] {
        &self.ids
    }

    pub fn get(&self, x: u32, y: u32) -> u16 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.ids[y as usize * self.width as usize + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, id: u16) {
        if x < self.width && y < self.height {
            self.ids[y as usize * self.width as usize + x as usize] = id;
        }
    }

    /// Sorted distinct non-background ids.
    pub fn instance_ids(&self) -> Vec<u16> {
        self.ids
            .iter()
            .copied()
            .filter(|id| *id != 0)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn mask_for(&self, id: u16) -> Mask {
        Mask {
            width: self.width,
            height: self.height,
            bits: self.ids.iter().map(|v| *v == id).collect(),
        }
    }

    pub fn foreground(&self) -> Mask {
        Mask {
            width: self.width,
            height: self.height,
            bits: self.ids.iter().map(|v| *v != 0).collect(),
        }
    }

    /// One plane per id `1..=num_objects`; the background plane is dropped.
    pub fn one_hot(&self, num_objects: u16) -> Vec<Mask> {
        (1..=num_objects).map(|id| self.mask_for(id)).collect()
    }
}
