//! Recency cache of instance bounding boxes used as recovery prompts

use annotrack_core::{BBox, Point};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Cached box with its insertion rank (higher = more recent)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachedBox {
    pub bbox: BBox,
    pub rank: u64,
}

/// Admission window on box area as a share of the frame area: `(min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxAdmission {
    pub min_ratio: f64,
    pub max_ratio: f64,
}

impl Default for BoxAdmission {
    fn default() -> Self {
        Self {
            min_ratio: 0.0002,
            max_ratio: 0.5,
        }
    }
}

impl BoxAdmission {
    pub fn admits(&self, bbox: &BBox, frame_area: f64) -> bool {
        if !bbox.is_finite() || !(frame_area > 0.0) {
            return false;
        }
        let area = bbox.area();
        area > frame_area * self.min_ratio && area <= frame_area * self.max_ratio
    }
}

/// Bounded FIFO of boxes per label. Reads never refresh an entry.
#[derive(Debug)]
pub struct BboxCache {
    capacity: usize,
    admission: BoxAdmission,
    entries: HashMap<String, VecDeque<CachedBox>>,
    order: VecDeque<String>,
    next_rank: u64,
}

impl BboxCache {
    pub fn new(capacity: usize, admission: BoxAdmission) -> Self {
        Self {
            capacity: capacity.max(1),
            admission,
            entries: HashMap::new(),
            order: VecDeque::new(),
            next_rank: 0,
        }
    }

    /// Add a box if it passes admission; evicts the oldest box when full.
    pub fn add(&mut self, label: &str, bbox: BBox, frame_area: f64) -> bool {
        if !self.admission.admits(&bbox, frame_area) {
            debug!("Rejected box for {} with area {:.1}", label, bbox.area());
            return false;
        }
        let rank = self.next_rank;
        self.next_rank += 1;
        self.entries
            .entry(label.to_string())
            .or_default()
            .push_back(CachedBox { bbox, rank });
        self.order.push_back(label.to_string());

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                if let Some(boxes) = self.entries.get_mut(&oldest) {
                    boxes.pop_front();
                    if boxes.is_empty() {
                        self.entries.remove(&oldest);
                    }
                }
            }
        }
        true
    }

    /// Cache the bounds of a polygon. Polygons with fewer than four
    /// vertices are too coarse to prompt with.
    pub fn add_polygon(&mut self, label: &str, points: &[Point], frame_area: f64) -> bool {
        if points.len() < 4 {
            return false;
        }
        match BBox::from_points(points) {
            Some(bbox) => self.add(label, bbox, frame_area),
            None => false,
        }
    }

    pub fn most_recent(&self, label: &str) -> Option<BBox> {
        self.entries.get(label).and_then(|boxes| boxes.back()).map(|b| b.bbox)
    }

    pub fn entries(&self, label: &str) -> Vec<CachedBox> {
        self.entries
            .get(label)
            .map(|boxes| boxes.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_AREA: f64 = 100.0 * 100.0;

    fn square(x: f64, side: f64) -> BBox {
        BBox::new(x, x, x + side, x + side)
    }

    #[test]
    fn test_most_recent_unknown_label() {
        let cache = BboxCache::new(4, BoxAdmission::default());
        assert!(cache.most_recent("a").is_none());
    }

    #[test]
    fn test_capacity_bound() {
        let mut cache = BboxCache::new(3, BoxAdmission::default());
        for i in 0..10 {
            assert!(cache.add("a", square(i as f64, 10.0), FRAME_AREA));
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.most_recent("a"), Some(square(9.0, 10.0)));
        let ranks: Vec<u64> = cache.entries("a").iter().map(|b| b.rank).collect();
        assert_eq!(ranks, vec![7, 8, 9]);
    }

    #[test]
    fn test_eviction_is_fifo_across_labels() {
        let mut cache = BboxCache::new(2, BoxAdmission::default());
        cache.add("a", square(0.0, 10.0), FRAME_AREA);
        cache.add("b", square(1.0, 10.0), FRAME_AREA);
        cache.add("b", square(2.0, 10.0), FRAME_AREA);
        assert!(cache.most_recent("a").is_none());
        assert_eq!(cache.entries("b").len(), 2);
    }

    #[test]
    fn test_box_admission_window() {
        let mut cache = BboxCache::new(10, BoxAdmission::default());
        // 0.02% of 10000 is 2.0, exclusive
        assert!(!cache.add("a", BBox::new(0.0, 0.0, 2.0, 1.0), FRAME_AREA));
        assert!(cache.add("a", BBox::new(0.0, 0.0, 3.0, 1.0), FRAME_AREA));
        // 50% is inclusive
        assert!(cache.add("a", BBox::new(0.0, 0.0, 100.0, 50.0), FRAME_AREA));
        assert!(!cache.add("a", BBox::new(0.0, 0.0, 100.0, 51.0), FRAME_AREA));
        assert!(!cache.add("a", BBox::new(0.0, 0.0, f64::NAN, 1.0), FRAME_AREA));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_polygon_needs_four_points() {
        let mut cache = BboxCache::new(10, BoxAdmission::default());
        let triangle = vec![Point::new(0.0, 0.0), Point::new(20.0, 0.0), Point::new(0.0, 20.0)];
        assert!(!cache.add_polygon("a", &triangle, FRAME_AREA));
        let quad = vec![
            Point::new(0.0, 0.0),
            Point::new(20.0, 0.0),
            Point::new(20.0, 20.0),
            Point::new(0.0, 20.0),
        ];
        assert!(cache.add_polygon("a", &quad, FRAME_AREA));
        assert_eq!(cache.most_recent("a"), Some(BBox::new(0.0, 0.0, 20.0, 20.0)));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = BboxCache::new(0, BoxAdmission::default());
        assert_eq!(cache.capacity(), 1);
    }
}
