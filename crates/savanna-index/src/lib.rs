//! Uniform-grid spatial hashing for entity proximity queries.
//!
//! The index is a hash multimap from cell keys to lightweight per-tick
//! tracker copies. It is rebuilt from scratch every tick: `clear` empties the
//! buckets (keeping their allocations), entries are appended in slot order,
//! and queries only begin once the build is complete. There is no removal
//! primitive.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Multiplier folding the y cell coordinate into a single hash key. Large
/// enough that in-bounds x and y cells can never collide.
pub const Y_MULTIPLIER: i64 = 1000;

/// Errors emitted by the spatial index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Minimal view the index needs of an entry: its world-space position.
pub trait Tracked {
    /// World-space position of the tracked entity.
    fn position(&self) -> (f32, f32);
}

/// Uniform-grid hash multimap over tracker entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct GridIndex<T> {
    cell_size: f32,
    #[serde(skip)]
    buckets: HashMap<i64, Vec<T>>,
}

impl<T: Tracked> GridIndex<T> {
    /// Create an empty index with the provided cell edge length.
    pub fn new(cell_size: f32) -> Result<Self, IndexError> {
        if !(cell_size > 0.0) {
            return Err(IndexError::InvalidConfig("cell_size must be positive"));
        }
        Ok(Self {
            cell_size,
            buckets: HashMap::new(),
        })
    }

    /// Edge length of one grid cell.
    #[must_use]
    pub const fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Hash key of the cell containing `point`.
    #[must_use]
    pub fn cell_hash(&self, point: (f32, f32)) -> i64 {
        let cell_x = (point.0 / self.cell_size).floor() as i64;
        let cell_y = (point.1 / self.cell_size).floor() as i64;
        cell_x + Y_MULTIPLIER * cell_y
    }

    /// Empty every bucket, retaining their allocations for the next build.
    pub fn clear(&mut self) {
        for bucket in self.buckets.values_mut() {
            bucket.clear();
        }
    }

    /// Append an entry to the bucket of the cell containing its position.
    /// No dedup; within a bucket, entries keep insertion order.
    pub fn insert(&mut self, entry: T) {
        let hash = self.cell_hash(entry.position());
        self.buckets.entry(hash).or_default().push(entry);
    }

    /// Total number of entries across all buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(Vec::is_empty)
    }

    /// Find the entry satisfying `predicate` that is nearest to `origin`,
    /// strictly closer than `radius`.
    ///
    /// Scans the square neighborhood of cells within
    /// `ceil(radius / cell_size)` cells of the origin's cell, row-major (x
    /// outer, y inner). The square over-scans the corners of the circle; the
    /// strict squared-distance comparison keeps the first candidate found on
    /// a tie, so the fixed scan order makes results deterministic.
    pub fn query_nearest<P>(&self, origin: (f32, f32), radius: f32, mut predicate: P) -> Option<&T>
    where
        P: FnMut(&T) -> bool,
    {
        let reach = (radius / self.cell_size).ceil() as i64;
        let cell_x = (origin.0 / self.cell_size).floor() as i64;
        let cell_y = (origin.1 / self.cell_size).floor() as i64;

        let mut best = None;
        let mut best_distance = OrderedFloat(radius * radius);
        for x in (cell_x - reach)..=(cell_x + reach) {
            for y in (cell_y - reach)..=(cell_y + reach) {
                let Some(bucket) = self.buckets.get(&(x + Y_MULTIPLIER * y)) else {
                    continue;
                };
                for entry in bucket {
                    if !predicate(entry) {
                        continue;
                    }
                    let (entry_x, entry_y) = entry.position();
                    let dx = entry_x - origin.0;
                    let dy = entry_y - origin.1;
                    let distance = OrderedFloat(dx * dx + dy * dy);
                    if distance < best_distance {
                        best_distance = distance;
                        best = Some(entry);
                    }
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Probe {
        id: u32,
        at: (f32, f32),
    }

    impl Tracked for Probe {
        fn position(&self) -> (f32, f32) {
            self.at
        }
    }

    fn probe(id: u32, x: f32, y: f32) -> Probe {
        Probe { id, at: (x, y) }
    }

    #[test]
    fn rejects_non_positive_cell_size() {
        assert!(GridIndex::<Probe>::new(0.0).is_err());
        assert!(GridIndex::<Probe>::new(-5.0).is_err());
        assert!(GridIndex::<Probe>::new(f32::NAN).is_err());
        assert!(GridIndex::<Probe>::new(5.0).is_ok());
    }

    #[test]
    fn cell_hash_separates_axes() {
        let index = GridIndex::<Probe>::new(5.0).expect("index");
        assert_eq!(index.cell_hash((0.0, 0.0)), 0);
        assert_eq!(index.cell_hash((4.9, 0.0)), 0);
        assert_eq!(index.cell_hash((5.0, 0.0)), 1);
        assert_eq!(index.cell_hash((0.0, 5.0)), Y_MULTIPLIER);
        assert_eq!(index.cell_hash((-0.1, 0.0)), -1);
        assert_eq!(index.cell_hash((-0.1, -0.1)), -1 - Y_MULTIPLIER);
        // Neighboring cells on different rows never share a key in-bounds.
        assert_ne!(index.cell_hash((999.0, 0.0)), index.cell_hash((0.0, 5.0)));
    }

    #[test]
    fn nearest_prefers_minimum_distance() {
        let mut index = GridIndex::new(5.0).expect("index");
        index.insert(probe(1, 4.0, 0.0));
        index.insert(probe(2, 1.0, 0.0));
        index.insert(probe(3, 9.0, 0.0));

        let found = index.query_nearest((0.0, 0.0), 10.0, |_| true).expect("hit");
        assert_eq!(found.id, 2);
    }

    #[test]
    fn nearest_excludes_entries_at_exact_radius() {
        let mut index = GridIndex::new(5.0).expect("index");
        index.insert(probe(1, 3.0, 0.0));
        assert!(index.query_nearest((0.0, 0.0), 3.0, |_| true).is_none());
        assert!(index.query_nearest((0.0, 0.0), 3.01, |_| true).is_some());
    }

    #[test]
    fn ties_keep_the_first_entry_in_scan_order() {
        let mut index = GridIndex::new(5.0).expect("index");
        // Same cell, equidistant from the origin; insertion order decides.
        index.insert(probe(7, 2.0, 0.0));
        index.insert(probe(8, 0.0, 2.0));

        let found = index.query_nearest((0.0, 0.0), 5.0, |_| true).expect("hit");
        assert_eq!(found.id, 7);
    }

    #[test]
    fn predicate_filters_candidates() {
        let mut index = GridIndex::new(5.0).expect("index");
        index.insert(probe(1, 1.0, 0.0));
        index.insert(probe(2, 2.0, 0.0));

        let found = index
            .query_nearest((0.0, 0.0), 10.0, |entry| entry.id != 1)
            .expect("hit");
        assert_eq!(found.id, 2);
    }

    #[test]
    fn neighborhood_covers_entries_across_cell_borders() {
        let mut index = GridIndex::new(5.0).expect("index");
        // Origin sits in cell (0, 0); the entry two cells over is still
        // inside the scanned square for radius 8.
        index.insert(probe(1, 7.5, 7.5));
        let found = index.query_nearest((0.5, 0.5), 10.5, |_| true).expect("hit");
        assert_eq!(found.id, 1);
    }

    #[test]
    fn clear_empties_but_keeps_buckets() {
        let mut index = GridIndex::new(5.0).expect("index");
        index.insert(probe(1, 0.0, 0.0));
        index.insert(probe(2, 12.0, 3.0));
        assert_eq!(index.len(), 2);

        index.clear();
        assert!(index.is_empty());
        assert!(index.query_nearest((0.0, 0.0), 50.0, |_| true).is_none());

        index.insert(probe(3, 1.0, 1.0));
        assert_eq!(index.len(), 1);
    }
}
