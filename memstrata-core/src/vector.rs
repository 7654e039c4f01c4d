//! Exact L2 vector kernels.
//!
//! The flat index stores fixed-dimension f32 vectors contiguously and answers
//! kNN queries by exhaustive scan. Red-hot memory layers eviction, tombstones
//! and persistence on top; the schema index uses it directly over unit-norm
//! embeddings.

use serde::{Deserialize, Serialize};

use crate::error::{FabricError, Result};

/// Squared L2 distance between two equal-length slices.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Normalize a vector to unit L2 norm in place. Zero vectors are left as-is.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Contiguous store of fixed-dimension vectors with exhaustive L2 search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dim: usize) -> Self {
        Self { dim, data: Vec::new() }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of stored vectors, tombstoned slots included.
    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a vector, returning its slot. Rejects dimension mismatches
    /// without touching the index.
    pub fn add(&mut self, vector: &[f32]) -> Result<usize> {
        if vector.len() != self.dim {
            return Err(FabricError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        let slot = self.len();
        self.data.extend_from_slice(vector);
        Ok(slot)
    }

    pub fn vector(&self, slot: usize) -> Option<&[f32]> {
        let start = slot.checked_mul(self.dim)?;
        self.data.get(start..start + self.dim)
    }

    /// Exhaustive kNN over slots accepted by `keep`. Results are sorted by
    /// ascending squared-L2 distance; ties keep slot order (insertion order).
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        mut keep: impl FnMut(usize) -> bool,
    ) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.dim {
            return Err(FabricError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        let mut hits: Vec<(usize, f32)> = (0..self.len())
            .filter(|slot| keep(*slot))
            .map(|slot| {
                let start = slot * self.dim;
                (slot, squared_l2(query, &self.data[start..start + self.dim]))
            })
            .collect();
        hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_has_zero_distance() {
        let mut index = FlatIndex::new(4);
        index.add(&[1.0, 0.0, 0.0, 0.0]).unwrap();
        index.add(&[0.0, 1.0, 0.0, 0.0]).unwrap();
        let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 1, |_| true).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 0);
        assert!(hits[0].1 < 1e-6);
    }

    #[test]
    fn dimension_mismatch_leaves_index_unchanged() {
        let mut index = FlatIndex::new(3);
        assert!(matches!(
            index.add(&[1.0, 2.0]),
            Err(FabricError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn filter_skips_slots() {
        let mut index = FlatIndex::new(2);
        index.add(&[0.0, 0.0]).unwrap();
        index.add(&[1.0, 1.0]).unwrap();
        let hits = index.search(&[0.0, 0.0], 5, |slot| slot != 0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 1);
    }

    #[test]
    fn fewer_than_k_is_not_an_error() {
        let mut index = FlatIndex::new(2);
        index.add(&[0.5, 0.5]).unwrap();
        let hits = index.search(&[0.0, 0.0], 10, |_| true).unwrap();
        assert_eq!(hits.len(), 1);
    }
}
