//! In-memory vector index with cosine similarity search.
//!
//! Vectors live in one contiguous buffer, addressed by slot. Slots are
//! assigned in insertion order and never change, so slot `n` is always the
//! `n`th vector pushed. Every vector is L2-normalized on the way in, which
//! makes the score of a query against a slot a plain dot product.

use std::cmp::Ordering;

/// Search hit from the vector index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub slot: usize,
    /// Cosine similarity in `[-1.0, 1.0]`
    pub score: f32,
}

/// Flat (exact) k-nearest-neighbor index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimensions: usize,
    /// `len * dimensions` normalized values, slot-major
    data: Vec<f32>,
}

impl VectorIndex {
    /// Create a new empty vector index with specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            data: Vec::new(),
        }
    }

    /// Create an index with pre-allocated capacity.
    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            dimensions,
            data: Vec::with_capacity(dimensions * capacity),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.data.len() / self.dimensions
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a vector, returning its slot.
    ///
    /// Returns an error if the dimensions are wrong or the vector has zero
    /// norm (cannot be normalized).
    pub fn push(&mut self, embedding: &[f32]) -> Result<usize, IndexError> {
        if embedding.len() != self.dimensions || self.dimensions == 0 {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }

        let norm = l2_norm(embedding);
        if !norm.is_finite() || norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let slot = self.len();
        self.data.extend(embedding.iter().map(|v| v / norm));
        Ok(slot)
    }

    /// Rebuild an index from already-normalized values in slot order.
    /// Used when loading from storage.
    pub(crate) fn from_raw(dimensions: usize, data: Vec<f32>) -> Result<Self, IndexError> {
        if dimensions == 0 || data.len() % dimensions != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: dimensions,
                got: data.len(),
            });
        }
        Ok(Self { dimensions, data })
    }

    pub(crate) fn raw(&self) -> &[f32] {
        &self.data
    }

    /// Normalized vector stored at `slot`.
    pub fn vector(&self, slot: usize) -> Option<&[f32]> {
        let start = slot.checked_mul(self.dimensions)?;
        self.data.get(start..start + self.dimensions)
    }

    /// Iterate over `(slot, vector)` in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[f32])> {
        self.data.chunks_exact(self.dimensions.max(1)).enumerate()
    }

    /// Return the `limit` slots most similar to `query`.
    ///
    /// Results are sorted by score descending; equal scores keep ascending
    /// slot order.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<Hit>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let query_norm = l2_norm(query);
        if !query_norm.is_finite() || query_norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }
        let query: Vec<f32> = query.iter().map(|v| v / query_norm).collect();

        let mut hits: Vec<Hit> = self
            .iter()
            .map(|(slot, vector)| Hit {
                slot,
                score: dot(&query, vector),
            })
            .collect();

        hits.sort_by(compare_hits);
        hits.truncate(limit);

        Ok(hits)
    }
}

/// Score descending, then slot ascending.
pub fn compare_hits(a: &Hit, b: &Hit) -> Ordering {
    b.score.total_cmp(&a.score).then(a.slot.cmp(&b.slot))
}

pub(crate) fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_index() {
        let index = VectorIndex::new(384);
        assert_eq!(index.dimensions(), 384);
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_push_assigns_sequential_slots() {
        let mut index = VectorIndex::new(3);
        assert_eq!(index.push(&[3.0, 0.0, 0.0]).unwrap(), 0);
        assert_eq!(index.push(&[0.0, 2.0, 0.0]).unwrap(), 1);
        assert_eq!(index.len(), 2);

        // stored normalized
        assert_eq!(index.vector(0).unwrap(), &[1.0, 0.0, 0.0]);
        assert_eq!(index.vector(1).unwrap(), &[0.0, 1.0, 0.0]);
        assert!(index.vector(2).is_none());
    }

    #[test]
    fn test_push_dimension_mismatch() {
        let mut index = VectorIndex::new(3);
        let result = index.push(&[1.0, 0.0, 0.0, 0.0]);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
        assert!(index.is_empty());
    }

    #[test]
    fn test_push_zero_norm_rejected() {
        let mut index = VectorIndex::new(3);
        let result = index.push(&[0.0, 0.0, 0.0]);
        assert!(matches!(result, Err(IndexError::ZeroNormVector)));
    }

    #[test]
    fn test_search_basic() {
        let mut index = VectorIndex::new(3);
        index.push(&[1.0, 0.0, 0.0]).unwrap();
        index.push(&[0.0, 1.0, 0.0]).unwrap();

        let results = index.search(&[1.0, 0.1, 0.0], 10).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].slot, 0);
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_exact_match_scores_one() {
        let mut index = VectorIndex::new(3);
        index.push(&[0.2, 0.3, 0.9]).unwrap();
        index.push(&[0.9, 0.1, 0.0]).unwrap();

        let results = index.search(&[0.4, 0.6, 1.8], 1).unwrap();
        assert_eq!(results[0].slot, 0);
        assert!((results[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_search_with_limit() {
        let mut index = VectorIndex::new(3);
        for i in 0..10 {
            index.push(&[1.0, i as f32 * 0.1, 0.0]).unwrap();
        }

        assert_eq!(index.search(&[1.0, 0.0, 0.0], 3).unwrap().len(), 3);
        assert_eq!(index.search(&[1.0, 0.0, 0.0], 50).unwrap().len(), 10);
    }

    #[test]
    fn test_ties_break_by_slot() {
        let mut index = VectorIndex::new(2);
        index.push(&[0.0, 1.0]).unwrap();
        index.push(&[1.0, 0.0]).unwrap();
        index.push(&[2.0, 0.0]).unwrap();
        index.push(&[0.5, 0.0]).unwrap();

        let results = index.search(&[1.0, 0.0], 4).unwrap();
        let slots: Vec<usize> = results.iter().map(|h| h.slot).collect();
        assert_eq!(slots, vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_scores_are_non_increasing() {
        let mut index = VectorIndex::new(3);
        for i in 0..20 {
            let f = i as f32;
            index.push(&[f.sin(), f.cos(), 0.5]).unwrap();
        }
        let results = index.search(&[0.3, -0.2, 1.0], 20).unwrap();
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_zero_query_rejected() {
        let mut index = VectorIndex::new(2);
        index.push(&[1.0, 0.0]).unwrap();
        assert!(matches!(index.search(&[0.0, 0.0], 1), Err(IndexError::ZeroNormVector)));
        assert!(matches!(
            index.search(&[1.0], 1),
            Err(IndexError::DimensionMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn test_from_raw_checks_shape() {
        assert!(VectorIndex::from_raw(3, vec![1.0; 7]).is_err());
        let index = VectorIndex::from_raw(3, vec![1.0; 9]).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.iter().count(), 3);
    }
}
