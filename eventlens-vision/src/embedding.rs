use ndarray::{Array1, ArrayView1, Axis};

use crate::error::{Result, VisionError};

/// Face embedding: a fixed-length identity vector produced by the recognizer.
///
/// Two embeddings are only comparable when they come from the same model.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    vector: Array1<f32>,
}

impl Embedding {
    pub fn new(vector: Array1<f32>) -> Self {
        Self { vector }
    }

    pub fn from_vec(values: Vec<f32>) -> Self {
        Self::new(Array1::from_vec(values))
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    pub fn view(&self) -> ArrayView1<'_, f32> {
        self.vector.view()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.to_vec()
    }

    /// Euclidean (L2) norm.
    pub fn norm(&self) -> f32 {
        self.vector.dot(&self.vector).sqrt()
    }

    /// A zero or non-finite norm cannot take part in cosine comparison.
    pub fn is_degenerate(&self) -> bool {
        let norm = self.norm();
        !(norm.is_finite() && norm > 0.0)
    }

    pub fn ensure_non_degenerate(self) -> Result<Self> {
        if self.is_degenerate() {
            return Err(VisionError::DegenerateEmbedding);
        }
        Ok(self)
    }

    /// Unit-length copy of this embedding.
    pub fn normalized(&self) -> Result<Self> {
        if self.is_degenerate() {
            return Err(VisionError::DegenerateEmbedding);
        }
        Ok(Self::new(&self.vector / self.norm()))
    }

    /// Element-wise arithmetic mean, used to collapse every face found in one
    /// reference photo into a single representative vector.
    ///
    /// This discards per-face discriminability: a group photo is represented
    /// by the centroid of its faces.
    pub fn mean(embeddings: &[Embedding]) -> Result<Self> {
        let first = embeddings.first().ok_or(VisionError::EmptyBatch)?;
        let dim = first.len();
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dim) {
            return Err(VisionError::DimensionMismatch(dim, bad.len()));
        }

        let views: Vec<_> = embeddings.iter().map(|e| e.view()).collect();
        let stacked = ndarray::stack(Axis(0), &views).map_err(anyhow::Error::from)?;
        let mean = stacked.mean_axis(Axis(0)).ok_or(VisionError::EmptyBatch)?;
        Ok(Self::new(mean))
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::from_vec(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_norm_and_degenerate() {
        let e = Embedding::from_vec(vec![3.0, 4.0]);
        assert!((e.norm() - 5.0).abs() < 1e-6);
        assert!(!e.is_degenerate());

        let zero = Embedding::from_vec(vec![0.0; 8]);
        assert!(zero.is_degenerate());
        assert!(matches!(
            zero.ensure_non_degenerate(),
            Err(VisionError::DegenerateEmbedding)
        ));

        let nan = Embedding::from_vec(vec![f32::NAN, 1.0]);
        assert!(nan.is_degenerate());
    }

    #[test]
    fn test_normalized_is_unit() {
        let e = Embedding::from_vec(vec![2.0, -2.0, 1.0]).normalized().unwrap();
        assert!((e.norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mean() {
        let a = Embedding::from_vec(vec![1.0, 0.0, 2.0]);
        let b = Embedding::from_vec(vec![0.0, 1.0, 4.0]);
        let mean = Embedding::mean(&[a, b]).unwrap();
        assert_eq!(mean.to_vec(), vec![0.5, 0.5, 3.0]);
    }

    #[test]
    fn test_mean_single_is_identity() {
        let a = Embedding::from_vec(vec![0.25, -0.5]);
        assert_eq!(Embedding::mean(std::slice::from_ref(&a)).unwrap(), a);
    }

    #[test]
    fn test_mean_errors() {
        assert!(matches!(Embedding::mean(&[]), Err(VisionError::EmptyBatch)));

        let a = Embedding::from_vec(vec![1.0, 0.0]);
        let b = Embedding::from_vec(vec![1.0, 0.0, 0.0]);
        assert!(matches!(
            Embedding::mean(&[a, b]),
            Err(VisionError::DimensionMismatch(2, 3))
        ));
    }
}
