use crate::embedding::Embedding;
use crate::error::{Result, VisionError};

/// Cosine similarity `dot(a, b) / (|a| * |b|)`, clamped to [-1, 1].
///
/// Inputs need not be unit length. Fails when either vector has zero norm or
/// the two come from models with different output sizes.
pub fn similarity(a: &Embedding, b: &Embedding) -> Result<f32> {
    if a.len() != b.len() {
        return Err(VisionError::DimensionMismatch(a.len(), b.len()));
    }
    if a.is_degenerate() || b.is_degenerate() {
        return Err(VisionError::DegenerateEmbedding);
    }

    let dot = a.view().dot(&b.view());
    let cos = dot / (a.norm() * b.norm());
    Ok(cos.clamp(-1.0, 1.0))
}
