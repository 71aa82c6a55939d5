use thiserror::Error;

/// Failures produced by the vision layer.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("cannot decode image: {0}")]
    Decode(String),
    #[error("cannot encode image: {0}")]
    Encode(String),
    #[error("embedding has zero or non-finite norm")]
    DegenerateEmbedding,
    #[error("embedding dimensions differ ({0} vs {1})")]
    DimensionMismatch(usize, usize),
    #[error("no embeddings to average")]
    EmptyBatch,
    #[error("model produced {got} embeddings for {expected} faces")]
    BatchMismatch { expected: usize, got: usize },
    #[error(transparent)]
    Inference(#[from] anyhow::Error),
}

pub type Result<T, E = VisionError> = std::result::Result<T, E>;
