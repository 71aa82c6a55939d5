use std::time::Duration;

use eventlens_vision::VisionError;
use thiserror::Error;

/// Every way a face-matching request can fail.
///
/// An empty or missing collection is not an error: it simply yields no matches.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid image: {0}")]
    Decode(String),
    #[error("no face detected in the query image")]
    NoFaceDetected,
    #[error("degenerate embedding: {0}")]
    DegenerateEmbedding(String),
    #[error("invalid collection name {0:?}")]
    InvalidCollection(String),
    #[error("similarity threshold {0} is outside [-1, 1]")]
    InvalidThreshold(f32),
    #[error("{collection}/{identifier} already exists")]
    AlreadyExists {
        collection: String,
        identifier: String,
    },
    #[error("storage: {context}")]
    Storage {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("request exceeded its {0:?} time budget")]
    Timeout(Duration),
    #[error(transparent)]
    Vision(VisionError),
}

impl Error {
    /// Wrap a backend failure. Any error type works, so adapters for object
    /// stores or databases can pass their client errors through unchanged.
    pub fn storage(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Storage {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Whether the caller sent something unusable (4xx), as opposed to an
    /// internal or infrastructure fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Decode(_)
                | Self::NoFaceDetected
                | Self::InvalidCollection(_)
                | Self::InvalidThreshold(_)
        )
    }
}

impl From<VisionError> for Error {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::Decode(msg) => Self::Decode(msg),
            VisionError::DegenerateEmbedding => {
                Self::DegenerateEmbedding("embedding has zero norm".to_string())
            }
            other => Self::Vision(other),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
