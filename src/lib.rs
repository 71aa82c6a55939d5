pub mod collection;
pub mod config;
pub mod deadline;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod storage;

// Re-export vision types for convenience
pub use eventlens_vision::{
    decode, decode_base64, similarity, Embedding, EmbeddingExtractor, FaceDetector, FaceRegion,
    Image, Pipeline,
};

pub use collection::{load_collection, Collection, CollectionEntry};
pub use deadline::Deadline;
pub use encoder::{encode_results, EncodeOptions, EncodedMatch, SimilarImages};
pub use engine::{Engine, EngineOptions};
pub use error::{Error, Result};
pub use matcher::{match_faces, MatchOptions, MatchResult};
pub use storage::{DirectoryStorage, StorageAdapter};
