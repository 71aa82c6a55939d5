pub mod codec;
pub mod embedding;
pub mod error;
pub mod face;
pub mod model;
pub mod pipeline;
pub mod similarity;
pub mod yunet;

// Re-export commonly used types
pub use codec::{decode, decode_base64, encode_jpeg, Image};
pub use embedding::Embedding;
pub use error::{Result, VisionError};
pub use face::{Detection, FaceRegion};
pub use pipeline::{
    DetectorOptions, EmbeddingExtractor, FaceDetector, ModelPaths, Pipeline, SFaceExtractor,
    YuNetDetector,
};
pub use similarity::similarity;
