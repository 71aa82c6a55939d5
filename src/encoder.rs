use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use eventlens_vision::encode_jpeg;
use serde::{Serialize, Serializer};

use crate::error::Result;
use crate::matcher::MatchResult;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeOptions {
    pub jpeg_quality: u8,
    pub display_precision: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: 90,
            display_precision: 4,
        }
    }
}

/// A match ready to hand to any delivery channel.
#[derive(Debug, Clone, Serialize)]
pub struct EncodedMatch {
    #[serde(rename = "filename")]
    pub identifier: String,
    pub similarity: f32,
    /// Similarity rounded for people, e.g. `"0.8213"`.
    #[serde(rename = "similarity_label")]
    pub display_similarity: String,
    #[serde(rename = "image", serialize_with = "as_base64")]
    pub jpeg: Vec<u8>,
}

fn as_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64.encode(bytes))
}

/// JSON body returned to HTTP-style callers.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarImages {
    pub similar_images: Vec<EncodedMatch>,
}

pub fn format_similarity(similarity: f32, precision: usize) -> String {
    format!("{similarity:.precision$}")
}

/// Re-encode each matched image as JPEG alongside its score, keeping order.
pub fn encode_results(
    matches: &[MatchResult<'_>],
    options: &EncodeOptions,
) -> Result<Vec<EncodedMatch>> {
    matches
        .iter()
        .map(|m| {
            Ok(EncodedMatch {
                identifier: m.identifier().to_string(),
                similarity: m.similarity,
                display_similarity: format_similarity(m.similarity, options.display_precision),
                jpeg: encode_jpeg(m.image(), options.jpeg_quality)?,
            })
        })
        .collect()
}
