use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use ort::session::Session;

use crate::codec::Image;
use crate::embedding::Embedding;
use crate::error::{Result, VisionError};
use crate::face::{self, FaceRegion, FACE_SIZE};

/// Locates faces in an image. Zero faces is a valid, empty result.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &Image) -> Result<Vec<FaceRegion>>;
}

/// Maps aligned face crops to embeddings, one per region, in input order.
pub trait EmbeddingExtractor: Send + Sync {
    fn embed(&self, faces: &[FaceRegion]) -> Result<Vec<Embedding>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
            nms_threshold: 0.3,
            top_k: 5000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

impl ModelPaths {
    /// Both models under one directory, with their upstream file names.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(crate::model::DETECTOR_MODEL_FILE),
            recognizer: dir.join(crate::model::RECOGNIZER_MODEL_FILE),
        }
    }
}

// Sessions need `&mut` to run; the weights themselves are never modified.
fn lock(session: &Mutex<Session>) -> Result<std::sync::MutexGuard<'_, Session>> {
    session
        .lock()
        .map_err(|_| VisionError::Inference(anyhow!("model session lock poisoned")))
}

/// YuNet detector followed by five-point alignment.
pub struct YuNetDetector {
    session: Mutex<Session>,
    options: DetectorOptions,
}

impl YuNetDetector {
    pub fn load(path: &Path, options: DetectorOptions) -> Result<Self> {
        Ok(Self::from_session(crate::model::load_session(path)?, options))
    }

    pub fn from_session(session: Session, options: DetectorOptions) -> Self {
        Self {
            session: Mutex::new(session),
            options,
        }
    }
}

impl FaceDetector for YuNetDetector {
    fn detect(&self, image: &Image) -> Result<Vec<FaceRegion>> {
        let detections = {
            let mut session = lock(&self.session)?;
            face::detect_faces(
                &mut session,
                image,
                self.options.score_threshold,
                self.options.nms_threshold,
                self.options.top_k,
            )
            .context("detecting faces")?
        };

        Ok(detections
            .into_iter()
            .map(|detection| FaceRegion {
                crop: face::align_face(image, &detection, FACE_SIZE),
                detection,
            })
            .collect())
    }
}

/// SFace recognizer producing 128-dimensional embeddings.
pub struct SFaceExtractor {
    session: Mutex<Session>,
}

impl SFaceExtractor {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::from_session(crate::model::load_session(path)?))
    }

    pub fn from_session(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }
}

impl EmbeddingExtractor for SFaceExtractor {
    fn embed(&self, faces: &[FaceRegion]) -> Result<Vec<Embedding>> {
        let crops: Vec<_> = faces.iter().map(|f| f.crop.clone()).collect();
        let embeddings = {
            let mut session = lock(&self.session)?;
            face::encode_faces(&mut session, &crops).context("encoding faces")?
        };
        if embeddings.len() != faces.len() {
            return Err(VisionError::BatchMismatch {
                expected: faces.len(),
                got: embeddings.len(),
            });
        }
        Ok(embeddings)
    }
}

/// Full pipeline: detect faces → align → encode
///
/// Built once per process and shared; nothing in it changes after load.
#[derive(Clone)]
pub struct Pipeline {
    detector: Arc<dyn FaceDetector>,
    extractor: Arc<dyn EmbeddingExtractor>,
}

impl Pipeline {
    pub fn new(detector: Arc<dyn FaceDetector>, extractor: Arc<dyn EmbeddingExtractor>) -> Self {
        Self {
            detector,
            extractor,
        }
    }

    /// Load YuNet and SFace from disk.
    pub fn load(paths: &ModelPaths, options: DetectorOptions) -> Result<Self> {
        let detector = YuNetDetector::load(&paths.detector, options)?;
        let extractor = SFaceExtractor::load(&paths.recognizer)?;
        Ok(Self::new(Arc::new(detector), Arc::new(extractor)))
    }

    pub fn detect(&self, image: &Image) -> Result<Vec<FaceRegion>> {
        self.detector.detect(image)
    }

    pub fn embed(&self, faces: &[FaceRegion]) -> Result<Vec<Embedding>> {
        if faces.is_empty() {
            return Ok(Vec::new());
        }
        self.extractor.embed(faces)
    }

    /// One embedding per detected face; empty when the image has no faces.
    pub fn face_embeddings(&self, image: &Image) -> Result<Vec<Embedding>> {
        let faces = self.detect(image)?;
        self.embed(&faces)
    }
}
