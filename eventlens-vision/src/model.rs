use std::path::Path;

use anyhow::{Context, Result};
#[cfg(any(feature = "openvino", feature = "cuda"))]
use ort::ep::{self, ExecutionProvider};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};

/// File names of the OpenCV Zoo models the pipeline is built around.
pub const DETECTOR_MODEL_FILE: &str = "face_detection_yunet_2023mar.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "face_recognition_sface_2021dec.onnx";

pub fn session_builder() -> Result<SessionBuilder> {
    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    #[cfg(any(feature = "openvino", feature = "cuda"))]
    let mut builder = builder;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

/// Load an ONNX model from disk.
pub fn load_session(path: &Path) -> Result<Session> {
    anyhow::ensure!(path.exists(), "model file {} not found", path.display());
    let session = session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("loading model {}", path.display()))?;
    log::info!("loaded model {}", path.display());
    Ok(session)
}
