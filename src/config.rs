use anyhow::{Context, Result};
use directories::ProjectDirs;
use eventlens_vision::{model, DetectorOptions, ModelPaths};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

static PROJECT_DIRS: Lazy<Option<ProjectDirs>> =
    Lazy::new(|| ProjectDirs::from("", "", "eventlens"));

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| match option_env!("EVENTLENS_CONFIG_PATH") {
    Some(path) => PathBuf::from(path),
    None => PROJECT_DIRS
        .as_ref()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("eventlens.toml")),
});

pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| match option_env!("EVENTLENS_DATA_DIR") {
    Some(path) => PathBuf::from(path),
    None => PROJECT_DIRS
        .as_ref()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".")),
});

/// Similarity at or above which a reference photo counts as a match.
pub const DEFAULT_THRESHOLD: f32 = 0.6;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub threshold: f32,
    /// Keep only the best N matches after ranking.
    pub max_results: Option<usize>,
    pub storage_root: PathBuf,
    pub detector_model: PathBuf,
    pub recognizer_model: PathBuf,
    pub detector_score_threshold: f32,
    pub detector_nms_threshold: f32,
    pub detector_top_k: usize,
    pub jpeg_quality: u8,
    /// Decimal places used when showing a similarity to a person.
    pub display_precision: usize,
    /// Wall-time budget per request; unbounded when absent.
    pub request_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let models = ModelPaths::in_dir(&DATA_DIR.join("models"));
        let detector = DetectorOptions::default();
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_results: None,
            storage_root: DATA_DIR.join("collections"),
            detector_model: models.detector,
            recognizer_model: models.recognizer,
            detector_score_threshold: detector.score_threshold,
            detector_nms_threshold: detector.nms_threshold,
            detector_top_k: detector.top_k,
            jpeg_quality: 90,
            display_precision: 4,
            request_timeout_secs: None,
        }
    }
}

impl Config {
    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            detector: self.detector_model.clone(),
            recognizer: self.recognizer_model.clone(),
        }
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            score_threshold: self.detector_score_threshold,
            nms_threshold: self.detector_nms_threshold,
            top_k: self.detector_top_k,
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Point both model paths at the upstream file names inside `dir`.
    pub fn with_model_dir(mut self, dir: &Path) -> Self {
        self.detector_model = dir.join(model::DETECTOR_MODEL_FILE);
        self.recognizer_model = dir.join(model::RECOGNIZER_MODEL_FILE);
        self
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(CONFIG_PATH.as_path());
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    crate::matcher::validate_threshold(cfg.threshold)
        .with_context(|| format!("checking config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(CONFIG_PATH.as_path());
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data).with_context(|| format!("writing config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg.threshold, DEFAULT_THRESHOLD);
        assert_eq!(cfg.max_results, None);
        assert!(cfg.request_timeout().is_none());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "threshold = 0.75\nmax_results = 3\n").unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.threshold, 0.75);
        assert_eq!(cfg.max_results, Some(3));
        assert_eq!(cfg.jpeg_quality, 90);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            threshold: 0.5,
            request_timeout_secs: Some(30),
            ..Config::default()
        }
        .with_model_dir(Path::new("/srv/models"));

        save_config(&cfg, Some(&path)).unwrap();
        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.threshold, 0.5);
        assert_eq!(loaded.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(loaded.model_paths().detector, cfg.detector_model);
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "threshold = 1.5\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
