use anyhow::{Context, Result};
use directories::ProjectDirs;
use facewatch_vision::ProviderSettings;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::recognize::StreamSettings;

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(path) = std::env::var_os("FACEWATCH_CONFIG") {
        return PathBuf::from(path);
    }
    ProjectDirs::from("", "", "facewatch")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("facewatch.toml"))
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Enrollment root: one subdirectory of images per person.
    pub dataset: PathBuf,
    pub gallery: PathBuf,
    /// Maximum embedding distance for a confident match. Lower is stricter.
    pub tolerance: f32,
    /// Linear scale applied to frames before detection.
    pub downscale: f32,
    /// Run detection on every n-th frame.
    pub decimation: u32,
    pub camera: String,
    pub detector_model: PathBuf,
    pub recognizer_model: PathBuf,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub font: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dataset: PathBuf::from("./dataset"),
            gallery: PathBuf::from("known_faces.bin"),
            tolerance: 0.6,
            downscale: 0.25,
            decimation: 2,
            camera: "/dev/video0".to_string(),
            detector_model: PathBuf::from("models/face_detection_yunet_2023mar.onnx"),
            recognizer_model: PathBuf::from("models/face_recognition_sface_2021dec.onnx"),
            score_threshold: 0.6,
            nms_threshold: 0.3,
            font: PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance >= 0.0) {
            anyhow::bail!("tolerance must be non-negative, got {}", self.tolerance);
        }
        if !(self.downscale > 0.0 && self.downscale <= 1.0) {
            anyhow::bail!("downscale must be in (0, 1], got {}", self.downscale);
        }
        if self.decimation == 0 {
            anyhow::bail!("decimation must be at least 1");
        }
        Ok(())
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            tolerance: self.tolerance,
            downscale: self.downscale,
            decimation: self.decimation,
        }
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            detector_model: self.detector_model.clone(),
            recognizer_model: self.recognizer_model.clone(),
            score_threshold: self.score_threshold,
            nms_threshold: self.nms_threshold,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
