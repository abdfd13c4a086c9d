//! Model and runtime configuration.
//!
//! The class table and normalization statistics are data, not logic: a model
//! trained on different classes or statistics only needs a different
//! [`ModelConfig`].

use crate::error::{ClassifierError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_ASSET_NAME: &str = "mobilenet_cpu_only.onnx";

// ImageNet normalization constants
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

pub const DEFAULT_INPUT_SIZE: u32 = 224;

/// Largest accepted input side; keeps the tensor allocation bounded.
pub const MAX_INPUT_SIZE: u32 = 4096;

/// Deserializing accepts the same field names wherever the config appears
/// (standalone file or the `model` section of [`ClassifierSettings`]) and
/// validates the result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelConfig {
    /// Class names, ordered by output index.
    pub class_names: Vec<String>,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// Side length of the square model input.
    pub input_size: u32,
    /// Index of the class reported as benign (no disease).
    pub benign_index: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            class_names: vec![
                "Diabetic Retinopathy".to_string(),
                "No Diabetic Retinopathy".to_string(),
            ],
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
            input_size: DEFAULT_INPUT_SIZE,
            benign_index: 1,
        }
    }
}

/// On-disk shape of a model config. Accepts our own field names as well as a
/// Hugging Face style `config.json` (`id2label`, `image_mean`, ...). Missing
/// fields fall back to [`ModelConfig::default`].
#[derive(Deserialize)]
struct ConfigFile {
    class_names: Option<Vec<String>>,
    id2label: Option<BTreeMap<String, String>>,
    #[serde(alias = "image_mean")]
    mean: Option<[f32; 3]>,
    #[serde(alias = "image_std")]
    std: Option<[f32; 3]>,
    #[serde(alias = "image_size")]
    input_size: Option<u32>,
    benign_index: Option<usize>,
}

impl ModelConfig {
    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(content)?;
        file.into_config()
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClassifierError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.class_names.is_empty() {
            return Err(ClassifierError::config("class table is empty"));
        }
        if self.input_size == 0 || self.input_size > MAX_INPUT_SIZE {
            return Err(ClassifierError::config(format!(
                "input size must be between 1 and {}, got {}",
                MAX_INPUT_SIZE, self.input_size
            )));
        }
        if self.std.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(ClassifierError::config(format!(
                "std must be finite and positive, got {:?}",
                self.std
            )));
        }
        if self.mean.iter().any(|m| !m.is_finite()) {
            return Err(ClassifierError::config(format!(
                "mean must be finite, got {:?}",
                self.mean
            )));
        }
        if self.benign_index >= self.class_names.len() {
            return Err(ClassifierError::config(format!(
                "benign index {} out of range for {} classes",
                self.benign_index,
                self.class_names.len()
            )));
        }
        Ok(())
    }
}

impl<'de> Deserialize<'de> for ModelConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        ConfigFile::deserialize(deserializer)?
            .into_config()
            .map_err(serde::de::Error::custom)
    }
}

impl ConfigFile {
    fn into_config(self) -> Result<ModelConfig> {
        let defaults = ModelConfig::default();

        let class_names = match (self.class_names, self.id2label) {
            (Some(names), _) => names,
            (None, Some(id2label)) => labels_from_id2label(id2label)?,
            (None, None) => defaults.class_names,
        };

        let config = ModelConfig {
            class_names,
            mean: self.mean.unwrap_or(defaults.mean),
            std: self.std.unwrap_or(defaults.std),
            input_size: self.input_size.unwrap_or(defaults.input_size),
            benign_index: self.benign_index.unwrap_or(defaults.benign_index),
        };
        config.validate()?;
        Ok(config)
    }
}

fn labels_from_id2label(id2label: BTreeMap<String, String>) -> Result<Vec<String>> {
    let mut labels: Vec<(usize, String)> = id2label
        .into_iter()
        .map(|(k, v)| {
            k.parse::<usize>().map(|idx| (idx, v)).map_err(|_| {
                ClassifierError::config(format!("id2label key {:?} is not an index", k))
            })
        })
        .collect::<Result<_>>()?;
    labels.sort_by_key(|(idx, _)| *idx);

    // Indices must cover 0..n exactly, otherwise outputs would map to the wrong name.
    for (expected, (idx, _)) in labels.iter().enumerate() {
        if *idx != expected {
            return Err(ClassifierError::config(format!(
                "id2label is missing index {}",
                expected
            )));
        }
    }

    Ok(labels.into_iter().map(|(_, label)| label).collect())
}

/// ONNX Runtime session options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Graph optimization level, 0 (disabled) to 3 (all).
    pub optimization_level: u8,
    pub intra_threads: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            optimization_level: 3,
            intra_threads: 4,
        }
    }
}

/// Everything a host needs to build a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSettings {
    #[serde(default = "default_asset_name")]
    pub asset_name: String,
    /// Writable app-private directory the model is staged into.
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub runtime: RuntimeOptions,
}

fn default_asset_name() -> String {
    DEFAULT_ASSET_NAME.to_string()
}

impl ClassifierSettings {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            asset_name: default_asset_name(),
            cache_dir: cache_dir.into(),
            model: ModelConfig::default(),
            runtime: RuntimeOptions::default(),
        }
    }

    /// The `model` section is parsed like a standalone model config.
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}
