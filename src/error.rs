use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifierError {
    /// The packaged model asset could not be opened.
    #[error("model asset {name} is missing from the bundle: {source}")]
    AssetMissing {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The staged copy of the asset could not be written.
    #[error("failed to write {path}: {source}")]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load model {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    #[error("invalid image {width}x{height}: {reason}")]
    InvalidImage {
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("failed to decode image: {source}")]
    ImageDecode {
        #[source]
        source: image::ImageError,
    },

    #[error("inference failed: {reason}")]
    Inference { reason: String },

    #[error("invalid model configuration: {reason}")]
    InvalidConfig { reason: String },
}

/// Error category, for callers that branch on what went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    AssetMissing,
    StorageWriteFailure,
    ModelLoadFailure,
    InvalidImage,
    ImageDecode,
    InferenceFailure,
    InvalidConfig,
}

impl ClassifierError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClassifierError::AssetMissing { .. } => ErrorKind::AssetMissing,
            ClassifierError::StorageWrite { .. } => ErrorKind::StorageWriteFailure,
            ClassifierError::ModelLoad { .. } => ErrorKind::ModelLoadFailure,
            ClassifierError::InvalidImage { .. } => ErrorKind::InvalidImage,
            ClassifierError::ImageDecode { .. } => ErrorKind::ImageDecode,
            ClassifierError::Inference { .. } => ErrorKind::InferenceFailure,
            ClassifierError::InvalidConfig { .. } => ErrorKind::InvalidConfig,
        }
    }

    /// Text shown in place of a prediction.
    pub fn user_message(&self) -> String {
        format!("Error: {}", self)
    }

    pub(crate) fn inference(reason: impl Into<String>) -> Self {
        ClassifierError::Inference {
            reason: reason.into(),
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        ClassifierError::InvalidConfig {
            reason: reason.into(),
        }
    }
}

impl From<image::ImageError> for ClassifierError {
    fn from(source: image::ImageError) -> Self {
        ClassifierError::ImageDecode { source }
    }
}

impl From<serde_json::Error> for ClassifierError {
    fn from(err: serde_json::Error) -> Self {
        ClassifierError::config(err.to_string())
    }
}

// Hosts receive errors as `{ kind, message }`.
impl Serialize for ClassifierError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ClassifierError", 2)?;
        state.serialize_field("kind", &self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

pub type Result<T> = std::result::Result<T, ClassifierError>;
