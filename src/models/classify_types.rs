use crate::error::{ClassifierError, ErrorKind};
use serde::Serialize;

/// Outcome of one successful classification.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ClassificationResult {
    pub class_index: usize,
    pub class_name: String,
    /// `"<class name> (Confidence: <pct>%)"`
    pub label: String,
    pub confidence_percent: u8,
    pub is_benign_class: bool,
    /// Softmax probabilities, in class-table order.
    pub probabilities: Vec<f32>,
}

impl ClassificationResult {
    pub fn confidence_text(&self) -> String {
        format!("Confidence: {}%", self.confidence_percent)
    }
}

/// How a presenter should color a verdict.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Benign,
    Alert,
    Error,
}

/// What the presenter receives for a request: a prediction or a displayable error.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Verdict {
    Prediction(ClassificationResult),
    Failed { kind: ErrorKind, message: String },
}

impl Verdict {
    /// Label for a prediction, `"Error: ..."` for a failure.
    pub fn text(&self) -> &str {
        match self {
            Verdict::Prediction(result) => &result.label,
            Verdict::Failed { message, .. } => message,
        }
    }

    /// Errors are never reported as benign.
    pub fn is_benign(&self) -> bool {
        matches!(self, Verdict::Prediction(result) if result.is_benign_class)
    }

    pub fn tone(&self) -> Tone {
        match self {
            Verdict::Prediction(result) if result.is_benign_class => Tone::Benign,
            Verdict::Prediction(_) => Tone::Alert,
            Verdict::Failed { .. } => Tone::Error,
        }
    }

    pub fn result(&self) -> Option<&ClassificationResult> {
        match self {
            Verdict::Prediction(result) => Some(result),
            Verdict::Failed { .. } => None,
        }
    }
}

impl From<&ClassifierError> for Verdict {
    fn from(err: &ClassifierError) -> Self {
        Verdict::Failed {
            kind: err.kind(),
            message: err.user_message(),
        }
    }
}

/// Contents of the single result slot a presenter watches.
#[derive(Debug, Serialize, Clone, PartialEq, Default)]
#[serde(tag = "state", content = "verdict", rename_all = "snake_case")]
pub enum ClassifierState {
    #[default]
    Idle,
    Processing,
    Ready(Verdict),
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ModelStatus {
    pub staged: bool,
    pub ready: bool,
    pub processing: bool,
    pub error: Option<String>,
}
