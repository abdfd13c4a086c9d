use crate::config::RuntimeOptions;
use crate::error::{ClassifierError, Result};
use crate::models::image_types::InputTensor;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use std::time::Instant;

/// A loaded model that can run a forward pass.
pub trait InferenceBackend: Send {
    /// Returns the raw output scores for one input.
    fn forward(&mut self, input: InputTensor) -> Result<Vec<f32>>;
}

/// Opens a staged model file into an [`InferenceBackend`].
pub trait ModelRuntime: Send + Sync {
    type Model: InferenceBackend;

    fn load(&self, path: &Path) -> Result<Self::Model>;
}

/// ONNX Runtime on the CPU execution provider.
#[derive(Debug, Clone, Default)]
pub struct OnnxRuntime {
    options: RuntimeOptions,
}

impl OnnxRuntime {
    pub fn new(options: RuntimeOptions) -> Self {
        Self { options }
    }
}

pub struct OnnxModel {
    session: Session,
    input_name: String,
}

fn load_error(path: &Path, what: &str, e: impl std::fmt::Display) -> ClassifierError {
    ClassifierError::ModelLoad {
        path: path.to_path_buf(),
        reason: format!("{}: {}", what, e),
    }
}

impl ModelRuntime for OnnxRuntime {
    type Model = OnnxModel;

    fn load(&self, path: &Path) -> Result<OnnxModel> {
        let start = Instant::now();
        let _ = ort::init().with_name("retina-lens").commit();

        let level = match self.options.optimization_level {
            0 => GraphOptimizationLevel::Disable,
            1 => GraphOptimizationLevel::Level1,
            2 => GraphOptimizationLevel::Level2,
            _ => GraphOptimizationLevel::Level3,
        };

        let session = Session::builder()
            .map_err(|e| load_error(path, "failed to create session builder", e))?
            .with_optimization_level(level)
            .map_err(|e| load_error(path, "failed to set optimization level", e))?
            .with_intra_threads(self.options.intra_threads.max(1))
            .map_err(|e| load_error(path, "failed to set intra threads", e))?
            .with_execution_providers([
                ort::execution_providers::CPUExecutionProvider::default().build(),
            ])
            .map_err(|e| load_error(path, "failed to register CPU execution provider", e))?
            .commit_from_file(path)
            .map_err(|e| load_error(path, "invalid ONNX model", e))?;

        let input_name = session
            .inputs()
            .first()
            .map(|input| input.name().to_string())
            .ok_or_else(|| load_error(path, "invalid ONNX model", "graph declares no inputs"))?;

        log::info!(
            "Loaded model {} in {:.1} ms (input {})",
            path.display(),
            start.elapsed().as_secs_f64() * 1000.0,
            input_name
        );

        Ok(OnnxModel {
            session,
            input_name,
        })
    }
}

impl InferenceBackend for OnnxModel {
    fn forward(&mut self, input: InputTensor) -> Result<Vec<f32>> {
        let input_tensor = Value::from_array(input.into_batched()).map_err(|e| {
            ClassifierError::inference(format!("failed to create tensor value: {}", e))
        })?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .map_err(|e| ClassifierError::inference(e.to_string()))?;

        let output_value = outputs
            .values()
            .next()
            .ok_or_else(|| ClassifierError::inference("model produced no outputs"))?;

        let (_, data) = output_value.try_extract_tensor::<f32>().map_err(|e| {
            ClassifierError::inference(format!("failed to extract output tensor: {}", e))
        })?;

        Ok(data.to_vec())
    }
}
