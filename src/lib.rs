//! On-device diabetic retinopathy screening.
//!
//! A fundus photo goes through a fixed pipeline: stretch-resize and
//! normalize ([`services::classifier::inference`]), one forward pass of a
//! packaged ONNX model staged into app storage
//! ([`services::classifier::model_manager`]), then softmax and a labelled,
//! confidence-annotated decision ([`services::classifier::decision`]).
//! [`ClassifierService`] runs that pipeline off the UI thread and publishes
//! each [`Verdict`] into a single slot the presenter watches.
//!
//! ```no_run
//! use retina_lens_lib::{onnx_classifier, ClassifierSettings, DirBundle};
//!
//! # async fn run() -> retina_lens_lib::Result<()> {
//! let settings = ClassifierSettings::new("/data/data/app/files");
//! let service = onnx_classifier(settings, DirBundle::new("assets"))?;
//! let image = retina_lens_lib::decode_file("fundus.jpg".as_ref())?;
//! let verdict = service.classify(image).await;
//! println!("{} (benign: {})", verdict.text(), verdict.is_benign());
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use commands::classifier::ClassifierService;
pub use config::{ClassifierSettings, ModelConfig, RuntimeOptions};
pub use error::{ClassifierError, ErrorKind, Result};
pub use models::classify_types::{ClassificationResult, ClassifierState, ModelStatus, Tone, Verdict};
pub use models::image_types::{InputTensor, RawImage, ScoreVector};
pub use services::classifier::model_manager::{AssetBundle, DirBundle, EmbeddedBundle, ModelLoader};
pub use services::classifier::pipeline::ClassificationPipeline;
pub use services::classifier::runtime::{InferenceBackend, ModelRuntime, OnnxModel, OnnxRuntime};
pub use services::image_service::{decode_bytes, decode_file};

/// Builds a service backed by ONNX Runtime, staging `settings.asset_name` out of `bundle`.
pub fn onnx_classifier(
    settings: ClassifierSettings,
    bundle: impl AssetBundle + 'static,
) -> Result<ClassifierService<OnnxRuntime>> {
    let pipeline = ClassificationPipeline::from_settings(settings, bundle)?;
    Ok(ClassifierService::new(pipeline))
}
