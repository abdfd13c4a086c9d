use crate::config::{ClassifierSettings, ModelConfig};
use crate::error::Result;
use crate::models::classify_types::{ClassificationResult, ModelStatus, Verdict};
use crate::models::image_types::RawImage;
use crate::services::classifier::decision;
use crate::services::classifier::inference;
use crate::services::classifier::model_manager::{AssetBundle, ModelLoader};
use crate::services::classifier::runtime::{ModelRuntime, OnnxRuntime};
use std::time::Instant;

/// Preprocess, infer and decide, with the model loaded lazily and kept for later requests.
pub struct ClassificationPipeline<R: ModelRuntime> {
    loader: ModelLoader,
    runtime: R,
    config: ModelConfig,
    asset_name: String,
    model: Option<R::Model>,
    last_error: Option<String>,
}

impl ClassificationPipeline<OnnxRuntime> {
    pub fn from_settings(
        settings: ClassifierSettings,
        bundle: impl AssetBundle + 'static,
    ) -> Result<Self> {
        let loader = ModelLoader::new(bundle, settings.cache_dir);
        Self::new(
            loader,
            OnnxRuntime::new(settings.runtime),
            settings.model,
            settings.asset_name,
        )
    }
}

impl<R: ModelRuntime> ClassificationPipeline<R> {
    pub fn new(
        loader: ModelLoader,
        runtime: R,
        config: ModelConfig,
        asset_name: impl Into<String>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            loader,
            runtime,
            config,
            asset_name: asset_name.into(),
            model: None,
            last_error: None,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    /// Stages and loads the model ahead of the first request.
    pub fn warm_up(&mut self) -> Result<()> {
        let result = ensure_model(
            &mut self.model,
            &self.loader,
            &self.runtime,
            &self.asset_name,
        )
        .map(|_| ());
        self.record(&result);
        result
    }

    /// Drops the loaded model; the next request reloads it from the staged file.
    pub fn unload(&mut self) {
        self.model = None;
    }

    pub fn classify(&mut self, image: &RawImage) -> Result<ClassificationResult> {
        let start = Instant::now();
        let tensor = inference::preprocess_image(image, &self.config)?;
        let model = ensure_model(&mut self.model, &self.loader, &self.runtime, &self.asset_name)?;
        let scores = inference::run_inference(model, tensor, &self.config)?;
        let result = decision::decide(&scores, &self.config)?;

        log::debug!(
            "Classified {}x{} image as {:?} in {:.1} ms",
            image.width(),
            image.height(),
            result.label,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(result)
    }

    /// Classifies `image`, turning any failure into a displayable verdict.
    pub fn evaluate(&mut self, image: &RawImage) -> Verdict {
        let result = self.classify(image);
        self.record(&result);
        match result {
            Ok(result) => Verdict::Prediction(result),
            Err(e) => {
                log::warn!("Classification failed: {}", e);
                Verdict::from(&e)
            }
        }
    }

    pub fn status(&self) -> ModelStatus {
        ModelStatus {
            staged: self.loader.is_staged(&self.asset_name),
            ready: self.is_ready(),
            processing: false,
            error: self.last_error.clone(),
        }
    }

    fn record<T>(&mut self, result: &Result<T>) {
        self.last_error = result.as_ref().err().map(|e| e.to_string());
    }
}

fn ensure_model<'a, R: ModelRuntime>(
    slot: &'a mut Option<R::Model>,
    loader: &ModelLoader,
    runtime: &R,
    asset_name: &str,
) -> Result<&'a mut R::Model> {
    let model = match slot.take() {
        Some(model) => model,
        None => loader.load(runtime, asset_name)?,
    };
    Ok(slot.insert(model))
}
