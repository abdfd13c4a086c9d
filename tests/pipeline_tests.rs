//! End-to-end tests of the classification pipeline and service.
//!
//! The model runtime is replaced by one that reads fixed logits from the
//! staged asset, so staging, loading and caching run for real.

use image::{Rgb, RgbImage};
use retina_lens_lib::{
    ClassificationPipeline, ClassifierError, ClassifierService, ClassifierState, DirBundle,
    EmbeddedBundle, ErrorKind, InferenceBackend, InputTensor, ModelConfig, ModelLoader,
    ModelRuntime, RawImage, Tone, Verdict,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ASSET: &str = "mobilenet_cpu_only.onnx";

struct FixedLogits(Vec<f32>);

impl InferenceBackend for FixedLogits {
    fn forward(&mut self, input: InputTensor) -> retina_lens_lib::Result<Vec<f32>> {
        assert_eq!(input.shape(), &[3, 224, 224]);
        Ok(self.0.clone())
    }
}

/// "Parses" a model file holding whitespace-separated logits.
#[derive(Default)]
struct TextRuntime {
    loads: Arc<AtomicUsize>,
}

impl ModelRuntime for TextRuntime {
    type Model = FixedLogits;

    fn load(&self, path: &Path) -> retina_lens_lib::Result<FixedLogits> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let load_error = |reason: String| ClassifierError::ModelLoad {
            path: path.to_path_buf(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
        let logits = text
            .split_whitespace()
            .map(|t| t.parse::<f32>().map_err(|e| load_error(e.to_string())))
            .collect::<retina_lens_lib::Result<Vec<_>>>()?;
        Ok(FixedLogits(logits))
    }
}

/// Scores bright images as healthy and dark ones as retinopathy, taking
/// `delay` per forward pass.
struct Brightness {
    delay: Duration,
}

impl InferenceBackend for Brightness {
    fn forward(&mut self, input: InputTensor) -> retina_lens_lib::Result<Vec<f32>> {
        std::thread::sleep(self.delay);
        if input.as_array()[[0, 0, 0]] > 0.0 {
            Ok(vec![0.1, 3.0])
        } else {
            Ok(vec![2.0, 0.5])
        }
    }
}

struct SlowRuntime {
    delay: Duration,
}

impl ModelRuntime for SlowRuntime {
    type Model = Brightness;

    fn load(&self, _path: &Path) -> retina_lens_lib::Result<Brightness> {
        Ok(Brightness { delay: self.delay })
    }
}

fn pipeline_with(
    model: &'static [u8],
    cache: &Path,
) -> (ClassificationPipeline<TextRuntime>, Arc<AtomicUsize>) {
    let runtime = TextRuntime::default();
    let loads = runtime.loads.clone();
    let loader = ModelLoader::new(EmbeddedBundle::new().with_asset(ASSET, model), cache);
    let pipeline =
        ClassificationPipeline::new(loader, runtime, ModelConfig::default(), ASSET).unwrap();
    (pipeline, loads)
}

fn slow_service(cache: &Path, delay: Duration) -> ClassifierService<SlowRuntime> {
    let loader = ModelLoader::new(EmbeddedBundle::new().with_asset(ASSET, &b"weights"[..]), cache);
    let runtime = SlowRuntime { delay };
    let pipeline =
        ClassificationPipeline::new(loader, runtime, ModelConfig::default(), ASSET).unwrap();
    ClassifierService::new(pipeline)
}

fn bright() -> RawImage {
    RawImage::from(RgbImage::from_pixel(64, 64, Rgb([250, 250, 250])))
}

fn dark() -> RawImage {
    RawImage::from(RgbImage::from_pixel(64, 64, Rgb([0, 0, 0])))
}

fn fundus() -> RawImage {
    RawImage::from(RgbImage::from_pixel(640, 480, Rgb([180, 60, 20])))
}

#[test]
fn retinopathy_prediction() {
    let cache = tempfile::tempdir().unwrap();
    let (mut pipeline, _) = pipeline_with(b"2.0 0.5", cache.path());

    let verdict = pipeline.evaluate(&fundus());
    assert_eq!(verdict.text(), "Diabetic Retinopathy (Confidence: 82%)");
    assert!(!verdict.is_benign());
    assert_eq!(verdict.tone(), Tone::Alert);
}

#[test]
fn no_retinopathy_prediction() {
    let cache = tempfile::tempdir().unwrap();
    let (mut pipeline, _) = pipeline_with(b"0.1 3.0", cache.path());

    let result = pipeline.classify(&fundus()).unwrap();
    assert_eq!(result.class_name, "No Diabetic Retinopathy");
    assert_eq!(result.label, "No Diabetic Retinopathy (Confidence: 95%)");
    assert!(result.is_benign_class);
}

#[test]
fn zero_dimension_image_fails_before_loading() {
    let cache = tempfile::tempdir().unwrap();
    let (mut pipeline, loads) = pipeline_with(b"2.0 0.5", cache.path());

    let err = pipeline.classify(&RawImage::from(RgbImage::new(0, 0))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidImage);
    assert_eq!(loads.load(Ordering::SeqCst), 0);
}

#[test]
fn missing_asset_becomes_error_verdict() {
    let cache = tempfile::tempdir().unwrap();
    let assets = tempfile::tempdir().unwrap();
    let loader = ModelLoader::new(DirBundle::new(assets.path()), cache.path());
    let runtime = TextRuntime::default();
    let mut pipeline =
        ClassificationPipeline::new(loader, runtime, ModelConfig::default(), ASSET).unwrap();

    let verdict = pipeline.evaluate(&fundus());
    assert!(verdict.text().starts_with("Error: "));
    assert!(!verdict.is_benign());
    assert_eq!(verdict.tone(), Tone::Error);
    match verdict {
        Verdict::Failed { kind, .. } => assert_eq!(kind, ErrorKind::AssetMissing),
        other => panic!("expected a failure, got {:?}", other),
    }

    let status = pipeline.status();
    assert!(!status.staged);
    assert!(!status.ready);
    assert!(status.error.is_some());
}

#[test]
fn corrupt_model_is_load_failure() {
    let cache = tempfile::tempdir().unwrap();
    let (mut pipeline, _) = pipeline_with(b"not a model", cache.path());

    let err = pipeline.classify(&fundus()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModelLoadFailure);
    assert!(pipeline.status().staged);
}

#[test]
fn model_with_wrong_class_count_is_inference_failure() {
    let cache = tempfile::tempdir().unwrap();
    let (mut pipeline, _) = pipeline_with(b"0.1 0.2 0.3", cache.path());

    let err = pipeline.classify(&fundus()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InferenceFailure);
}

#[test]
fn model_is_loaded_once_and_reused() {
    let cache = tempfile::tempdir().unwrap();
    let (mut pipeline, loads) = pipeline_with(b"2.0 0.5", cache.path());

    pipeline.warm_up().unwrap();
    assert!(pipeline.is_ready());
    pipeline.classify(&fundus()).unwrap();
    pipeline.classify(&fundus()).unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    pipeline.unload();
    pipeline.classify(&fundus()).unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 2);
}

#[test]
fn staged_file_is_stable_across_pipelines() {
    let cache = tempfile::tempdir().unwrap();
    let (mut first, _) = pipeline_with(b"2.0 0.5", cache.path());
    first.warm_up().unwrap();
    let staged = std::fs::read(cache.path().join(ASSET)).unwrap();

    // A second pipeline over a different bundle must reuse the staged copy.
    let (mut second, _) = pipeline_with(b"0.1 3.0", cache.path());
    let result = second.classify(&fundus()).unwrap();
    assert_eq!(result.class_index, 0);
    assert_eq!(std::fs::read(cache.path().join(ASSET)).unwrap(), staged);
}

#[tokio::test]
async fn service_publishes_verdict() {
    let cache = tempfile::tempdir().unwrap();
    let (pipeline, _) = pipeline_with(b"0.1 3.0", cache.path());
    let service = ClassifierService::new(pipeline);
    let mut rx = service.subscribe();
    assert_eq!(*rx.borrow(), ClassifierState::Idle);

    let verdict = service.classify(fundus()).await;
    assert!(verdict.is_benign());

    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), ClassifierState::Ready(verdict));

    let status = service.status();
    assert!(status.ready);
    assert!(!status.processing);
    assert!(status.error.is_none());
}

#[tokio::test]
async fn service_reports_errors_and_clears() {
    let cache = tempfile::tempdir().unwrap();
    let loader = ModelLoader::new(EmbeddedBundle::new(), cache.path());
    let runtime = TextRuntime::default();
    let pipeline =
        ClassificationPipeline::new(loader, runtime, ModelConfig::default(), ASSET).unwrap();
    let service = ClassifierService::new(pipeline);

    let err = service.warm_up().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AssetMissing);

    let verdict = service.submit(fundus()).await.unwrap();
    assert!(verdict.text().starts_with("Error: "));
    assert!(matches!(
        service.current(),
        ClassifierState::Ready(Verdict::Failed { .. })
    ));
    assert!(service.status().error.is_some());

    service.clear();
    assert_eq!(service.current(), ClassifierState::Idle);
}

#[tokio::test]
async fn superseded_verdict_is_returned_but_not_published() {
    let cache = tempfile::tempdir().unwrap();
    let service = slow_service(cache.path(), Duration::from_millis(200));

    let older = service.submit(bright());
    // Let the older request take the pipeline before the newer one queues.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let newer = service.submit(dark());

    let older_verdict = older.await.unwrap();
    assert!(older_verdict.is_benign());
    assert_ne!(service.current(), ClassifierState::Ready(older_verdict));

    let newer_verdict = newer.await.unwrap();
    assert!(!newer_verdict.is_benign());
    assert_eq!(service.current(), ClassifierState::Ready(newer_verdict));
    assert!(!service.status().processing);
}

#[tokio::test]
async fn clear_discards_pending_result() {
    let cache = tempfile::tempdir().unwrap();
    let service = slow_service(cache.path(), Duration::from_millis(100));

    let pending = service.submit(bright());
    assert_eq!(service.current(), ClassifierState::Processing);
    service.clear();
    assert_eq!(service.current(), ClassifierState::Idle);

    let verdict = pending.await.unwrap();
    assert!(verdict.is_benign());
    assert_eq!(service.current(), ClassifierState::Idle);
    assert!(!service.status().processing);
}

#[tokio::test]
async fn abandoned_classify_still_publishes() {
    let cache = tempfile::tempdir().unwrap();
    let service = slow_service(cache.path(), Duration::from_millis(200));
    let mut rx = service.subscribe();

    // The caller gives up long before the forward pass ends.
    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), service.classify(bright())).await;
    assert!(abandoned.is_err());
    assert_eq!(service.current(), ClassifierState::Processing);

    let ready = rx.wait_for(|state| matches!(state, ClassifierState::Ready(_)));
    let state = tokio::time::timeout(Duration::from_secs(5), ready)
        .await
        .unwrap()
        .unwrap()
        .clone();
    match state {
        ClassifierState::Ready(verdict) => assert!(verdict.is_benign()),
        other => panic!("expected a verdict, got {:?}", other),
    }
    assert!(!service.status().processing);
}

#[tokio::test]
async fn aborted_submit_still_publishes() {
    let cache = tempfile::tempdir().unwrap();
    let service = slow_service(cache.path(), Duration::from_millis(100));
    let mut rx = service.subscribe();

    service.submit(dark()).abort();

    let ready = rx.wait_for(|state| matches!(state, ClassifierState::Ready(_)));
    let state = tokio::time::timeout(Duration::from_secs(5), ready)
        .await
        .unwrap()
        .unwrap()
        .clone();
    match state {
        ClassifierState::Ready(verdict) => assert!(!verdict.is_benign()),
        other => panic!("expected a verdict, got {:?}", other),
    }
    assert!(!service.status().processing);
}
