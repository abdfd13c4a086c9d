use crate::config::{ModelConfig, MAX_INPUT_SIZE};
use crate::error::{ClassifierError, Result};
use crate::models::image_types::{InputTensor, RawImage, ScoreVector};
use crate::services::classifier::runtime::InferenceBackend;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array3;
use std::borrow::Cow;
use std::time::Instant;

/// Stretch-resizes `image` to the model input size and normalizes it into a CHW tensor.
///
/// Aspect ratio is not preserved; the model was trained on stretched inputs.
pub fn preprocess_image(image: &RawImage, config: &ModelConfig) -> Result<InputTensor> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Err(ClassifierError::InvalidImage {
            width: w,
            height: h,
            reason: "image has no pixels".to_string(),
        });
    }

    let size = config.input_size;
    if size == 0 || size > MAX_INPUT_SIZE {
        return Err(ClassifierError::config(format!(
            "input size must be between 1 and {}, got {}",
            MAX_INPUT_SIZE, size
        )));
    }

    let resized: Cow<'_, RgbImage> = if (w, h) == (size, size) {
        Cow::Borrowed(image.as_rgb())
    } else {
        Cow::Owned(image::imageops::resize(
            image.as_rgb(),
            size,
            size,
            FilterType::Triangle,
        ))
    };

    // Scatter interleaved RGB straight into the three channel planes.
    let side = size as usize;
    let hw = side * side;
    let mut data = vec![0f32; 3 * hw];
    for (i, pixel) in resized.as_raw().chunks_exact(3).enumerate() {
        for c in 0..3 {
            data[c * hw + i] = (pixel[c] as f32 / 255.0 - config.mean[c]) / config.std[c];
        }
    }

    let tensor = Array3::from_shape_vec((3, side, side), data)
        .map_err(|e| ClassifierError::inference(format!("failed to create tensor: {}", e)))?;

    Ok(InputTensor::new(tensor))
}

/// Runs one forward pass and checks the output against the class table.
pub fn run_inference<B: InferenceBackend + ?Sized>(
    model: &mut B,
    input: InputTensor,
    config: &ModelConfig,
) -> Result<ScoreVector> {
    let size = config.input_size as usize;
    if input.shape() != [3, size, size] {
        return Err(ClassifierError::inference(format!(
            "input tensor shape {:?} does not match (3, {}, {})",
            input.shape(),
            size,
            size
        )));
    }

    let start = Instant::now();
    let scores = model.forward(input)?;
    log::debug!(
        "Forward pass took {:.1} ms",
        start.elapsed().as_secs_f64() * 1000.0
    );

    if scores.len() != config.num_classes() {
        return Err(ClassifierError::inference(format!(
            "model returned {} scores for {} classes",
            scores.len(),
            config.num_classes()
        )));
    }

    Ok(ScoreVector::from(scores))
}
