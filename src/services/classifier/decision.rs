//! Turns raw class scores into a labelled, confidence-annotated decision.

use crate::config::ModelConfig;
use crate::error::{ClassifierError, Result};
use crate::models::classify_types::ClassificationResult;
use crate::models::image_types::ScoreVector;

/// Softmax with the max logit subtracted first, so large logits cannot overflow.
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max_logit = scores.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exp: Vec<f32> = scores.iter().map(|&x| (x - max_logit).exp()).collect();
    let exp_sum: f32 = exp.iter().sum();
    exp.into_iter().map(|e| e / exp_sum).collect()
}

/// Index of the largest value. Ties go to the lowest index.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &value) in values.iter().enumerate() {
        match best {
            Some((_, top)) if value <= top => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Probability as a whole percentage in `0..=100`.
pub fn confidence_percent(probability: f32) -> u8 {
    let pct = (probability * 100.0).round();
    if pct.is_nan() {
        return 0;
    }
    pct.clamp(0.0, 100.0) as u8
}

pub fn format_label(class_name: &str, confidence_percent: u8) -> String {
    format!("{} (Confidence: {}%)", class_name, confidence_percent)
}

pub fn decide(scores: &ScoreVector, config: &ModelConfig) -> Result<ClassificationResult> {
    let scores = scores.as_slice();
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        return Err(ClassifierError::inference(format!(
            "model produced a non-finite score ({})",
            bad
        )));
    }

    let probabilities = softmax(scores);
    let class_index = argmax(&probabilities)
        .ok_or_else(|| ClassifierError::inference("model produced an empty score vector"))?;

    let class_name = config
        .class_names
        .get(class_index)
        .cloned()
        .unwrap_or_else(|| format!("class_{}", class_index));
    let confidence_percent = confidence_percent(probabilities[class_index]);

    Ok(ClassificationResult {
        class_index,
        label: format_label(&class_name, confidence_percent),
        class_name,
        confidence_percent,
        is_benign_class: class_index == config.benign_index,
        probabilities,
    })
}
