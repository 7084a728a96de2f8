use std::{fmt, str::FromStr};

use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::{ModelError, ModelMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Fake,
    Real,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Fake => "FAKE",
            Label::Real => "REAL",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FAKE" => Ok(Label::Fake),
            "REAL" => Ok(Label::Real),
            other => Err(format!("unknown label '{other}'")),
        }
    }
}

/// Outcome of one classification. `confidence` is a percentage with two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub label: Label,
    pub confidence: f64,
}

impl Prediction {
    /// Confidence of the class that was not chosen.
    pub fn complement_confidence(&self) -> f64 {
        round2(100.0 - self.confidence)
    }
}

/// A loaded model. Implementations must be safe to share across requests.
pub trait Classifier: Send + Sync {
    fn metadata(&self) -> &ModelMetadata;

    /// `image` must already be `input_size x input_size`.
    fn classify(&self, image: &RgbImage) -> Result<Prediction, ModelError>;

    fn input_size(&self) -> u32 {
        self.metadata().input_size
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn softmax(values: &[f64]) -> Vec<f64> {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

fn is_distribution(values: &[f64]) -> bool {
    values.iter().all(|v| (0.0..=1.0).contains(v))
        && (values.iter().sum::<f64>() - 1.0).abs() < 1e-3
}

/// Map a raw output vector to a label and percentage confidence.
///
/// Two outputs are treated as per-class scores (softmaxed unless they already
/// form a distribution). A single output is the probability of `labels[1]`,
/// passed through a sigmoid when it is outside `[0, 1]`.
pub fn prediction_from_output(output: &[f32], labels: [Label; 2]) -> Result<Prediction, ModelError> {
    let values: Vec<f64> = output.iter().map(|v| *v as f64).collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::Inference("model produced non-finite output".into()));
    }

    let (index, probability) = match values.as_slice() {
        [p] => {
            let p = if (0.0..=1.0).contains(p) { *p } else { sigmoid(*p) };
            if p >= 0.5 {
                (1, p)
            } else {
                (0, 1.0 - p)
            }
        }
        [_, _] => {
            let probs = if is_distribution(&values) {
                let sum: f64 = values.iter().sum();
                values.iter().map(|v| v / sum).collect()
            } else {
                softmax(&values)
            };
            if probs[1] > probs[0] {
                (1, probs[1])
            } else {
                (0, probs[0])
            }
        }
        other => {
            return Err(ModelError::Inference(format!(
                "expected 1 or 2 outputs, got {}",
                other.len()
            )))
        }
    };

    Ok(Prediction {
        label: labels[index],
        confidence: round2(probability * 100.0).clamp(0.0, 100.0),
    })
}
