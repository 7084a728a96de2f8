use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{Label, ModelError};

/// Memory layout of the model's image input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TensorLayout {
    #[default]
    Nhwc,
    Nchw,
}

/// Sidecar JSON shipped next to the model artifact. Read once, never written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub architecture: String,
    #[serde(default)]
    pub accuracy: Option<f64>,
    /// Output index order, e.g. `["FAKE", "REAL"]`.
    pub class_labels: Vec<String>,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default)]
    pub layout: TensorLayout,
    #[serde(default = "default_rescale")]
    pub rescale: f32,
}

fn default_input_size() -> u32 {
    224
}

fn default_rescale() -> f32 {
    1.0 / 255.0
}

impl ModelMetadata {
    pub fn from_path(path: &Path) -> Result<Self, ModelError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ModelError::Unavailable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ModelError> {
        let meta: ModelMetadata =
            serde_json::from_str(raw).map_err(|e| ModelError::Metadata(e.to_string()))?;
        meta.labels()?;
        if meta.input_size == 0 {
            return Err(ModelError::Metadata("input_size must be positive".into()));
        }
        Ok(meta)
    }

    /// Labels in output-index order. Exactly one FAKE and one REAL.
    pub fn labels(&self) -> Result<[Label; 2], ModelError> {
        let parsed = self
            .class_labels
            .iter()
            .map(|l| l.parse::<Label>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(ModelError::Metadata)?;
        match parsed.as_slice() {
            [a, b] if a != b => Ok([*a, *b]),
            _ => Err(ModelError::Metadata(format!(
                "class_labels must name FAKE and REAL once each, got {:?}",
                self.class_labels
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_metadata_with_defaults() {
        let meta = ModelMetadata::from_json(
            r#"{"architecture":"efficientnet_b0","class_labels":["fake","real"]}"#,
        )
        .expect("valid metadata");
        assert_eq!(meta.input_size, 224);
        assert_eq!(meta.layout, TensorLayout::Nhwc);
        assert!(meta.accuracy.is_none());
        assert_eq!(meta.labels().unwrap(), [Label::Fake, Label::Real]);
    }

    #[test]
    fn respects_label_order_and_layout() {
        let meta = ModelMetadata::from_json(
            r#"{"architecture":"resnet18","accuracy":0.94,"class_labels":["REAL","FAKE"],
                "input_size":128,"layout":"NCHW","rescale":1.0}"#,
        )
        .unwrap();
        assert_eq!(meta.labels().unwrap(), [Label::Real, Label::Fake]);
        assert_eq!(meta.layout, TensorLayout::Nchw);
        assert_eq!(meta.input_size, 128);
    }

    #[test]
    fn rejects_duplicate_or_unknown_labels() {
        assert!(ModelMetadata::from_json(
            r#"{"architecture":"x","class_labels":["FAKE","FAKE"]}"#
        )
        .is_err());
        assert!(ModelMetadata::from_json(
            r#"{"architecture":"x","class_labels":["FAKE","REAL","UNSURE"]}"#
        )
        .is_err());
        assert!(ModelMetadata::from_json(
            r#"{"architecture":"x","class_labels":["CAT","DOG"]}"#
        )
        .is_err());
    }

    #[test]
    fn missing_file_is_unavailable() {
        let err = ModelMetadata::from_path(Path::new("/nonexistent/metadata.json")).unwrap_err();
        assert!(matches!(err, ModelError::Unavailable { .. }));
    }
}
