use std::path::Path;

use image::RgbImage;
use tract_onnx::prelude::*;
use tracing::info;

use super::{
    prediction_from_output, Classifier, Label, ModelError, ModelMetadata, Prediction, TensorLayout,
};

type Plan = TypedRunnableModel<TypedModel>;

/// ONNX model loaded once at startup and shared read-only.
pub struct OnnxClassifier {
    plan: Plan,
    metadata: ModelMetadata,
    labels: [Label; 2],
}

impl OnnxClassifier {
    pub fn load(model_path: &Path, metadata_path: &Path) -> Result<Self, ModelError> {
        let metadata = ModelMetadata::from_path(metadata_path)?;
        let labels = metadata.labels()?;

        if !model_path.is_file() {
            return Err(ModelError::Unavailable {
                path: model_path.display().to_string(),
                reason: "file not found".into(),
            });
        }

        let side = metadata.input_size as usize;
        let shape = match metadata.layout {
            TensorLayout::Nhwc => [1, side, side, 3],
            TensorLayout::Nchw => [1, 3, side, side],
        };
        let unavailable = |e: anyhow::Error| ModelError::Unavailable {
            path: model_path.display().to_string(),
            reason: format!("{e:#}"),
        };

        let plan = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(unavailable)?
            .with_input_fact(0, f32::fact(shape).into())
            .map_err(unavailable)?
            .into_optimized()
            .map_err(unavailable)?
            .into_runnable()
            .map_err(unavailable)?;

        info!(
            path = %model_path.display(),
            architecture = %metadata.architecture,
            accuracy = ?metadata.accuracy,
            input_size = metadata.input_size,
            "model loaded"
        );
        Ok(Self {
            plan,
            metadata,
            labels,
        })
    }

    fn to_tensor(&self, image: &RgbImage) -> Tensor {
        let side = self.metadata.input_size as usize;
        let scale = self.metadata.rescale;
        let px = |x: usize, y: usize, c: usize| image.get_pixel(x as u32, y as u32)[c] as f32 * scale;
        match self.metadata.layout {
            TensorLayout::Nhwc => {
                tract_ndarray::Array4::from_shape_fn((1, side, side, 3), |(_, y, x, c)| px(x, y, c))
                    .into()
            }
            TensorLayout::Nchw => {
                tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| px(x, y, c))
                    .into()
            }
        }
    }
}

impl Classifier for OnnxClassifier {
    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    fn classify(&self, image: &RgbImage) -> Result<Prediction, ModelError> {
        let side = self.metadata.input_size;
        if image.dimensions() != (side, side) {
            return Err(ModelError::Inference(format!(
                "expected {side}x{side} input, got {:?}",
                image.dimensions()
            )));
        }

        let input = self.to_tensor(image);
        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| ModelError::Inference(format!("{e:#}")))?;
        let first = outputs
            .first()
            .ok_or_else(|| ModelError::Inference("model returned no outputs".into()))?;
        let view = first
            .to_array_view::<f32>()
            .map_err(|e| ModelError::Inference(format!("{e:#}")))?;
        let scores: Vec<f32> = view.iter().copied().collect();

        prediction_from_output(&scores, self.labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_artifact_is_fatal_unavailable() {
        let dir = std::env::temp_dir().join(format!("unmask-model-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let meta = dir.join("metadata.json");
        std::fs::write(&meta, r#"{"architecture":"cnn","class_labels":["FAKE","REAL"]}"#).unwrap();

        let err = OnnxClassifier::load(&dir.join("missing.onnx"), &meta)
            .err()
            .expect("load must fail");
        assert!(matches!(err, ModelError::Unavailable { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unreadable_artifact_is_unavailable() {
        let dir = std::env::temp_dir().join(format!("unmask-model-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let meta = dir.join("metadata.json");
        std::fs::write(&meta, r#"{"architecture":"cnn","class_labels":["FAKE","REAL"]}"#).unwrap();
        let model = dir.join("model.onnx");
        std::fs::write(&model, b"definitely not protobuf").unwrap();

        let err = OnnxClassifier::load(&model, &meta).err().expect("load must fail");
        assert!(matches!(err, ModelError::Unavailable { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
