mod classifier;
mod metadata;
mod onnx;
mod preprocess;

pub use classifier::{prediction_from_output, Classifier, Label, Prediction};
pub use metadata::{ModelMetadata, TensorLayout};
pub use onnx::OnnxClassifier;
pub use preprocess::decode_image;
#[cfg(test)]
pub(crate) use preprocess::png_fixture;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    /// Artifact or metadata missing/unloadable. Fatal at startup.
    #[error("model unavailable at {path}: {reason}")]
    Unavailable { path: String, reason: String },

    #[error("invalid model metadata: {0}")]
    Metadata(String),

    #[error("{0}")]
    Decode(String),

    #[error("inference failed: {0}")]
    Inference(String),
}
