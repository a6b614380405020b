//! Embedding extraction boundary.
//!
//! The model is an injected capability: the decision engine depends on the
//! [`Embedder`] trait, never on a concrete implementation, so tests can
//! substitute a deterministic stub. [`OnnxEmbedder`] is the production
//! implementation, running the w600k_r50 ArcFace model via ONNX Runtime.

use std::path::Path;
use std::sync::Mutex;

use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

use crate::types::{Embedding, EMBEDDING_DIM};

const INPUT_SIZE: usize = 112;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5; // ArcFace uses symmetric normalization
const MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("cannot decode image: {0}")]
    BadImage(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Black-box embedding model: encoded image bytes in, fixed-length vector
/// out. Implementations must be callable from multiple threads; the engine
/// runs them on the blocking pool under a timeout.
pub trait Embedder: Send + Sync {
    fn embed(&self, image: &[u8]) -> Result<Embedding, EmbedError>;
}

/// ArcFace embedder via ONNX Runtime.
#[derive(Debug)]
pub struct OnnxEmbedder {
    // Session::run takes &mut self; serialize access so the embedder itself
    // stays shareable behind an Arc.
    session: Mutex<Session>,
}

impl OnnxEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session: Mutex::new(session) })
    }

    /// Decode encoded image bytes into a 112x112 grayscale crop.
    fn decode(image: &[u8]) -> Result<Vec<u8>, EmbedError> {
        let decoded = image::load_from_memory(image)
            .map_err(|e| EmbedError::BadImage(e.to_string()))?;
        let gray = decoded
            .resize_exact(
                INPUT_SIZE as u32,
                INPUT_SIZE as u32,
                image::imageops::FilterType::Triangle,
            )
            .to_luma8();
        Ok(gray.into_raw())
    }

    /// Preprocess a 112x112 grayscale crop into a NCHW float tensor.
    fn preprocess(gray: &[u8]) -> Array4<f32> {
        let size = INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for y in 0..size {
            for x in 0..size {
                let pixel = gray.get(y * size + x).copied().unwrap_or(0) as f32;
                let normalized = (pixel - PIXEL_MEAN) / PIXEL_STD;
                // Grayscale → 3-channel: replicate Y across R, G, B.
                tensor[[0, 0, y, x]] = normalized;
                tensor[[0, 1, y, x]] = normalized;
                tensor[[0, 2, y, x]] = normalized;
            }
        }

        tensor
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, image: &[u8]) -> Result<Embedding, EmbedError> {
        let gray = Self::decode(image)?;
        let input = Self::preprocess(&gray);

        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();

        if raw.len() != EMBEDDING_DIM {
            return Err(EmbedError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        // L2-normalize so cosine similarity reduces to a dot product.
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };

        Ok(Embedding {
            values,
            model_version: Some(MODEL_VERSION.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_output_shape() {
        let gray = vec![128u8; INPUT_SIZE * INPUT_SIZE];
        let tensor = OnnxEmbedder::preprocess(&gray);
        assert_eq!(tensor.shape(), &[1, 3, INPUT_SIZE, INPUT_SIZE]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let gray = vec![128u8; INPUT_SIZE * INPUT_SIZE];
        let tensor = OnnxEmbedder::preprocess(&gray);
        let expected = (128.0 - PIXEL_MEAN) / PIXEL_STD;
        let val = tensor[[0, 0, 0, 0]];
        assert!((val - expected).abs() < 1e-6, "got {val}, expected {expected}");
    }

    #[test]
    fn test_preprocess_channels_identical() {
        let gray = vec![100u8; INPUT_SIZE * INPUT_SIZE];
        let tensor = OnnxEmbedder::preprocess(&gray);
        for y in 0..INPUT_SIZE {
            for x in 0..INPUT_SIZE {
                assert_eq!(tensor[[0, 0, y, x]], tensor[[0, 1, y, x]]);
                assert_eq!(tensor[[0, 1, y, x]], tensor[[0, 2, y, x]]);
            }
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = OnnxEmbedder::decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, EmbedError::BadImage(_)));
    }

    #[test]
    fn test_load_missing_model() {
        let err = OnnxEmbedder::load("/nonexistent/model.onnx").unwrap_err();
        assert!(matches!(err, EmbedError::ModelNotFound(_)));
    }
}
