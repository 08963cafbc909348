//! Embedding capability.
//!
//! Everything that needs vectors talks to an [`EmbeddingProvider`], so the
//! pipeline can run against a remote service, a local fastembed model, or a
//! deterministic stub in tests.

/// Text in, fixed-dimension vectors out.
///
/// Implementations must return exactly one vector per input, in input order.
pub trait EmbeddingProvider: Send + Sync {
    /// Name of the model producing the vectors. Persisted with the index so a
    /// snapshot is never queried with vectors from a different model.
    fn model_name(&self) -> &str;

    /// Embed a batch of texts.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()])?;
        if vectors.len() != 1 {
            return Err(EmbeddingError::CountMismatch {
                expected: 1,
                got: vectors.len(),
            });
        }
        Ok(vectors.remove(0))
    }
}

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    /// Rate limits, timeouts, overloaded servers. Worth retrying.
    #[error("Transient embedding failure: {0}")]
    Transient(String),

    /// Bad credentials, malformed requests, undecodable responses.
    #[error("Embedding request rejected: {0}")]
    Permanent(String),

    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Embedding service returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Embedding run cancelled")]
    Cancelled,
}

impl EmbeddingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbeddingError::Transient(_))
    }
}

/// Compute SHA256 hash of a model name for storage identification.
pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings")]
mod local {
    use super::{EmbeddingError, EmbeddingProvider};
    use fastembed::{InitOptions, TextEmbedding};
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// fastembed model running in-process.
    /// Uses a Mutex because fastembed's embed() requires &mut self.
    pub struct LocalEmbedder {
        model: Mutex<TextEmbedding>,
        model_name: String,
        dimensions: usize,
    }

    impl LocalEmbedder {
        /// Load (downloading on first use) the named model.
        ///
        /// Models are cached in the `models/` subdirectory of `cache_dir`.
        pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
            let model_enum = Self::parse_model_name(model_name)?;

            let models_dir = cache_dir.join("models");
            std::fs::create_dir_all(&models_dir).map_err(|e| {
                EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
            })?;

            let options = InitOptions::new(model_enum)
                .with_cache_dir(models_dir)
                .with_show_download_progress(true);

            let mut model = TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

            let dimensions = Self::probe_dimensions(&mut model)?;
            log::info!("Loaded local embedding model '{model_name}' ({dimensions} dimensions)");

            Ok(Self {
                model: Mutex::new(model),
                model_name: model_name.to_string(),
                dimensions,
            })
        }

        pub fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
            match name.to_lowercase().as_str() {
                "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
                "all-minilm-l6-v2-q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
                "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
                "bge-small-en-v1.5-q" => Ok(fastembed::EmbeddingModel::BGESmallENV15Q),
                "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
                "bge-base-en-v1.5-q" => Ok(fastembed::EmbeddingModel::BGEBaseENV15Q),
                "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
                "bge-large-en-v1.5-q" => Ok(fastembed::EmbeddingModel::BGELargeENV15Q),
                _ => Err(EmbeddingError::InvalidModel(format!(
                    "Unknown local model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5 (add -q suffix for quantized)",
                    name
                ))),
            }
        }

        fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
            let test_embeddings = model.embed(vec!["test"], None).map_err(|e| {
                EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e))
            })?;

            test_embeddings
                .first()
                .map(|v| v.len())
                .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
        }
    }

    impl EmbeddingProvider for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if texts.is_empty() {
                return Ok(vec![]);
            }

            let mut model = self.model.lock().map_err(|e| {
                EmbeddingError::Permanent(format!("Failed to acquire model lock: {}", e))
            })?;

            // a local model failure will not fix itself on retry
            model
                .embed(texts.to_vec(), None)
                .map_err(|e| EmbeddingError::Permanent(e.to_string()))
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl EmbeddingProvider for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    struct Empty;

    impl EmbeddingProvider for Empty {
        fn model_name(&self) -> &str {
            "empty"
        }

        fn embed_batch(&self, _: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_single_embed_uses_batch() {
        assert_eq!(Fixed.embed("abc").unwrap(), vec![3.0, 1.0]);
    }

    #[test]
    fn test_single_embed_detects_missing_vector() {
        assert!(matches!(
            Empty.embed("abc"),
            Err(EmbeddingError::CountMismatch { expected: 1, got: 0 })
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(EmbeddingError::Transient("429".into()).is_transient());
        assert!(!EmbeddingError::Permanent("401".into()).is_transient());
        assert!(!EmbeddingError::Cancelled.is_transient());
    }

    #[test]
    fn test_model_id_hash_consistency() {
        assert_eq!(model_id_hash("text-embedding-3-small"), model_id_hash("text-embedding-3-small"));
        assert_ne!(model_id_hash("text-embedding-3-small"), model_id_hash("all-MiniLM-L6-v2"));
    }
}
