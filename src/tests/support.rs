//! Deterministic embedding providers and sample data for crate tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

use crate::app::App;
use crate::config::Config;
use crate::semantic::keywords::tokenize;
use crate::semantic::{CancelToken, EmbeddingError, EmbeddingProvider};

pub const TEST_MODEL: &str = "hashing-test-model";
pub const TEST_DIMENSIONS: usize = 256;

/// Bag-of-words embedder: each token adds ±1 to a hashed bucket.
///
/// Texts sharing words get similar vectors, identical token multisets get
/// identical vectors, and the output never depends on call order.
pub struct HashingEmbedder {
    model: String,
    dimensions: usize,
    calls: AtomicUsize,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self::with_model(TEST_MODEL)
    }

    pub fn with_model(model: &str) -> Self {
        Self {
            model: model.to_string(),
            dimensions: TEST_DIMENSIONS,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut tokens = tokenize(text);
        if tokens.is_empty() {
            tokens.push(text.trim().to_lowercase());
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokens {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
            ]) as usize
                % self.dimensions;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        vector
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// Fails every call with a non-retryable error, like a revoked API key.
pub struct RejectingEmbedder;

impl EmbeddingProvider for RejectingEmbedder {
    fn model_name(&self) -> &str {
        TEST_MODEL
    }

    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Permanent("HTTP 401 Unauthorized: invalid api key".into()))
    }
}

/// Trips the cancel token while embedding the first batch, as Ctrl-C would.
pub struct InterruptedEmbedder {
    inner: HashingEmbedder,
    cancel: CancelToken,
    batches: Mutex<usize>,
}

impl InterruptedEmbedder {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            inner: HashingEmbedder::new(),
            cancel,
            batches: Mutex::new(0),
        }
    }

    pub fn batches(&self) -> usize {
        *self.batches.lock().unwrap()
    }
}

impl EmbeddingProvider for InterruptedEmbedder {
    fn model_name(&self) -> &str {
        TEST_MODEL
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        *self.batches.lock().unwrap() += 1;
        self.cancel.cancel();
        self.inner.embed_batch(texts)
    }
}

/// One conversation log line.
pub fn message(content: &str, role: &str, conversation: &str, id: &str, timestamp: &str) -> String {
    format!(
        r#"{{"content": {}, "role": "{role}", "conversation_id": "{conversation}", "message_id": "{id}", "timestamp": {timestamp}}}"#,
        serde_json::to_string(content).unwrap()
    )
}

/// Six messages, three per role: two about FAISS, two about mind maps, two about baking.
pub fn sample_lines() -> Vec<String> {
    vec![
        message(
            "What is FAISS and how does it compare to other vector databases?",
            "user",
            "conv-faiss",
            "m1",
            "1704103200",
        ),
        message(
            "FAISS is a library for vector similarity search. Unlike full vector databases it runs in process.",
            "assistant",
            "conv-faiss",
            "m2",
            "1704103260",
        ),
        message(
            "Help me sketch a mind map for my novel",
            "user",
            "conv-mindmap",
            "m3",
            r#""2024-01-05T09:00:00Z""#,
        ),
        message(
            "Start the mind map with the central theme, then branch out to characters and setting.",
            "assistant",
            "conv-mindmap",
            "m4",
            r#""2024-01-05T09:01:30""#,
        ),
        message(
            "Recommend a good recipe for banana bread",
            "user",
            "conv-baking",
            "m5",
            "1705312800.75",
        ),
        message(
            "Mash ripe bananas, mix with flour, sugar and butter, then bake for an hour.",
            "assistant",
            "conv-baking",
            "m6",
            "1705312900",
        ),
    ]
}

pub fn write_log(dir: &Path, lines: &[String]) -> PathBuf {
    let path = dir.join("conversations.jsonl");
    std::fs::write(&path, lines.join("\n")).unwrap();
    path
}

/// App rooted in `base` that embeds with `provider`.
pub fn test_app(base: &Path, provider: Arc<dyn EmbeddingProvider>) -> App {
    test_app_with(base, provider, CancelToken::new())
}

pub fn test_app_with(base: &Path, provider: Arc<dyn EmbeddingProvider>, cancel: CancelToken) -> App {
    let mut config = Config::default();
    config.embedding.batch_size = 2;
    config.embedding.parallelism = "2".to_string();
    config.clustering.clusters = 3;
    App::new(config, base.to_path_buf(), cancel).with_provider(provider)
}
