//! Integration tests against a real local embedding model.
//!
//! These tests download the model on first run and are marked #[ignore].
//! Run with: cargo test -- --ignored

#![cfg(feature = "local-embeddings")]

use std::sync::Arc;

use crate::semantic::embeddings::LocalEmbedder;
use crate::semantic::{EmbeddingProvider, SearchFilters};

use super::support::{sample_lines, test_app, write_log};

/// Index the sample log with a real model and check that meaning, not
/// vocabulary overlap, drives ranking.
#[test]
#[ignore = "requires model download (~23MB)"]
fn test_local_model_index_and_search() {
    let dir = tempfile::tempdir().unwrap();
    let provider = LocalEmbedder::new("all-MiniLM-L6-v2", dir.path().to_path_buf())
        .expect("Failed to initialize embedding model");
    assert_eq!(provider.model_name(), "all-MiniLM-L6-v2");

    let app = test_app(dir.path(), Arc::new(provider));
    let summary = app.index(&write_log(dir.path(), &sample_lines())).unwrap();
    assert_eq!(summary.indexed, 6);
    assert_eq!(summary.dimensions, 384);

    let results = app
        .search("how do I make a loaf of bread", Some(2), &SearchFilters::default())
        .unwrap();
    assert!(results.iter().all(|r| r.conversation_id == "conv-baking"), "{results:?}");

    let results = app
        .search("similarity search libraries", Some(1), &SearchFilters::default())
        .unwrap();
    assert_eq!(results[0].conversation_id, "conv-faiss");
}

#[test]
#[ignore = "requires model download (~23MB)"]
fn test_local_model_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let provider = LocalEmbedder::new("all-MiniLM-L6-v2", dir.path().to_path_buf()).unwrap();

    let a = provider.embed("vector databases").unwrap();
    let b = provider.embed("vector databases").unwrap();
    assert_eq!(a, b);
}
