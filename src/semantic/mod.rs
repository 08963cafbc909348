//! Semantic search over the message archive.
//!
//! # Architecture
//!
//! - `embeddings`: the `EmbeddingProvider` capability and the local fastembed provider
//! - `openai`: provider for OpenAI-compatible HTTP endpoints
//! - `retry`: backoff for transient provider failures
//! - `batch`: parallel batch embedding with cancellation
//! - `index`: in-memory vector index with cosine similarity search
//! - `storage`: binary file I/O for vectors.bin
//! - `metadata`: slot to message mapping, metadata.json
//! - `snapshot`: immutable snapshots and atomic generation swap
//! - `builder`: full-batch index build
//! - `query`: filtered top-k search
//! - `keywords` / `cluster`: topic clustering and labels

pub mod batch;
pub mod builder;
pub mod cluster;
pub mod embeddings;
pub mod index;
pub mod keywords;
pub mod metadata;
pub mod openai;
pub mod query;
pub mod retry;
pub mod snapshot;
pub mod storage;

pub use batch::{BatchOptions, CancelToken};
pub use builder::{BuildError, IndexBuilder};
pub use cluster::{cluster_messages, Cluster, ClusterParams, Clustering, ClusteringError};
pub use embeddings::{EmbeddingError, EmbeddingProvider};
pub use query::{QueryEngine, QueryError, QueryOptions, SearchFilters, SearchResult};
pub use snapshot::{IndexSnapshot, SnapshotError, SnapshotStore};
