//! Embedding and indexing
//!
//! - [`EmbeddingProvider`] abstracts the dense model; [`FastEmbedProvider`]
//!   runs it locally
//! - [`BatchEmbedder`] batches document texts and fills the persistent
//!   [`EmbeddingCache`]
//! - [`VectorIndexManager`] owns the flat and IVF indexes
//! - [`KeywordIndex`] scores the lexical leg of hybrid search

mod batch;
mod cache;
mod keyword_index;
mod provider;
mod vector_index;

pub use batch::{BatchEmbedder, BatchResult};
pub use cache::EmbeddingCache;
pub use keyword_index::{KeywordIndex, KeywordSearchResult, LexicalWeights};
pub use provider::{normalize, EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use vector_index::{FlatIndex, IvfIndex, SearchResult, VectorIndexError, VectorIndexManager};
