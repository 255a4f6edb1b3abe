//! docsift - hybrid document retrieval
//!
//! Indexes a directory of heterogeneous documents into overlapping chunks,
//! embeds them into a vector index alongside a lexical TF-IDF index, and
//! answers queries by fusing both legs and reranking with a cross-encoder.
//! Results can feed an LLM for retrieval-augmented answers.

pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod indexing;
pub mod llm;
pub mod pipeline;
pub mod retrieval;
pub mod session;
pub mod storage;

pub use chunking::{Chunk, DocumentChunker};
pub use config::Config;
pub use error::{Result, SiftError};
pub use pipeline::{Answer, AnswerStatus, BuildReport, PipelineComponents, PipelineState, RetrievalPipeline};
pub use retrieval::ScoredChunk;
pub use session::{Session, SessionManager};
