//! Chunks carrying a retrieval score

use crate::chunking::Chunk;
use serde::{Deserialize, Serialize};

/// A chunk with the score of the stage that last ranked it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

impl ScoredChunk {
    pub fn new(chunk: Chunk, score: f32) -> Self {
        Self { chunk, score }
    }

    /// Identity used for deduplication
    pub fn key(&self) -> (&str, usize) {
        (self.chunk.file_path.as_str(), self.chunk.chunk_index)
    }
}
