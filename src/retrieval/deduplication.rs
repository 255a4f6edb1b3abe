//! Result deduplication by chunk identity

use crate::retrieval::ScoredChunk;
use std::collections::HashSet;

/// Drop repeated `(file_path, chunk_index)` pairs, keeping the first
/// (highest-ranked) instance and the input order
pub fn deduplicate_chunks(chunks: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
    let mut seen: HashSet<(String, usize)> = HashSet::new();

    chunks
        .into_iter()
        .filter(|c| seen.insert((c.chunk.file_path.clone(), c.chunk.chunk_index)))
        .collect()
}
