//! Sentence-aware chunking with sentence-level overlap
//!
//! Text is split into sentences on a fixed set of terminal punctuation marks
//! (CJK and Latin), then sentences are packed greedily into chunks of at most
//! `max_paragraph_length` characters. Each new chunk is seeded with the last
//! two sentences of the chunk before it, so neighbouring chunks share context.

use crate::config::ChunkingConfig;
use serde::{Deserialize, Serialize};

/// Characters that end a sentence. The mark stays with its sentence.
pub const SENTENCE_TERMINATORS: [char; 7] = ['。', '！', '？', '…', '.', '!', '?'];

/// Sentences carried over from one chunk into the next
const OVERLAP_SENTENCES: usize = 2;

/// One indexed slice of a source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    /// Path relative to the indexed root
    pub file_path: String,
    /// Name of the processor that extracted the text
    pub file_type: String,
    /// 0-based position within the file
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// Content hash of the file at extraction time
    pub source_hash: String,
}

impl Chunk {
    /// Build the chunks of one file from the chunker's output, in order
    pub fn from_parts(
        parts: Vec<String>,
        file_path: &str,
        file_type: &str,
        source_hash: &str,
    ) -> Vec<Chunk> {
        let total_chunks = parts.len();
        parts
            .into_iter()
            .enumerate()
            .map(|(chunk_index, content)| Chunk {
                content,
                file_path: file_path.to_string(),
                file_type: file_type.to_string(),
                chunk_index,
                total_chunks,
                source_hash: source_hash.to_string(),
            })
            .collect()
    }

    /// `"<path> [i/total]"`, 1-based
    pub fn label(&self) -> String {
        format!(
            "{} [{}/{}]",
            self.file_path,
            self.chunk_index + 1,
            self.total_chunks
        )
    }

    /// Text handed to the embedding model and the cross-encoder
    pub fn embedding_text(&self) -> String {
        format_embedding_text(&self.file_path, &self.content)
    }
}

pub fn format_embedding_text(file_path: &str, content: &str) -> String {
    format!("File: {}\nContent: {}", file_path, content)
}

/// Splits extracted text into overlapping, length-bounded chunks
///
/// Lengths are measured in characters, not bytes. `max_paragraph_length` is
/// a soft target: a single sentence longer than it is still emitted whole,
/// and an overlap-seeded chunk may run past it by the carried-over sentences.
#[derive(Debug, Clone)]
pub struct DocumentChunker {
    min_paragraph_length: usize,
    max_paragraph_length: usize,
}

impl DocumentChunker {
    pub fn new(min_paragraph_length: usize, max_paragraph_length: usize) -> Self {
        Self {
            min_paragraph_length,
            max_paragraph_length,
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.min_paragraph_length, config.max_paragraph_length)
    }

    pub fn min_paragraph_length(&self) -> usize {
        self.min_paragraph_length
    }

    pub fn max_paragraph_length(&self) -> usize {
        self.max_paragraph_length
    }

    /// Split `text` into chunks
    ///
    /// Deterministic for a given `(text, min, max)`. Texts shorter than
    /// `min_paragraph_length` yield no chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        let sentences = split_sentences(text);

        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_len = 0usize;

        for sentence in sentences {
            let sentence_len = char_len(sentence);
            let projected = if current.is_empty() {
                sentence_len
            } else {
                current_len + 1 + sentence_len
            };

            if projected > self.max_paragraph_length && !current.is_empty() {
                self.emit(&current, &mut chunks);

                let keep_from = current.len().saturating_sub(OVERLAP_SENTENCES);
                current = current.split_off(keep_from);
                current_len = joined_len(&current);
            }

            current_len = if current.is_empty() {
                sentence_len
            } else {
                current_len + 1 + sentence_len
            };
            current.push(sentence);
        }

        if !current.is_empty() {
            self.emit(&current, &mut chunks);
        }

        chunks
    }

    fn emit(&self, sentences: &[&str], chunks: &mut Vec<String>) {
        let chunk = sentences.join(" ");
        let trimmed = chunk.trim();
        if trimmed.is_empty() || char_len(trimmed) < self.min_paragraph_length {
            return;
        }
        chunks.push(trimmed.to_string());
    }
}

impl Default for DocumentChunker {
    fn default() -> Self {
        Self::from_config(&ChunkingConfig::default())
    }
}

/// Split text into trimmed, non-empty sentences, each keeping its terminator
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0usize;

    for (idx, ch) in text.char_indices() {
        if SENTENCE_TERMINATORS.contains(&ch) {
            let end = idx + ch.len_utf8();
            push_trimmed(&text[start..end], &mut sentences);
            start = end;
        }
    }
    push_trimmed(&text[start..], &mut sentences);

    sentences
}

fn push_trimmed<'a>(candidate: &'a str, sentences: &mut Vec<&'a str>) {
    let trimmed = candidate.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed);
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn joined_len(parts: &[&str]) -> usize {
    if parts.is_empty() {
        return 0;
    }
    parts.iter().map(|p| char_len(p)).sum::<usize>() + parts.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_sentences(count: usize) -> String {
        (0..count)
            .map(|i| format!("Sentence number {} talks about topic {}.", i, i % 7))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_sentence_split_keeps_terminators() {
        let sentences = split_sentences("Hello there. How are you? 很好。 Great!");
        assert_eq!(
            sentences,
            vec!["Hello there.", "How are you?", "很好。", "Great!"]
        );
    }

    #[test]
    fn test_trailing_fragment_is_a_sentence() {
        let sentences = split_sentences("Complete. trailing words without a mark");
        assert_eq!(sentences, vec!["Complete.", "trailing words without a mark"]);
    }

    #[test]
    fn test_split_is_deterministic() {
        let chunker = DocumentChunker::new(20, 120);
        let text = numbered_sentences(40);
        assert_eq!(chunker.split(&text), chunker.split(&text));
    }

    #[test]
    fn test_short_document_produces_no_chunks() {
        let chunker = DocumentChunker::new(50, 1000);
        assert!(chunker.split("Too short.").is_empty());
        assert!(chunker.split("   \n\t ").is_empty());
        assert!(chunker.split("").is_empty());
    }

    #[test]
    fn test_chunk_length_bounds() {
        let min = 40;
        let max = 200;
        let chunker = DocumentChunker::new(min, max);
        let text = numbered_sentences(60);

        let chunks = chunker.split(&text);
        assert!(chunks.len() > 2);

        let longest_sentence = split_sentences(&text)
            .iter()
            .map(|s| s.chars().count())
            .max()
            .unwrap();
        // Overlap seeding may add up to two carried sentences beyond the target
        let slack = (longest_sentence + 1) * OVERLAP_SENTENCES;

        for (i, chunk) in chunks.iter().enumerate() {
            let len = chunk.chars().count();
            assert!(!chunk.trim().is_empty());
            assert!(len <= max + slack, "chunk {} too long: {}", i, len);
            if i + 1 < chunks.len() {
                assert!(len >= min, "chunk {} too short: {}", i, len);
            }
        }
    }

    #[test]
    fn test_overlap_between_neighbours() {
        let chunker = DocumentChunker::new(10, 150);
        let text = numbered_sentences(30);
        let chunks = chunker.split(&text);
        assert!(chunks.len() >= 2);

        for pair in chunks.windows(2) {
            let previous = split_sentences(&pair[0]);
            let last = previous.last().unwrap();
            assert!(
                pair[1].contains(last),
                "last sentence {:?} missing from next chunk {:?}",
                last,
                pair[1]
            );
            assert!(pair[1].starts_with(previous[previous.len().saturating_sub(2)]));
        }
    }

    #[test]
    fn test_oversized_sentence_is_kept_whole() {
        let chunker = DocumentChunker::new(5, 30);
        let long = "This single sentence is far longer than the configured maximum length.";
        let chunks = chunker.split(long);
        assert_eq!(chunks, vec![long.to_string()]);
    }

    #[test]
    fn test_chunk_parts_are_numbered() {
        let chunks = Chunk::from_parts(
            vec!["first part".to_string(), "second part".to_string()],
            "notes/a.md",
            "text",
            "abc123",
        );
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(chunks[1].total_chunks, 2);
        assert_eq!(chunks[0].label(), "notes/a.md [1/2]");
        assert_eq!(
            chunks[0].embedding_text(),
            "File: notes/a.md\nContent: first part"
        );
    }

    #[test]
    fn test_cjk_lengths_are_counted_in_chars() {
        // 10 chars but 28 bytes: a byte-based length would have closed after the first sentence
        let chunker = DocumentChunker::new(3, 12);
        let chunks = chunker.split("猫很好。狗很忠诚。鸟会飞。鱼会游。");
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0], "猫很好。 狗很忠诚。");
    }
}
