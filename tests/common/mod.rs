//! Deterministic test doubles for the model traits
#![allow(dead_code)]

use docsift::config::Config;
use docsift::embedding::{normalize, EmbeddingError, EmbeddingProvider};
use docsift::llm::{LanguageModel, LlmError};
use docsift::retrieval::{CrossEncoder, RerankError, Reranker};
use docsift::{PipelineComponents, RetrievalPipeline};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const DIMENSION: usize = 256;

/// Bag-of-words embedder: each lower-cased word adds one to an FNV-hashed bucket
pub struct HashEmbedder {
    pub texts_embedded: Arc<AtomicUsize>,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            texts_embedded: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }
}

fn bucket(word: &str) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % DIMENSION as u64) as usize
}

impl EmbeddingProvider for HashEmbedder {
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; DIMENSION];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[bucket(word)] += 1.0;
        }
        vector[0] += 0.01;
        normalize(&mut vector);
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        texts.iter().map(|t| self.embed_one(t)).collect()
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "hash-bag-of-words"
    }
}

/// Scores documents by occurrences of a fixed word, or fails every batch
pub struct ScriptedCrossEncoder {
    pub favourite: Option<String>,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedCrossEncoder {
    pub fn preferring(word: &str) -> Self {
        Self {
            favourite: Some(word.to_lowercase()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            favourite: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl CrossEncoder for ScriptedCrossEncoder {
    fn name(&self) -> &str {
        "scripted"
    }

    fn score_batch(&self, _query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(word) = &self.favourite else {
            return Err(RerankError::RerankingError("device lost".to_string()));
        };
        Ok(documents
            .iter()
            .map(|d| d.to_lowercase().matches(word.as_str()).count() as f32)
            .collect())
    }
}

/// Answers by prompt kind and records every prompt it sees
pub struct ScriptedLlm {
    pub rewrite: String,
    pub keywords: String,
    pub answer: String,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn answering(answer: &str) -> Self {
        Self {
            rewrite: String::new(),
            keywords: String::new(),
            answer: answer.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl LanguageModel for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.starts_with("Rewrite") {
            Ok(self.rewrite.clone())
        } else if prompt.starts_with("List the most important") {
            Ok(self.keywords.clone())
        } else {
            Ok(self.answer.clone())
        }
    }
}

/// Small chunks, no git, no embedding cache
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.walker.prefer_git = false;
    config.chunking.min_paragraph_length = 10;
    config.chunking.max_paragraph_length = 200;
    config.embedding.cache_embeddings = false;
    config.reranking.enabled = false;
    config
}

pub fn components(embedder: Arc<HashEmbedder>) -> PipelineComponents {
    PipelineComponents {
        provider: embedder,
        reranker: Reranker::disabled(),
        llm: None,
    }
}

pub fn pipeline_with(root: &Path, config: Config, components: PipelineComponents) -> RetrievalPipeline {
    RetrievalPipeline::with_components(root, config, components).expect("Failed to create pipeline")
}

pub fn write(root: &Path, name: &str, body: &str) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, body).unwrap();
}

/// The two-file corpus used by the end-to-end scenarios
pub fn write_pets_corpus(root: &Path) {
    write(root, "a.txt", "Cats are great pets. Dogs are loyal companions.");
    write(root, "b.txt", "The quick brown fox jumps. The lazy dog sleeps all day.");
}
