//! Retrieval pipeline
//!
//! Owns every component for one indexed root: incremental builds through the
//! cache, hybrid search with reranking and full-file expansion, and
//! LLM-backed answers.

pub mod context;

use ahash::{HashMap, HashMapExt};
use crate::chunking::{Chunk, DocumentChunker};
use crate::config::Config;
use crate::embedding::{
    BatchEmbedder, EmbeddingCache, EmbeddingProvider, FastEmbedProvider, KeywordIndex,
    VectorIndexManager,
};
use crate::error::{Result, SiftError};
use crate::extract::ProcessorRegistry;
use crate::indexing::{CandidateFile, ChangeDetector, FileWalker};
use crate::llm::{LanguageModel, LlmError, LlmKeywordExtractor, OpenAiCompatibleClient, QueryEnhancer};
use crate::retrieval::{deduplicate_chunks, HybridSearcher, Reranker, ScoredChunk};
use crate::storage::{stack_rows, CacheStats, CacheStore};
use ndarray::Array2;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub use context::{assemble_prompt, estimate_tokens, AssembledPrompt};

/// Returned by `ask` when search finds nothing
pub const NO_RELEVANT_DOCUMENTS: &str =
    "No relevant documents were found for this question.";
/// Returned by `ask` when the model produced an empty answer
pub const NO_ANSWER: &str = "The language model could not produce an answer.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    NotBuilt,
    Building,
    Ready,
}

/// Outcome counters of one `build_index` pass
#[derive(Debug, Default, Clone, Serialize)]
pub struct BuildReport {
    pub new_files: usize,
    pub modified_files: usize,
    pub unchanged_files: usize,
    pub deleted_files: usize,
    /// Files skipped this pass (hash, extraction, embedding or save failure)
    pub failed_files: usize,
    /// Files over `storage.max_file_size`; their previous index entry is kept
    pub oversized_files: usize,
    /// Cached files that had to be reprocessed because their entries were unusable
    pub recovered_files: usize,
    pub chunks_embedded: usize,
    pub embedding_cache_hits: usize,
    pub total_chunks: usize,
    pub stale_entries_removed: usize,
    pub duration_ms: u64,
}

impl std::fmt::Display for BuildReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} new, {} modified, {} unchanged, {} deleted, {} failed, {} oversized; \
             {} chunks embedded ({} from cache), {} chunks indexed in {}ms",
            self.new_files,
            self.modified_files,
            self.unchanged_files,
            self.deleted_files,
            self.failed_files,
            self.oversized_files,
            self.chunks_embedded,
            self.embedding_cache_hits,
            self.total_chunks,
            self.duration_ms
        )
    }
}

/// Whether `ask` produced an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Answered,
    NoDocuments,
    NoAnswer,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub status: AnswerStatus,
    pub text: String,
    /// Files included in the prompt context
    pub sources: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub root: PathBuf,
    pub state: PipelineState,
    pub indexed_chunks: usize,
    pub nlist: usize,
    pub nprobe: usize,
    pub cache: CacheStats,
}

/// Externally constructed collaborators
pub struct PipelineComponents {
    pub provider: Arc<dyn EmbeddingProvider>,
    pub reranker: Reranker,
    pub llm: Option<Arc<dyn LanguageModel>>,
}

impl PipelineComponents {
    /// Load the configured models. Model load failures are fatal; an LLM
    /// that cannot be configured only disables `ask` and query rewriting.
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider: Arc<dyn EmbeddingProvider> =
            Arc::new(FastEmbedProvider::new(&config.embedding.model)?);
        let reranker = Reranker::from_config(&config.reranking)?;

        let llm: Option<Arc<dyn LanguageModel>> = if config.llm.enabled {
            match OpenAiCompatibleClient::from_config(&config.llm) {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    warn!("LLM unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            provider,
            reranker,
            llm,
        })
    }
}

/// Offset and length of one file's rows in the in-memory corpus
#[derive(Debug, Clone, Copy)]
struct Span {
    offset: usize,
    count: usize,
}

/// One file's contribution to the next corpus
struct FileRows {
    path: String,
    chunks: Vec<Chunk>,
    vectors: Array2<f32>,
}

pub struct RetrievalPipeline {
    root: PathBuf,
    config: Config,
    state: PipelineState,
    store: CacheStore,
    processors: ProcessorRegistry,
    chunker: DocumentChunker,
    embedder: BatchEmbedder,
    searcher: HybridSearcher,
    reranker: Reranker,
    enhancer: QueryEnhancer,
    llm: Option<Arc<dyn LanguageModel>>,
    vectors: VectorIndexManager,
    lexical: KeywordIndex,
    chunks: Vec<Chunk>,
    spans: HashMap<String, Span>,
}

impl RetrievalPipeline {
    /// Pipeline over `root` with models loaded from `config`
    pub fn new(root: impl Into<PathBuf>, config: Config) -> Result<Self> {
        let components = PipelineComponents::from_config(&config)?;
        Self::with_components(root, config, components)
    }

    pub fn with_components(
        root: impl Into<PathBuf>,
        config: Config,
        components: PipelineComponents,
    ) -> Result<Self> {
        let root = root.into();
        let store = CacheStore::open(&config.data_dir_for(&root))?;

        let cache = config
            .embedding
            .cache_embeddings
            .then(|| EmbeddingCache::new(store.database().clone(), components.provider.model_name()));
        let embedder = BatchEmbedder::new(
            components.provider.clone(),
            cache,
            config.embedding.batch_size,
        );

        let mut searcher = HybridSearcher::new(components.provider, &config.retrieval)?;
        let mut enhancer = QueryEnhancer::new(None);
        if let Some(llm) = &components.llm {
            if config.llm.keyword_extraction {
                searcher = searcher.with_keyword_extractor(Arc::new(LlmKeywordExtractor::new(
                    llm.clone(),
                )?));
            }
            if config.llm.query_rewrite {
                enhancer = QueryEnhancer::new(Some(llm.clone()));
            }
        }

        Ok(Self {
            root,
            state: PipelineState::NotBuilt,
            store,
            processors: ProcessorRegistry::default(),
            chunker: DocumentChunker::from_config(&config.chunking),
            embedder,
            searcher,
            reranker: components.reranker,
            enhancer,
            llm: components.llm,
            vectors: VectorIndexManager::new(config.indexing.clone()),
            lexical: KeywordIndex::new(),
            chunks: Vec::new(),
            spans: HashMap::new(),
            config,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Chunks currently indexed, in corpus order
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Incrementally index the root directory
    ///
    /// Per-file failures are logged and counted; they never abort the pass
    /// and leave that file's manifest row untouched.
    pub fn build_index(&mut self) -> Result<BuildReport> {
        let previous = self.state;
        self.state = PipelineState::Building;

        match self.run_build(previous) {
            Ok(report) => {
                self.state = PipelineState::Ready;
                info!("Index built: {}", report);
                Ok(report)
            }
            Err(e) => {
                self.state = previous;
                Err(e)
            }
        }
    }

    fn run_build(&mut self, previous: PipelineState) -> Result<BuildReport> {
        let start = Instant::now();
        let mut report = BuildReport::default();

        if previous == PipelineState::NotBuilt {
            self.warm_from_cache()?;
        }

        let walker = FileWalker::from_config(&self.root, &self.config)?;
        let discovery = walker.discover()?;
        let manifest = self.store.manifest()?;
        let changes = ChangeDetector::diff(discovery, &manifest);

        report.new_files = changes.new.len();
        report.modified_files = changes.modified.len();
        report.unchanged_files = changes.unchanged.len();
        report.deleted_files = changes.deleted.len();
        report.failed_files = changes.failed.len();
        report.oversized_files = changes.oversized.len();
        for failed in &changes.failed {
            warn!("Skipping {}: could not hash file", failed.relative);
        }

        for path in &changes.deleted {
            debug!("Removing deleted file {}", path);
            self.store.delete_file(path)?;
        }

        let mut rows: Vec<FileRows> = Vec::new();
        // Skipped files keep their manifest row and last indexed version
        let mut skipped: Vec<&str> = changes
            .failed
            .iter()
            .map(|c| c.relative.as_str())
            .chain(changes.oversized.iter().map(String::as_str))
            .collect();
        let mut to_process: Vec<&(CandidateFile, String)> = changes.to_process().collect();

        for entry in &changes.unchanged {
            match self.cached_rows(&entry.0.relative, &entry.1) {
                Some(file_rows) => rows.push(file_rows),
                None => {
                    report.recovered_files += 1;
                    to_process.push(entry);
                }
            }
        }

        let total = to_process.len();
        for (i, (candidate, hash)) in to_process.into_iter().enumerate() {
            info!("Processing [{}/{}] {}", i + 1, total, candidate.relative);
            match self.process_file(candidate, hash, &mut report) {
                Ok(file_rows) => rows.push(file_rows),
                Err(e) => {
                    warn!("Skipping {}: {}", candidate.relative, e);
                    report.failed_files += 1;
                    skipped.push(&candidate.relative);
                }
            }
        }

        for path in skipped {
            let Some(recorded) = manifest.get(path) else {
                continue;
            };
            if let Some(file_rows) = self.cached_rows(path, recorded) {
                debug!("Keeping previously indexed version of {}", path);
                rows.push(file_rows);
            }
        }

        self.install_corpus(rows)?;
        report.total_chunks = self.chunks.len();

        let gc = self.store.gc()?;
        report.stale_entries_removed = gc.deleted_entries + gc.partial_writes_removed;
        report.duration_ms = start.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Load the cached corpus into memory so unchanged files can be served
    /// from the live index. Unusable entries are dropped from the manifest,
    /// which makes the following diff treat those files as new.
    fn warm_from_cache(&mut self) -> Result<()> {
        let snapshot = self.store.load_on_startup()?;
        if !snapshot.dropped.is_empty() {
            warn!(
                "{} cached files were unusable and will be reprocessed",
                snapshot.dropped.len()
            );
        }
        self.vectors.build(&snapshot.vectors)?;
        self.set_chunks(snapshot.chunks);
        Ok(())
    }

    /// Chunks and vectors of an unchanged file, from the live index when it
    /// holds them, otherwise from the cache
    fn cached_rows(&self, path: &str, hash: &str) -> Option<FileRows> {
        if let Some(rows) = self.live_rows(path, hash) {
            if !self.store.has_vectors(path) {
                warn!("Vector entry for {} missing, restoring from index", path);
                if let Err(e) = self.store.save_vectors(path, &rows.vectors) {
                    warn!("Could not restore vectors for {}: {}", path, e);
                }
            }
            return Some(rows);
        }

        match self.store.load_file(path) {
            Ok((chunks, vectors)) => {
                if vectors.nrows() > 0 && vectors.ncols() != self.embedder.dimension() {
                    warn!("Cached vectors for {} have the wrong dimension", path);
                    return None;
                }
                Some(FileRows {
                    path: path.to_string(),
                    chunks,
                    vectors,
                })
            }
            Err(miss) => {
                warn!("Cache for {} unusable ({}), reprocessing", path, miss);
                None
            }
        }
    }

    /// Rows of `path` reconstructed from the in-memory index
    fn live_rows(&self, path: &str, hash: &str) -> Option<FileRows> {
        let span = self.spans.get(path)?;
        let chunks = self.chunks.get(span.offset..span.offset + span.count)?;
        if chunks.iter().any(|c| c.source_hash != hash) {
            return None;
        }
        let vectors = self.vectors.reconstruct_range(span.offset, span.count).ok()?;
        if vectors.ncols() != self.embedder.dimension() {
            return None;
        }
        Some(FileRows {
            path: path.to_string(),
            chunks: chunks.to_vec(),
            vectors,
        })
    }

    /// Extract, chunk, embed and persist one file
    fn process_file(
        &self,
        candidate: &CandidateFile,
        hash: &str,
        report: &mut BuildReport,
    ) -> Result<FileRows> {
        let (file_type, text) = self.processors.extract(&candidate.absolute)?;
        let parts = self.chunker.split(&text);
        let chunks = Chunk::from_parts(parts, &candidate.relative, file_type, hash);

        let texts: Vec<String> = chunks.iter().map(Chunk::embedding_text).collect();
        let (vectors, batch) = self.embedder.embed_documents(&texts)?;
        report.chunks_embedded += batch.embedded;
        report.embedding_cache_hits += batch.cache_hits;

        self.store
            .save_file(&candidate.relative, hash, candidate.size, &chunks, &vectors)?;
        debug!("{}: {} chunks", candidate.relative, chunks.len());

        Ok(FileRows {
            path: candidate.relative.clone(),
            chunks,
            vectors,
        })
    }

    /// Replace the in-memory corpus and rebuild both indexes
    fn install_corpus(&mut self, mut rows: Vec<FileRows>) -> Result<()> {
        rows.sort_by(|a, b| a.path.cmp(&b.path));

        let dimension = self.embedder.dimension();
        let mut chunks = Vec::new();
        let mut matrices = Vec::new();
        for file in rows {
            if file.chunks.is_empty() {
                continue;
            }
            chunks.extend(file.chunks);
            matrices.push(file.vectors);
        }

        let matrix = stack_rows(&matrices, dimension)?;
        self.vectors.build(&matrix)?;
        self.set_chunks(chunks);
        Ok(())
    }

    fn set_chunks(&mut self, chunks: Vec<Chunk>) {
        self.spans.clear();
        for (offset, chunk) in chunks.iter().enumerate() {
            self.spans
                .entry(chunk.file_path.clone())
                .and_modify(|span| span.count += 1)
                .or_insert(Span { offset, count: 1 });
        }
        self.lexical.rebuild(&chunks);
        self.chunks = chunks;
    }

    fn ensure_built(&mut self) -> Result<()> {
        if self.state == PipelineState::NotBuilt {
            info!("Index not built yet, indexing {}", self.root.display());
            self.build_index()?;
        }
        Ok(())
    }

    /// Ranked chunks for `query`, at most `top_k`
    pub fn search(&mut self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        self.ensure_built()?;
        if top_k == 0 || query.trim().is_empty() || self.chunks.is_empty() {
            return Ok(Vec::new());
        }

        let candidates: Vec<ScoredChunk> = self
            .searcher
            .search(query, top_k, &self.vectors, &self.lexical)?
            .into_iter()
            .filter_map(|(id, score)| {
                self.chunks
                    .get(id)
                    .map(|chunk| ScoredChunk::new(chunk.clone(), score))
            })
            .collect();
        if candidates.is_empty() {
            debug!("No candidates for {:?}", query);
            return Ok(Vec::new());
        }

        let reranked = self.reranker.rerank(query, candidates, top_k);
        let expanded = if self.config.retrieval.expand_full_file {
            self.expand_to_files(reranked)
        } else {
            reranked
        };

        let mut results = deduplicate_chunks(expanded);
        // Stable: siblings stay behind the hit that pulled them in
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        Ok(results)
    }

    /// Follow each hit with every chunk of its file, scored like the hit
    fn expand_to_files(&self, hits: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
        let mut expanded = Vec::new();
        for hit in hits {
            let siblings = self
                .spans
                .get(&hit.chunk.file_path)
                .and_then(|span| self.chunks.get(span.offset..span.offset + span.count))
                .unwrap_or(&[]);
            let score = hit.score;
            expanded.push(hit);
            expanded.extend(
                siblings
                    .iter()
                    .map(|chunk| ScoredChunk::new(chunk.clone(), score)),
            );
        }
        expanded
    }

    /// Search with the (optionally rewritten) question
    pub fn query(&mut self, question: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        let query = self.enhancer.enhance(question);
        self.search(&query, top_k)
    }

    /// Answer `question` from the indexed documents
    ///
    /// A failed or empty generation yields [`AnswerStatus::NoAnswer`]; only
    /// a missing model or a failed search is an error.
    pub fn ask(&mut self, question: &str) -> Result<Answer> {
        let llm = self.llm.clone().ok_or(SiftError::Llm(LlmError::Disabled))?;

        let top_k = self.config.retrieval.default_top_k;
        let results = self.query(question, top_k)?;
        if results.is_empty() {
            return Ok(Answer {
                status: AnswerStatus::NoDocuments,
                text: NO_RELEVANT_DOCUMENTS.to_string(),
                sources: Vec::new(),
            });
        }

        let budget = self
            .config
            .context
            .max_token_count
            .saturating_sub(self.config.context.reserved_headroom);
        let assembled = assemble_prompt(question, &results, budget);
        debug!(
            "Prompt context: {} tokens from {} files",
            assembled.context_tokens,
            assembled.sources.len()
        );

        let text = match llm.generate(&assembled.prompt) {
            Ok(text) => text,
            Err(e) => {
                warn!("Answer generation with {} failed: {}", llm.name(), e);
                String::new()
            }
        };
        if text.trim().is_empty() {
            return Ok(Answer {
                status: AnswerStatus::NoAnswer,
                text: NO_ANSWER.to_string(),
                sources: assembled.sources,
            });
        }

        Ok(Answer {
            status: AnswerStatus::Answered,
            text: text.trim().to_string(),
            sources: assembled.sources,
        })
    }

    pub fn status(&self) -> Result<PipelineStatus> {
        Ok(PipelineStatus {
            root: self.root.clone(),
            state: self.state,
            indexed_chunks: self.chunks.len(),
            nlist: self.vectors.nlist(),
            nprobe: self.vectors.nprobe(),
            cache: self.store.stats()?,
        })
    }
}
