//! Configuration management for docsift
//!
//! Handles loading, validation, profiles and environment overrides. Every
//! heuristic constant used by the retrieval engine (fusion weights, IVF
//! cluster thresholds, chunk lengths, token budget) lives here rather than in
//! the component that consumes it.

use crate::error::{Result, SiftError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Current configuration schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta", default)]
    pub meta: MetaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub reranking: RerankingConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub walker: WalkerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: current_timestamp(),
            last_modified: current_timestamp(),
        }
    }
}

/// Where derived data lives and which files are too large to index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Name of the data directory created inside the indexed root
    pub data_dir_name: String,
    /// Hard size ceiling for candidate files, e.g. "100MB"
    pub max_file_size: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir_name: ".docsift".to_string(),
            max_file_size: "100MB".to_string(),
        }
    }
}

impl StorageConfig {
    /// Parse `max_file_size` into bytes
    pub fn max_file_size_bytes(&self) -> Result<u64> {
        parse_size(&self.max_file_size).ok_or_else(|| SiftError::InvalidConfigValue {
            path: "storage.max_file_size".to_string(),
            message: format!("Cannot parse '{}' as a size", self.max_file_size),
        })
    }
}

/// Chunk length bounds, in characters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub min_paragraph_length: usize,
    pub max_paragraph_length: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_paragraph_length: 50,
            max_paragraph_length: 1000,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
    /// Persist document vectors keyed by (model, text) hash
    pub cache_embeddings: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            batch_size: 32,
            cache_embeddings: true,
        }
    }
}

/// IVF cluster-count heuristic and probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Below this many vectors a single cluster is used
    pub small_corpus_threshold: usize,
    /// Below this many vectors, one cluster per `medium_vectors_per_cluster`
    pub large_corpus_threshold: usize,
    pub medium_vectors_per_cluster: usize,
    pub large_vectors_per_cluster: usize,
    /// Cluster floor once the corpus is large
    pub min_large_clusters: usize,
    /// Upper bound on clusters probed per query
    pub max_nprobe: usize,
    /// Lloyd iterations when training the quantizer
    pub train_iterations: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            small_corpus_threshold: 100,
            large_corpus_threshold: 1000,
            medium_vectors_per_cluster: 100,
            large_vectors_per_cluster: 1000,
            min_large_clusters: 4,
            max_nprobe: 10,
            train_iterations: 20,
        }
    }
}

/// Hybrid search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub dense_weight: f32,
    pub lexical_weight: f32,
    /// Multiplier applied when the full query appears verbatim in a chunk
    pub verbatim_boost: f32,
    /// Added per keyword found in the chunk's file path
    pub path_bonus: f32,
    /// Dense leg over-fetch factor (candidates = multiplier * top_k)
    pub candidate_multiplier: usize,
    pub default_top_k: usize,
    /// Expand each hit to every chunk of its source file
    pub expand_full_file: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            dense_weight: 0.7,
            lexical_weight: 0.3,
            verbatim_boost: 2.0,
            path_bonus: 0.1,
            candidate_multiplier: 3,
            default_top_k: 30,
            expand_full_file: true,
        }
    }
}

/// Where cross-encoder inference should run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTarget {
    /// GPU first, CPU on failure
    Auto,
    Cpu,
    Gpu,
}

/// Cross-encoder reranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankingConfig {
    pub enabled: bool,
    pub model: String,
    pub batch_size: usize,
    pub device: ExecutionTarget,
}

impl Default for RerankingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "BAAI/bge-reranker-base".to_string(),
            batch_size: 50,
            device: ExecutionTarget::Auto,
        }
    }
}

/// Prompt context budget for `ask`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_token_count: usize,
    /// Tokens kept free for the prompt frame and the model's answer
    pub reserved_headroom: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_token_count: 8192,
            reserved_headroom: 1024,
        }
    }
}

/// Candidate file enumeration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkerConfig {
    /// Use `git ls-files` when the root is a git work tree
    pub prefer_git: bool,
    /// Glob patterns (relative to the root) excluded from indexing
    pub ignore_patterns: Vec<String>,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            prefer_git: true,
            ignore_patterns: vec![
                "**/.git/**".to_string(),
                "**/__pycache__/**".to_string(),
                "**/node_modules/**".to_string(),
                "**/target/**".to_string(),
            ],
        }
    }
}

/// Supported LLM backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    Groq,
    Ollama,
}

impl LlmProvider {
    /// Default OpenAI-compatible endpoint for the provider
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "https://api.openai.com/v1",
            LlmProvider::Groq => "https://api.groq.com/openai/v1",
            LlmProvider::Ollama => "http://localhost:11434/v1",
        }
    }

    /// Whether the provider needs an API key
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, LlmProvider::Ollama)
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: LlmProvider,
    /// Overrides the provider's default endpoint
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
    /// Ask the LLM for search keywords before falling back to tokenization
    pub keyword_extraction: bool,
    /// Ask the LLM to paraphrase questions before searching
    pub query_rewrite: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: LlmProvider::Groq,
            base_url: None,
            api_key_env: "GROQ_API_KEY".to_string(),
            model: "llama-3.1-70b-versatile".to_string(),
            temperature: 0.1,
            keyword_extraction: true,
            query_rewrite: true,
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reranking_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_top_k: Option<usize>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SiftError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| SiftError::io(e, format!("Failed to read config file: {:?}", path)))?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(SiftError::ConfigNotFound { .. }) => {
                tracing::debug!("No config at {}, using defaults", path.display());
                let mut config = Self::default();
                config.apply_env_overrides();
                ConfigValidator::validate(&config)?;
                Ok(config)
            }
            other => other,
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SiftError::io(e, format!("Failed to create config directory: {:?}", parent))
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|e| SiftError::io(e, format!("Failed to write config file: {:?}", path)))?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load_or_default(path)?;
        config.apply_profile(profile)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| SiftError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(enabled) = overrides.reranking_enabled {
            self.reranking.enabled = enabled;
        }
        if let Some(enabled) = overrides.llm_enabled {
            self.llm.enabled = enabled;
        }
        if let Some(top_k) = overrides.default_top_k {
            self.retrieval.default_top_k = top_k;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: DOCSIFT_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("DOCSIFT_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "CHUNKING__MIN_PARAGRAPH_LENGTH" => {
                self.chunking.min_paragraph_length = parse_env(path, value)?;
            }
            "CHUNKING__MAX_PARAGRAPH_LENGTH" => {
                self.chunking.max_paragraph_length = parse_env(path, value)?;
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "EMBEDDING__BATCH_SIZE" => {
                self.embedding.batch_size = parse_env(path, value)?;
            }
            "RERANKING__ENABLED" => {
                self.reranking.enabled = parse_env(path, value)?;
            }
            "RERANKING__MODEL" => {
                self.reranking.model = value.to_string();
            }
            "CONTEXT__MAX_TOKEN_COUNT" => {
                self.context.max_token_count = parse_env(path, value)?;
            }
            "LLM__ENABLED" => {
                self.llm.enabled = parse_env(path, value)?;
            }
            "LLM__MODEL" => {
                self.llm.model = value.to_string();
            }
            "LLM__BASE_URL" => {
                self.llm.base_url = Some(value.to_string());
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| SiftError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("docsift").join("config.toml"))
    }

    /// Data directory for an indexed root
    pub fn data_dir_for(&self, root: &Path) -> PathBuf {
        root.join(&self.storage.data_dir_name)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig::default(),
            storage: StorageConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
            reranking: RerankingConfig::default(),
            context: ContextConfig::default(),
            walker: WalkerConfig::default(),
            llm: LlmConfig::default(),
            profiles: HashMap::new(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| SiftError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Parse size strings like "100MB", "512KB", "1GB" or a bare byte count
pub fn parse_size(s: &str) -> Option<u64> {
    let upper = s.trim().to_uppercase();
    let (digits, multiplier) = if let Some(n) = upper.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = upper.strip_suffix('B') {
        (n, 1)
    } else {
        (upper.as_str(), 1)
    };
    digits.trim().parse::<u64>().ok().map(|n| n * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("100MB"), Some(100 * 1024 * 1024));
        assert_eq!(parse_size("512kb"), Some(512 * 1024));
        assert_eq!(parse_size("2048"), Some(2048));
        assert_eq!(parse_size("12B"), Some(12));
        assert_eq!(parse_size("lots"), None);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.chunking.min_paragraph_length = 20;
        config.retrieval.dense_weight = 0.6;
        config.retrieval.lexical_weight = 0.4;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.chunking.min_paragraph_length, 20);
        assert!((loaded.retrieval.dense_weight - 0.6).abs() < f32::EPSILON);
        assert_eq!(loaded.reranking.device, ExecutionTarget::Auto);
    }

    #[test]
    fn test_partial_file_uses_section_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            "[_meta]\nschema_version = \"1.0.0\"\n\n[chunking]\nmax_paragraph_length = 400\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.chunking.max_paragraph_length, 400);
        assert_eq!(config.chunking.min_paragraph_length, 50);
        assert_eq!(config.llm.provider, LlmProvider::Groq);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let temp = TempDir::new().unwrap();
        let config = Config::load_or_default(&temp.path().join("absent.toml")).unwrap();
        assert_eq!(config.storage.data_dir_name, ".docsift");
    }

    #[test]
    fn test_apply_profile() {
        let mut config = Config::default();
        config.profiles.insert(
            "fast".to_string(),
            ProfileOverrides {
                reranking_enabled: Some(false),
                default_top_k: Some(5),
                ..Default::default()
            },
        );

        config.apply_profile("fast").unwrap();
        assert!(!config.reranking.enabled);
        assert_eq!(config.retrieval.default_top_k, 5);

        assert!(config.apply_profile("missing").is_err());
    }

    #[test]
    fn test_env_value_parsing() {
        let mut config = Config::default();
        config
            .set_value_from_env("CHUNKING__MIN_PARAGRAPH_LENGTH", "12")
            .unwrap();
        assert_eq!(config.chunking.min_paragraph_length, 12);

        let err = config.set_value_from_env("RERANKING__ENABLED", "maybe");
        assert!(err.is_err());
    }
}
