use crate::config::{parse_size, Config, SCHEMA_VERSION};
use crate::error::{Result, SiftError, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem found
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_reranking(config, &mut errors);
        Self::validate_context(config, &mut errors);
        Self::validate_walker(config, &mut errors);
        Self::validate_llm(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SiftError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir_name.trim().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir_name",
                "Data directory name cannot be empty",
            ));
        }

        match parse_size(&config.storage.max_file_size) {
            Some(0) | None => errors.push(ValidationError::new(
                "storage.max_file_size",
                format!("Invalid size format: {}", config.storage.max_file_size),
            )),
            Some(_) => {}
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        let chunking = &config.chunking;
        if chunking.max_paragraph_length == 0 {
            errors.push(ValidationError::new(
                "chunking.max_paragraph_length",
                "Maximum paragraph length must be greater than 0",
            ));
        }

        if chunking.min_paragraph_length > chunking.max_paragraph_length {
            errors.push(ValidationError::new(
                "chunking.min_paragraph_length",
                format!(
                    "Minimum paragraph length ({}) exceeds maximum ({})",
                    chunking.min_paragraph_length, chunking.max_paragraph_length
                ),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        let indexing = &config.indexing;
        if indexing.small_corpus_threshold > indexing.large_corpus_threshold {
            errors.push(ValidationError::new(
                "indexing.small_corpus_threshold",
                "Small corpus threshold cannot exceed the large corpus threshold",
            ));
        }

        if indexing.medium_vectors_per_cluster == 0 || indexing.large_vectors_per_cluster == 0 {
            errors.push(ValidationError::new(
                "indexing.vectors_per_cluster",
                "Vectors per cluster must be greater than 0",
            ));
        }

        if indexing.max_nprobe == 0 {
            errors.push(ValidationError::new(
                "indexing.max_nprobe",
                "At least one cluster must be probed per query",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;
        for (path, weight) in [
            ("retrieval.dense_weight", retrieval.dense_weight),
            ("retrieval.lexical_weight", retrieval.lexical_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                errors.push(ValidationError::new(
                    path,
                    format!("Weight must be between 0.0 and 1.0, got {}", weight),
                ));
            }
        }

        if retrieval.dense_weight + retrieval.lexical_weight <= 0.0 {
            errors.push(ValidationError::new(
                "retrieval",
                "At least one retrieval leg must carry weight",
            ));
        }

        if retrieval.verbatim_boost < 1.0 {
            errors.push(ValidationError::new(
                "retrieval.verbatim_boost",
                format!("Verbatim boost must be at least 1.0, got {}", retrieval.verbatim_boost),
            ));
        }

        if retrieval.path_bonus < 0.0 {
            errors.push(ValidationError::new(
                "retrieval.path_bonus",
                "Path bonus cannot be negative",
            ));
        }

        if retrieval.candidate_multiplier == 0 || retrieval.default_top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.candidate_multiplier",
                "Candidate multiplier and default top_k must be greater than 0",
            ));
        }
    }

    fn validate_reranking(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.reranking.batch_size == 0 {
            errors.push(ValidationError::new(
                "reranking.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.reranking.enabled && config.reranking.model.is_empty() {
            errors.push(ValidationError::new(
                "reranking.model",
                "Model name cannot be empty when reranking is enabled",
            ));
        }
    }

    fn validate_context(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.context.reserved_headroom >= config.context.max_token_count {
            errors.push(ValidationError::new(
                "context.reserved_headroom",
                format!(
                    "Headroom ({}) must be smaller than max_token_count ({})",
                    config.context.reserved_headroom, config.context.max_token_count
                ),
            ));
        }
    }

    fn validate_walker(config: &Config, errors: &mut Vec<ValidationError>) {
        for pattern in &config.walker.ignore_patterns {
            if let Err(e) = globset::Glob::new(pattern) {
                errors.push(ValidationError::new(
                    "walker.ignore_patterns",
                    format!("Invalid glob '{}': {}", pattern, e),
                ));
            }
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        // The key is only required once the LLM is actually switched on
        if config.llm.enabled && config.llm.provider.requires_api_key() {
            let env_var = &config.llm.api_key_env;
            match std::env::var(env_var) {
                Ok(key) if key.is_empty() => errors.push(ValidationError::new(
                    "llm.api_key_env",
                    format!("Environment variable {} is empty", env_var),
                )),
                Ok(_) => {}
                Err(_) => errors.push(ValidationError::new(
                    "llm.api_key_env",
                    format!("Environment variable {} is not set", env_var),
                )),
            }
        }

        let temp = config.llm.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        if config.llm.model.is_empty() {
            errors.push(ValidationError::new("llm.model", "Model name cannot be empty"));
        }
    }
}
