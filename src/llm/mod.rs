//! Language model collaborators
//!
//! The pipeline only sees [`LanguageModel`]; [`OpenAiCompatibleClient`]
//! speaks the `/chat/completions` protocol shared by OpenAI, Groq and Ollama.

use crate::config::LlmConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_RETRIES: u32 = 2;
/// Rewrites shorter than this are treated as failures
const MIN_REWRITE_CHARS: usize = 4;
const MAX_KEYWORDS: usize = 10;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),

    #[error("API key environment variable {var} is not set")]
    MissingApiKey { var: String },

    #[error("LLM is disabled in configuration")]
    Disabled,
}

/// Text generation backend
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Produces search keywords for the lexical leg
pub trait KeywordExtractor: Send + Sync {
    fn extract_keywords(&self, query: &str) -> Result<Vec<String>, LlmError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Blocking client for OpenAI-compatible chat completion endpoints
pub struct OpenAiCompatibleClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        if !config.enabled {
            return Err(LlmError::Disabled);
        }

        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Some(key),
            _ if config.provider.requires_api_key() => {
                return Err(LlmError::MissingApiKey {
                    var: config.api_key_env.clone(),
                })
            }
            _ => None,
        };

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| config.provider.default_base_url().to_string());

        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn send(&self, request: &ChatRequest<'_>) -> Result<String, LlmError> {
        let mut builder = self.http.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .map_err(|e| LlmError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))
    }
}

impl LanguageModel for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        &self.model
    }

    /// Rate limits, server errors and network failures are retried with
    /// exponential backoff; other client errors fail immediately
    fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.temperature,
        };

        let mut last_err = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                std::thread::sleep(Duration::from_secs(1 << (attempt - 1)));
            }
            match self.send(&request) {
                Ok(text) => return Ok(text),
                Err(LlmError::Status { status, body })
                    if status != 429 && (400..500).contains(&status) =>
                {
                    return Err(LlmError::Status { status, body });
                }
                Err(e) => {
                    debug!("LLM attempt {} failed: {}", attempt + 1, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| LlmError::Request("No attempts made".to_string())))
    }
}

/// Optional LLM paraphrase of a question before searching
pub struct QueryEnhancer {
    llm: Option<Arc<dyn LanguageModel>>,
}

impl QueryEnhancer {
    pub fn new(llm: Option<Arc<dyn LanguageModel>>) -> Self {
        Self { llm }
    }

    /// Rewritten query, or `question` itself when the rewrite is unusable
    pub fn enhance(&self, question: &str) -> String {
        let Some(llm) = &self.llm else {
            return question.to_string();
        };

        let prompt = format!(
            "Rewrite the following question as a concise search query that keeps every \
             technical term. Reply with the query only.\n\nQuestion: {}",
            question
        );
        let rewrite = match llm.generate(&prompt) {
            Ok(text) => clean_line(&text),
            Err(e) => {
                warn!("Query rewrite failed, using original question: {}", e);
                return question.to_string();
            }
        };

        if rewrite.chars().count() < MIN_REWRITE_CHARS
            || rewrite.eq_ignore_ascii_case(question.trim())
        {
            debug!("Discarding query rewrite {:?}", rewrite);
            return question.to_string();
        }
        debug!("Rewrote query {:?} -> {:?}", question, rewrite);
        rewrite
    }
}

/// Keyword extraction by prompting the LLM for a delimited list
pub struct LlmKeywordExtractor {
    llm: Arc<dyn LanguageModel>,
    separators: Regex,
}

impl LlmKeywordExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Result<Self, LlmError> {
        let separators =
            Regex::new(r"[,\n;、，]").map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        Ok(Self { llm, separators })
    }

    /// Split a model reply into lower-cased, de-duplicated keywords
    pub fn parse(&self, reply: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.separators
            .split(reply)
            .map(|k| {
                k.trim()
                    .trim_start_matches(|c: char| c == '-' || c == '*' || c == '•' || c.is_ascii_digit() || c == '.')
                    .trim()
                    .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
                    .to_lowercase()
            })
            .filter(|k| !k.is_empty() && seen.insert(k.clone()))
            .take(MAX_KEYWORDS)
            .collect()
    }
}

impl KeywordExtractor for LlmKeywordExtractor {
    fn extract_keywords(&self, query: &str) -> Result<Vec<String>, LlmError> {
        let prompt = format!(
            "List the most important search keywords in the query below, separated by \
             commas. Reply with the keywords only.\n\nQuery: {}",
            query
        );
        let reply = self.llm.generate(&prompt)?;
        Ok(self.parse(&reply))
    }
}

/// First non-empty line, stripped of surrounding quotes
fn clean_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_string()
}
