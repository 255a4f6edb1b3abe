//! Session management
//!
//! A session owns the pipeline for one indexed root. Sessions live only in
//! the [`SessionManager`] that created them; there is no global registry.
use crate::config::Config;
use crate::error::{Result, SiftError};
use crate::pipeline::{Answer, PipelineComponents, PipelineState, RetrievalPipeline};
use crate::retrieval::ScoredChunk;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A pipeline bound to one root directory
pub struct Session {
    /// Unique session identifier
    pub id: Uuid,

    /// Canonical root directory being indexed
    pub root: PathBuf,

    /// When the session was created
    pub created_at: DateTime<Utc>,

    /// When the session last served a request
    pub last_used_at: DateTime<Utc>,

    /// Number of search/ask requests served
    pub query_count: u64,

    pipeline: RetrievalPipeline,
}

impl Session {
    fn new(root: PathBuf, pipeline: RetrievalPipeline) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            root,
            created_at: now,
            last_used_at: now,
            query_count: 0,
            pipeline,
        }
    }

    fn touch(&mut self) {
        self.last_used_at = Utc::now();
        self.query_count += 1;
    }

    pub fn pipeline(&self) -> &RetrievalPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut RetrievalPipeline {
        &mut self.pipeline
    }

    pub fn search(&mut self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        self.touch();
        self.pipeline.search(query, top_k)
    }

    pub fn ask(&mut self, question: &str) -> Result<Answer> {
        self.touch();
        self.pipeline.ask(question)
    }

    /// Get session age
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            root: self.root.clone(),
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            query_count: self.query_count,
            state: self.pipeline.state(),
        }
    }
}

/// Serializable summary of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub root: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub query_count: u64,
    pub state: PipelineState,
}

/// Owns sessions and enforces one session per root directory
#[derive(Default)]
pub struct SessionManager {
    sessions: HashMap<Uuid, Session>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session over `root`, loading models from `config`
    pub fn create(&mut self, root: &Path, config: Config) -> Result<&mut Session> {
        let root = self.claim_root(root)?;
        let pipeline = RetrievalPipeline::new(&root, config)?;
        Ok(self.insert(Session::new(root, pipeline)))
    }

    /// Create a session with caller-supplied model components
    pub fn create_with(
        &mut self,
        root: &Path,
        config: Config,
        components: PipelineComponents,
    ) -> Result<&mut Session> {
        let root = self.claim_root(root)?;
        let pipeline = RetrievalPipeline::with_components(&root, config, components)?;
        Ok(self.insert(Session::new(root, pipeline)))
    }

    /// Canonical form of `root`, refused if another session already owns it
    fn claim_root(&self, root: &Path) -> Result<PathBuf> {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        if let Some(existing) = self.sessions.values().find(|s| s.root == root) {
            return Err(SiftError::Session(format!(
                "Root {} is already open in session {}",
                root.display(),
                existing.id
            )));
        }
        Ok(root)
    }

    fn insert(&mut self, session: Session) -> &mut Session {
        tracing::info!("Created session {} for {}", session.id, session.root.display());
        self.sessions.entry(session.id).or_insert(session)
    }

    pub fn get(&self, id: &Uuid) -> Result<&Session> {
        self.sessions
            .get(id)
            .ok_or_else(|| SiftError::SessionNotFound { id: id.to_string() })
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Result<&mut Session> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| SiftError::SessionNotFound { id: id.to_string() })
    }

    /// Close a session, releasing its root for reuse
    pub fn destroy(&mut self, id: &Uuid) -> Result<Session> {
        let session = self
            .sessions
            .remove(id)
            .ok_or_else(|| SiftError::SessionNotFound { id: id.to_string() })?;
        tracing::info!("Destroyed session {}", session.id);
        Ok(session)
    }

    /// All sessions, oldest first
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self.sessions.values().map(Session::info).collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingError, EmbeddingProvider};
    use crate::retrieval::Reranker;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct ConstantProvider;

    impl EmbeddingProvider for ConstantProvider {
        fn embed_one(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0])
        }

        fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(vec![vec![1.0, 0.0]; texts.len()])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "constant"
        }
    }

    fn components() -> PipelineComponents {
        PipelineComponents {
            provider: Arc::new(ConstantProvider),
            reranker: Reranker::disabled(),
            llm: None,
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.walker.prefer_git = false;
        config
    }

    #[test]
    fn test_session_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = SessionManager::new();

        let id = manager
            .create_with(temp_dir.path(), config(), components())
            .unwrap()
            .id;
        assert_eq!(manager.len(), 1);

        let session = manager.get_mut(&id).unwrap();
        assert!(session.search("anything", 5).unwrap().is_empty());
        assert_eq!(session.query_count, 1);
        assert_eq!(session.pipeline().state(), PipelineState::Ready);

        let listed = manager.list();
        assert_eq!(listed[0].id, id);
        assert_eq!(listed[0].query_count, 1);

        manager.destroy(&id).unwrap();
        assert!(manager.is_empty());
        assert!(matches!(
            manager.get(&id),
            Err(SiftError::SessionNotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_root_refused() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = SessionManager::new();

        let id = manager
            .create_with(temp_dir.path(), config(), components())
            .unwrap()
            .id;
        assert!(manager
            .create_with(temp_dir.path(), config(), components())
            .is_err());

        // Released roots can be reopened
        manager.destroy(&id).unwrap();
        assert!(manager
            .create_with(temp_dir.path(), config(), components())
            .is_ok());
    }
}
