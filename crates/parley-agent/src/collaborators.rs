//! Services the engine depends on but does not own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_types::{KnowledgeSnippet, Role};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("knowledge search failed: {0}")]
    Knowledge(String),

    #[error("call record store failed: {0}")]
    Records(String),
}

/// Tenant-scoped retrieval over the knowledge base.
#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    /// Returns up to `limit` snippets relevant to `query`.
    async fn search(
        &self,
        tenant_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KnowledgeSnippet>, CollaboratorError>;
}

/// Knowledge search for deployments without a knowledge service.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKnowledge;

#[async_trait]
impl KnowledgeSearch for NoKnowledge {
    async fn search(
        &self,
        _tenant_id: &str,
        _query: &str,
        _limit: usize,
    ) -> Result<Vec<KnowledgeSnippet>, CollaboratorError> {
        Ok(Vec::new())
    }
}

/// Knowledge search backed by an HTTP service exposing
/// `GET /search?tenant_id=..&query=..&limit=..` returning
/// `[{"content": .., "relevance": ..}]`.
#[derive(Debug, Clone)]
pub struct HttpKnowledgeSearch {
    client: reqwest::Client,
    base_url: String,
}

impl HttpKnowledgeSearch {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::Knowledge(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl KnowledgeSearch for HttpKnowledgeSearch {
    async fn search(
        &self,
        tenant_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KnowledgeSnippet>, CollaboratorError> {
        let limit = limit.to_string();
        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("tenant_id", tenant_id), ("query", query), ("limit", &limit)])
            .send()
            .await
            .map_err(|e| CollaboratorError::Knowledge(e.to_string()))?
            .error_for_status()
            .map_err(|e| CollaboratorError::Knowledge(e.to_string()))?;

        response
            .json::<Vec<KnowledgeSnippet>>()
            .await
            .map_err(|e| CollaboratorError::Knowledge(format!("invalid search response: {}", e)))
    }
}

/// Final state of a call as handed to the record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSummary {
    pub summary: String,
    pub transfer_requested: bool,
    pub transfer_reason: Option<String>,
}

/// Durable storage for transcripts and call summaries.
///
/// Callers treat writes as fire-and-forget: a failed write is logged and the
/// call carries on.
#[async_trait]
pub trait CallRecordStore: Send + Sync {
    async fn save_turn(
        &self,
        call_id: &str,
        speaker: Role,
        text: &str,
        spoken_at: DateTime<Utc>,
    ) -> Result<(), CollaboratorError>;

    async fn save_summary(&self, call_id: &str, summary: &CallSummary)
        -> Result<(), CollaboratorError>;
}
