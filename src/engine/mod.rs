//! End-to-end turn pipeline
//!
//! [`TutorEngine`] runs one student turn: sanitize filters, route, fetch the
//! final passages when the decision needs them, and record the turn in the
//! chat's session. Turns of the same chat are serialized on the session lock.

use crate::config::Config;
use crate::error::Result;
use crate::retrieval::{Document, Filters, HybridRanker};
use crate::router::{Query, Router, RouterDecision};
use crate::session::SessionStore;
use serde::Serialize;
use std::sync::Arc;

/// Result of [`TutorEngine::handle_turn`]
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub decision: RouterDecision,
    /// Passages handed to generation; empty for generate-only turns
    pub documents: Vec<Document>,
    /// Filters actually used for the final retrieval
    pub retrieval_filters: Filters,
    /// Whether an empty block-level result was retried at chapter level
    pub relaxed: bool,
}

pub struct TutorEngine {
    router: Router,
    ranker: Arc<HybridRanker>,
    sessions: SessionStore,
    final_k: usize,
}

impl TutorEngine {
    pub fn new(config: &Config, ranker: Arc<HybridRanker>) -> Result<Self> {
        Ok(Self {
            router: Router::new(config, Arc::clone(&ranker))?,
            ranker,
            sessions: SessionStore::new(config.session.clone())?,
            final_k: config.fusion.final_k,
        })
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn ranker(&self) -> &HybridRanker {
        &self.ranker
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Route and, when needed, retrieve for one turn of `chat_id`
    pub async fn handle_turn(
        &self,
        chat_id: &str,
        query: Query,
        explicit_filters: Option<Filters>,
    ) -> TurnOutcome {
        let handle = self.sessions.get_or_create(chat_id).await;
        let mut context = handle.lock().await;

        let explicit = match explicit_filters {
            Some(filters) if !filters.is_empty() => {
                Some(self.ranker.sanitize_filters(&filters).await)
            }
            _ => None,
        };

        let decision = self
            .router
            .decide(&query, Some(&context), explicit.as_ref())
            .await;

        let mut retrieval_filters = decision.passport.filters.clone();
        let mut documents = Vec::new();
        let mut relaxed = false;

        if decision.decision.uses_retrieval() {
            documents = self
                .ranker
                .retrieve(query.retrieval_text(), &retrieval_filters, self.final_k)
                .await;

            if documents.is_empty() && retrieval_filters.block_id.is_some() {
                let chapter_only = retrieval_filters.relaxed();
                tracing::info!(
                    "No passages for block {:?}, retrying with {:?}",
                    retrieval_filters.block_id,
                    chapter_only
                );
                documents = self
                    .ranker
                    .retrieve(query.retrieval_text(), &chapter_only, self.final_k)
                    .await;
                retrieval_filters = chapter_only;
                relaxed = true;
            }
        }

        let top = documents.first().map(Filters::from_document);
        context.record_turn(
            query.raw.clone(),
            decision.decision,
            retrieval_filters.clone(),
            top,
        );

        TurnOutcome {
            decision,
            documents,
            retrieval_filters,
            relaxed,
        }
    }

    /// Store the generated answer for `question` in the chat history
    pub async fn record_answer(&self, chat_id: &str, question: &str, answer: &str) -> Result<()> {
        self.sessions
            .update(chat_id, |context| context.append_exchange(question, answer))
            .await
    }
}
