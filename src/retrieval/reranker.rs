//! Cross-encoder reranking using FastEmbed

use crate::retrieval::{Reranker, SourceError};
use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::sync::Arc;

/// Cross-encoder reranker for improving result precision
pub struct FastEmbedReranker {
    model: Arc<TextRerank>,
    model_name: String,
}

impl FastEmbedReranker {
    /// Create a reranker for a supported model name
    pub fn new(model_name: &str) -> Result<Self, SourceError> {
        let model = match model_name {
            "bge-reranker-base" | "BAAI/bge-reranker-base" => RerankerModel::BGERerankerBase,
            "jina-reranker-v1-turbo-en" => RerankerModel::JINARerankerV1TurboEn,
            _ => {
                return Err(SourceError::RerankerUnavailable(format!(
                    "Unsupported model: {}. Supported: bge-reranker-base, jina-reranker-v1-turbo-en",
                    model_name
                )));
            }
        };

        tracing::info!("Initializing reranker model: {}", model_name);

        let init_options = RerankInitOptions::new(model).with_show_download_progress(true);
        let model = TextRerank::try_new(init_options)
            .map_err(|e| SourceError::RerankerUnavailable(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
        })
    }

    pub fn with_default_model() -> Result<Self, SourceError> {
        Self::new("bge-reranker-base")
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[async_trait]
impl Reranker for FastEmbedReranker {
    async fn rerank(&self, query: &str, texts: &[String]) -> Result<Vec<f64>, SourceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = Arc::clone(&self.model);
        let query = query.to_string();
        let documents = texts.to_vec();
        let count = documents.len();

        // Inference is CPU bound; keep it off the async workers
        let results = tokio::task::spawn_blocking(move || {
            model.rerank(query, documents, false, None)
        })
        .await
        .map_err(|e| SourceError::RerankerUnavailable(e.to_string()))?
        .map_err(|e| SourceError::RerankerUnavailable(e.to_string()))?;

        // FastEmbed returns results sorted by score; restore input order
        let mut scores = vec![f64::NEG_INFINITY; count];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = result.score as f64;
            }
        }
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_rejected() {
        assert!(FastEmbedReranker::new("no-such-model").is_err());
    }

    #[tokio::test]
    #[ignore] // Requires model download
    async fn test_rerank_basic() {
        let reranker = FastEmbedReranker::with_default_model().unwrap();

        let candidates = vec![
            "The derivative of x squared is two x.".to_string(),
            "Rome is the capital of Italy.".to_string(),
        ];

        let scores = reranker
            .rerank("derivative of x^2", &candidates)
            .await
            .unwrap();

        assert_eq!(scores.len(), 2);
        assert!(scores[0] > scores[1]);
    }
}
