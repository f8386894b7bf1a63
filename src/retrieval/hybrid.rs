//! Hybrid ranker combining exact-match, lexical and vector sources

use crate::config::FusionSettings;
use crate::error::{LecternError, Result};
use crate::retrieval::{
    reciprocal_rank_fusion, DocumentAccessor, Document, FilterField, Filters, LexicalSource,
    RankedSource, Reranker, SourceError, VectorSource,
};
use crate::text::{normalize, truncate_chars};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Per-call switches for [`HybridRanker::retrieve_with`]
#[derive(Debug, Clone, Copy)]
pub struct RetrieveOptions {
    /// Run the reranker (when one is configured) over the fused candidates
    pub rerank: bool,
}

impl RetrieveOptions {
    /// Cheap confidence probe: fusion only
    pub const PROBE: RetrieveOptions = RetrieveOptions { rerank: false };
    /// Final retrieval of a turn
    pub const FULL: RetrieveOptions = RetrieveOptions { rerank: true };
}

/// Fusion ranker over optional, independently fallible backends
pub struct HybridRanker {
    accessor: Arc<dyn DocumentAccessor>,
    lexical: Option<Arc<dyn LexicalSource>>,
    vector: Option<Arc<dyn VectorSource>>,
    reranker: Option<Arc<dyn Reranker>>,
    settings: FusionSettings,
    timeout: Duration,
}

impl HybridRanker {
    /// Create a ranker backed only by exact metadata matching
    pub fn new(accessor: Arc<dyn DocumentAccessor>, settings: FusionSettings) -> Result<Self> {
        if !settings.rrf_k.is_finite() || settings.rrf_k < 0.0 {
            return Err(LecternError::invalid(
                "fusion.rrf_k",
                format!("RRF constant must be >= 0, got {}", settings.rrf_k),
            ));
        }
        if settings.source_timeout_ms == 0 {
            return Err(LecternError::invalid(
                "fusion.source_timeout_ms",
                "Source timeout must be greater than 0",
            ));
        }

        Ok(Self {
            accessor,
            lexical: None,
            vector: None,
            reranker: None,
            timeout: Duration::from_millis(settings.source_timeout_ms),
            settings,
        })
    }

    pub fn with_lexical(mut self, lexical: Arc<dyn LexicalSource>) -> Self {
        self.lexical = Some(lexical);
        self
    }

    pub fn with_vector(mut self, vector: Arc<dyn VectorSource>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn settings(&self) -> &FusionSettings {
        &self.settings
    }

    /// Full retrieval: fusion followed by reranking when available
    pub async fn retrieve(&self, query: &str, filters: &Filters, k: usize) -> Vec<Document> {
        self.retrieve_with(query, filters, k, RetrieveOptions::FULL)
            .await
    }

    /// Retrieve the top `k` documents; never fails, a broken backend only
    /// removes its own contribution.
    pub async fn retrieve_with(
        &self,
        query: &str,
        filters: &Filters,
        k: usize,
        options: RetrieveOptions,
    ) -> Vec<Document> {
        if k == 0 || query.trim().is_empty() {
            return Vec::new();
        }

        let pool_size = (2 * k).max(12);

        let corpus = match self
            .guarded("corpus", self.accessor.get_all_documents())
            .await
        {
            Ok(docs) => Some(docs),
            Err(e) => {
                tracing::warn!("Corpus unavailable, exact/lexical sources skipped: {}", e);
                None
            }
        };

        // Step 1: exact-match subset (the whole corpus when no filters are set)
        let subset: Vec<Document> = corpus
            .map(|docs| {
                if filters.is_empty() {
                    docs
                } else {
                    docs.into_iter().filter(|d| filters.matches(d)).collect()
                }
            })
            .unwrap_or_default();

        let exact: Vec<Document> = if filters.is_empty() {
            Vec::new()
        } else {
            subset.iter().take(k.max(10)).cloned().collect()
        };

        // Step 2: lexical + vector in parallel
        let normalized_query = normalize(query);
        let soft_filter = filters.soft_filter();
        let (lexical, vector) = tokio::join!(
            self.lexical_search(&normalized_query, &subset),
            self.vector_search(query, soft_filter.as_ref(), pool_size)
        );

        tracing::debug!(
            exact = exact.len(),
            lexical = lexical.len(),
            vector = vector.len(),
            "Source hits"
        );

        // Step 3: Reciprocal Rank Fusion
        let mut fused = reciprocal_rank_fusion(
            vec![
                RankedSource::new("exact", self.settings.exact_weight, exact),
                RankedSource::new("lexical", self.settings.lexical_weight, lexical),
                RankedSource::new("vector", self.settings.vector_weight, vector),
            ],
            self.settings.rrf_k,
        );
        fused.truncate(pool_size);

        let mut candidates: Vec<Document> = fused
            .into_iter()
            .map(|f| {
                let mut doc = f.document;
                doc.score = Some(f.score);
                doc
            })
            .collect();

        // Step 4: optional rerank
        if options.rerank && candidates.len() > 1 {
            if let Some(scores) = self.rerank_scores(query, &candidates).await {
                let mut scored: Vec<(f64, Document)> = scores.into_iter().zip(candidates).collect();
                scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
                candidates = scored
                    .into_iter()
                    .map(|(score, mut doc)| {
                        doc.score = Some(score);
                        doc
                    })
                    .collect();
            }
        }

        candidates.truncate(k);
        candidates
    }

    /// Drop filter values the corpus doesn't contain
    pub async fn sanitize_filters(&self, filters: &Filters) -> Filters {
        let mut sanitized = filters.clone();
        for (field, value) in filters.active() {
            let known = match self
                .guarded("corpus", self.accessor.available_values(field))
                .await
            {
                Ok(values) => values,
                Err(e) => {
                    tracing::debug!("Cannot check values for {}: {}", field, e);
                    continue;
                }
            };

            let wanted = normalize(value);
            if !known.iter().any(|v| normalize(v) == wanted) {
                tracing::warn!("Dropping unknown {} filter value '{}'", field, value);
                sanitized.set(field, None);
            }
        }
        sanitized
    }

    /// Distinct metadata values for a field; empty when the corpus is unavailable
    pub async fn available_values(&self, field: FilterField) -> Vec<String> {
        match self
            .guarded("corpus", self.accessor.available_values(field))
            .await
        {
            Ok(values) => values.into_iter().collect(),
            Err(e) => {
                tracing::warn!("Cannot list {} values: {}", field, e);
                Vec::new()
            }
        }
    }

    async fn lexical_search(&self, query: &str, subset: &[Document]) -> Vec<Document> {
        let Some(lexical) = &self.lexical else {
            return Vec::new();
        };
        if subset.is_empty() {
            return Vec::new();
        }

        match self
            .guarded("lexical", lexical.lexical_search(query, subset))
            .await
        {
            Ok(docs) => docs,
            Err(e) => {
                tracing::warn!("Lexical source failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn vector_search(
        &self,
        query: &str,
        filter: Option<&crate::retrieval::SoftFilter>,
        k: usize,
    ) -> Vec<Document> {
        let Some(vector) = &self.vector else {
            return Vec::new();
        };

        match self
            .guarded("vector", vector.vector_search(query, filter, k))
            .await
        {
            Ok(docs) => docs,
            Err(e) => {
                tracing::warn!("Vector source failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Reranker scores aligned with `candidates`, or `None` to keep fused order
    async fn rerank_scores(&self, query: &str, candidates: &[Document]) -> Option<Vec<f64>> {
        let reranker = self.reranker.as_ref()?;

        let texts: Vec<String> = candidates
            .iter()
            .map(|d| truncate_chars(&d.content, self.settings.rerank_text_chars).to_string())
            .collect();

        let result = match tokio::time::timeout(self.timeout, reranker.rerank(query, &texts)).await
        {
            Ok(result) => result,
            Err(_) => Err(SourceError::RerankerUnavailable("timed out".to_string())),
        };

        match result {
            Ok(scores) if scores.len() == texts.len() && scores.iter().all(|s| s.is_finite()) => {
                Some(scores)
            }
            Ok(scores) => {
                tracing::warn!(
                    "Reranker returned {} scores for {} candidates, keeping fused order",
                    scores.len(),
                    texts.len()
                );
                None
            }
            Err(e) => {
                tracing::warn!("Reranking skipped: {}", e);
                None
            }
        }
    }

    async fn guarded<T, F>(&self, name: &str, call: F) -> std::result::Result<T, SourceError>
    where
        F: Future<Output = std::result::Result<T, SourceError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout {
                source_name: name.to_string(),
            }),
        }
    }
}
