//! In-memory corpus with a term-overlap lexical ranker

use crate::error::{LecternError, Result};
use crate::retrieval::{Document, DocumentAccessor, FilterField, LexicalSource, SourceError};
use crate::text::{normalize, tokenize};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

/// Whole corpus held in memory
///
/// Serves as the [`DocumentAccessor`] and, through token overlap, as the
/// [`LexicalSource`] for small and medium corpora.
pub struct InMemoryCorpus {
    documents: Vec<Document>,
}

impl InMemoryCorpus {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    /// Load a JSON array of documents
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LecternError::Io {
            source: e,
            context: format!("Failed to read corpus file: {:?}", path),
        })?;
        let documents: Vec<Document> =
            serde_json::from_str(&content).map_err(|e| LecternError::Json {
                source: e,
                context: format!("Failed to parse corpus file: {:?}", path),
            })?;

        tracing::info!("Loaded {} documents from {:?}", documents.len(), path);
        Ok(Self::new(documents))
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Fraction of distinct query terms found in the document
fn overlap_score(query_terms: &HashSet<String>, doc: &Document) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let doc_terms: HashSet<String> = tokenize(&normalize(&doc.content)).into_iter().collect();
    let shared = query_terms.intersection(&doc_terms).count();
    shared as f64 / query_terms.len() as f64
}

#[async_trait]
impl DocumentAccessor for InMemoryCorpus {
    async fn get_all_documents(&self) -> std::result::Result<Vec<Document>, SourceError> {
        Ok(self.documents.clone())
    }

    async fn available_values(
        &self,
        field: FilterField,
    ) -> std::result::Result<BTreeSet<String>, SourceError> {
        Ok(self
            .documents
            .iter()
            .filter_map(|d| d.meta(field).map(str::to_string))
            .collect())
    }
}

#[async_trait]
impl LexicalSource for InMemoryCorpus {
    async fn lexical_search(
        &self,
        query: &str,
        candidates: &[Document],
    ) -> std::result::Result<Vec<Document>, SourceError> {
        let query_terms: HashSet<String> = tokenize(&normalize(query)).into_iter().collect();

        let mut scored: Vec<(f64, &Document)> = candidates
            .iter()
            .map(|doc| (overlap_score(&query_terms, doc), doc))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .map(|(score, doc)| {
                let mut doc = doc.clone();
                doc.score = Some(score);
                doc
            })
            .collect())
    }
}
