//! Hybrid retrieval: exact-match, lexical and vector sources merged by
//! weighted Reciprocal Rank Fusion, with optional cross-encoder reranking.
//!
//! Every backend sits behind an async trait and returns an explicit
//! `Result`; the ranker folds failures into empty contributions.

mod fusion;
mod hybrid;
mod memory;
mod reranker;

pub use fusion::{reciprocal_rank_fusion, FusedDocument, RankedSource};
pub use hybrid::{HybridRanker, RetrieveOptions};
pub use memory::InMemoryCorpus;
pub use reranker::FastEmbedReranker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

use crate::text::normalize;

/// Failure of a single retrieval backend
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("Source '{source_name}' unavailable: {message}")]
    SourceUnavailable {
        source_name: String,
        message: String,
    },

    #[error("Source '{source_name}' timed out")]
    Timeout { source_name: String },

    #[error("Reranker unavailable: {0}")]
    RerankerUnavailable(String),
}

impl SourceError {
    pub fn unavailable(source_name: impl Into<String>, message: impl ToString) -> Self {
        SourceError::SourceUnavailable {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }
}

/// Metadata fields that filters can constrain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    Chapter,
    BlockKind,
    BlockId,
    #[serde(rename = "type")]
    Type,
}

impl FilterField {
    pub const ALL: [FilterField; 4] = [
        FilterField::Chapter,
        FilterField::BlockKind,
        FilterField::BlockId,
        FilterField::Type,
    ];

    /// Metadata key this field is stored under
    pub fn key(self) -> &'static str {
        match self {
            FilterField::Chapter => "chapter",
            FilterField::BlockKind => "block_kind",
            FilterField::BlockId => "block_id",
            FilterField::Type => "type",
        }
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A corpus passage with opaque metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub id: Option<String>,

    pub content: String,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Relevance score assigned by the last stage that ranked this document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: None,
            content: content.into(),
            metadata: BTreeMap::new(),
            score: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_meta(mut self, field: FilterField, value: impl Into<String>) -> Self {
        self.metadata.insert(field.key().to_string(), value.into());
        self
    }

    pub fn meta(&self, field: FilterField) -> Option<&str> {
        self.metadata.get(field.key()).map(String::as_str)
    }

    /// Stable identity used to merge the same passage across sources:
    /// the explicit id when present, otherwise a BLAKE3 hash of the content.
    pub fn fusion_key(&self) -> String {
        match &self.id {
            Some(id) => format!("id:{}", id),
            None => format!("h:{}", blake3::hash(self.content.as_bytes()).to_hex()),
        }
    }
}

/// Conjunctive metadata filters; an empty filter set matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
}

/// Single-field filter handed to the vector source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SoftFilter {
    pub field: FilterField,
    pub value: String,
}

impl Filters {
    pub fn get(&self, field: FilterField) -> Option<&str> {
        match field {
            FilterField::Chapter => self.chapter.as_deref(),
            FilterField::BlockKind => self.block_kind.as_deref(),
            FilterField::BlockId => self.block_id.as_deref(),
            FilterField::Type => self.doc_type.as_deref(),
        }
    }

    pub fn set(&mut self, field: FilterField, value: Option<String>) {
        let slot = match field {
            FilterField::Chapter => &mut self.chapter,
            FilterField::BlockKind => &mut self.block_kind,
            FilterField::BlockId => &mut self.block_id,
            FilterField::Type => &mut self.doc_type,
        };
        *slot = value.filter(|v| !v.trim().is_empty());
    }

    pub fn with(mut self, field: FilterField, value: impl Into<String>) -> Self {
        self.set(field, Some(value.into()));
        self
    }

    /// Set fields, in [`FilterField::ALL`] order
    pub fn active(&self) -> impl Iterator<Item = (FilterField, &str)> + '_ {
        FilterField::ALL
            .into_iter()
            .filter_map(move |field| self.get(field).map(|value| (field, value)))
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    pub fn is_empty(&self) -> bool {
        self.active_count() == 0
    }

    /// Every set field equals the document's metadata (accent/case-insensitive)
    pub fn matches(&self, doc: &Document) -> bool {
        self.active().all(|(field, wanted)| {
            doc.meta(field)
                .map(|have| normalize(have) == normalize(wanted))
                .unwrap_or(false)
        })
    }

    /// At most one field for the vector stage: chapter > type > block_kind.
    /// `block_id` is never used here.
    pub fn soft_filter(&self) -> Option<SoftFilter> {
        [FilterField::Chapter, FilterField::Type, FilterField::BlockKind]
            .into_iter()
            .find_map(|field| {
                self.get(field).map(|value| SoftFilter {
                    field,
                    value: value.to_string(),
                })
            })
    }

    /// Chapter-only version of these filters, used to relax an empty strict result
    pub fn relaxed(&self) -> Filters {
        Filters {
            chapter: self.chapter.clone(),
            ..Default::default()
        }
    }

    /// Snapshot of a document's filterable metadata
    pub fn from_document(doc: &Document) -> Filters {
        let mut filters = Filters::default();
        for field in FilterField::ALL {
            filters.set(field, doc.meta(field).map(str::to_string));
        }
        filters
    }
}

/// Access to the whole corpus and its metadata value sets
#[async_trait]
pub trait DocumentAccessor: Send + Sync {
    async fn get_all_documents(&self) -> Result<Vec<Document>, SourceError>;

    /// Distinct values present for a metadata field
    async fn available_values(&self, field: FilterField) -> Result<BTreeSet<String>, SourceError>;
}

/// Term-overlap ranking over a caller-provided candidate subset
#[async_trait]
pub trait LexicalSource: Send + Sync {
    async fn lexical_search(
        &self,
        query: &str,
        candidates: &[Document],
    ) -> Result<Vec<Document>, SourceError>;
}

/// Embedding-similarity ranking with an optional single-field filter
#[async_trait]
pub trait VectorSource: Send + Sync {
    async fn vector_search(
        &self,
        query: &str,
        filter: Option<&SoftFilter>,
        k: usize,
    ) -> Result<Vec<Document>, SourceError>;
}

/// Batched relevance scoring of (query, text) pairs, one score per text
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, texts: &[String]) -> Result<Vec<f64>, SourceError>;
}
