//! Brute-force cosine vector source over an embedded corpus

use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::retrieval::{Document, SoftFilter, SourceError, VectorSource};
use crate::text::normalize;
use async_trait::async_trait;
use std::sync::Arc;

/// Documents paired with their embeddings, searched exhaustively
pub struct EmbeddingVectorSource {
    provider: Arc<dyn EmbeddingProvider>,
    entries: Vec<(Document, Vec<f32>)>,
}

impl EmbeddingVectorSource {
    /// Embed every document up front, in batches of `batch_size`
    pub fn build(
        provider: Arc<dyn EmbeddingProvider>,
        documents: Vec<Document>,
        batch_size: usize,
    ) -> Result<Self, EmbeddingError> {
        let mut entries = Vec::with_capacity(documents.len());
        let embeddable: Vec<Document> = documents
            .into_iter()
            .filter(|d| !d.content.trim().is_empty())
            .collect();

        for batch in embeddable.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
            let vectors = provider.embed_batch(&texts)?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingError::GenerationError(format!(
                    "Expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }
            entries.extend(batch.iter().cloned().zip(vectors));
        }

        tracing::info!(
            "Embedded {} documents with {}",
            entries.len(),
            provider.model_name()
        );

        Ok(Self { provider, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

#[async_trait]
impl VectorSource for EmbeddingVectorSource {
    async fn vector_search(
        &self,
        query: &str,
        filter: Option<&SoftFilter>,
        k: usize,
    ) -> Result<Vec<Document>, SourceError> {
        let provider = Arc::clone(&self.provider);
        let text = query.to_string();
        let query_vec = tokio::task::spawn_blocking(move || provider.embed(&text))
            .await
            .map_err(|e| SourceError::unavailable("vector", e))?
            .map_err(|e| SourceError::unavailable("vector", e))?;

        let wanted = filter.map(|f| (f.field, normalize(&f.value)));

        let mut scored: Vec<(f32, &Document)> = self
            .entries
            .iter()
            .filter(|(doc, _)| match &wanted {
                Some((field, value)) => doc
                    .meta(*field)
                    .map(|have| normalize(have) == *value)
                    .unwrap_or(false),
                None => true,
            })
            .map(|(doc, vector)| (cosine_similarity(&query_vec, vector), doc))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, doc)| {
                let mut doc = doc.clone();
                doc.score = Some(score as f64);
                doc
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::FilterField;

    /// Embeds text as counts of a few marker words
    struct MarkerProvider;

    impl EmbeddingProvider for MarkerProvider {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let text = text.to_lowercase();
            Ok(["limit", "derivative", "integral"]
                .iter()
                .map(|m| text.matches(m).count() as f32)
                .collect())
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            "marker"
        }
    }

    fn source() -> EmbeddingVectorSource {
        EmbeddingVectorSource::build(
            Arc::new(MarkerProvider),
            vec![
                Document::new("limit of a sequence")
                    .with_id("l")
                    .with_meta(FilterField::Chapter, "1"),
                Document::new("derivative and derivative rules")
                    .with_id("d")
                    .with_meta(FilterField::Chapter, "2"),
                Document::new("integral as limit of sums")
                    .with_id("i")
                    .with_meta(FilterField::Chapter, "3"),
                Document::new("   "),
            ],
            2,
        )
        .unwrap()
    }

    #[test]
    fn test_build_skips_blank_documents() {
        assert_eq!(source().len(), 3);
    }

    #[tokio::test]
    async fn test_nearest_first() {
        let hits = source().vector_search("derivative", None, 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id.as_deref(), Some("d"));
    }

    #[tokio::test]
    async fn test_soft_filter_applies() {
        let filter = SoftFilter {
            field: FilterField::Chapter,
            value: "3".to_string(),
        };
        let hits = source()
            .vector_search("limit", Some(&filter), 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_deref(), Some("i"));
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
    }
}
