//! Reciprocal Rank Fusion algorithm for combining ranked sources

use crate::retrieval::Document;
use std::collections::HashMap;

/// One ranked list entering fusion
#[derive(Debug, Clone)]
pub struct RankedSource {
    pub name: &'static str,
    pub weight: f64,
    pub documents: Vec<Document>,
}

impl RankedSource {
    pub fn new(name: &'static str, weight: f64, documents: Vec<Document>) -> Self {
        Self {
            name,
            weight,
            documents,
        }
    }
}

/// A fused candidate and the sources it came from
#[derive(Debug, Clone)]
pub struct FusedDocument {
    pub key: String,
    pub document: Document,
    pub score: f64,
    pub sources: Vec<&'static str>,
}

/// Apply weighted Reciprocal Rank Fusion
///
/// RRF formula: score(doc) = sum over sources of: weight / (k + rank + 1),
/// with documents merged on [`Document::fusion_key`]. A document listed twice
/// by one source only counts at its best rank.
///
/// # Returns
/// Fused candidates sorted by score descending; ties keep first-seen order.
pub fn reciprocal_rank_fusion(sources: Vec<RankedSource>, rrf_k: f64) -> Vec<FusedDocument> {
    let mut fused: Vec<FusedDocument> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for source in sources {
        for (rank, doc) in source.documents.into_iter().enumerate() {
            let key = doc.fusion_key();
            let rrf_score = source.weight / (rrf_k + rank as f64 + 1.0);

            match index.get(&key) {
                Some(&slot) => {
                    let entry = &mut fused[slot];
                    if entry.sources.contains(&source.name) {
                        continue;
                    }
                    entry.score += rrf_score;
                    entry.sources.push(source.name);
                }
                None => {
                    index.insert(key.clone(), fused.len());
                    fused.push(FusedDocument {
                        key,
                        document: doc,
                        score: rrf_score,
                        sources: vec![source.name],
                    });
                }
            }
        }
    }

    // Stable sort keeps first-seen order for equal scores
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    fused
}
