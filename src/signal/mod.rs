//! Retrieval confidence signal
//!
//! A cheap probe through the [`HybridRanker`] is scored against the query
//! and combined with structure, keyword and pin signals into one bounded
//! confidence value. Backend failures only lower the confidence.

use crate::config::{Config, NormalizedWeights, PenaltiesConfig, SignalSettings};
use crate::error::{LecternError, Result};
use crate::retrieval::{Document, FilterField, Filters, HybridRanker, RetrieveOptions};
use crate::router::RouteDecision;
use crate::text::{normalize, partial_ratio, token_sort_ratio, truncate_chars};
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;

/// Filter fields whose matches earn the structure bonus
const STRUCT_FIELDS: [FilterField; 3] = [
    FilterField::Chapter,
    FilterField::BlockKind,
    FilterField::BlockId,
];

/// Intermediate values of one signal computation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalStats {
    pub probe_k: usize,
    pub hits: usize,
    pub similarity: f64,
    pub struct_hits: usize,
    pub struct_bonus: f64,
    pub keyword_signal: f64,
    pub pin_signal: f64,
    pub base: f64,
    pub weak: bool,
    pub penalty: f64,
    pub confidence: f64,
}

/// Raw signals, before weighting
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalInputs {
    pub probe_k: usize,
    pub hits: usize,
    pub similarity: f64,
    pub struct_hits: usize,
    pub keyword_match: bool,
    pub pinned: bool,
    pub last_used_retrieval: bool,
    pub filtered: bool,
}

/// Combine raw signals into a clamped confidence
pub fn compute_confidence(
    inputs: &SignalInputs,
    weights: &NormalizedWeights,
    penalties: &PenaltiesConfig,
    settings: &SignalSettings,
) -> SignalStats {
    let struct_bonus = match inputs.struct_hits {
        0 => 0.0,
        1 => 0.1,
        _ => 0.2,
    };
    let keyword_signal = if inputs.keyword_match { 1.0 } else { 0.0 };

    let mut pin_signal = 0.0;
    if inputs.pinned {
        pin_signal = 1.0;
        // keeps the absolute bonus at pin_increment whatever the pin weight
        if inputs.last_used_retrieval && weights.pin > 0.0 {
            pin_signal += penalties.pin_increment / weights.pin;
        }
    }

    let base = weights.similarity * inputs.similarity
        + weights.structure * struct_bonus
        + weights.keyword * keyword_signal
        + weights.pin * pin_signal;

    let weak = inputs.hits < settings.min_hits || inputs.similarity < settings.min_similarity;
    let mut penalty = 0.0;
    if weak {
        penalty += penalties.weak;
        if inputs.filtered {
            penalty += penalties.weak_focus;
        }
    }

    let raw = base - penalty;
    let confidence = if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 1.0) };

    SignalStats {
        probe_k: inputs.probe_k,
        hits: inputs.hits,
        similarity: inputs.similarity,
        struct_hits: inputs.struct_hits,
        struct_bonus,
        keyword_signal,
        pin_signal,
        base,
        weak,
        penalty,
        confidence,
    }
}

/// Probes the ranker and turns the result into a confidence score
pub struct SignalCalculator {
    ranker: Arc<HybridRanker>,
    weights: NormalizedWeights,
    penalties: PenaltiesConfig,
    settings: SignalSettings,
    keyword_patterns: Vec<Regex>,
}

impl SignalCalculator {
    pub fn new(ranker: Arc<HybridRanker>, config: &Config) -> Result<Self> {
        let keyword_patterns = config
            .signal
            .domain_keywords
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    LecternError::invalid("signal.domain_keywords", format!("'{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            ranker,
            weights: config.weights.normalize()?,
            penalties: config.penalties,
            settings: config.signal.clone(),
            keyword_patterns,
        })
    }

    pub fn weights(&self) -> &NormalizedWeights {
        &self.weights
    }

    pub fn penalties(&self) -> &PenaltiesConfig {
        &self.penalties
    }

    /// Confidence that retrieval will answer `query`
    pub async fn signal(
        &self,
        query: &str,
        filters: &Filters,
        pinned: bool,
        last_decision: Option<RouteDecision>,
    ) -> (f64, SignalStats) {
        let probe_k = if filters.active_count() >= 2 {
            self.settings.probe_k_focused
        } else {
            self.settings.probe_k_default
        };

        let hits = self
            .ranker
            .retrieve_with(query, filters, probe_k, RetrieveOptions::PROBE)
            .await;

        let normalized = normalize(query);
        let inputs = SignalInputs {
            probe_k,
            hits: hits.len(),
            similarity: self.similarity(&normalized, &hits),
            struct_hits: struct_hits(filters, &hits),
            keyword_match: self.keyword_patterns.iter().any(|r| r.is_match(&normalized)),
            pinned,
            last_used_retrieval: last_decision.map_or(false, RouteDecision::uses_retrieval),
            filtered: !filters.is_empty(),
        };

        let stats = compute_confidence(&inputs, &self.weights, &self.penalties, &self.settings);
        tracing::debug!(
            hits = stats.hits,
            similarity = stats.similarity,
            struct_bonus = stats.struct_bonus,
            keyword = stats.keyword_signal,
            pin = stats.pin_signal,
            weak = stats.weak,
            confidence = stats.confidence,
            "Signal computed"
        );
        (stats.confidence, stats)
    }

    /// Best fuzzy match between the query and the top probe hits, in [0, 1]
    fn similarity(&self, normalized_query: &str, hits: &[Document]) -> f64 {
        hits.iter()
            .take(self.settings.similarity_top_n)
            .map(|doc| {
                let text = normalize(truncate_chars(
                    &doc.content,
                    self.settings.similarity_text_chars,
                ));
                0.6 * partial_ratio(normalized_query, &text)
                    + 0.4 * token_sort_ratio(normalized_query, &text)
            })
            .fold(0.0_f64, f64::max)
            / 100.0
    }
}

/// Field-level matches between the probe hits and the active filters
fn struct_hits(filters: &Filters, hits: &[Document]) -> usize {
    let wanted: Vec<(FilterField, &str)> = filters
        .active()
        .filter(|(field, _)| STRUCT_FIELDS.contains(field))
        .collect();
    if wanted.is_empty() {
        return 0;
    }

    hits.iter()
        .map(|doc| {
            wanted
                .iter()
                .filter(|(field, value)| doc.meta(*field) == Some(*value))
                .count()
        })
        .sum()
}
