//! Routing decisions
//!
//! The [`Router`] combines intent, confidence and session continuity into
//! one of four [`RouteDecision`]s and records how it got there in a
//! [`Passport`].

use crate::config::{Config, NormalizedWeights, PenaltiesConfig, ThresholdsConfig};
use crate::error::Result;
use crate::intent::{IntentClassifier, SpecialIntent, TaskKind};
use crate::retrieval::{Filters, HybridRanker};
use crate::session::{RouteOverride, SessionContext};
use crate::signal::{SignalCalculator, SignalStats};
use crate::text::normalize;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// What to do with a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
    RetrieveOnly,
    GenerateWithRetrievalFallback,
    GenerateOnly,
    RetrieveThenExtend,
}

impl RouteDecision {
    /// Whether the final answer is grounded on retrieved passages
    pub fn uses_retrieval(self) -> bool {
        !matches!(self, RouteDecision::GenerateOnly)
    }
}

impl fmt::Display for RouteDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouteDecision::RetrieveOnly => "retrieve_only",
            RouteDecision::GenerateWithRetrievalFallback => "generate_with_retrieval_fallback",
            RouteDecision::GenerateOnly => "generate_only",
            RouteDecision::RetrieveThenExtend => "retrieve_then_extend",
        };
        f.write_str(name)
    }
}

/// A student question as seen by the router
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub raw: String,
    pub normalized: String,
    /// Standalone reformulation produced upstream, if any
    pub rewritten: Option<String>,
}

impl Query {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            normalized: normalize(&raw),
            raw,
            rewritten: None,
        }
    }

    pub fn with_rewritten(mut self, rewritten: impl Into<String>) -> Self {
        let rewritten = rewritten.into();
        self.rewritten = if rewritten.trim().is_empty() {
            None
        } else {
            Some(rewritten)
        };
        self
    }

    /// Text sent to the retrieval sources
    pub fn retrieval_text(&self) -> &str {
        self.rewritten.as_deref().unwrap_or(&self.raw)
    }
}

/// Where the filters used for a decision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FiltersSource {
    Explicit,
    Pinned,
    FollowUp,
    None,
}

/// Audit record of one routing decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passport {
    pub turn_id: String,
    pub chat_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: u64,
    pub query: Query,
    pub filters: Filters,
    pub filters_source: FiltersSource,
    pub weights: NormalizedWeights,
    pub thresholds: ThresholdsConfig,
    pub penalties: PenaltiesConfig,
    pub signals: SignalStats,
    pub intent_scores: BTreeMap<TaskKind, f64>,
    pub template: &'static str,
    pub special_intent: Option<SpecialIntent>,
    pub follow_up: bool,
    pub automatic_decision: RouteDecision,
    pub automatic_reason: String,
    pub route_override: Option<RouteOverride>,
}

impl Passport {
    /// Same decision inputs and outcome, ignoring wall-clock fields
    pub fn same_decision(&self, other: &Passport) -> bool {
        Passport {
            timestamp: other.timestamp,
            latency_ms: other.latency_ms,
            ..self.clone()
        } == *other
    }
}

/// Outcome of [`Router::decide`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouterDecision {
    pub decision: RouteDecision,
    pub confidence: f64,
    pub task: TaskKind,
    pub reason: String,
    pub passport: Passport,
}

/// Decides, per query, between retrieval and generation
pub struct Router {
    classifier: IntentClassifier,
    signals: SignalCalculator,
    thresholds: ThresholdsConfig,
}

impl Router {
    pub fn new(config: &Config, ranker: Arc<HybridRanker>) -> Result<Self> {
        crate::config::ConfigValidator::validate(config)?;

        Ok(Self {
            classifier: IntentClassifier::new()?,
            signals: SignalCalculator::new(ranker, config)?,
            thresholds: config.thresholds,
        })
    }

    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    /// Filters a decision works with: explicit > pinned > follow-up context > none
    pub fn effective_filters(
        &self,
        session: Option<&SessionContext>,
        explicit: Option<&Filters>,
        follow_up: bool,
    ) -> (Filters, FiltersSource) {
        if let Some(filters) = explicit.filter(|f| !f.is_empty()) {
            return (filters.clone(), FiltersSource::Explicit);
        }
        if let Some(pinned) = session.and_then(SessionContext::pinned) {
            return (pinned.clone(), FiltersSource::Pinned);
        }
        if follow_up {
            if let Some(context) = session.and_then(SessionContext::best_context_metadata) {
                return (context, FiltersSource::FollowUp);
            }
        }
        (Filters::default(), FiltersSource::None)
    }

    /// Route one query. Never fails: broken backends only lower confidence.
    pub async fn decide(
        &self,
        query: &Query,
        session: Option<&SessionContext>,
        explicit_filters: Option<&Filters>,
    ) -> RouterDecision {
        let started = Instant::now();

        let classification = self.classifier.classify(&query.normalized);
        let special_intent = self.classifier.detect_special_intent(&query.normalized);
        let follow_up = session.map_or(false, |s| s.is_follow_up(&query.raw));
        let (filters, filters_source) = self.effective_filters(session, explicit_filters, follow_up);

        let (confidence, stats) = self
            .signals
            .signal(
                query.retrieval_text(),
                &filters,
                session.map_or(false, SessionContext::is_pinned),
                session.and_then(SessionContext::last_decision),
            )
            .await;

        let (automatic, automatic_reason) =
            self.automatic_decision(special_intent, follow_up, confidence, stats.weak);

        let route_override = session.and_then(SessionContext::get_route_override);
        let (decision, reason) = match route_override {
            Some(mode) => (
                mode.decision(),
                format!("override {} (automatic: {})", mode, automatic_reason),
            ),
            None => (automatic, automatic_reason.clone()),
        };

        let turn_id = match session {
            Some(s) => format!("{}#{}", s.chat_id(), s.turns() + 1),
            None => "anonymous#1".to_string(),
        };

        tracing::info!(
            turn = %turn_id,
            decision = %decision,
            confidence,
            task = %classification.task,
            "{}",
            reason
        );

        let passport = Passport {
            turn_id,
            chat_id: session.map(|s| s.chat_id().to_string()),
            timestamp: Utc::now(),
            latency_ms: started.elapsed().as_millis() as u64,
            query: query.clone(),
            filters,
            filters_source,
            weights: *self.signals.weights(),
            thresholds: self.thresholds,
            penalties: *self.signals.penalties(),
            signals: stats,
            intent_scores: classification.scores,
            template: classification.task.template_key(),
            special_intent,
            follow_up,
            automatic_decision: automatic,
            automatic_reason,
            route_override,
        };

        RouterDecision {
            decision,
            confidence,
            task: classification.task,
            reason,
            passport,
        }
    }

    fn automatic_decision(
        &self,
        special_intent: Option<SpecialIntent>,
        follow_up: bool,
        confidence: f64,
        weak: bool,
    ) -> (RouteDecision, String) {
        let ThresholdsConfig { high, low } = self.thresholds;

        if let Some(intent) = special_intent {
            return (
                RouteDecision::RetrieveThenExtend,
                format!("special intent: {}", intent),
            );
        }
        if follow_up {
            return (
                RouteDecision::RetrieveOnly,
                "follow-up to the previous turn".to_string(),
            );
        }
        if confidence >= high && !weak {
            return (
                RouteDecision::RetrieveOnly,
                format!("confidence {:.3} >= {:.2}", confidence, high),
            );
        }
        if confidence >= low {
            let detail = if weak && confidence >= high {
                ", weak context"
            } else {
                ""
            };
            return (
                RouteDecision::GenerateWithRetrievalFallback,
                format!("confidence {:.3} >= {:.2}{}", confidence, low, detail),
            );
        }
        (
            RouteDecision::GenerateOnly,
            format!("low confidence {:.3} < {:.2}", confidence, low),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionSettings;
    use crate::retrieval::{Document, FilterField, InMemoryCorpus};

    fn router(documents: Vec<Document>) -> Router {
        let config = Config::default();
        let corpus = Arc::new(InMemoryCorpus::new(documents));
        let ranker = HybridRanker::new(corpus.clone(), config.fusion.clone())
            .unwrap()
            .with_lexical(corpus);
        Router::new(&config, Arc::new(ranker)).unwrap()
    }

    fn session() -> SessionContext {
        SessionContext::new("chat", SessionSettings::default())
    }

    #[test]
    fn test_query_retrieval_text() {
        let q = Query::new("  Wh\u{e0}t is IT? ");
        assert_eq!(q.normalized, "what is it?");
        assert_eq!(q.retrieval_text(), "  Wh\u{e0}t is IT? ");

        let q = q.with_rewritten("what is a limit");
        assert_eq!(q.retrieval_text(), "what is a limit");
        assert!(Query::new("x").with_rewritten("  ").rewritten.is_none());
    }

    #[test]
    fn test_uses_retrieval() {
        assert!(!RouteDecision::GenerateOnly.uses_retrieval());
        assert!(RouteDecision::RetrieveThenExtend.uses_retrieval());
        assert!(RouteDecision::GenerateWithRetrievalFallback.uses_retrieval());
    }

    #[tokio::test]
    async fn test_empty_corpus_generates() {
        let r = router(Vec::new());
        let d = r.decide(&Query::new("tell me a story"), None, None).await;
        assert_eq!(d.decision, RouteDecision::GenerateOnly);
        assert_eq!(d.confidence, 0.0);
        assert!(d.passport.signals.weak);
        assert_eq!(d.passport.turn_id, "anonymous#1");
        assert!(d.reason.starts_with("low confidence"));
    }

    #[tokio::test]
    async fn test_book_exercise_retrieves_then_extends() {
        let r = router(Vec::new());
        let d = r
            .decide(&Query::new("Exercise 4 on page 112 of the book"), None, None)
            .await;
        assert_eq!(d.decision, RouteDecision::RetrieveThenExtend);
        assert_eq!(d.passport.special_intent, Some(SpecialIntent::BookExercise));
        assert_eq!(d.task, TaskKind::Exercise);
    }

    #[tokio::test]
    async fn test_follow_up_forces_retrieval() {
        let r = router(Vec::new());
        let mut ctx = session();
        ctx.append_exchange("What is a limit?", "...");

        let d = r
            .decide(&Query::new("can you explain it again?"), Some(&ctx), None)
            .await;
        assert!(d.confidence < 0.35);
        assert_eq!(d.decision, RouteDecision::RetrieveOnly);
        assert!(d.passport.follow_up);
    }

    #[tokio::test]
    async fn test_override_keeps_automatic_reasoning() {
        let r = router(Vec::new());
        let mut ctx = session();
        ctx.set_route_override(Some(RouteOverride::ForceRetrieve));

        let d = r.decide(&Query::new("tell me a story"), Some(&ctx), None).await;
        assert_eq!(d.decision, RouteDecision::RetrieveOnly);
        assert_eq!(d.passport.automatic_decision, RouteDecision::GenerateOnly);
        assert_eq!(d.passport.route_override, Some(RouteOverride::ForceRetrieve));
        assert!(d.reason.contains("automatic: low confidence"));
    }

    #[tokio::test]
    async fn test_effective_filters_priority() {
        let r = router(Vec::new());
        let explicit = Filters::default().with(FilterField::Chapter, "1");
        let mut ctx = session();
        ctx.record_turn(
            "q",
            RouteDecision::RetrieveOnly,
            Filters::default(),
            Some(Filters::default().with(FilterField::Chapter, "2")),
        );

        assert_eq!(
            r.effective_filters(Some(&ctx), Some(&explicit), true).1,
            FiltersSource::Explicit
        );
        let (filters, source) = r.effective_filters(Some(&ctx), None, true);
        assert_eq!(source, FiltersSource::FollowUp);
        assert_eq!(filters.chapter.as_deref(), Some("2"));
        assert_eq!(
            r.effective_filters(Some(&ctx), None, false).1,
            FiltersSource::None
        );

        ctx.pin();
        assert_eq!(
            r.effective_filters(Some(&ctx), Some(&Filters::default()), false).1,
            FiltersSource::Pinned
        );
    }

    #[tokio::test]
    async fn test_decide_is_deterministic() {
        let docs = vec![
            Document::new("A limit describes the value a function approaches")
                .with_id("a")
                .with_meta(FilterField::Chapter, "1"),
            Document::new("The derivative is the limit of the difference quotient")
                .with_id("b")
                .with_meta(FilterField::Chapter, "2"),
        ];
        let r = router(docs);
        let mut ctx = session();
        ctx.append_exchange("What is a sequence?", "...");
        let query = Query::new("How is the derivative defined as a limit?");

        let first = r.decide(&query, Some(&ctx), None).await;
        let second = r.decide(&query, Some(&ctx), None).await;
        assert_eq!(first.decision, second.decision);
        assert_eq!(first.confidence, second.confidence);
        assert!(first.passport.same_decision(&second.passport));
    }

    #[test]
    fn test_weak_context_never_retrieves_only() {
        let r = router(Vec::new());
        let (decision, reason) = r.automatic_decision(None, false, 0.9, true);
        assert_eq!(decision, RouteDecision::GenerateWithRetrievalFallback);
        assert!(reason.ends_with("weak context"));

        let (decision, _) = r.automatic_decision(None, false, 0.9, false);
        assert_eq!(decision, RouteDecision::RetrieveOnly);
        let (decision, _) = r.automatic_decision(None, false, 0.35, false);
        assert_eq!(decision, RouteDecision::GenerateWithRetrievalFallback);
        let (decision, _) = r.automatic_decision(None, false, 0.349, false);
        assert_eq!(decision, RouteDecision::GenerateOnly);
    }
}
