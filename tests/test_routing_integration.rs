//! Integration Test: Routing decisions
//!
//! Drives the Router end to end over an in-memory corpus and checks the
//! decision rules, the confidence bounds and the audit passport.

use lectern::config::{Config, WeightsConfig};
use lectern::intent::{IntentClassifier, TaskKind};
use lectern::retrieval::{Document, FilterField, Filters, HybridRanker, InMemoryCorpus};
use lectern::router::{FiltersSource, Query, RouteDecision, Router};
use lectern::session::SessionContext;
use lectern::text::normalize;
use std::sync::Arc;

fn course() -> Vec<Document> {
    let mut docs = Vec::new();
    for (i, text) in [
        "The derivative of f at a point is the limit of the difference quotient",
        "What is the derivative of a product of functions? The product rule answers it.",
        "The chain rule gives the derivative of a composite function",
        "Geometric meaning of the derivative: slope of the tangent line",
    ]
    .iter()
    .enumerate()
    {
        docs.push(
            Document::new(*text)
                .with_id(format!("2.{}", i + 1))
                .with_meta(FilterField::Chapter, "2")
                .with_meta(FilterField::BlockKind, "theory")
                .with_meta(FilterField::BlockId, format!("2.{}", i + 1)),
        );
    }
    docs
}

fn router_with(config: &Config, documents: Vec<Document>) -> Router {
    let corpus = Arc::new(InMemoryCorpus::new(documents));
    let ranker = HybridRanker::new(corpus.clone(), config.fusion.clone())
        .unwrap()
        .with_lexical(corpus);
    Router::new(config, Arc::new(ranker)).unwrap()
}

fn session() -> SessionContext {
    SessionContext::new("student-1", Config::default().session)
}

#[tokio::test]
async fn test_scenario_no_hits_generates() {
    let router = router_with(&Config::default(), Vec::new());
    let decision = router
        .decide(&Query::new("Tell me about the weather"), None, None)
        .await;

    let signals = &decision.passport.signals;
    assert_eq!(signals.hits, 0);
    assert!(signals.weak);
    assert_eq!(signals.penalty, 0.15);
    assert_eq!(decision.confidence, 0.0);
    assert_eq!(decision.decision, RouteDecision::GenerateOnly);
}

#[tokio::test]
async fn test_scenario_book_exercise_overrides_confidence() {
    let router = router_with(&Config::default(), course());
    for query in [
        "Help with exercise 3 in the textbook",
        "derivative exercise 12, page 88 of the book",
    ] {
        let decision = router.decide(&Query::new(query), None, None).await;
        println!("✓ {} -> {}", query, decision.decision);
        assert_eq!(decision.decision, RouteDecision::RetrieveThenExtend);
        assert!(decision.reason.contains("book_exercise"));
    }
}

#[tokio::test]
async fn test_scenario_pin_bonus() {
    let router = router_with(&Config::default(), Vec::new());
    let mut ctx = session();
    ctx.record_turn(
        "q",
        RouteDecision::RetrieveOnly,
        Filters::default(),
        Some(Filters::default().with(FilterField::Chapter, "2")),
    );
    ctx.pin();

    let decision = router
        .decide(&Query::new("Tell me about the weather"), Some(&ctx), None)
        .await;
    let passport = &decision.passport;
    assert!((passport.signals.pin_signal - 4.0 / 3.0).abs() < 1e-9);
    assert!((passport.weights.pin * passport.signals.pin_signal - 0.1).abs() < 1e-9);
    assert_eq!(passport.filters_source, FiltersSource::Pinned);
}

#[tokio::test]
async fn test_scenario_plain_question_fallback_task() {
    let router = router_with(&Config::default(), course());
    let decision = router
        .decide(&Query::new("What is a derivative?"), None, None)
        .await;
    assert_eq!(decision.task, TaskKind::Explanation);
    assert_eq!(decision.passport.template, "plain_explanation");
}

#[tokio::test]
async fn test_relevant_corpus_retrieves() {
    let router = router_with(&Config::default(), course());
    let decision = router
        .decide(
            &Query::new("What is the derivative of a product of functions?"),
            None,
            None,
        )
        .await;
    println!("✓ confidence {:.3}: {}", decision.confidence, decision.reason);
    assert!(!decision.passport.signals.weak);
    assert_eq!(decision.decision, RouteDecision::RetrieveOnly);
}

#[tokio::test]
async fn test_forced_follow_up_at_low_confidence() {
    let router = router_with(&Config::default(), Vec::new());
    let mut ctx = session();
    ctx.append_exchange("What is the chain rule?", "...");

    let decision = router
        .decide(&Query::new("why does this work?"), Some(&ctx), None)
        .await;
    assert!(decision.confidence < 0.1);
    assert_eq!(decision.decision, RouteDecision::RetrieveOnly);
    assert_eq!(decision.passport.automatic_decision, RouteDecision::RetrieveOnly);
}

#[tokio::test]
async fn test_confidence_always_bounded() {
    let mut config = Config::default();
    config.penalties.pin_increment = 5.0;
    let router = router_with(&config, course());

    let mut ctx = session();
    ctx.record_turn(
        "q",
        RouteDecision::RetrieveOnly,
        Filters::default(),
        Some(Filters::default().with(FilterField::Chapter, "2")),
    );
    ctx.pin();

    for query in [
        "",
        "∫∑∏ f(x) = ∞",
        "derivative derivative derivative theorem limit",
        "??",
        "Tell me about the weather",
    ] {
        let decision = router.decide(&Query::new(query), Some(&ctx), None).await;
        assert!(
            (0.0..=1.0).contains(&decision.confidence),
            "{} gave {}",
            query,
            decision.confidence
        );
    }
}

#[test]
fn test_normalized_weights_sum_to_one() {
    for (similarity, structure, keyword, pin) in [
        (0.55, 0.20, 0.175, 0.075),
        (1.0, 1.0, 1.0, 1.0),
        (3.0, 0.0, 0.0, 0.0),
        (0.001, 7.0, 2.5, 0.3),
    ] {
        let weights = WeightsConfig {
            similarity,
            structure,
            keyword,
            pin,
        }
        .normalize()
        .unwrap();
        assert!((weights.sum() - 1.0).abs() < 1e-9);
        assert!(weights.similarity >= 0.0 && weights.pin >= 0.0);
    }

    assert!(WeightsConfig {
        similarity: 0.0,
        structure: 0.0,
        keyword: 0.0,
        pin: 0.0,
    }
    .normalize()
    .is_err());
}

#[test]
fn test_priority_tie_break() {
    let classifier = IntentClassifier::new().unwrap();
    // one summary match, one comparison match
    let c = classifier.classify(&normalize("Give me an overview of the differences"));
    assert_eq!(c.scores[&TaskKind::Summary], c.scores[&TaskKind::Comparison]);
    assert_eq!(c.task, TaskKind::Summary);
}

#[tokio::test]
async fn test_strict_profile_raises_thresholds() {
    let mut config = Config::default();
    config.apply_profile("strict").unwrap();
    let router = router_with(&config, course());

    let decision = router
        .decide(&Query::new("Tell me about the weather"), None, None)
        .await;
    assert_eq!(decision.passport.thresholds.high, 0.65);
    assert_eq!(decision.passport.thresholds.low, 0.45);
}

#[tokio::test]
async fn test_passport_serializes() {
    let router = router_with(&Config::default(), course());
    let decision = router
        .decide(
            &Query::new("it").with_rewritten("derivative of a product"),
            None,
            Some(&Filters::default().with(FilterField::Chapter, "2")),
        )
        .await;

    let json = serde_json::to_value(&decision).unwrap();
    assert_eq!(json["passport"]["filters"]["chapter"], "2");
    assert_eq!(json["passport"]["filters_source"], "explicit");
    assert_eq!(json["passport"]["query"]["rewritten"], "derivative of a product");
    assert!(json["passport"]["signals"]["confidence"].is_number());
}
