//! Integration Test: Session store and turn pipeline
//!
//! Concurrent access to the SessionStore and multi-turn conversations
//! through the TutorEngine.

use lectern::config::{Config, SessionSettings};
use lectern::engine::TutorEngine;
use lectern::retrieval::{Document, FilterField, Filters, HybridRanker, InMemoryCorpus};
use lectern::router::{FiltersSource, Query, RouteDecision};
use lectern::session::{RouteOverride, SessionStore};
use std::sync::Arc;

fn engine() -> TutorEngine {
    let config = Config::default();
    let documents = vec![
        Document::new("The ratio test for the convergence of a series")
            .with_id("s2")
            .with_meta(FilterField::Chapter, "5")
            .with_meta(FilterField::BlockKind, "theorem")
            .with_meta(FilterField::BlockId, "5.2"),
        Document::new("Definition: a series converges when its partial sums converge")
            .with_id("s1")
            .with_meta(FilterField::Chapter, "5")
            .with_meta(FilterField::BlockKind, "definition")
            .with_meta(FilterField::BlockId, "5.1"),
        Document::new("The comparison test for series with positive terms")
            .with_id("s3")
            .with_meta(FilterField::Chapter, "5")
            .with_meta(FilterField::BlockKind, "theorem")
            .with_meta(FilterField::BlockId, "5.3"),
        Document::new("Taylor series of the exponential function")
            .with_id("t1")
            .with_meta(FilterField::Chapter, "6")
            .with_meta(FilterField::BlockKind, "example")
            .with_meta(FilterField::BlockId, "6.1"),
    ];
    let corpus = Arc::new(InMemoryCorpus::new(documents));
    let ranker = HybridRanker::new(corpus.clone(), config.fusion.clone())
        .unwrap()
        .with_lexical(corpus);
    TutorEngine::new(&config, Arc::new(ranker)).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_stay_bounded() {
    let store = Arc::new(SessionStore::new(SessionSettings::default()).unwrap());

    let mut handles = Vec::new();
    for i in 0..32 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let chat = format!("chat-{}", i % 4);
            let session = store.get_or_create(&chat).await;
            session
                .lock()
                .await
                .append_exchange(format!("question {}", i), "answer");
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(
        store.list_ids().await,
        vec!["chat-0", "chat-1", "chat-2", "chat-3"]
    );
    for id in store.list_ids().await {
        let ctx = store.snapshot(&id).await.unwrap();
        assert_eq!(ctx.history().len(), 5);
    }
    println!("✓ 32 appends across 4 chats, histories bounded");
}

#[tokio::test]
async fn test_sixth_exchange_evicts_oldest() {
    let store = SessionStore::new(SessionSettings::default()).unwrap();
    store.get_or_create("c").await;
    for i in 1..=6 {
        store
            .update("c", |ctx| ctx.append_exchange(format!("q{}", i), "a"))
            .await
            .unwrap();
    }

    let ctx = store.snapshot("c").await.unwrap();
    let questions: Vec<&str> = ctx.history().iter().map(|e| e.question.as_str()).collect();
    assert_eq!(questions, vec!["q2", "q3", "q4", "q5", "q6"]);
}

#[tokio::test]
async fn test_follow_up_reuses_previous_context() {
    let engine = engine();

    let first = engine
        .handle_turn(
            "alice",
            Query::new("Explain the ratio test for series"),
            Some(Filters::default().with(FilterField::Chapter, "5")),
        )
        .await;
    assert!(first.decision.decision.uses_retrieval());
    assert_eq!(first.documents[0].id.as_deref(), Some("s2"));
    engine
        .record_answer("alice", "Explain the ratio test for series", "...")
        .await
        .unwrap();

    let second = engine
        .handle_turn("alice", Query::new("and why does it work?"), None)
        .await;
    assert_eq!(second.decision.decision, RouteDecision::RetrieveOnly);
    assert!(second.decision.passport.follow_up);
    assert_eq!(second.decision.passport.filters_source, FiltersSource::FollowUp);
    assert_eq!(second.retrieval_filters.block_id.as_deref(), Some("5.2"));
    assert_eq!(second.decision.passport.turn_id, "alice#2");
}

#[tokio::test]
async fn test_pin_survives_partial_reset() {
    let engine = engine();
    engine
        .handle_turn(
            "bob",
            Query::new("Taylor series of the exponential"),
            Some(Filters::default().with(FilterField::Chapter, "6")),
        )
        .await;

    let session = engine.sessions().get("bob").await.unwrap();
    {
        let mut ctx = session.lock().await;
        assert!(ctx.pin().is_some());
        ctx.set_route_override(Some(RouteOverride::ForceGenerate));
        ctx.reset(false);
    }

    let outcome = engine
        .handle_turn("bob", Query::new("Tell me about the weather"), None)
        .await;
    let passport = &outcome.decision.passport;
    assert_eq!(passport.filters_source, FiltersSource::Pinned);
    assert_eq!(passport.filters.chapter.as_deref(), Some("6"));
    assert!(passport.route_override.is_none());
}

#[tokio::test]
async fn test_override_applies_per_chat() {
    let engine = engine();
    engine
        .sessions()
        .get_or_create("carol")
        .await
        .lock()
        .await
        .set_route_override(Some(RouteOverride::ForceRetrieve));

    let carol = engine
        .handle_turn("carol", Query::new("Tell me about the weather"), None)
        .await;
    let dave = engine
        .handle_turn("dave", Query::new("Tell me about the weather"), None)
        .await;

    assert_eq!(carol.decision.decision, RouteDecision::RetrieveOnly);
    assert_eq!(
        carol.decision.passport.automatic_decision,
        dave.decision.decision
    );
    assert_eq!(dave.decision.decision, RouteDecision::GenerateOnly);
}

#[tokio::test]
async fn test_clear_destroys_session() {
    let engine = engine();
    engine
        .handle_turn("erin", Query::new("ratio test"), None)
        .await;
    assert!(engine.sessions().exists("erin").await);

    assert!(engine.sessions().clear("erin").await);
    assert!(!engine.sessions().exists("erin").await);

    let outcome = engine
        .handle_turn("erin", Query::new("ratio test"), None)
        .await;
    assert_eq!(outcome.decision.passport.turn_id, "erin#1");
}
