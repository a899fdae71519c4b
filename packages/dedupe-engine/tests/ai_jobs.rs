//! AI enrichment job tests with a canned suggestion provider.

mod support;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use dedupe_core::DedupeConfig;
use dedupe_engine::ai::{AiJobRunner, SuggestionProvider};
use dedupe_engine::error::{EngineError, Result};
use dedupe_engine::EventBus;
use dedupe_storage::{
    AiJobStatus, DedupeStore, Document, FieldDecision, FieldSuggestion, MetadataSuggestion,
    SuggestionDecisions,
};

use support::{arc_store, join, seed, words, MemoryPaperlessClient, SeedSpec};

/// Suggests a title derived from the document and one tag; fails on demand.
struct CannedProvider {
    fail_for: Option<i64>,
}

#[async_trait]
impl SuggestionProvider for CannedProvider {
    async fn suggest(&self, document: &Document, _content: &str) -> Result<MetadataSuggestion> {
        if self.fail_for == Some(document.upstream_id) {
            return Err(EngineError::transient(None, "model unavailable"));
        }
        Ok(MetadataSuggestion {
            title: Some(FieldSuggestion {
                value: format!("Suggested title {}", document.upstream_id),
                confidence: 0.91,
            }),
            tags: Some(FieldSuggestion {
                value: vec!["ai-reviewed".to_string()],
                confidence: 0.66,
            }),
            ..Default::default()
        })
    }
}

async fn seed_two(store: &dyn DedupeStore) -> Vec<Uuid> {
    let config = DedupeConfig::default();
    let mut ids = Vec::new();
    for n in 1..=2 {
        let text = join(&words(&format!("letter{n}"), 40));
        ids.push(
            seed(
                store,
                &config,
                SeedSpec {
                    upstream_id: n,
                    title: "scan_0001.pdf",
                    text: &text,
                    created_day: 1,
                    file_size: Some(700),
                },
            )
            .await,
        );
    }
    ids
}

#[tokio::test]
async fn test_job_stores_suggestions_per_document() {
    let (sqlite, store) = arc_store();
    let client = Arc::new(MemoryPaperlessClient::new());
    let bus = Arc::new(EventBus::new());
    let runner = AiJobRunner::new(
        store,
        client,
        Arc::new(CannedProvider { fail_for: None }),
        bus.clone(),
    );

    let ids = seed_two(sqlite.as_ref()).await;
    let sub = bus.subscribe(None);
    let job = runner
        .run_job(&ids, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(job.status, AiJobStatus::Completed);
    assert_eq!(job.processed, 2);
    assert_eq!(job.failed, 0);

    let results = sqlite.list_ai_results(job.id).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| !r.applied));
    assert!(results[0].suggestion.title.is_some());

    // Update events precede the terminal event.
    let events = sub.drain();
    let terminal = events.iter().position(|e| e.body.is_terminal()).unwrap();
    assert!(terminal > 0);
}

#[tokio::test]
async fn test_item_failure_counts_but_job_completes() {
    let (sqlite, store) = arc_store();
    let client = Arc::new(MemoryPaperlessClient::new());
    let runner = AiJobRunner::new(
        store,
        client,
        Arc::new(CannedProvider { fail_for: Some(2) }),
        Arc::new(EventBus::new()),
    );

    let ids = seed_two(sqlite.as_ref()).await;
    let job = runner
        .run_job(&ids, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(job.status, AiJobStatus::Completed);
    assert_eq!(job.processed, 1);
    assert_eq!(job.failed, 1);
    assert_eq!(sqlite.list_ai_results(job.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_decide_and_apply_pushes_accepted_fields() {
    let (sqlite, store) = arc_store();
    let client = Arc::new(MemoryPaperlessClient::new());
    let runner = AiJobRunner::new(
        store,
        client.clone(),
        Arc::new(CannedProvider { fail_for: None }),
        Arc::new(EventBus::new()),
    );

    let ids = seed_two(sqlite.as_ref()).await;
    let job = runner
        .run_job(&ids, CancellationToken::new())
        .await
        .unwrap();

    runner
        .decide(
            job.id,
            ids[0],
            SuggestionDecisions {
                title: Some(FieldDecision::Accept),
                tags: Some(FieldDecision::Edit {
                    value: vec!["invoice".to_string()],
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    runner.apply(job.id, ids[0]).await.unwrap();

    // Upstream saw one patch with the accepted title and edited tags.
    let patches = client.patches.read();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].0, 1);
    assert_eq!(patches[0].1.title.as_deref(), Some("Suggested title 1"));
    assert_eq!(patches[0].1.add_tags, vec!["invoice".to_string()]);
    drop(patches);

    // Local mirror updated; result marked applied.
    let document = sqlite.get_document(ids[0]).await.unwrap();
    assert_eq!(document.title, "Suggested title 1");
    assert!(document.tags.contains(&"invoice".to_string()));
    let result = sqlite.get_ai_result(job.id, ids[0]).await.unwrap().unwrap();
    assert!(result.applied);
}

#[tokio::test]
async fn test_rejected_fields_are_not_applied() {
    let (sqlite, store) = arc_store();
    let client = Arc::new(MemoryPaperlessClient::new());
    let runner = AiJobRunner::new(
        store,
        client.clone(),
        Arc::new(CannedProvider { fail_for: None }),
        Arc::new(EventBus::new()),
    );

    let ids = seed_two(sqlite.as_ref()).await;
    let job = runner
        .run_job(&ids, CancellationToken::new())
        .await
        .unwrap();

    runner
        .decide(
            job.id,
            ids[0],
            SuggestionDecisions {
                title: Some(FieldDecision::Reject),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    runner.apply(job.id, ids[0]).await.unwrap();

    // Nothing accepted: no upstream call, title untouched, still applied.
    assert!(client.patches.read().is_empty());
    let document = sqlite.get_document(ids[0]).await.unwrap();
    assert_eq!(document.title, "scan_0001.pdf");
    assert!(
        sqlite
            .get_ai_result(job.id, ids[0])
            .await
            .unwrap()
            .unwrap()
            .applied
    );
}
