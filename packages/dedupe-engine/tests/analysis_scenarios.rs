//! End-to-end analysis scenarios over a seeded corpus: exact duplicates,
//! near duplicates, multi-cluster corpora, the eligibility gate, weight
//! changes, group identity stability, snapshot atomicity, and cancellation.

mod support;

use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use dedupe_core::DedupeConfig;
use dedupe_engine::{
    AnalysisCoordinator, DedupeEngine, EventBus, SyncOptions,
};
use dedupe_storage::{AnalysisParameters, DedupeStore, GroupFilter, RunStatus};

use support::{
    arc_store, group_of, join, seed, upstream_doc, with_tail_reversed, words, HookedStore,
    MemoryPaperlessClient, SeedSpec,
};

fn coordinator(
    store: Arc<dyn DedupeStore>,
) -> (AnalysisCoordinator, Arc<RwLock<DedupeConfig>>, Arc<EventBus>) {
    let bus = Arc::new(EventBus::new());
    let config = Arc::new(RwLock::new(DedupeConfig::default()));
    (
        AnalysisCoordinator::new(store, bus.clone(), config.clone()),
        config,
        bus,
    )
}

async fn analyze(coordinator: &AnalysisCoordinator) -> dedupe_storage::AnalysisRun {
    coordinator
        .run(AnalysisParameters::default(), CancellationToken::new())
        .await
        .unwrap()
}

// S1: five identical financial reports collapse into one high-confidence
// group whose primary is the newest document.
#[tokio::test]
async fn test_exact_duplicates_form_single_group() {
    support::init_tracing();
    let (sqlite, store) = arc_store();
    let (coordinator, _config, _bus) = coordinator(store);
    let config = DedupeConfig::default();

    let text = join(&words("report", 120));
    let mut ids = Vec::new();
    for day in 1..=5u32 {
        ids.push(
            seed(
                sqlite.as_ref(),
                &config,
                SeedSpec {
                    upstream_id: day as i64,
                    title: "Financial report 2024",
                    text: &text,
                    created_day: day,
                    file_size: Some(10_000),
                },
            )
            .await,
        );
    }

    let run = analyze(&coordinator).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.groups_found, 1);

    let groups = sqlite.list_groups(&GroupFilter::default()).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].members.len(), 5);
    assert!(groups[0].group.confidence_score > 0.9);

    // Primary selection: newest created_at wins (day 5, the last id).
    assert_eq!(groups[0].group.primary_document_id, ids[4]);
}

// S2: six near-duplicate variants of a technical spec (typos, prepended
// paragraph, appended appendix, dropped sentences) land in one group.
#[tokio::test]
async fn test_near_duplicates_group_together() {
    let (sqlite, store) = arc_store();
    let (coordinator, _config, _bus) = coordinator(store);
    let config = DedupeConfig::default();

    let base = words("spec", 150);
    let mut typo = base.clone();
    typo[10] = "typoone".to_string();
    typo[75] = "typotwo".to_string();
    let mut prepended = words("intro", 6);
    prepended.extend(base.iter().cloned());
    let mut appended = base.clone();
    appended.extend(words("appendix", 6));
    let mut dropped = base.clone();
    dropped.drain(60..68);
    let mut light_edit = base.clone();
    light_edit[140] = "edited".to_string();

    let variants = [
        join(&base),
        join(&typo),
        join(&prepended),
        join(&appended),
        join(&dropped),
        join(&light_edit),
    ];

    let mut ids = Vec::new();
    for (i, text) in variants.iter().enumerate() {
        ids.push(
            seed(
                sqlite.as_ref(),
                &config,
                SeedSpec {
                    upstream_id: i as i64 + 1,
                    title: &format!("Technical specification rev {i}"),
                    text,
                    created_day: i as u32 + 1,
                    file_size: Some(20_000 + i as u64 * 100),
                },
            )
            .await,
        );
    }

    let run = analyze(&coordinator).await;
    assert_eq!(run.status, RunStatus::Completed);

    let (group, members) = group_of(sqlite.as_ref(), ids[0])
        .await
        .expect("base document grouped");
    assert!(
        members.len() >= 4,
        "expected at least 4 of 6 variants grouped, got {}",
        members.len()
    );
    assert!(group.confidence_score >= 0.75);
}

// S3: three distinct texts with four copies each produce three clean
// groups, no cross-cluster contamination.
#[tokio::test]
async fn test_multi_cluster_corpus_partitions_cleanly() {
    let (sqlite, store) = arc_store();
    let (coordinator, _config, _bus) = coordinator(store);
    let config = DedupeConfig::default();

    let mut cluster_ids: Vec<Vec<uuid::Uuid>> = Vec::new();
    for (c, marker) in ["finance", "medical", "legal"].iter().enumerate() {
        let text = join(&words(marker, 100));
        let mut ids = Vec::new();
        for copy in 0..4 {
            ids.push(
                seed(
                    sqlite.as_ref(),
                    &config,
                    SeedSpec {
                        upstream_id: (c * 10 + copy) as i64 + 1,
                        title: &format!("{marker} dossier"),
                        text: &text,
                        created_day: copy as u32 + 1,
                        file_size: Some(8_000),
                    },
                )
                .await,
            );
        }
        cluster_ids.push(ids);
    }

    let run = analyze(&coordinator).await;
    assert_eq!(run.groups_found, 3);

    for ids in &cluster_ids {
        let (_, members) = group_of(sqlite.as_ref(), ids[0]).await.unwrap();
        assert_eq!(members.len(), 4);
        for id in ids {
            assert!(members.contains(id), "copy missing from its cluster");
        }
    }
}

// S4: documents under the min-words gate never appear in any group, even
// when they are literally identical.
#[tokio::test]
async fn test_below_min_words_documents_never_group() {
    let (sqlite, store) = arc_store();
    let (coordinator, _config, _bus) = coordinator(store);
    let config = DedupeConfig::default();

    let tiny = join(&words("tiny", 19));
    let a = seed(
        sqlite.as_ref(),
        &config,
        SeedSpec {
            upstream_id: 1,
            title: "Sticky note",
            text: &tiny,
            created_day: 1,
            file_size: Some(100),
        },
    )
    .await;
    seed(
        sqlite.as_ref(),
        &config,
        SeedSpec {
            upstream_id: 2,
            title: "Sticky note",
            text: &tiny,
            created_day: 2,
            file_size: Some(100),
        },
    )
    .await;

    let run = analyze(&coordinator).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.documents_processed, 0, "19-word documents are ineligible");
    assert_eq!(run.groups_found, 0);
    assert!(group_of(sqlite.as_ref(), a).await.is_none());
}

// S5: zeroing the fuzzy weight retires groups that only fuzzy similarity
// held together, while identical-membership groups keep their review flag.
#[tokio::test]
async fn test_weight_change_retires_fuzzy_dependent_groups() {
    let (sqlite, store) = arc_store();
    let (coordinator, shared_config, _bus) = coordinator(store);
    let config = DedupeConfig::default();

    // Cluster A: byte-identical pair; survives any weighting.
    let alpha = join(&words("alpha", 120));
    let a1 = seed(
        sqlite.as_ref(),
        &config,
        SeedSpec {
            upstream_id: 1,
            title: "Quarterly statement",
            text: &alpha,
            created_day: 1,
            file_size: Some(5_000),
        },
    )
    .await;
    seed(
        sqlite.as_ref(),
        &config,
        SeedSpec {
            upstream_id: 2,
            title: "Quarterly statement",
            text: &alpha,
            created_day: 2,
            file_size: Some(5_000),
        },
    )
    .await;

    // Cluster B: same word multiset, tail reordered. Token-sort fuzzy is
    // 1.0, shingle jaccard ~0.86, titles unrelated. With default weights
    // the pair clears the threshold; with fuzzy weight 0 it cannot.
    let beta = words("beta", 120);
    let b1 = seed(
        sqlite.as_ref(),
        &config,
        SeedSpec {
            upstream_id: 3,
            title: "zxqv wpllk grfmt",
            text: &join(&beta),
            created_day: 3,
            file_size: Some(6_000),
        },
    )
    .await;
    seed(
        sqlite.as_ref(),
        &config,
        SeedSpec {
            upstream_id: 4,
            title: "aaeeiioo uu yy",
            text: &with_tail_reversed(&beta, 9),
            created_day: 4,
            file_size: Some(6_000),
        },
    )
    .await;

    let run = analyze(&coordinator).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.groups_found, 2, "both clusters group under default weights");

    let (group_a, _) = group_of(sqlite.as_ref(), a1).await.unwrap();
    sqlite.mark_reviewed(&group_a.id, true).await.unwrap();

    // Drop the fuzzy component and re-analyze.
    shared_config.write().weights.fuzzy = 0;
    let run = analyze(&coordinator).await;
    assert_eq!(run.status, RunStatus::Completed);

    let (group_a_after, _) = group_of(sqlite.as_ref(), a1).await.unwrap();
    assert_eq!(group_a_after.id, group_a.id, "membership unchanged, id stable");
    assert!(group_a_after.reviewed, "review flag survives the re-analysis");
    assert!(
        group_of(sqlite.as_ref(), b1).await.is_none(),
        "fuzzy-dependent group drops out"
    );
}

// P8: re-running analysis on an unchanged corpus keeps group ids and the
// reviewed/resolved flags.
#[tokio::test]
async fn test_group_identity_stable_across_reruns() {
    let (sqlite, store) = arc_store();
    let (coordinator, _config, _bus) = coordinator(store);
    let config = DedupeConfig::default();

    let text = join(&words("stable", 100));
    let id = seed(
        sqlite.as_ref(),
        &config,
        SeedSpec {
            upstream_id: 1,
            title: "Contract",
            text: &text,
            created_day: 1,
            file_size: Some(3_000),
        },
    )
    .await;
    seed(
        sqlite.as_ref(),
        &config,
        SeedSpec {
            upstream_id: 2,
            title: "Contract",
            text: &text,
            created_day: 2,
            file_size: Some(3_000),
        },
    )
    .await;

    analyze(&coordinator).await;
    let (first, _) = group_of(sqlite.as_ref(), id).await.unwrap();
    sqlite.mark_reviewed(&first.id, true).await.unwrap();
    sqlite.mark_resolved(&first.id, true).await.unwrap();

    analyze(&coordinator).await;
    let (second, _) = group_of(sqlite.as_ref(), id).await.unwrap();
    assert_eq!(second.id, first.id);
    assert!(second.reviewed);
    assert!(second.resolved);
}

// P9: a failure during the persist phase fails the run and leaves the
// previous snapshot readable and intact.
#[tokio::test]
async fn test_persist_failure_keeps_prior_snapshot() {
    let hooked = Arc::new(HookedStore::new());
    let store: Arc<dyn DedupeStore> = hooked.clone();
    let (coordinator, _config, _bus) = coordinator(store);
    let config = DedupeConfig::default();

    let text = join(&words("atomic", 100));
    for upstream_id in 1..=2 {
        seed(
            hooked.as_ref(),
            &config,
            SeedSpec {
                upstream_id,
                title: "Archive scan",
                text: &text,
                created_day: upstream_id as u32,
                file_size: Some(2_000),
            },
        )
        .await;
    }

    let run = analyze(&coordinator).await;
    assert_eq!(run.status, RunStatus::Completed);
    let before = hooked.inner.list_groups(&GroupFilter::default()).await.unwrap();
    assert_eq!(before.len(), 1);

    // Grow the corpus so the next snapshot would differ, then make the
    // persist phase fail.
    seed(
        hooked.as_ref(),
        &config,
        SeedSpec {
            upstream_id: 3,
            title: "Archive scan",
            text: &text,
            created_day: 3,
            file_size: Some(2_000),
        },
    )
    .await;
    *hooked.fail_next_replace.lock() = true;

    let failed = coordinator
        .run(AnalysisParameters::default(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("injected"));

    let after = hooked.inner.list_groups(&GroupFilter::default()).await.unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].group.id, before[0].group.id);
    assert_eq!(after[0].members.len(), before[0].members.len());
}

// P11: a cancel observed mid-run ends the run as cancelled without
// touching the snapshot.
#[tokio::test]
async fn test_cancel_mid_run_takes_effect_at_checkpoint() {
    let hooked = Arc::new(HookedStore::new());
    let store: Arc<dyn DedupeStore> = hooked.clone();
    let (coordinator, _config, _bus) = coordinator(store);
    let config = DedupeConfig::default();

    let text = join(&words("cancel", 100));
    for upstream_id in 1..=2 {
        seed(
            hooked.as_ref(),
            &config,
            SeedSpec {
                upstream_id,
                title: "Slow corpus",
                text: &text,
                created_day: upstream_id as u32,
                file_size: Some(2_000),
            },
        )
        .await;
    }

    // The token fires from inside phase 1; the next checkpoint observes it.
    let cancel = CancellationToken::new();
    *hooked.cancel_on_list.lock() = Some(cancel.clone());

    let run = coordinator
        .run(AnalysisParameters::default(), cancel)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(hooked.inner.count_groups().await.unwrap(), 0);
}

// Full pipeline: sync from the upstream, then analyze what landed.
#[tokio::test]
async fn test_sync_then_analyze_pipeline() {
    let (_sqlite, store) = arc_store();
    let client = Arc::new(MemoryPaperlessClient::new());
    let text = join(&words("pipeline", 80));
    for id in 1..=3 {
        client.add_document(upstream_doc(id, "Shipping manifest"), text.clone());
    }

    let engine = DedupeEngine::new(store.clone(), client, DedupeConfig::default()).unwrap();
    let report = engine
        .sync
        .run(SyncOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.created, 3);

    let run = engine
        .analysis
        .run(AnalysisParameters::default(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.documents_processed, 3);
    assert_eq!(run.groups_found, 1);

    let groups = store.list_groups(&GroupFilter::default()).await.unwrap();
    assert_eq!(groups[0].members.len(), 3);
}
