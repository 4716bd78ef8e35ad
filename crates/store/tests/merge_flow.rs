use kbx_core::{DocumentStore, KbError, MergeConfig, Merger, TagStore};
use kbx_store::KbStore;
use tempfile::TempDir;

fn open_store() -> (TempDir, KbStore) {
    let dir = TempDir::new().unwrap();
    let store = KbStore::open(dir.path().join("kb.sqlite")).unwrap();
    (dir, store)
}

const DEPLOY_NOTES: &str = "Deploying the search service requires draining the \
old instances first, then rolling the new build out one availability zone at a \
time. Watch the error budget dashboard during the rollout and halt if the \
p99 latency rises above the agreed ceiling for more than five minutes.";

#[test]
fn duplicates_surface_through_the_sqlite_store() {
    let (_dir, store) = open_store();
    let a = store
        .add_document("Search service deploy runbook", DEPLOY_NOTES, Some("ops"))
        .unwrap();
    let b = store
        .add_document(
            "Search service deployment runbook",
            &format!("{DEPLOY_NOTES} Remember to page the on-call afterwards."),
            Some("ops"),
        )
        .unwrap();
    store
        .add_document(
            "Grocery list",
            "eggs, flour, olive oil, two kinds of cheese",
            Some("ops"),
        )
        .unwrap();

    let merger = Merger::new(store.clone());
    let candidates = merger.find_merge_candidates(Some("ops"), None, None).unwrap();
    assert_eq!(candidates.len(), 1);
    let candidate = &candidates[0];
    let pair = [candidate.doc1_id, candidate.doc2_id];
    assert!(pair.contains(&a) && pair.contains(&b));
    assert!(candidate.similarity_score >= 0.7);
}

#[test]
fn project_scope_limits_the_corpus() {
    let (_dir, store) = open_store();
    store
        .add_document("Deploy runbook", DEPLOY_NOTES, Some("ops"))
        .unwrap();
    store
        .add_document("Deploy runbook copy", DEPLOY_NOTES, Some("research"))
        .unwrap();

    let merger = Merger::new(store.clone());
    assert!(merger
        .find_merge_candidates(Some("ops"), None, None)
        .unwrap()
        .is_empty());
    // Unscoped search sees both projects.
    assert_eq!(merger.find_merge_candidates(None, None, None).unwrap().len(), 1);
}

#[test]
fn high_traffic_pairs_are_left_alone() {
    let (_dir, store) = open_store();
    let a = store
        .add_document("Deploy runbook", DEPLOY_NOTES, None)
        .unwrap();
    let b = store
        .add_document("Deploy runbook copy", DEPLOY_NOTES, None)
        .unwrap();
    for _ in 0..3 {
        store.touch_document(a).unwrap();
        store.touch_document(b).unwrap();
    }

    let merger = Merger::with_config(
        store.clone(),
        MergeConfig {
            skip_access_count: 2,
            ..MergeConfig::default()
        },
    )
    .unwrap();
    assert!(merger.find_merge_candidates(None, None, None).unwrap().is_empty());

    // One busy side is not enough; the pair must be busy on both.
    let default_merger = Merger::new(store.clone());
    assert_eq!(
        default_merger
            .find_merge_candidates(None, None, None)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn deleted_documents_never_become_candidates() {
    let (_dir, store) = open_store();
    store
        .add_document("Deploy runbook", DEPLOY_NOTES, None)
        .unwrap();
    let dup = store
        .add_document("Deploy runbook copy", DEPLOY_NOTES, None)
        .unwrap();
    store.delete_document(dup).unwrap();

    let merger = Merger::new(store.clone());
    assert!(merger.find_merge_candidates(None, None, None).unwrap().is_empty());
}

#[test]
fn merge_applies_in_one_transaction() {
    let (_dir, store) = open_store();
    let short = store
        .add_document("Deploy runbook", DEPLOY_NOTES, None)
        .unwrap();
    let long = store
        .add_document(
            "Search service deploy runbook",
            &format!("{DEPLOY_NOTES} Remember to page the on-call afterwards."),
            None,
        )
        .unwrap();
    store
        .add_tags(short, &["ops".to_string()].into_iter().collect())
        .unwrap();
    store
        .add_tags(long, &["runbook".to_string()].into_iter().collect())
        .unwrap();

    let merger = Merger::new(store.clone());
    let strategy = merger.suggest_merge_strategy(short, long).unwrap();
    // The longer, better-titled document wins the keep decision.
    assert_eq!(strategy.keep_doc_id, long);
    assert_eq!(strategy.merge_doc_id, short);

    assert!(merger.execute_merge(&strategy, true));

    let kept = store.get_document(long).unwrap().unwrap();
    assert_eq!(kept.title, strategy.merged_title);
    assert_eq!(kept.content, strategy.merged_content);
    let tags = store.document_tags(long).unwrap();
    assert!(tags.contains("ops") && tags.contains("runbook"));
    // The source is retired, not erased.
    assert!(store.get_document(short).unwrap().is_none());
}

#[test]
fn merge_without_delete_keeps_the_source() {
    let (_dir, store) = open_store();
    let a = store
        .add_document("Deploy runbook", DEPLOY_NOTES, None)
        .unwrap();
    let b = store
        .add_document("Deploy runbook copy", DEPLOY_NOTES, None)
        .unwrap();

    let merger = Merger::new(store.clone());
    let strategy = merger.suggest_merge_strategy(a, b).unwrap();
    assert!(merger.execute_merge(&strategy, false));
    assert!(store.get_document(strategy.merge_doc_id).unwrap().is_some());
}

#[test]
fn strategy_for_missing_document_is_an_error() {
    let (_dir, store) = open_store();
    let a = store
        .add_document("Deploy runbook", DEPLOY_NOTES, None)
        .unwrap();

    let merger = Merger::new(store.clone());
    let err = merger.suggest_merge_strategy(a, 999).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<KbError>(),
        Some(KbError::DocumentNotFound(999))
    ));
}

#[test]
fn related_documents_stay_within_the_project() {
    let (_dir, store) = open_store();
    let subject = store
        .add_document("Deploy runbook", DEPLOY_NOTES, Some("ops"))
        .unwrap();
    let sibling = store
        .add_document(
            "Rollout checklist",
            &format!("{DEPLOY_NOTES} Afterwards, close out the deploy ticket."),
            Some("ops"),
        )
        .unwrap();
    store
        .add_document("Deploy runbook twin", DEPLOY_NOTES, Some("research"))
        .unwrap();

    let merger = Merger::new(store.clone());
    let related = merger.find_related_documents(subject, 5).unwrap();
    assert!(!related.is_empty());
    assert!(related.iter().any(|r| r.id == sibling));
    assert!(related.iter().all(|r| r.id != subject));
    // The cross-project twin is never offered.
    assert!(related.iter().all(|r| r.title != "Deploy runbook twin"));
}
