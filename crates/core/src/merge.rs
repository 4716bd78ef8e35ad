use std::cmp::Ordering;
use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::KbError;
use crate::index::LexicalIndex;
use crate::similarity::similarity_ratio;
use crate::traits::{Document, DocumentStore, TagStore};

const TITLE_WEIGHT: f64 = 0.4;
const CONTENT_WEIGHT: f64 = 0.6;

const RELATED_TITLE_WEIGHT: f64 = 0.3;
const RELATED_CONTENT_WEIGHT: f64 = 0.7;
const RELATED_MIN_SCORE: f64 = 0.3;
const RELATED_POOL_LIMIT: usize = 200;
const RELATED_CONTENT_PREFIX: usize = 500;

const PROGRESS_EVERY: usize = 25;

/// Tunable knobs for the two-stage candidate search.
///
/// The pre-filter bound must sit strictly below the final similarity
/// threshold: the fine stage also weighs title similarity, so a pair can
/// score higher there than in the lexical index, and a tight pre-filter
/// would discard true positives.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub similarity_threshold: f64,
    pub prefilter_threshold: f64,
    /// Pairs where both documents exceed this view count are never
    /// auto-suggested; two independently well-used documents deserve a
    /// human decision.
    pub skip_access_count: i64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            prefilter_threshold: 0.4,
            skip_access_count: 50,
        }
    }
}

impl MergeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.prefilter_threshold >= self.similarity_threshold {
            return Err(KbError::InvalidThresholds {
                prefilter: self.prefilter_threshold,
                similarity: self.similarity_threshold,
            }
            .into());
        }
        Ok(())
    }
}

/// A scored pair of likely duplicates. Computed fresh on every search,
/// never cached.
#[derive(Debug, Clone, Serialize)]
pub struct MergeCandidate {
    pub doc1_id: i64,
    pub doc2_id: i64,
    pub doc1_title: String,
    pub doc2_title: String,
    pub similarity_score: f64,
    pub merge_reason: String,
    pub recommended_action: String,
}

/// Audit trail carried alongside a strategy; informational only.
#[derive(Debug, Clone, Serialize)]
pub struct MergeProvenance {
    pub original_ids: [i64; 2],
    pub original_titles: [String; 2],
    pub merged_at: DateTime<Utc>,
    pub combined_access_count: i64,
}

/// A deterministic plan for combining two documents into one.
#[derive(Debug, Clone, Serialize)]
pub struct MergeStrategy {
    pub keep_doc_id: i64,
    pub merge_doc_id: i64,
    pub merged_title: String,
    pub merged_content: String,
    pub merged_tags: BTreeSet<String>,
    pub provenance: MergeProvenance,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedDocument {
    pub id: i64,
    pub title: String,
    pub score: f64,
}

/// Near-duplicate detection and merge planning over a document store.
///
/// Stateless between calls: every search re-reads the store, so results
/// always reflect the current document set.
pub struct Merger<S> {
    store: S,
    config: MergeConfig,
}

impl<S: DocumentStore + TagStore> Merger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            config: MergeConfig::default(),
        }
    }

    pub fn with_config(store: S, config: MergeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Finds likely-duplicate pairs, best matches first.
    ///
    /// Stage 1 builds a lexical index over the active corpus and keeps
    /// pairs above the pre-filter bound; stage 2 re-scores each surviving
    /// pair on full titles and content. `progress` is purely
    /// observational: it receives `(current_pct, total_pct, found)`
    /// periodically and once at completion.
    pub fn find_merge_candidates(
        &self,
        project: Option<&str>,
        similarity_threshold: Option<f64>,
        progress: Option<&dyn Fn(u64, u64, usize)>,
    ) -> Result<Vec<MergeCandidate>> {
        let threshold = similarity_threshold.unwrap_or(self.config.similarity_threshold);
        let corpus = self.store.active_documents(project)?;
        let index = LexicalIndex::build(&corpus);
        let pairs = index.candidate_pairs(self.config.prefilter_threshold);
        debug!(
            corpus = corpus.len(),
            candidates = pairs.len(),
            "lexical pre-filter complete"
        );

        let total = pairs.len();
        let mut found = Vec::new();
        for (done, pair) in pairs.iter().enumerate() {
            // The index only keeps ids and titles; fetch the live records.
            let Some(doc1) = self.store.get_document(pair.doc1_id)? else {
                continue;
            };
            let Some(doc2) = self.store.get_document(pair.doc2_id)? else {
                continue;
            };
            if doc1.access_count > self.config.skip_access_count
                && doc2.access_count > self.config.skip_access_count
            {
                continue;
            }

            let title_sim = similarity_ratio(&doc1.title, &doc2.title);
            let content_sim = similarity_ratio(&doc1.content, &doc2.content);
            let overall = TITLE_WEIGHT * title_sim + CONTENT_WEIGHT * content_sim;
            if overall >= threshold {
                found.push(MergeCandidate {
                    doc1_id: doc1.id,
                    doc2_id: doc2.id,
                    doc1_title: doc1.title.clone(),
                    doc2_title: doc2.title.clone(),
                    similarity_score: overall,
                    merge_reason: classify_reason(title_sim, content_sim).to_string(),
                    recommended_action: recommend_action(&doc1, &doc2),
                });
            }

            if let Some(report) = progress {
                if (done + 1) % PROGRESS_EVERY == 0 {
                    report(((done + 1) * 100 / total) as u64, 100, found.len());
                }
            }
        }

        let found: Vec<MergeCandidate> = found
            .into_iter()
            .sorted_by(|a, b| {
                b.similarity_score
                    .partial_cmp(&a.similarity_score)
                    .unwrap_or(Ordering::Equal)
            })
            .collect();
        if let Some(report) = progress {
            report(100, 100, found.len());
        }
        Ok(found)
    }

    /// Computes the authoritative merge plan for two documents.
    ///
    /// Fails fast when either id is missing; that is a caller error, not
    /// a transient condition.
    pub fn suggest_merge_strategy(&self, doc1_id: i64, doc2_id: i64) -> Result<MergeStrategy> {
        let doc1 = self
            .store
            .get_document(doc1_id)?
            .ok_or(KbError::DocumentNotFound(doc1_id))?;
        let doc2 = self
            .store
            .get_document(doc2_id)?
            .ok_or(KbError::DocumentNotFound(doc2_id))?;
        let tags1 = self.store.document_tags(doc1_id)?;
        let tags2 = self.store.document_tags(doc2_id)?;

        let now = Utc::now();
        let score1 = quality_score(&doc1, tags1.len(), now);
        let score2 = quality_score(&doc2, tags2.len(), now);
        // Ties keep the first argument.
        let (keep, merge) = if score1 >= score2 {
            (&doc1, &doc2)
        } else {
            (&doc2, &doc1)
        };
        debug!(
            keep = keep.id,
            merge = merge.id,
            score1,
            score2,
            "merge strategy computed"
        );

        let merged_tags: BTreeSet<String> = tags1.union(&tags2).cloned().collect();
        Ok(MergeStrategy {
            keep_doc_id: keep.id,
            merge_doc_id: merge.id,
            merged_title: merge_titles(&keep.title, &merge.title),
            merged_content: merge_contents(keep, merge),
            merged_tags,
            provenance: MergeProvenance {
                original_ids: [doc1.id, doc2.id],
                original_titles: [doc1.title.clone(), doc2.title.clone()],
                merged_at: now,
                combined_access_count: doc1.access_count + doc2.access_count,
            },
        })
    }

    /// Applies a strategy as one storage transaction.
    ///
    /// Reports failure as `false` rather than raising: callers run this
    /// in batch loops where one bad merge should not abort the rest.
    pub fn execute_merge(&self, strategy: &MergeStrategy, delete_source: bool) -> bool {
        let retire = delete_source.then_some(strategy.merge_doc_id);
        match self.store.apply_merge(
            strategy.keep_doc_id,
            &strategy.merged_title,
            &strategy.merged_content,
            &strategy.merged_tags,
            retire,
        ) {
            Ok(()) => {
                debug!(
                    keep = strategy.keep_doc_id,
                    merged = strategy.merge_doc_id,
                    "merge applied"
                );
                true
            }
            Err(err) => {
                warn!(
                    keep = strategy.keep_doc_id,
                    merged = strategy.merge_doc_id,
                    error = %err,
                    "merge failed"
                );
                false
            }
        }
    }

    /// Cheap same-project relatedness lookup.
    ///
    /// Compares only a 500-character content prefix per document; a lossy
    /// sample is enough for a "see also" list and keeps the scan bounded.
    pub fn find_related_documents(&self, doc_id: i64, limit: usize) -> Result<Vec<RelatedDocument>> {
        let doc = self
            .store
            .get_document(doc_id)?
            .ok_or(KbError::DocumentNotFound(doc_id))?;
        let Some(project) = doc.project.as_deref() else {
            return Ok(Vec::new());
        };

        let reference = char_prefix(&doc.content, RELATED_CONTENT_PREFIX);
        let pool = self.store.active_documents(Some(project))?;
        let mut related: Vec<RelatedDocument> = pool
            .into_iter()
            .filter(|other| other.id != doc_id)
            .take(RELATED_POOL_LIMIT)
            .filter_map(|other| {
                let title_sim = similarity_ratio(&doc.title, &other.title);
                let content_sim = similarity_ratio(
                    reference,
                    char_prefix(&other.content, RELATED_CONTENT_PREFIX),
                );
                let score = RELATED_TITLE_WEIGHT * title_sim + RELATED_CONTENT_WEIGHT * content_sim;
                (score >= RELATED_MIN_SCORE).then_some(RelatedDocument {
                    id: other.id,
                    title: other.title,
                    score,
                })
            })
            .collect();
        related.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        related.truncate(limit);
        Ok(related)
    }
}

/// First matching rule wins.
fn classify_reason(title_sim: f64, content_sim: f64) -> &'static str {
    if title_sim > 0.8 {
        "Nearly identical titles"
    } else if content_sim > 0.9 {
        "Nearly identical content"
    } else if title_sim > 0.6 && content_sim > 0.7 {
        "Similar title and content"
    } else {
        "Related content"
    }
}

/// Advisory hint only; the authoritative keep decision is the quality
/// score in `suggest_merge_strategy`, and the two may disagree.
fn recommend_action(doc1: &Document, doc2: &Document) -> String {
    if doc1.access_count > doc2.access_count {
        format!("Merge into #{} (more views)", doc1.id)
    } else if doc2.access_count > doc1.access_count {
        format!("Merge into #{} (more views)", doc2.id)
    } else if doc1.content.len() > doc2.content.len() {
        format!("Merge into #{} (more content)", doc1.id)
    } else if doc2.content.len() > doc1.content.len() {
        format!("Merge into #{} (more content)", doc2.id)
    } else {
        format!("Merge into #{}", doc2.id)
    }
}

/// Composite heuristic for which of two near-duplicates survives.
/// Every term is hard-capped; 1000 views score no higher than 100.
fn quality_score(doc: &Document, tag_count: usize, now: DateTime<Utc>) -> f64 {
    let views = (doc.access_count as f64 / 10.0).min(10.0);
    let length = (doc.content.chars().count() as f64 / 1000.0).min(5.0);
    let tags = 0.5 * tag_count as f64;
    let title = if doc.title.chars().count() > 10 { 1.0 } else { 0.0 };
    let recency = match doc.accessed_at {
        Some(at) if now - at <= Duration::days(7) => 2.0,
        Some(at) if now - at <= Duration::days(30) => 1.0,
        _ => 0.0,
    };
    views + length + tags + title + recency
}

/// Identical titles stay as-is; otherwise the longer title wins,
/// regardless of which document won the quality score.
fn merge_titles(keep_title: &str, merge_title: &str) -> String {
    if merge_title.chars().count() > keep_title.chars().count() {
        merge_title.to_string()
    } else {
        keep_title.to_string()
    }
}

/// Lossless-by-concatenation content combination. Strict containment is
/// treated as "no information loss": the superset wins verbatim.
fn merge_contents(keep: &Document, merge: &Document) -> String {
    if merge.content.is_empty() {
        return keep.content.clone();
    }
    if keep.content.is_empty() {
        return merge.content.clone();
    }
    if keep.content == merge.content {
        return keep.content.clone();
    }
    if keep.content.contains(&merge.content) {
        return keep.content.clone();
    }
    if merge.content.contains(&keep.content) {
        return merge.content.clone();
    }
    let attribution = if keep.title == merge.title {
        "*Merged content:*".to_string()
    } else {
        format!("*Merged from \"{}\":*", merge.title)
    };
    format!(
        "{}\n\n---\n\n{}\n\n{}",
        keep.content, attribution, merge.content
    )
}

fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{DocumentStore, DocumentSummary, TagStore};
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct MemStore {
        docs: RefCell<BTreeMap<i64, Document>>,
        tags: RefCell<BTreeMap<i64, BTreeSet<String>>>,
        deleted: RefCell<BTreeSet<i64>>,
    }

    impl MemStore {
        fn insert(&self, doc: Document, tags: &[&str]) {
            self.tags
                .borrow_mut()
                .insert(doc.id, tags.iter().map(|t| t.to_string()).collect());
            self.docs.borrow_mut().insert(doc.id, doc);
        }
    }

    impl DocumentStore for MemStore {
        fn get_document(&self, id: i64) -> Result<Option<Document>> {
            if self.deleted.borrow().contains(&id) {
                return Ok(None);
            }
            Ok(self.docs.borrow().get(&id).cloned())
        }

        fn update_document(&self, id: i64, title: &str, content: &str) -> Result<bool> {
            let mut docs = self.docs.borrow_mut();
            match docs.get_mut(&id) {
                Some(doc) => {
                    doc.title = title.to_string();
                    doc.content = content.to_string();
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        fn delete_document(&self, id: i64) -> Result<bool> {
            Ok(self.deleted.borrow_mut().insert(id))
        }

        fn active_documents(&self, project: Option<&str>) -> Result<Vec<DocumentSummary>> {
            Ok(self
                .docs
                .borrow()
                .values()
                .filter(|d| !self.deleted.borrow().contains(&d.id))
                .filter(|d| project.is_none() || d.project.as_deref() == project)
                .map(|d| DocumentSummary {
                    id: d.id,
                    title: d.title.clone(),
                    content: d.content.clone(),
                    project: d.project.clone(),
                    access_count: d.access_count,
                })
                .collect())
        }

        fn apply_merge(
            &self,
            keep_id: i64,
            title: &str,
            content: &str,
            tags: &BTreeSet<String>,
            retire_id: Option<i64>,
        ) -> Result<()> {
            if !self.update_document(keep_id, title, content)? {
                anyhow::bail!("document #{keep_id} not found");
            }
            self.add_tags(keep_id, tags)?;
            if let Some(retire) = retire_id {
                self.delete_document(retire)?;
            }
            Ok(())
        }
    }

    impl TagStore for MemStore {
        fn document_tags(&self, document_id: i64) -> Result<BTreeSet<String>> {
            Ok(self
                .tags
                .borrow()
                .get(&document_id)
                .cloned()
                .unwrap_or_default())
        }

        fn add_tags(&self, document_id: i64, tags: &BTreeSet<String>) -> Result<Vec<String>> {
            let mut all = self.tags.borrow_mut();
            let entry = all.entry(document_id).or_default();
            let mut added = Vec::new();
            for tag in tags {
                if entry.insert(tag.clone()) {
                    added.push(tag.clone());
                }
            }
            Ok(added)
        }
    }

    fn doc(id: i64, title: &str, content: &str) -> Document {
        Document {
            id,
            title: title.to_string(),
            content: content.to_string(),
            project: Some("kb".to_string()),
            access_count: 0,
            accessed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn doc_with_views(id: i64, title: &str, content: &str, views: i64) -> Document {
        Document {
            access_count: views,
            ..doc(id, title, content)
        }
    }

    const ML_CONTENT: &str = "A practical walkthrough of scikit-learn, TensorFlow and pandas \
         covering feature engineering, model selection and evaluation for tabular data.";

    #[test]
    fn near_duplicates_are_detected_end_to_end() {
        let store = MemStore::default();
        store.insert(doc(1, "Python Machine Learning Guide", ML_CONTENT), &[]);
        store.insert(doc(2, "Python Machine Learning Tutorial", ML_CONTENT), &[]);
        store.insert(
            doc(3, "Sourdough starter notes", "flour water salt patience"),
            &[],
        );

        let merger = Merger::new(&store);
        let candidates = merger
            .find_merge_candidates(None, Some(0.7), None)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        let cand = &candidates[0];
        let mut ids = [cand.doc1_id, cand.doc2_id];
        ids.sort();
        assert_eq!(ids, [1, 2]);
        assert!(cand.similarity_score >= 0.7);
        assert!([
            "Nearly identical titles",
            "Nearly identical content",
            "Similar title and content",
            "Related content",
        ]
        .contains(&cand.merge_reason.as_str()));
    }

    #[test]
    fn both_high_traffic_documents_are_skipped() {
        let store = MemStore::default();
        store.insert(doc_with_views(1, "Deploy runbook", ML_CONTENT, 100), &[]);
        store.insert(doc_with_views(2, "Deploy runbook", ML_CONTENT, 75), &[]);

        let merger = Merger::new(&store);
        let candidates = merger
            .find_merge_candidates(None, Some(0.1), None)
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn one_high_traffic_document_is_still_considered() {
        let store = MemStore::default();
        store.insert(doc_with_views(1, "Deploy runbook", ML_CONTENT, 100), &[]);
        store.insert(doc_with_views(2, "Deploy runbook", ML_CONTENT, 3), &[]);

        let merger = Merger::new(&store);
        let candidates = merger
            .find_merge_candidates(None, Some(0.7), None)
            .unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn progress_reports_completion() {
        let store = MemStore::default();
        store.insert(doc(1, "a", ML_CONTENT), &[]);
        store.insert(doc(2, "b", ML_CONTENT), &[]);

        let seen = RefCell::new(Vec::new());
        let report = |cur: u64, total: u64, found: usize| {
            seen.borrow_mut().push((cur, total, found));
        };
        let merger = Merger::new(&store);
        merger
            .find_merge_candidates(None, None, Some(&report))
            .unwrap();
        let last = *seen.borrow().last().unwrap();
        assert_eq!((last.0, last.1), (100, 100));
    }

    #[test]
    fn reason_rules_apply_in_order() {
        assert_eq!(classify_reason(0.9, 0.2), "Nearly identical titles");
        assert_eq!(classify_reason(0.3, 0.95), "Nearly identical content");
        assert_eq!(classify_reason(0.7, 0.8), "Similar title and content");
        assert_eq!(classify_reason(0.1, 0.1), "Related content");
    }

    #[test]
    fn strategy_rejects_missing_documents() {
        let store = MemStore::default();
        store.insert(doc(1, "only one", "content"), &[]);
        let merger = Merger::new(&store);
        let err = merger.suggest_merge_strategy(1, 99).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<KbError>(),
            Some(KbError::DocumentNotFound(99))
        ));
    }

    #[test]
    fn higher_quality_document_is_kept() {
        let store = MemStore::default();
        store.insert(
            doc_with_views(1, "A really descriptive title", ML_CONTENT, 40),
            &["ml", "python"],
        );
        store.insert(doc_with_views(2, "short", "tiny", 0), &[]);

        let merger = Merger::new(&store);
        let strategy = merger.suggest_merge_strategy(2, 1).unwrap();
        assert_eq!(strategy.keep_doc_id, 1);
        assert_eq!(strategy.merge_doc_id, 2);
    }

    #[test]
    fn equal_scores_keep_the_first_argument() {
        let store = MemStore::default();
        store.insert(doc(1, "same shape", "identical body"), &[]);
        store.insert(doc(2, "same shape", "identical body"), &[]);

        let merger = Merger::new(&store);
        assert_eq!(merger.suggest_merge_strategy(1, 2).unwrap().keep_doc_id, 1);
        assert_eq!(merger.suggest_merge_strategy(2, 1).unwrap().keep_doc_id, 2);
    }

    #[test]
    fn containment_keeps_the_superset() {
        let superset = "setup\n\nrun the migration\n\nverify the dashboards";
        let subset = "run the migration";
        let store = MemStore::default();
        store.insert(doc(1, "Migration notes", superset), &[]);
        store.insert(doc(2, "Migration notes", subset), &[]);

        let merger = Merger::new(&store);
        let strategy = merger.suggest_merge_strategy(1, 2).unwrap();
        assert_eq!(strategy.merged_content, superset);
    }

    #[test]
    fn concatenation_preserves_both_sides() {
        let store = MemStore::default();
        store.insert(doc(1, "Postgres tips", "always vacuum analyze"), &[]);
        store.insert(doc(2, "More postgres tips", "tune shared_buffers"), &[]);

        let merger = Merger::new(&store);
        let strategy = merger.suggest_merge_strategy(1, 2).unwrap();
        assert!(strategy.merged_content.contains("always vacuum analyze"));
        assert!(strategy.merged_content.contains("tune shared_buffers"));
        assert!(strategy.merged_content.contains("---"));
        assert!(strategy.merged_content.contains("Merged from"));
    }

    #[test]
    fn empty_content_uses_the_other_side() {
        let store = MemStore::default();
        store.insert(doc(1, "Empty draft", ""), &[]);
        store.insert(doc(2, "Filled note", "the actual body"), &[]);

        let merger = Merger::new(&store);
        let strategy = merger.suggest_merge_strategy(1, 2).unwrap();
        assert_eq!(strategy.merged_content, "the actual body");
    }

    #[test]
    fn merged_tags_are_the_union() {
        let store = MemStore::default();
        store.insert(doc(1, "a", "x"), &["rust", "notes"]);
        store.insert(doc(2, "b", "y"), &["notes", "sqlite"]);

        let merger = Merger::new(&store);
        let strategy = merger.suggest_merge_strategy(1, 2).unwrap();
        let expected: BTreeSet<String> = ["rust", "notes", "sqlite"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(strategy.merged_tags, expected);
    }

    #[test]
    fn longer_title_survives_regardless_of_winner() {
        let store = MemStore::default();
        // Doc 1 wins on views but has the shorter title.
        store.insert(doc_with_views(1, "API notes", ML_CONTENT, 30), &[]);
        store.insert(
            doc_with_views(2, "API design meeting notes", "short", 0),
            &[],
        );

        let merger = Merger::new(&store);
        let strategy = merger.suggest_merge_strategy(1, 2).unwrap();
        assert_eq!(strategy.keep_doc_id, 1);
        assert_eq!(strategy.merged_title, "API design meeting notes");
    }

    #[test]
    fn execute_merge_applies_and_retires() {
        let store = MemStore::default();
        store.insert(doc(1, "Keep me", ML_CONTENT), &["a"]);
        store.insert(doc(2, "Drop me", "extra detail worth keeping"), &["b"]);

        let merger = Merger::new(&store);
        let strategy = merger.suggest_merge_strategy(1, 2).unwrap();
        assert!(merger.execute_merge(&strategy, true));

        let kept = store.get_document(strategy.keep_doc_id).unwrap().unwrap();
        assert_eq!(kept.content, strategy.merged_content);
        assert!(store.get_document(strategy.merge_doc_id).unwrap().is_none());
        let tags = store.document_tags(strategy.keep_doc_id).unwrap();
        assert!(tags.contains("a") && tags.contains("b"));
    }

    #[test]
    fn execute_merge_reports_failure_as_false() {
        let store = MemStore::default();
        store.insert(doc(1, "a", "body"), &[]);
        store.insert(doc(2, "b", "other body"), &[]);
        let merger = Merger::new(&store);
        let mut strategy = merger.suggest_merge_strategy(1, 2).unwrap();
        strategy.keep_doc_id = 404;
        assert!(!merger.execute_merge(&strategy, true));
    }

    #[test]
    fn related_documents_stay_within_project() {
        let store = MemStore::default();
        let mut a = doc(1, "Search rollout plan", ML_CONTENT);
        a.project = Some("search".to_string());
        let mut b = doc(2, "Search rollout retro", ML_CONTENT);
        b.project = Some("search".to_string());
        let mut c = doc(3, "Search rollout plan", ML_CONTENT);
        c.project = Some("billing".to_string());
        store.insert(a, &[]);
        store.insert(b, &[]);
        store.insert(c, &[]);

        let merger = Merger::new(&store);
        let related = merger.find_related_documents(1, 5).unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].id, 2);
        assert!(related[0].score >= RELATED_MIN_SCORE);
    }

    #[test]
    fn related_documents_without_project_is_empty() {
        let store = MemStore::default();
        let mut a = doc(1, "floating note", "body");
        a.project = None;
        store.insert(a, &[]);
        let merger = Merger::new(&store);
        assert!(merger.find_related_documents(1, 5).unwrap().is_empty());
    }

    #[test]
    fn strategy_serializes_with_provenance() {
        let store = MemStore::default();
        store.insert(doc(1, "a", "x"), &["rust"]);
        store.insert(doc(2, "b", "y"), &[]);

        let merger = Merger::new(&store);
        let strategy = merger.suggest_merge_strategy(1, 2).unwrap();
        let value = serde_json::to_value(&strategy).unwrap();
        assert_eq!(value["keep_doc_id"], 1);
        assert_eq!(value["provenance"]["original_ids"][1], 2);
        assert_eq!(value["merged_tags"][0], "rust");
    }

    #[test]
    fn config_rejects_inverted_thresholds() {
        let store = MemStore::default();
        let config = MergeConfig {
            similarity_threshold: 0.5,
            prefilter_threshold: 0.6,
            ..MergeConfig::default()
        };
        assert!(Merger::with_config(&store, config).is_err());
    }
}
