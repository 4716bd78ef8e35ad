use rustc_hash::FxHashMap;

use crate::similarity::tokenize;
use crate::traits::DocumentSummary;

/// A pair of documents whose lexical overlap cleared the pre-filter bound.
#[derive(Debug, Clone)]
pub struct CandidatePair {
    pub doc1_id: i64,
    pub doc2_id: i64,
    pub doc1_title: String,
    pub doc2_title: String,
    pub score: f64,
}

struct DocEntry {
    id: i64,
    title: String,
    weights: FxHashMap<String, f64>,
}

/// Sparse term-weighted index over document content.
///
/// Weights are tf-idf, L2-normalized per document, so the dot product of
/// two documents is their cosine similarity. Built once per search; a
/// caller may hold onto it across repeated searches over the same corpus.
pub struct LexicalIndex {
    docs: Vec<DocEntry>,
}

impl LexicalIndex {
    pub fn build(corpus: &[DocumentSummary]) -> Self {
        let term_counts: Vec<FxHashMap<String, usize>> = corpus
            .iter()
            .map(|doc| {
                let mut counts: FxHashMap<String, usize> = FxHashMap::default();
                for term in tokenize(&doc.content) {
                    *counts.entry(term).or_insert(0) += 1;
                }
                counts
            })
            .collect();

        let mut doc_freq: FxHashMap<&str, usize> = FxHashMap::default();
        for counts in &term_counts {
            for term in counts.keys() {
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }

        let n = corpus.len() as f64;
        let docs = corpus
            .iter()
            .zip(&term_counts)
            .map(|(doc, counts)| {
                let mut weights: FxHashMap<String, f64> = FxHashMap::default();
                for (term, &tf) in counts {
                    let df = doc_freq[term.as_str()] as f64;
                    let weight = (1.0 + (tf as f64).ln()) * (1.0 + n / df).ln();
                    weights.insert(term.clone(), weight);
                }
                let norm = weights.values().map(|w| w * w).sum::<f64>().sqrt();
                if norm > 0.0 {
                    for w in weights.values_mut() {
                        *w /= norm;
                    }
                }
                DocEntry {
                    id: doc.id,
                    title: doc.title.clone(),
                    weights,
                }
            })
            .collect();

        Self { docs }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Enumerates pairs whose cosine similarity reaches `threshold`.
    ///
    /// Accumulates dot products through an inverted index so only pairs
    /// that share at least one term are ever touched. Terms present in
    /// more than half of a sufficiently large corpus carry little signal
    /// and are skipped to keep posting lists short.
    pub fn candidate_pairs(&self, threshold: f64) -> Vec<CandidatePair> {
        let mut postings: FxHashMap<&str, Vec<(u32, f64)>> = FxHashMap::default();
        for (idx, doc) in self.docs.iter().enumerate() {
            for (term, &weight) in &doc.weights {
                postings
                    .entry(term.as_str())
                    .or_default()
                    .push((idx as u32, weight));
            }
        }

        let df_cap = if self.docs.len() >= 20 {
            self.docs.len() / 2
        } else {
            usize::MAX
        };

        let mut scores: FxHashMap<(u32, u32), f64> = FxHashMap::default();
        for list in postings.values() {
            if list.len() > df_cap {
                continue;
            }
            for (i, &(a, wa)) in list.iter().enumerate() {
                for &(b, wb) in &list[i + 1..] {
                    *scores.entry((a, b)).or_insert(0.0) += wa * wb;
                }
            }
        }

        let mut pairs: Vec<CandidatePair> = scores
            .into_iter()
            .filter(|&(_, score)| score >= threshold)
            .map(|((a, b), score)| {
                let da = &self.docs[a as usize];
                let db = &self.docs[b as usize];
                CandidatePair {
                    doc1_id: da.id,
                    doc2_id: db.id,
                    doc1_title: da.title.clone(),
                    doc2_title: db.title.clone(),
                    score,
                }
            })
            .collect();
        pairs.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        pairs
    }
}
