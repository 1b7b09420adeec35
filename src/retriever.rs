//! Evidence retriever: rank collected evidence against a follow-up query.
//!
//! [`FuzzyRetriever`] is a lexical stand-in for semantic search. It scores
//! each fragment with a normalised edit-distance similarity (0–100) and
//! keeps the best `top_k`. There is no index and no training cost, but a
//! query only finds evidence that shares its wording; a paraphrase such as
//! "slab area" will not match "Concrete: 500 sqft". Anything implementing
//! [`EvidenceRetriever`] can replace it as long as it returns fragments in
//! descending relevance.
//!
//! Fragments come from the corpus records. A record whose text still holds
//! evidence markers (an imported dump, a batched answer) is split on the
//! marker, each piece keeping the record's position and page span.

use crate::evidence::{split_tagged, EvidenceCorpus, Fragment};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^\p{L}\p{N}]+").unwrap_or_else(|e| panic!("invalid normalisation regex: {e}"))
});

/// A fragment with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredFragment {
    pub fragment: Fragment,
    /// 0–100, 100 for identical normalised text.
    pub score: u8,
}

/// Selects the evidence relevant to a query.
pub trait EvidenceRetriever: Send + Sync {
    /// At most `k` fragments, best first. Calling twice on an unchanged
    /// corpus returns the same sequence.
    fn retrieve(&self, query: &str, corpus: &EvidenceCorpus) -> Vec<ScoredFragment>;
}

/// Edit-distance retriever.
#[derive(Debug, Clone)]
pub struct FuzzyRetriever {
    top_k: usize,
    marker: String,
}

impl FuzzyRetriever {
    pub fn new(top_k: usize, marker: impl Into<String>) -> Self {
        Self {
            top_k: top_k.max(1),
            marker: marker.into(),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    fn candidates(&self, corpus: &EvidenceCorpus) -> Vec<Fragment> {
        corpus
            .fragments()
            .into_iter()
            .flat_map(|f| {
                split_tagged(&f.text, &self.marker)
                    .into_iter()
                    .map(move |piece| Fragment::new(f.position, f.pages.clone(), piece))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

impl EvidenceRetriever for FuzzyRetriever {
    fn retrieve(&self, query: &str, corpus: &EvidenceCorpus) -> Vec<ScoredFragment> {
        let query = normalize(query);
        let mut scored: Vec<ScoredFragment> = self
            .candidates(corpus)
            .into_iter()
            .map(|fragment| {
                let score = ratio(&query, &normalize(&fragment.text));
                ScoredFragment { fragment, score }
            })
            .collect();

        // Stable: equal scores keep corpus order.
        scored.sort_by(|a, b| b.score.cmp(&a.score));
        scored.truncate(self.top_k);

        debug!(
            "Retrieved {} fragments (best score {})",
            scored.len(),
            scored.first().map(|s| s.score).unwrap_or(0)
        );
        scored
    }
}

/// Lower-case, replace every non-alphanumeric run with one space, trim.
pub fn normalize(text: &str) -> String {
    NON_ALNUM
        .replace_all(&text.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// Similarity of two texts after [`normalize`], 0–100.
pub fn similarity(a: &str, b: &str) -> u8 {
    ratio(&normalize(a), &normalize(b))
}

/// `2·LCS / (|a| + |b|)` scaled to 0–100 and rounded: one minus the
/// insert/delete edit distance over the combined length.
fn ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100;
    }
    let common = lcs_len(&a, &b);
    ((200 * common) as f64 / total as f64).round() as u8
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
