//! Duplicate candidate scoring and ranking
//!
//! Search runs in two phases: a wide substring net over the configured
//! search fields (bounded), then composite similarity scoring keeping only
//! the strongest candidates. An optional AI re-ranking hook may reorder the
//! heuristic result but must preserve the score range and ordering contract.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::store::EntityRecord;

/// Wide-net phase result bound
pub const WIDE_NET_LIMIT: usize = 20;
/// Candidates scoring below this are discarded
pub const SCORE_THRESHOLD: u8 = 30;
/// Maximum candidates presented to the user
pub const MAX_CANDIDATES: usize = 5;

/// A ranked entity-store hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Entity id
    pub id: String,
    /// Entity fields as stored
    pub fields: Map<String, Value>,
    /// Composite similarity score, 0-100
    pub score: u8,
    /// Search field that produced the best score
    pub matched_field: String,
}

impl Candidate {
    /// Human label for presentation: the matched field's value, else the id
    pub fn label(&self) -> String {
        self.fields
            .get(&self.matched_field)
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .unwrap_or_else(|| self.id.clone())
    }
}

/// Optional AI re-ranking hook
///
/// Implementations must return scores within 0-100 in descending order;
/// output violating the contract is rejected and the heuristic ranking kept.
#[async_trait]
pub trait CandidateReranker: Send + Sync {
    async fn rerank(&self, identifier: &str, candidates: Vec<Candidate>) -> Vec<Candidate>;
}

/// Character-set overlap percentage, 0-100
fn char_overlap(a: &str, b: &str) -> f64 {
    let set_a: HashSet<char> = a.chars().collect();
    let set_b: HashSet<char> = b.chars().collect();
    let larger = set_a.len().max(set_b.len());
    if larger == 0 {
        return 0.0;
    }
    let shared = set_a.intersection(&set_b).count();
    shared as f64 / larger as f64 * 100.0
}

/// Word-set intersection ratio, 0-100
fn word_overlap(a: &str, b: &str) -> f64 {
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    let larger = words_a.len().max(words_b.len());
    if larger == 0 {
        return 0.0;
    }
    let shared = words_a.intersection(&words_b).count();
    shared as f64 / larger as f64 * 100.0
}

/// Composite similarity between an identifier and a field value, 0-100
///
/// The score is the best over: exact match (100), case-insensitive exact
/// (95), containment (85), normalized Levenshtein, character overlap, and
/// word-set overlap.
pub fn similarity(a: &str, b: &str) -> u8 {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    if a == b {
        return 100;
    }
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    if a_lower == b_lower {
        return 95;
    }
    if a_lower.contains(&b_lower) || b_lower.contains(&a_lower) {
        return 85;
    }

    let best = (strsim::normalized_levenshtein(&a_lower, &b_lower) * 100.0)
        .max(char_overlap(&a_lower, &b_lower))
        .max(word_overlap(&a_lower, &b_lower));
    best.clamp(0.0, 100.0).round() as u8
}

/// Scores and ranks entity-store candidates against a free-text identifier
#[derive(Clone)]
pub struct DuplicateRanker {
    threshold: u8,
    max_candidates: usize,
    reranker: Option<Arc<dyn CandidateReranker>>,
}

impl Default for DuplicateRanker {
    fn default() -> Self {
        Self {
            threshold: SCORE_THRESHOLD,
            max_candidates: MAX_CANDIDATES,
            reranker: None,
        }
    }
}

impl DuplicateRanker {
    /// Create a ranker with the default threshold and bound
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ranker with a custom threshold
    pub fn with_threshold(threshold: u8) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    /// Attach an AI re-ranking hook
    pub fn with_reranker(mut self, reranker: Arc<dyn CandidateReranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Score records against an identifier and keep the strongest candidates
    pub fn rank(
        &self,
        identifier: &str,
        records: &[EntityRecord],
        search_fields: &[String],
    ) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = records
            .iter()
            .filter_map(|record| self.score_record(identifier, record, search_fields))
            .filter(|c| c.score >= self.threshold)
            .collect();

        // Ties within a tier break on word overlap with the identifier,
        // then on id for a stable final order.
        let ident_lower = identifier.to_lowercase();
        candidates.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| {
                    word_overlap(&ident_lower, &b.label().to_lowercase())
                        .total_cmp(&word_overlap(&ident_lower, &a.label().to_lowercase()))
                })
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(self.max_candidates);
        debug!(
            identifier = %identifier,
            record_count = records.len(),
            kept = candidates.len(),
            "ranked duplicate candidates"
        );
        candidates
    }

    /// Rank, then apply the optional re-ranking hook while enforcing the
    /// score range and ordering contract.
    pub async fn rank_with_hook(
        &self,
        identifier: &str,
        records: &[EntityRecord],
        search_fields: &[String],
    ) -> Vec<Candidate> {
        let heuristic = self.rank(identifier, records, search_fields);
        let Some(reranker) = &self.reranker else {
            return heuristic;
        };
        if heuristic.is_empty() {
            return heuristic;
        }

        let reranked = reranker.rerank(identifier, heuristic.clone()).await;
        if !Self::respects_contract(&heuristic, &reranked) {
            warn!(
                identifier = %identifier,
                "reranker output violated the ordering contract; keeping heuristic ranking"
            );
            return heuristic;
        }
        reranked
    }

    fn score_record(
        &self,
        identifier: &str,
        record: &EntityRecord,
        search_fields: &[String],
    ) -> Option<Candidate> {
        let mut best_score = 0u8;
        let mut best_field: Option<&str> = None;

        for field in search_fields {
            let Some(value) = record.fields.get(field).and_then(Value::as_str) else {
                continue;
            };
            let score = similarity(identifier, value);
            if score > best_score || best_field.is_none() {
                best_score = score;
                best_field = Some(field);
            }
        }

        best_field.map(|field| Candidate {
            id: record.id.clone(),
            fields: record.fields.clone(),
            score: best_score,
            matched_field: field.to_string(),
        })
    }

    fn respects_contract(heuristic: &[Candidate], reranked: &[Candidate]) -> bool {
        if reranked.len() != heuristic.len() {
            return false;
        }
        let known: HashSet<&str> = heuristic.iter().map(|c| c.id.as_str()).collect();
        if !reranked.iter().all(|c| known.contains(c.id.as_str())) {
            return false;
        }
        reranked.windows(2).all(|pair| pair[0].score >= pair[1].score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, name: &str) -> EntityRecord {
        let mut fields = Map::new();
        fields.insert("name".to_string(), json!(name));
        EntityRecord {
            id: id.to_string(),
            fields,
        }
    }

    #[test]
    fn test_similarity_is_identity_bounded() {
        for input in ["a", "MacBook Pro M4", "john@x.com"] {
            assert_eq!(similarity(input, input), 100);
        }
        assert_eq!(similarity("", "anything"), 0);
        assert!(similarity("laptop", "zzzz") <= 100);
    }

    #[test]
    fn test_similarity_tiers() {
        assert_eq!(similarity("MacBook", "macbook"), 95);
        assert_eq!(similarity("Macbook", "Macbook Pro M4"), 85);
        assert!(similarity("Macbok", "Macbook") > 70);
    }

    #[test]
    fn test_ranking_prefers_substring_and_drops_unrelated() {
        let ranker = DuplicateRanker::new();
        // Ids ordered against the expected ranking so the result cannot
        // come from the id tie-break.
        let records = vec![
            record("9", "MacBook Pro M4"),
            record("1", "Macbook"),
            record("3", "iPad"),
        ];
        let candidates = ranker.rank("Macbook Pro", &records, &["name".to_string()]);

        assert_eq!(candidates[0].id, "9");
        assert!(candidates.iter().all(|c| c.id != "3"));
        assert!(candidates.iter().all(|c| c.score >= SCORE_THRESHOLD));
    }

    #[test]
    fn test_tied_scores_break_on_word_overlap() {
        let ranker = DuplicateRanker::new();
        let records = vec![record("a", "Macbook"), record("b", "MacBook Pro M4")];
        let candidates = ranker.rank("Macbook Pro", &records, &["name".to_string()]);

        assert_eq!(candidates[0].score, candidates[1].score, "both sit in the containment tier");
        assert_eq!(
            candidates[0].label(),
            "MacBook Pro M4",
            "more shared words must outrank the shorter containment hit"
        );
    }

    #[test]
    fn test_ranking_truncates_to_five() {
        let ranker = DuplicateRanker::new();
        let records: Vec<EntityRecord> = (0..8)
            .map(|i| record(&i.to_string(), &format!("Laptop {}", i)))
            .collect();
        let candidates = ranker.rank("Laptop", &records, &["name".to_string()]);
        assert_eq!(candidates.len(), MAX_CANDIDATES);
    }

    #[test]
    fn test_reranker_contract_rejects_invented_candidates() {
        struct Inventing;

        #[async_trait]
        impl CandidateReranker for Inventing {
            async fn rerank(&self, _identifier: &str, mut c: Vec<Candidate>) -> Vec<Candidate> {
                c[0].id = "invented".to_string();
                c
            }
        }

        tokio_test::block_on(async {
            let ranker = DuplicateRanker::new().with_reranker(Arc::new(Inventing));
            let records = vec![record("1", "MacBook Pro"), record("2", "Macbook")];
            let candidates = ranker
                .rank_with_hook("Macbook", &records, &["name".to_string()])
                .await;
            assert!(candidates.iter().all(|c| c.id != "invented"));
        });
    }
}
