//! Keyword-weighted retrieval over the knowledge corpus.
//!
//! Scoring is a pure function of the query and a frozen corpus snapshot:
//! per-field token overlap (title > keywords > content) plus a trigram
//! phrase boost, top-k selection, and budgeted concatenation into one
//! context block for prompt injection.

use serde::Serialize;

use pal_domain::config::{RetrievalConfig, ScoreWeights};
use pal_domain::policy::KnowledgeDoc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Output types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Summary of one document that made it into the context block.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocRef {
    pub id: i64,
    pub title: String,
    pub category: String,
}

/// The injected context: which documents were used and the concatenated
/// block, never longer than the character budget.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub docs: Vec<DocRef>,
    pub context_block: String,
}

/// A scored document, used by the admin knowledge-search endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredDoc {
    pub id: i64,
    pub title: String,
    pub category: String,
    pub score: f64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tokenization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lowercased `[a-z0-9]+` runs of length ≥ 3.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars().flat_map(|c| c.to_lowercase()) {
        if ch.is_ascii_alphanumeric() {
            current.push(ch);
        } else if !current.is_empty() {
            if current.len() >= 3 {
                tokens.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }
    if current.len() >= 3 {
        tokens.push(current);
    }
    tokens
}

/// Consecutive three-token windows, joined with spaces.
fn trigrams(tokens: &[String]) -> Vec<String> {
    tokens.windows(3).map(|w| w.join(" ")).collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retriever
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Retriever {
    k: usize,
    budget_chars: usize,
    weights: ScoreWeights,
}

impl Retriever {
    pub fn new(cfg: &RetrievalConfig) -> Self {
        Self {
            k: cfg.k,
            budget_chars: cfg.budget_chars,
            weights: cfg.weights,
        }
    }

    /// Score one document against the pre-tokenized query.
    fn score(&self, query_tokens: &[String], query_trigrams: &[String], doc: &KnowledgeDoc) -> f64 {
        let title_tokens: std::collections::HashSet<String> =
            tokenize(&doc.title).into_iter().collect();
        let keyword_tokens: std::collections::HashSet<String> = doc
            .keywords
            .iter()
            .flat_map(|k| tokenize(k))
            .collect();
        let content_tokens = tokenize(&doc.content);

        let mut content_counts: std::collections::HashMap<&str, usize> =
            std::collections::HashMap::new();
        for token in &content_tokens {
            *content_counts.entry(token.as_str()).or_default() += 1;
        }

        // Distinct query tokens: repeating a word in the query must not
        // inflate the score.
        let distinct: std::collections::HashSet<&String> = query_tokens.iter().collect();

        let mut score = 0.0;
        for token in distinct {
            if title_tokens.contains(token.as_str()) {
                score += self.weights.title;
            }
            if keyword_tokens.contains(token.as_str()) {
                score += self.weights.keyword;
            }
            if let Some(&count) = content_counts.get(token.as_str()) {
                score += self.weights.content * count.min(3) as f64;
            }
        }

        if !query_trigrams.is_empty() {
            let content_trigrams: std::collections::HashSet<String> =
                trigrams(&content_tokens).into_iter().collect();
            if query_trigrams
                .iter()
                .any(|t| content_trigrams.contains(t))
            {
                score += self.weights.phrase;
            }
        }

        score
    }

    /// Score the whole corpus; zero-score documents are dropped, the rest
    /// come back ordered score desc, `updated_at` desc.
    pub fn rank<'a>(&self, query: &str, corpus: &'a [KnowledgeDoc]) -> Vec<(&'a KnowledgeDoc, f64)> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let query_trigrams = trigrams(&query_tokens);

        let mut scored: Vec<(&KnowledgeDoc, f64)> = corpus
            .iter()
            .map(|doc| (doc, self.score(&query_tokens, &query_trigrams, doc)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.updated_at.cmp(&a.0.updated_at))
        });
        scored
    }

    /// Full retrieval: rank, take top-k, concatenate whole documents in
    /// score order until the character budget would be exceeded.
    pub fn retrieve(&self, query: &str, corpus: &[KnowledgeDoc]) -> Retrieval {
        let ranked = self.rank(query, corpus);

        let mut retrieval = Retrieval::default();
        for (doc, _score) in ranked.into_iter().take(self.k) {
            let block = format!("### {}\n{}\n\n", doc.title, doc.content);
            if retrieval.context_block.len() + block.len() > self.budget_chars {
                break;
            }
            retrieval.context_block.push_str(&block);
            retrieval.docs.push(DocRef {
                id: doc.id,
                title: doc.title.clone(),
                category: doc.category.clone(),
            });
        }

        if !retrieval.docs.is_empty() {
            tracing::debug!(
                docs = retrieval.docs.len(),
                chars = retrieval.context_block.len(),
                "context retrieved"
            );
        }
        retrieval
    }

    /// Scored summaries for the admin search endpoint.
    pub fn search(&self, query: &str, corpus: &[KnowledgeDoc], limit: usize) -> Vec<ScoredDoc> {
        self.rank(query, corpus)
            .into_iter()
            .take(limit)
            .map(|(doc, score)| ScoredDoc {
                id: doc.id,
                title: doc.title.clone(),
                category: doc.category.clone(),
                score,
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn doc(id: i64, title: &str, keywords: &[&str], content: &str) -> KnowledgeDoc {
        KnowledgeDoc {
            id,
            title: title.to_string(),
            category: "faq".to_string(),
            content: content.to_string(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, id as u32 % 60).unwrap(),
        }
    }

    fn retriever() -> Retriever {
        Retriever::new(&RetrievalConfig::default())
    }

    #[test]
    fn tokenize_drops_short_runs_and_lowercases() {
        assert_eq!(
            tokenize("Do you SHIP to FR? shipping-info v2"),
            vec!["you", "ship", "shipping", "info"]
        );
    }

    #[test]
    fn equal_scores_tie_break_by_recency() {
        let corpus = vec![
            doc(1, "Shipping policy", &[], "irrelevant text here"),
            doc(2, "Returns", &[], "shipping shipping shipping shipping"),
        ];
        let ranked = retriever().rank("shipping", &corpus);
        // title (3.0) == capped content (3 × 1.0): tie broken by recency.
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].1, ranked[1].1);
        assert_eq!(ranked[0].0.id, 2, "newer doc wins the tie");
    }

    #[test]
    fn content_count_is_capped() {
        let a = doc(1, "a", &[], "refund refund refund");
        let b = doc(2, "b", &[], "refund refund refund refund refund refund");
        let r = retriever();
        let a_slice = [a];
        let b_slice = [b];
        let ranked_a = r.rank("refund", &a_slice);
        let ranked_b = r.rank("refund", &b_slice);
        assert_eq!(ranked_a[0].1, ranked_b[0].1);
    }

    #[test]
    fn phrase_boost_requires_shared_trigram() {
        let with_phrase = doc(1, "x", &[], "our free shipping policy applies worldwide");
        let without = doc(2, "y", &[], "shipping policy free for all");
        let r = retriever();
        let a = r.rank("free shipping policy details", &[with_phrase])[0].1;
        let b = r.rank("free shipping policy details", &[without])[0].1;
        assert_eq!(a, b + 2.0);
    }

    #[test]
    fn zero_score_documents_are_discarded() {
        let corpus = vec![doc(1, "Returns", &[], "return window is 30 days")];
        assert!(retriever().rank("weather forecast", &corpus).is_empty());
    }

    #[test]
    fn retrieve_respects_k_and_budget() {
        let corpus: Vec<KnowledgeDoc> = (0..10)
            .map(|i| doc(i, &format!("shipping {i}"), &[], &"x".repeat(500)))
            .collect();

        let cfg = RetrievalConfig {
            k: 3,
            budget_chars: 1200,
            ..RetrievalConfig::default()
        };
        let retrieval = Retriever::new(&cfg).retrieve("shipping", &corpus);
        assert!(retrieval.docs.len() <= 3);
        assert!(retrieval.context_block.len() <= 1200);
    }

    #[test]
    fn partial_documents_are_never_emitted() {
        // Equal scores: the newer document (id 5) is selected first.
        let corpus = vec![
            doc(5, "shipping guide", &[], &"a".repeat(400)),
            doc(1, "shipping extras", &[], &"b".repeat(400)),
        ];
        let cfg = RetrievalConfig {
            k: 5,
            budget_chars: 450,
            ..RetrievalConfig::default()
        };
        let retrieval = Retriever::new(&cfg).retrieve("shipping", &corpus);
        // Only the first document fits; the second is dropped whole.
        assert_eq!(retrieval.docs.len(), 1);
        assert!(retrieval.context_block.contains(&"a".repeat(400)));
        assert!(!retrieval.context_block.contains("bbbb"));
    }

    #[test]
    fn keyword_field_scores_between_title_and_content() {
        let by_keyword = doc(1, "misc", &["refund"], "nothing relevant");
        let by_content = doc(2, "misc", &[], "refund");
        let r = retriever();
        let kw = r.rank("refund", &[by_keyword])[0].1;
        let ct = r.rank("refund", &[by_content])[0].1;
        assert!(kw > ct);
    }

    #[test]
    fn repeated_query_tokens_do_not_inflate_scores() {
        let corpus = vec![doc(1, "shipping", &[], "shipping info")];
        let r = retriever();
        let once = r.rank("shipping", &corpus)[0].1;
        let thrice = r.rank("shipping shipping shipping", &corpus)[0].1;
        assert_eq!(once, thrice);
    }
}
