//! Exemplar deduplication for the prompt
//!
//! Exemplars with identical normalized SQL are merged, keeping the
//! highest-ranked. Near-duplicates (token 5-gram Jaccard at or above the
//! threshold) are merged keeping the shorter SQL. Dedup shapes the prompt
//! only; the response's source manifest still lists every retrieved
//! exemplar.

use std::collections::HashSet;

use sqlscout_config::constants::generation::{DEDUP_JACCARD, DEDUP_NGRAM};
use sqlscout_core::ScoredExemplar;

/// Whitespace-collapsed, case-folded form used for exact-duplicate
/// detection.
pub fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn token_ngrams(sql: &str, n: usize) -> HashSet<String> {
    let tokens: Vec<String> = normalize_sql(sql)
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    if tokens.len() < n {
        if tokens.is_empty() {
            return HashSet::new();
        }
        return HashSet::from([tokens.join(" ")]);
    }

    tokens.windows(n).map(|w| w.join(" ")).collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Merge duplicates in rank order. The survivor of a near-duplicate pair is
/// the one with the shorter SQL, placed at the earlier rank.
pub fn dedup_for_prompt(hits: &[ScoredExemplar]) -> Vec<ScoredExemplar> {
    let mut kept: Vec<ScoredExemplar> = Vec::new();
    let mut kept_normalized: Vec<String> = Vec::new();
    let mut kept_ngrams: Vec<HashSet<String>> = Vec::new();

    'candidates: for hit in hits {
        let normalized = normalize_sql(&hit.exemplar.sql);
        let ngrams = token_ngrams(&hit.exemplar.sql, DEDUP_NGRAM);

        for i in 0..kept.len() {
            if kept_normalized[i] == normalized {
                continue 'candidates;
            }
            if jaccard(&kept_ngrams[i], &ngrams) >= DEDUP_JACCARD {
                if hit.exemplar.sql.len() < kept[i].exemplar.sql.len() {
                    kept[i] = hit.clone();
                    kept_normalized[i] = normalized;
                    kept_ngrams[i] = ngrams;
                }
                continue 'candidates;
            }
        }

        kept.push(hit.clone());
        kept_normalized.push(normalized);
        kept_ngrams.push(ngrams);
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use sqlscout_core::Exemplar;

    fn hit(id: &str, sql: &str, score: f32) -> ScoredExemplar {
        ScoredExemplar {
            exemplar: Arc::new(Exemplar {
                id: id.to_string(),
                sql: sql.to_string(),
                description: String::new(),
                tables: Vec::new(),
                joins: Vec::new(),
            }),
            fused_score: score,
            vector_score: score,
            lexical_score: 0.0,
        }
    }

    #[test]
    fn test_normalize_folds_case_and_whitespace() {
        assert_eq!(
            normalize_sql("SELECT  *\n  FROM Users"),
            normalize_sql("select * from users")
        );
    }

    #[test]
    fn test_exact_duplicates_keep_highest_ranked() {
        let hits = vec![
            hit("a", "SELECT id FROM ds.users", 0.9),
            hit("b", "select  id  from ds.users", 0.8),
            hit("c", "SELECT id FROM ds.users", 0.7),
        ];
        let deduped = dedup_for_prompt(&hits);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].exemplar.id, "a");
    }

    #[test]
    fn test_near_duplicates_keep_shorter() {
        let long = "SELECT user_id, SUM(amount) AS total FROM ds.orders WHERE status = 'paid' GROUP BY user_id ORDER BY total DESC LIMIT 100";
        let short = "SELECT user_id, SUM(amount) AS total FROM ds.orders WHERE status = 'paid' GROUP BY user_id ORDER BY total DESC";
        let hits = vec![hit("long", long, 0.9), hit("short", short, 0.8)];

        let deduped = dedup_for_prompt(&hits);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].exemplar.id, "short");
    }

    #[test]
    fn test_distinct_sql_survives() {
        let hits = vec![
            hit("a", "SELECT id FROM ds.users", 0.9),
            hit("b", "SELECT amount FROM ds.orders", 0.8),
        ];
        assert_eq!(dedup_for_prompt(&hits).len(), 2);
    }

    #[test]
    fn test_jaccard_bounds() {
        let a = token_ngrams("SELECT a b c d e f", 5);
        let b = token_ngrams("SELECT a b c d e f", 5);
        assert!((jaccard(&a, &b) - 1.0).abs() < f64::EPSILON);

        let c = token_ngrams("totally different words here now ok", 5);
        assert!(jaccard(&a, &c) < 0.1);
    }
}
