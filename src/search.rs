//! Hybrid retrieval: lexical and vector channels fused by weighted sum.
//!
//! Both channels run concurrently, each returning its own candidate set
//! with channel-native scores. Scores are min-max normalized per channel,
//! then fused as `alpha * vector + (1 - alpha) * lexical`. Candidates are
//! validated against the metadata store before ranking: a hit whose
//! version tag no longer matches the chunk's current version is stale
//! index residue and is dropped. When the vector channel is unavailable
//! (provider disabled or erroring) retrieval degrades to lexical-only and
//! says so in the result.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::models::Document;
use crate::stores::{IndexFilter, MetadataStore, SearchHit, SearchIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Lexical,
    Semantic,
    Hybrid,
}

impl SearchMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lexical" => Some(SearchMode::Lexical),
            "semantic" => Some(SearchMode::Semantic),
            "hybrid" => Some(SearchMode::Hybrid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub document_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct RankedHit {
    pub id: String,
    pub document_id: String,
    pub document_title: Option<String>,
    pub score: f64,
    pub snippet: String,
}

#[derive(Debug)]
pub struct QueryResult {
    pub hits: Vec<RankedHit>,
    /// True when the vector channel was skipped or failed and only lexical
    /// scores contributed.
    pub degraded: bool,
}

pub struct SearchEngine {
    index: Arc<dyn SearchIndex>,
    metadata: Arc<dyn MetadataStore>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl SearchEngine {
    pub fn new(
        index: Arc<dyn SearchIndex>,
        metadata: Arc<dyn MetadataStore>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            index,
            metadata,
            embedder,
            config,
        }
    }

    pub async fn run_query(
        &self,
        query: &str,
        mode: SearchMode,
        options: &QueryOptions,
    ) -> Result<QueryResult> {
        if query.trim().is_empty() {
            return Ok(QueryResult {
                hits: Vec::new(),
                degraded: false,
            });
        }

        let filter = IndexFilter {
            document_id: options.document_id.clone(),
        };
        let want_vector = mode != SearchMode::Lexical && self.embedder.is_enabled();
        let mut degraded = mode != SearchMode::Lexical && !want_vector;

        // Embed the query first so both index reads can run concurrently.
        let query_vector = if want_vector {
            match self.embed_query(query).await {
                Some(v) => Some(v),
                None => {
                    degraded = true;
                    None
                }
            }
        } else {
            None
        };

        let lexical_fut = async {
            if mode == SearchMode::Semantic && query_vector.is_some() {
                Ok(Vec::new())
            } else {
                self.index
                    .query_lexical(query, &filter, self.config.candidate_k_lexical)
                    .await
            }
        };
        let vector_fut = async {
            match &query_vector {
                Some(v) => {
                    self.index
                        .query_vector(v, &filter, self.config.candidate_k_vector)
                        .await
                }
                None => Ok(Vec::new()),
            }
        };
        let (lexical, vector) = tokio::join!(lexical_fut, vector_fut);

        let lexical = lexical?;
        let vector = match vector {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "vector channel failed, degrading to lexical-only");
                degraded = true;
                Vec::new()
            }
        };

        let alpha = match mode {
            SearchMode::Lexical => 0.0,
            SearchMode::Semantic => 1.0,
            SearchMode::Hybrid => self.config.hybrid_alpha,
        };
        let alpha = if vector.is_empty() && degraded { 0.0 } else { alpha };

        let fused = fuse_channels(&lexical, &vector, alpha);
        let validated = self.validate_hits(fused).await?;

        let limit = options.limit.unwrap_or(self.config.final_limit);
        let hits = rank(validated, limit as usize);

        Ok(QueryResult { hits, degraded })
    }

    async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        let texts = [query.to_string()];
        match self.embedder.embed(&texts).await {
            Ok(mut vectors) if !vectors.is_empty() => Some(vectors.remove(0)),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "query embedding failed");
                None
            }
        }
    }

    /// Drop hits that are index residue: superseded chunks, entries whose
    /// version tag lags the chunk's current version, or anything belonging
    /// to a deleted document. Keeps the chunk's current version number as
    /// the recency used for tie-breaking.
    async fn validate_hits(&self, fused: Vec<FusedHit>) -> Result<Vec<ValidatedHit>> {
        let mut documents: HashMap<String, Option<Document>> = HashMap::new();
        let mut kept = Vec::with_capacity(fused.len());

        for hit in fused {
            let document = match documents.get(&hit.document_id) {
                Some(cached) => cached.clone(),
                None => {
                    let loaded = self.metadata.get_document(&hit.document_id).await?;
                    documents.insert(hit.document_id.clone(), loaded.clone());
                    loaded
                }
            };
            let Some(document) = document else { continue };
            if document.deleted {
                continue;
            }

            let version_number = match self.metadata.get_chunk(&hit.id).await? {
                Some(chunk) => {
                    if chunk.superseded || chunk.current_version_id != hit.version_id {
                        continue;
                    }
                    match self.metadata.get_chunk_version(&chunk.current_version_id).await? {
                        Some(version) => version.version_number,
                        None => continue,
                    }
                }
                // Image-association entries tag themselves with their own
                // id; document liveness is the only check they need.
                None => {
                    if hit.version_id != hit.id {
                        continue;
                    }
                    0
                }
            };

            kept.push(ValidatedHit {
                hit,
                version_number,
                document_title: document.title,
            });
        }
        Ok(kept)
    }
}

// ============ Fusion ============

#[derive(Debug, Clone)]
struct FusedHit {
    id: String,
    document_id: String,
    version_id: String,
    score: f64,
    snippet: String,
}

/// A fused hit that survived validation, with the recency and title used
/// for final ranking.
#[derive(Debug)]
struct ValidatedHit {
    hit: FusedHit,
    /// Current version number of the chunk; 0 for image associations.
    version_number: i64,
    document_title: Option<String>,
}

/// Min-max normalize scores to [0, 1] within one channel.
fn normalize_scores(hits: &[SearchHit]) -> HashMap<String, f64> {
    if hits.is_empty() {
        return HashMap::new();
    }
    let s_min = hits.iter().map(|h| h.score).fold(f64::INFINITY, f64::min);
    let s_max = hits
        .iter()
        .map(|h| h.score)
        .fold(f64::NEG_INFINITY, f64::max);

    hits.iter()
        .map(|h| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (h.score - s_min) / (s_max - s_min)
            };
            (h.id.clone(), norm)
        })
        .collect()
}

fn fuse_channels(lexical: &[SearchHit], vector: &[SearchHit], alpha: f64) -> Vec<FusedHit> {
    let lex_norm = normalize_scores(lexical);
    let vec_norm = normalize_scores(vector);

    let mut candidates: HashMap<&str, &SearchHit> = HashMap::new();
    for hit in lexical {
        candidates.entry(hit.id.as_str()).or_insert(hit);
    }
    for hit in vector {
        candidates.entry(hit.id.as_str()).or_insert(hit);
    }

    candidates
        .values()
        .map(|hit| {
            let l = lex_norm.get(&hit.id).copied().unwrap_or(0.0);
            let v = vec_norm.get(&hit.id).copied().unwrap_or(0.0);
            // Prefer the lexical snippet when both channels returned one;
            // the vector channel carries no highlighting.
            let snippet = lexical
                .iter()
                .find(|h| h.id == hit.id)
                .map(|h| h.snippet.clone())
                .unwrap_or_else(|| hit.snippet.clone());
            FusedHit {
                id: hit.id.clone(),
                document_id: hit.document_id.clone(),
                version_id: hit.version_id.clone(),
                score: alpha * v + (1.0 - alpha) * l,
                snippet,
            }
        })
        .collect()
}

fn rank(mut validated: Vec<ValidatedHit>, limit: usize) -> Vec<RankedHit> {
    // score desc, chunk version recency desc, id asc (deterministic)
    validated.sort_by(|a, b| {
        b.hit
            .score
            .partial_cmp(&a.hit.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.version_number.cmp(&a.version_number))
            .then(a.hit.id.cmp(&b.hit.id))
    });
    validated.truncate(limit);

    validated
        .into_iter()
        .map(|v| RankedHit {
            id: v.hit.id,
            document_id: v.hit.document_id,
            document_title: v.document_title,
            score: v.hit.score,
            snippet: v.hit.snippet,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f64) -> SearchHit {
        SearchHit {
            id: id.to_string(),
            document_id: "d1".to_string(),
            version_id: format!("{}-v", id),
            score,
            snippet: format!("snippet {}", id),
        }
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_range() {
        let hits = vec![hit("a", 10.0), hit("b", 5.0), hit("c", 0.0)];
        let norm = normalize_scores(&hits);
        assert!((norm["a"] - 1.0).abs() < 1e-9);
        assert!((norm["b"] - 0.5).abs() < 1e-9);
        assert!((norm["c"] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal() {
        let hits = vec![hit("a", 3.0), hit("b", 3.0)];
        let norm = normalize_scores(&hits);
        assert!((norm["a"] - 1.0).abs() < 1e-9);
        assert!((norm["b"] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_alpha_zero_is_pure_lexical() {
        let lexical = vec![hit("a", 10.0), hit("b", 1.0)];
        let vector = vec![hit("b", 0.99), hit("a", 0.01)];
        let fused = fuse_channels(&lexical, &vector, 0.0);
        let a = fused.iter().find(|h| h.id == "a").unwrap();
        let b = fused.iter().find(|h| h.id == "b").unwrap();
        assert!(a.score > b.score);
    }

    #[test]
    fn test_alpha_one_is_pure_vector() {
        let lexical = vec![hit("a", 10.0), hit("b", 1.0)];
        let vector = vec![hit("b", 0.99), hit("a", 0.01)];
        let fused = fuse_channels(&lexical, &vector, 1.0);
        let a = fused.iter().find(|h| h.id == "a").unwrap();
        let b = fused.iter().find(|h| h.id == "b").unwrap();
        assert!(b.score > a.score);
    }

    #[test]
    fn test_single_channel_candidate_gets_zero_from_other() {
        let lexical = vec![hit("a", 10.0), hit("b", 5.0)];
        let vector = vec![hit("c", 0.9)];
        let fused = fuse_channels(&lexical, &vector, 0.5);
        let c = fused.iter().find(|h| h.id == "c").unwrap();
        // c has no lexical score: 0.5 * 1.0 + 0.5 * 0.0
        assert!((c.score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_lexical_snippet_preferred() {
        let lexical = vec![SearchHit {
            snippet: ">>>match<<<".to_string(),
            ..hit("a", 10.0)
        }];
        let vector = vec![SearchHit {
            snippet: String::new(),
            ..hit("a", 0.9)
        }];
        let fused = fuse_channels(&lexical, &vector, 0.5);
        assert_eq!(fused[0].snippet, ">>>match<<<");
    }

    #[test]
    fn test_rank_tie_breaks_on_chunk_version_then_id() {
        let validated = |id: &str, version_number: i64| ValidatedHit {
            hit: FusedHit {
                id: id.to_string(),
                document_id: id.to_string(),
                version_id: String::new(),
                score: 1.0,
                snippet: String::new(),
            },
            version_number,
            document_title: None,
        };

        // Higher chunk version number wins the tie.
        let ranked = rank(vec![validated("old", 1), validated("new", 5)], 10);
        assert_eq!(ranked[0].id, "new");

        // Equal versions fall back to id order.
        let ranked = rank(vec![validated("b", 1), validated("a", 1)], 10);
        assert_eq!(ranked[0].id, "a");
    }
}
