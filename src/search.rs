use crate::embedding::Embedder;
use crate::error::CoreResult;
use crate::routing::RoutingMap;
use crate::store::{ReadIndex, SearchHit};

const DOMAIN_BOOST: f64 = 1.3;
const INSTRUCTION_BOOST: f64 = 1.2;
const OVERFETCH: usize = 2;

const NO_RESULTS: &str = "No relevant entries found.";

pub struct SearchOrchestrator<'a> {
    embedder: &'a dyn Embedder,
    read_index: &'a dyn ReadIndex,
    routing_map: Option<&'a RoutingMap>,
    source_root_display: Option<String>,
}

impl<'a> SearchOrchestrator<'a> {
    pub fn new(
        embedder: &'a dyn Embedder,
        read_index: &'a dyn ReadIndex,
        routing_map: Option<&'a RoutingMap>,
        source_root_display: Option<String>,
    ) -> Self {
        Self {
            embedder,
            read_index,
            routing_map,
            source_root_display,
        }
    }

    /// `top_k` must already be clamped to `[1, 10]` by the caller.
    pub fn search(&self, query: &str, current_file_path: Option<&str>, top_k: usize) -> CoreResult<String> {
        let q_vec = self.embedder.embed_one(query)?;

        let relevant_domains: Vec<String> = match (current_file_path, self.routing_map) {
            (Some(path), Some(map)) => map.domains_for_code_path(path),
            _ => Vec::new(),
        };

        let raw = self
            .read_index
            .search(query, &q_vec, top_k * OVERFETCH)?;

        if raw.is_empty() {
            return Ok(NO_RESULTS.to_string());
        }

        let mut adjusted: Vec<(f64, SearchHit)> = raw
            .into_iter()
            .map(|hit| {
                let mut score = hit.score;
                if !relevant_domains.is_empty() {
                    let domain_matches = relevant_domains
                        .iter()
                        .any(|d| d.eq_ignore_ascii_case(&hit.chunk.domain));
                    if domain_matches {
                        score *= DOMAIN_BOOST;
                    }
                    if hit.chunk.is_instruction {
                        score *= INSTRUCTION_BOOST;
                    }
                }
                (score, hit)
            })
            .collect();

        adjusted.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
        adjusted.truncate(top_k);

        Ok(self.format_results(&adjusted))
    }

    fn format_results(&self, hits: &[(f64, SearchHit)]) -> String {
        let mut out = format!("Found {} relevant entries:\n\n", hits.len());
        for (_, hit) in hits {
            let source = match &self.source_root_display {
                Some(root) => format!("{root}/{}", hit.chunk.source_file),
                None => hit.chunk.source_file.clone(),
            };
            out.push_str(&format!("Source: {source}\n"));
            if !hit.chunk.heading_path.is_empty() {
                out.push_str(&format!("Section: {}\n", hit.chunk.heading_path));
            }
            out.push_str(&format!("Domain: {}\n", hit.chunk.domain));
            if !hit.chunk.tags.is_empty() {
                let tags: Vec<&String> = hit.chunk.tags.iter().take(10).collect();
                let tags_str = tags
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                out.push_str(&format!("Tags: {tags_str}\n"));
            }
            out.push('\n');
            out.push_str(&hit.chunk.content);
            out.push_str("\n\n");
        }
        out
    }
}

/// Clamps a caller-supplied `top_k` into `[1, 10]` with a default of 5.
pub fn clamp_top_k(top_k: Option<i64>) -> usize {
    match top_k {
        Some(k) => k.clamp(1, 10) as usize,
        None => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunk;
    use chrono::Utc;
    use std::collections::BTreeSet;

    #[test]
    fn clamp_defaults_to_five() {
        assert_eq!(clamp_top_k(None), 5);
    }

    #[test]
    fn clamp_bounds_to_one_and_ten() {
        assert_eq!(clamp_top_k(Some(0)), 1);
        assert_eq!(clamp_top_k(Some(100)), 10);
        assert_eq!(clamp_top_k(Some(3)), 3);
    }

    struct FixedEmbedder(Vec<f32>);

    impl Embedder for FixedEmbedder {
        fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }

        fn dimension(&self) -> usize {
            self.0.len()
        }
    }

    struct FakeReadIndex(Vec<SearchHit>);

    impl ReadIndex for FakeReadIndex {
        fn search(&self, _query: &str, _q_vec: &[f32], top_k: usize) -> CoreResult<Vec<SearchHit>> {
            Ok(self.0.iter().take(top_k).cloned().collect())
        }

        fn get_chunk_count(&self) -> usize {
            self.0.len()
        }

        fn get_source_file_count(&self) -> usize {
            1
        }

        fn get_last_indexed_time(&self) -> Option<chrono::DateTime<Utc>> {
            None
        }
    }

    fn sample_hit(domain: &str, is_instruction: bool, score: f64) -> SearchHit {
        let marker = if is_instruction { "instruction-chunk" } else { "plain-chunk" };
        SearchHit {
            chunk: Chunk {
                id: format!("{domain}-{marker}-id"),
                content: marker.to_string(),
                source_file: "notes.md".to_string(),
                heading_path: String::new(),
                domain: domain.to_string(),
                tags: BTreeSet::new(),
                related_files: BTreeSet::new(),
                is_instruction,
                embedding: None,
                last_updated: Utc::now(),
                chunk_index: 0,
            },
            score,
        }
    }

    #[test]
    fn no_boost_applied_when_relevant_domains_is_empty() {
        let embedder = FixedEmbedder(vec![0.1, 0.2]);
        let read_index = FakeReadIndex(vec![sample_hit("backend", true, 1.0)]);
        let orchestrator = SearchOrchestrator::new(&embedder, &read_index, None, None);

        let result = orchestrator.search("query", None, 5).unwrap();

        assert!(result.contains("Found 1 relevant entries"));
    }

    const MANAGEMENT_FILE: &str = "```yaml\n  backend: ['src/backend/']\n```\n";

    #[test]
    fn domain_boost_applies_when_domain_matches_relevant_domains() {
        let embedder = FixedEmbedder(vec![0.1, 0.2]);
        let read_index = FakeReadIndex(vec![
            sample_hit("backend", false, 1.0),
            sample_hit("frontend", false, 0.95),
        ]);
        let routing_map = RoutingMap::parse(MANAGEMENT_FILE);
        let orchestrator =
            SearchOrchestrator::new(&embedder, &read_index, Some(&routing_map), None);

        let result = orchestrator
            .search("query", Some("src/backend/mod.rs"), 5)
            .unwrap();

        let backend_pos = result.find("Domain: backend").unwrap();
        let frontend_pos = result.find("Domain: frontend").unwrap();
        assert!(backend_pos < frontend_pos, "boosted domain should sort first");
    }

    #[test]
    fn instruction_boost_compounds_with_domain_boost() {
        let embedder = FixedEmbedder(vec![0.1, 0.2]);
        let read_index = FakeReadIndex(vec![
            sample_hit("backend", true, 1.0),
            sample_hit("backend", false, 1.0),
        ]);
        let routing_map = RoutingMap::parse(MANAGEMENT_FILE);
        let orchestrator =
            SearchOrchestrator::new(&embedder, &read_index, Some(&routing_map), None);

        let relevant_domains = routing_map.domains_for_code_path("src/backend/mod.rs");
        assert_eq!(relevant_domains, vec!["backend".to_string()]);

        // Both hits share a domain and starting score; only the instruction
        // hit should pick up the extra 1.2x on top of the 1.3x domain boost,
        // so it must sort first.
        let result = orchestrator
            .search("query", Some("src/backend/mod.rs"), 5)
            .unwrap();
        let instruction_pos = result.find("instruction-chunk").unwrap();
        let plain_pos = result.find("plain-chunk").unwrap();
        assert!(instruction_pos < plain_pos, "compounded boost should sort first");
    }
}
