use std::path::Path;
use tracing::{debug, info, warn};

use crate::chunker::chunk_markdown;
use crate::embedding::Embedder;
use crate::error::CoreResult;
use crate::routing::RoutingMap;
use crate::scanner::{save_state, scan};
use crate::store::WriteIndex;

const MANAGEMENT_FILE_NAME: &str = "MemoryExchangeManagement.md";

/// Orchestrates one indexing pass: ensure index, scan, delete removed,
/// chunk changed, embed, upsert, persist state. State advances only on full
/// success — an error at any step leaves the previous state file untouched,
/// so the next run sees the same dirty set.
pub fn run(
    write_index: &dyn WriteIndex,
    embedder: &dyn Embedder,
    source_root: &Path,
    force_full: bool,
    index_name: &str,
    exclude_patterns: &[String],
) -> CoreResult<()> {
    write_index.ensure_index()?;

    let scan_result = scan(source_root, force_full, index_name, exclude_patterns)?;

    if scan_result.changed.is_empty() && scan_result.deleted.is_empty() {
        info!("indexing pass: no changes detected, skipping");
        return Ok(());
    }

    info!(
        changed = scan_result.changed.len(),
        deleted = scan_result.deleted.len(),
        "indexing pass starting"
    );

    warn_if_routing_map_empty(source_root);

    for path in &scan_result.deleted {
        debug!(file = %path, "deleting chunks for removed file");
        write_index.delete_chunks_for_file(path)?;
    }

    let mut buffered = Vec::new();
    for path in &scan_result.changed {
        let full_path = source_root.join(path);
        let text = match std::fs::read_to_string(&full_path) {
            Ok(text) => text,
            Err(e) => {
                warn!(file = %path, error = %e, "failed to read file, skipping");
                continue;
            }
        };

        let domain = RoutingMap::domain_from_source_path(path);
        let chunks = chunk_markdown(&text, path, &domain);

        write_index.delete_chunks_for_file(path)?;
        buffered.extend(chunks);
    }

    if !buffered.is_empty() {
        let texts: Vec<String> = buffered.iter().map(|c| c.content.clone()).collect();
        let embeddings = embedder.embed_batch(&texts)?;
        for (chunk, embedding) in buffered.iter_mut().zip(embeddings.into_iter()) {
            chunk.embedding = Some(embedding);
        }
        write_index.upsert_chunks(&buffered)?;
    }

    save_state(source_root, &scan_result.new_state)?;

    info!(chunks = buffered.len(), "indexing pass complete");
    Ok(())
}

/// Domain assignment during indexing only needs `domain_from_source_path`,
/// not the routing map itself — but a present-and-empty management file
/// usually means a typo'd yaml fence, so warn about it here too.
fn warn_if_routing_map_empty(source_root: &Path) {
    let path = source_root.join(MANAGEMENT_FILE_NAME);
    if let Ok(text) = std::fs::read_to_string(&path) {
        if RoutingMap::parse(&text).is_empty() {
            warn!("management file present but no routing entries found");
        }
    }
}
