use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use super::{ReadIndex, SearchHit, WriteIndex};
use crate::chunker::Chunk;
use crate::error::{CoreError, CoreResult};

const RRF_K: f64 = 60.0;
const FTS_RESERVED: &[char] = &['"', '*', '(', ')', ':', '^', '{', '}', '~'];

/// Concrete embedded SQL + FTS5 + blob-stored vectors implementation of both
/// the write index and the read index roles. A single SQLite database in
/// WAL mode, accessed through a pooled connection manager so readers never
/// block behind the one writer.
pub struct LocalIndex {
    pool: Pool<SqliteConnectionManager>,
}

impl LocalIndex {
    pub fn open(path: &Path) -> CoreResult<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            Ok(())
        });
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(CoreError::Pool)?;
        let index = Self { pool };
        index.ensure_index()?;
        Ok(index)
    }

    fn conn(&self) -> CoreResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(CoreError::Pool)
    }
}

impl WriteIndex for LocalIndex {
    fn ensure_index(&self) -> CoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                source_file TEXT NOT NULL,
                heading_path TEXT NOT NULL,
                domain TEXT NOT NULL,
                tags TEXT NOT NULL,
                related_files TEXT NOT NULL,
                is_instruction INTEGER NOT NULL,
                embedding BLOB,
                last_updated TEXT NOT NULL,
                chunk_index INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_source_file ON chunks(source_file);

            CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                content, heading_path, domain, tags,
                content='chunks', content_rowid='rowid'
            );

            CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
                INSERT INTO chunks_fts(rowid, content, heading_path, domain, tags)
                VALUES (new.rowid, new.content, new.heading_path, new.domain, new.tags);
            END;
            CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, content, heading_path, domain, tags)
                VALUES('delete', old.rowid, old.content, old.heading_path, old.domain, old.tags);
            END;
            CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, content, heading_path, domain, tags)
                VALUES('delete', old.rowid, old.content, old.heading_path, old.domain, old.tags);
                INSERT INTO chunks_fts(rowid, content, heading_path, domain, tags)
                VALUES (new.rowid, new.content, new.heading_path, new.domain, new.tags);
            END;
            "#,
        )?;
        Ok(())
    }

    fn upsert_chunks(&self, chunks: &[Chunk]) -> CoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO chunks
                 (id, content, source_file, heading_path, domain, tags, related_files,
                  is_instruction, embedding, last_updated, chunk_index)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for chunk in chunks {
                let tags_json = serde_json::to_string(&chunk.tags)?;
                let related_json = serde_json::to_string(&chunk.related_files)?;
                let embedding_blob = chunk.embedding.as_ref().map(|v| embedding_to_bytes(v));
                stmt.execute(params![
                    chunk.id,
                    chunk.content,
                    chunk.source_file,
                    chunk.heading_path,
                    chunk.domain,
                    tags_json,
                    related_json,
                    chunk.is_instruction as i64,
                    embedding_blob,
                    chunk.last_updated.to_rfc3339(),
                    chunk.chunk_index,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_chunks_for_file(&self, source_file: &str) -> CoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM chunks WHERE source_file = ?1",
            params![source_file],
        )?;
        Ok(())
    }
}

impl ReadIndex for LocalIndex {
    fn search(&self, query: &str, q_vec: &[f32], top_k: usize) -> CoreResult<Vec<SearchHit>> {
        let fetch_n = (top_k * 3).max(top_k);
        let bm25_ids = self.bm25_pass(query, fetch_n)?;
        let vector_ids = self.vector_pass(q_vec, fetch_n)?;

        let mut scores: HashMap<String, f64> = HashMap::new();
        for (rank, id) in bm25_ids.iter().enumerate() {
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (RRF_K + rank as f64);
        }
        for (rank, id) in vector_ids.iter().enumerate() {
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (RRF_K + rank as f64);
        }

        let conn = self.conn()?;
        let mut hits = Vec::with_capacity(scores.len());
        for (id, score) in scores {
            if let Some(chunk) = load_chunk(&conn, &id)? {
                hits.push(SearchHit { chunk, score });
            }
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        Ok(hits)
    }

    fn get_chunk_count(&self) -> usize {
        self.conn()
            .ok()
            .and_then(|conn| {
                conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get::<_, i64>(0))
                    .ok()
            })
            .map(|n| n as usize)
            .unwrap_or(0)
    }

    fn get_source_file_count(&self) -> usize {
        self.conn()
            .ok()
            .and_then(|conn| {
                conn.query_row(
                    "SELECT COUNT(DISTINCT source_file) FROM chunks",
                    [],
                    |row| row.get::<_, i64>(0),
                )
                .ok()
            })
            .map(|n| n as usize)
            .unwrap_or(0)
    }

    fn get_last_indexed_time(&self) -> Option<DateTime<Utc>> {
        self.conn()
            .ok()
            .and_then(|conn| {
                conn.query_row(
                    "SELECT MAX(last_updated) FROM chunks",
                    [],
                    |row| row.get::<_, Option<String>>(0),
                )
                .ok()
                .flatten()
            })
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl LocalIndex {
    /// Sanitizes the query, runs it against the FTS5 index ordered by BM25
    /// ascending (best first), and falls back to a `LIKE` scan on FTS syntax
    /// errors. Returns ids in ranked order; RRF merge derives rank from
    /// position.
    fn bm25_pass(&self, query: &str, limit: usize) -> CoreResult<Vec<String>> {
        let tokens: Vec<String> = query
            .chars()
            .filter(|c| !FTS_RESERVED.contains(c))
            .collect::<String>()
            .split_whitespace()
            .map(|s| s.to_string())
            .collect();

        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let fts_query = tokens
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR ");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT chunks.id FROM chunks_fts
             JOIN chunks ON chunks.rowid = chunks_fts.rowid
             WHERE chunks_fts MATCH ?1
             ORDER BY bm25(chunks_fts) ASC
             LIMIT ?2",
        )?;
        // Drive the rows to completion here: a MATCH syntax error is raised
        // by sqlite3_step, not by query_map's prepare/bind, so it only
        // surfaces once the iterator is walked.
        let result: rusqlite::Result<Vec<String>> = stmt
            .query_map(params![fts_query, limit as i64], |row| row.get::<_, String>(0))?
            .collect();

        match result {
            Ok(ids) => Ok(ids),
            Err(_) => {
                // FTS syntax error: fall back to a LIKE scan, never surfaced to the caller.
                let like_query = format!("%{query}%");
                let mut stmt = conn.prepare(
                    "SELECT id FROM chunks WHERE content LIKE ?1 ORDER BY last_updated DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![like_query, limit as i64], |row| {
                    row.get::<_, String>(0)
                })?;
                let mut ids = Vec::new();
                for row in rows {
                    ids.push(row?);
                }
                Ok(ids)
            }
        }
    }

    /// Loads every embedded row, scores by cosine similarity against
    /// `q_vec`, and returns ids sorted best-first, truncated to `limit`.
    fn vector_pass(&self, q_vec: &[f32], limit: usize) -> CoreResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, embedding FROM chunks WHERE embedding IS NOT NULL")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            Ok((id, blob))
        })?;

        let mut scored: Vec<(String, f32)> = Vec::new();
        for row in rows {
            let (id, blob) = row?;
            let vec = embedding_from_bytes(&blob);
            let score = cosine_similarity(q_vec, &vec);
            scored.push((id, score));
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(id, _)| id).collect())
    }
}

fn load_chunk(conn: &rusqlite::Connection, id: &str) -> CoreResult<Option<Chunk>> {
    let result = conn.query_row(
        "SELECT id, content, source_file, heading_path, domain, tags, related_files,
                is_instruction, embedding, last_updated, chunk_index
         FROM chunks WHERE id = ?1",
        params![id],
        |row| {
            let tags_json: String = row.get(5)?;
            let related_json: String = row.get(6)?;
            let is_instruction: i64 = row.get(7)?;
            let embedding_blob: Option<Vec<u8>> = row.get(8)?;
            let last_updated: String = row.get(9)?;

            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                tags_json,
                related_json,
                is_instruction,
                embedding_blob,
                last_updated,
                row.get::<_, i64>(10)?,
            ))
        },
    );

    let row = match result {
        Ok(r) => r,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(CoreError::Sqlite(e)),
    };

    let (id, content, source_file, heading_path, domain, tags_json, related_json, is_instruction, embedding_blob, last_updated, chunk_index) =
        row;

    let tags: BTreeSet<String> = serde_json::from_str(&tags_json).unwrap_or_default();
    let related_files: BTreeSet<String> = serde_json::from_str(&related_json).unwrap_or_default();
    let embedding = embedding_blob.map(|b| embedding_from_bytes(&b));
    let last_updated = DateTime::parse_from_rfc3339(&last_updated)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(Some(Chunk {
        id,
        content,
        source_file,
        heading_path,
        domain,
        tags,
        related_files,
        is_instruction: is_instruction != 0,
        embedding,
        last_updated,
        chunk_index: chunk_index as u32,
    }))
}

fn embedding_to_bytes(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let mut dot = 0f32;
    let mut norm_a = 0f32;
    let mut norm_b = 0f32;
    for i in 0..n {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn temp_db() -> (LocalIndex, std::path::PathBuf) {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "memex-store-test-{}-{}.db",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let index = LocalIndex::open(&path).unwrap();
        (index, path)
    }

    fn sample_chunk(id: &str, source_file: &str, content: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            content: content.to_string(),
            source_file: source_file.to_string(),
            heading_path: String::new(),
            domain: "root".to_string(),
            tags: BTreeSet::new(),
            related_files: BTreeSet::new(),
            is_instruction: false,
            embedding: Some(vec![1.0, 0.0, 0.0]),
            last_updated: Utc::now(),
            chunk_index: 0,
        }
    }

    #[test]
    fn embedding_blob_round_trips_little_endian() {
        let vec = vec![1.0f32, -2.5, 3.25];
        let bytes = embedding_to_bytes(&vec);
        assert_eq!(bytes.len(), 12);
        let back = embedding_from_bytes(&bytes);
        assert_eq!(vec, back);
    }

    #[test]
    fn upsert_then_delete_round_trips_row_count() {
        let (index, path) = temp_db();
        let chunk = sample_chunk("id1", "a.md", "hello world this is a test of the store");
        index.upsert_chunks(&[chunk]).unwrap();
        assert_eq!(index.get_chunk_count(), 1);
        index.delete_chunks_for_file("a.md").unwrap();
        assert_eq!(index.get_chunk_count(), 0);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn search_falls_back_gracefully_on_empty_query_tokens() {
        let (index, path) = temp_db();
        let hits = index.search("***", &[1.0, 0.0, 0.0], 5).unwrap();
        assert!(hits.is_empty());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn vector_pass_prefers_closer_embedding() {
        let (index, path) = temp_db();
        let mut a = sample_chunk("a", "a.md", "some text content that is definitely long enough");
        a.embedding = Some(vec![1.0, 0.0, 0.0]);
        let mut b = sample_chunk("b", "b.md", "other text content that is also long enough here");
        b.embedding = Some(vec![0.0, 1.0, 0.0]);
        index.upsert_chunks(&[a, b]).unwrap();

        let hits = index.search("nomatch_xyz", &[1.0, 0.0, 0.0], 5).unwrap();
        assert_eq!(hits[0].chunk.id, "a");
        let _ = std::fs::remove_file(&path);
    }
}
