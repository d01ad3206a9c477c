use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::config::AppConfig;
use crate::error::{CoreError, CoreResult, ErrorResponse};
use crate::search::{clamp_top_k, SearchOrchestrator};
use crate::status;
use crate::store::ReadIndex;

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    Search {
        query: String,
        #[serde(rename = "currentFilePath")]
        current_file_path: Option<String>,
        #[serde(rename = "topK")]
        top_k: Option<i64>,
    },
    GetFile {
        #[serde(rename = "filePath")]
        file_path: String,
    },
    Status,
}

#[derive(Serialize)]
struct OkResponse {
    result: String,
}

/// Resolves `file_path` against `source_root`, rejecting any path that
/// escapes it (directory-traversal guard). Returns file contents, or an
/// error — never panics, never reads outside the root.
pub fn get_file(source_root: &Path, file_path: &str) -> CoreResult<String> {
    let normalized = file_path.replace('\\', "/");
    let full_path = source_root.join(&normalized);

    let canonical_root = dunce::canonicalize(source_root)
        .map_err(|_| CoreError::Configuration("source root does not exist".to_string()))?;

    let canonical_target = dunce::canonicalize(&full_path)
        .map_err(|_| CoreError::FileNotFound(file_path.to_string()))?;

    if !canonical_target.starts_with(&canonical_root) {
        return Err(CoreError::PathNotAllowed(file_path.to_string()));
    }

    std::fs::read_to_string(&canonical_target).map_err(CoreError::Io)
}

/// Line-delimited JSON-RPC loop over stdio. A thin dispatcher: no business
/// logic beyond deserialization, dispatch, and serialization. Malformed
/// input lines produce an error response and do not crash the loop.
pub async fn run(
    config: &AppConfig,
    read_index: &dyn ReadIndex,
    orchestrator: &SearchOrchestrator<'_>,
) -> CoreResult<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(request, config, read_index, orchestrator),
            Err(e) => Err(CoreError::Parse(format!("malformed request: {e}"))),
        };

        let payload = match response {
            Ok(result) => serde_json::to_string(&OkResponse { result })?,
            Err(e) => serde_json::to_string(&ErrorResponse::from(&e))?,
        };

        stdout.write_all(payload.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    Ok(())
}

fn dispatch(
    request: Request,
    config: &AppConfig,
    read_index: &dyn ReadIndex,
    orchestrator: &SearchOrchestrator<'_>,
) -> CoreResult<String> {
    match request {
        Request::Search {
            query,
            current_file_path,
            top_k,
        } => {
            let top_k = clamp_top_k(top_k);
            orchestrator.search(&query, current_file_path.as_deref(), top_k)
        }
        Request::GetFile { file_path } => get_file(&config.source_path, &file_path),
        Request::Status => Ok(status::status(config, read_index)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn get_file_rejects_traversal() {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "memex-rpc-test-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.md"), "hello").unwrap();

        let err = get_file(&dir, "../secrets").unwrap_err();
        assert!(matches!(err, CoreError::FileNotFound(_) | CoreError::PathNotAllowed(_)));

        let content = get_file(&dir, "a.md").unwrap();
        assert_eq!(content, "hello");

        let _ = fs::remove_dir_all(&dir);
    }
}
