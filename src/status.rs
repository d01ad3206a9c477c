use crate::config::{AppConfig, Provider};
use crate::store::ReadIndex;

/// Human-readable report of source root, provider name, index name, chunk
/// count, distinct source-file count, last indexed time, and remediation
/// hints if empty.
pub fn status(config: &AppConfig, read_index: &dyn ReadIndex) -> String {
    let provider_name = match config.provider {
        Provider::Local => "local",
        Provider::Azure => "azure",
    };

    let chunk_count = read_index.get_chunk_count();
    let source_file_count = read_index.get_source_file_count();
    let last_indexed = read_index
        .get_last_indexed_time()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());

    let mut out = format!(
        "Source root: {}\nProvider: {}\nIndex name: {}\nChunks: {}\nSource files: {}\nLast indexed: {}\n",
        config.source_path.display(),
        provider_name,
        config.index_name,
        chunk_count,
        source_file_count,
        last_indexed,
    );

    if chunk_count == 0 {
        out.push_str(
            "\nNo chunks indexed yet. Set MEMEX_BUILD_INDEX=true or MEMEX_WATCH=true and restart.\n",
        );
    }

    out
}
