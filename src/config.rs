use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CoreError, CoreResult};

/// Provider selection. Selects both the embedder and the store pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Local,
    Azure,
}

impl Provider {
    fn parse(raw: &str) -> CoreResult<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "local" => Ok(Provider::Local),
            "azure" => Ok(Provider::Azure),
            other => Err(CoreError::Configuration(format!(
                "unknown provider '{other}', expected 'local' or 'azure'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureConfig {
    pub embedding_endpoint: String,
    pub embedding_key: String,
    pub search_endpoint: String,
    pub search_key: String,
    pub search_index: String,
}

/// Resolved, immutable configuration snapshot. Built once at startup via
/// [`AppConfig::from_env`]; nothing after construction re-reads the
/// environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub source_path: PathBuf,
    pub provider: Provider,
    pub index_name: String,
    pub database_path: PathBuf,
    pub model_path: Option<PathBuf>,
    pub exclude_patterns: Vec<String>,
    pub build_index: bool,
    pub watch: bool,
    pub watcher_debounce_ms: u64,
    pub log_dir: Option<PathBuf>,
    pub azure: Option<AzureConfig>,
}

impl AppConfig {
    /// Reads every documented `MEMEX_*` environment variable and resolves
    /// defaults. Fails only when a value required for the selected provider
    /// is missing (`source_path` always; the Azure fields when
    /// `provider = azure`).
    pub fn from_env() -> CoreResult<Self> {
        let source_path = std::env::var("MEMEX_SOURCE_PATH")
            .map_err(|_| CoreError::Configuration("MEMEX_SOURCE_PATH is required".to_string()))?;
        let source_path = PathBuf::from(source_path);

        let provider = std::env::var("MEMEX_PROVIDER")
            .ok()
            .map(|v| Provider::parse(&v))
            .transpose()?
            .unwrap_or(Provider::Local);

        let index_name =
            std::env::var("MEMEX_INDEX_NAME").unwrap_or_else(|_| "memory-exchange".to_string());

        let database_path = std::env::var("MEMEX_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| source_path.join("memory_exchange.db"));

        let model_path = std::env::var("MEMEX_MODEL_PATH").ok().map(PathBuf::from);

        let exclude_patterns = std::env::var("MEMEX_EXCLUDE_PATTERNS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let build_index = parse_bool_env("MEMEX_BUILD_INDEX", false);
        let watch = parse_bool_env("MEMEX_WATCH", false);

        let watcher_debounce_ms = std::env::var("MEMEX_WATCHER_DEBOUNCE_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2000);

        let log_dir = std::env::var("MEMEX_LOG_DIR").ok().map(PathBuf::from);

        let azure = if provider == Provider::Azure {
            Some(AzureConfig {
                embedding_endpoint: require_env("MEMEX_AZURE_EMBEDDING_ENDPOINT")?,
                embedding_key: require_env("MEMEX_AZURE_EMBEDDING_KEY")?,
                search_endpoint: require_env("MEMEX_AZURE_SEARCH_ENDPOINT")?,
                search_key: require_env("MEMEX_AZURE_SEARCH_KEY")?,
                search_index: require_env("MEMEX_AZURE_SEARCH_INDEX")?,
            })
        } else {
            None
        };

        Ok(Self {
            source_path,
            provider,
            index_name,
            database_path,
            model_path,
            exclude_patterns,
            build_index,
            watch,
            watcher_debounce_ms,
            log_dir,
            azure,
        })
    }
}

fn require_env(key: &str) -> CoreResult<String> {
    std::env::var(key).map_err(|_| CoreError::Configuration(format!("{key} is required")))
}

fn parse_bool_env(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    // std::env is process-global; serialize every test that touches
    // MEMEX_* vars so they don't stomp on each other under parallel runs.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const MEMEX_VARS: &[&str] = &[
        "MEMEX_SOURCE_PATH",
        "MEMEX_PROVIDER",
        "MEMEX_INDEX_NAME",
        "MEMEX_DATABASE_PATH",
        "MEMEX_MODEL_PATH",
        "MEMEX_EXCLUDE_PATTERNS",
        "MEMEX_BUILD_INDEX",
        "MEMEX_WATCH",
        "MEMEX_WATCHER_DEBOUNCE_MS",
        "MEMEX_LOG_DIR",
        "MEMEX_AZURE_EMBEDDING_ENDPOINT",
        "MEMEX_AZURE_EMBEDDING_KEY",
        "MEMEX_AZURE_SEARCH_ENDPOINT",
        "MEMEX_AZURE_SEARCH_KEY",
        "MEMEX_AZURE_SEARCH_INDEX",
    ];

    fn clear_memex_vars() {
        for key in MEMEX_VARS {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn from_env_succeeds_with_only_source_path_set() {
        let _guard = ENV_LOCK.lock();
        clear_memex_vars();
        unsafe { std::env::set_var("MEMEX_SOURCE_PATH", "/tmp/memex-test-source") };

        let config = AppConfig::from_env().unwrap();

        assert_eq!(config.provider, Provider::Local);
        assert_eq!(config.index_name, "memory-exchange");
        assert_eq!(
            config.database_path,
            PathBuf::from("/tmp/memex-test-source/memory_exchange.db")
        );
        assert!(!config.build_index);
        assert!(!config.watch);
        assert_eq!(config.watcher_debounce_ms, 2000);
        assert!(config.azure.is_none());

        clear_memex_vars();
    }

    #[test]
    fn from_env_fails_when_azure_provider_missing_azure_fields() {
        let _guard = ENV_LOCK.lock();
        clear_memex_vars();
        unsafe {
            std::env::set_var("MEMEX_SOURCE_PATH", "/tmp/memex-test-source");
            std::env::set_var("MEMEX_PROVIDER", "azure");
        }

        let result = AppConfig::from_env();

        assert!(matches!(result, Err(CoreError::Configuration(_))));

        clear_memex_vars();
    }
}
