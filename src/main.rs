use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

mod chunker;
mod config;
mod embedding;
mod error;
mod pipeline;
mod routing;
mod rpc;
mod scanner;
mod search;
mod status;
mod store;
mod watcher;

use config::Provider;
use embedding::EmbedderHandle;
use routing::RoutingMap;
use search::SearchOrchestrator;
use store::StoreHandle;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::AppConfig::from_env()?;

    let log_dir = config.log_dir.clone().unwrap_or_else(|| {
        dirs::data_local_dir()
            .map(|d| d.join("memory-exchange").join("logs"))
            .unwrap_or_else(|| std::path::PathBuf::from(".memory-exchange/logs"))
    });
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, "memory-exchange.log");
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "memory_exchange=info".into());

    // stdout is reserved for the RPC protocol; interactive logs go to
    // stderr, the file layer carries the same events for diagnostics.
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(non_blocking_writer)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_default();
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        error!(location = %location, payload = %payload, "PANIC: thread panicked");
        default_panic(info);
    }));

    info!(
        source_path = %config.source_path.display(),
        provider = ?config.provider,
        index_name = %config.index_name,
        build_index = config.build_index,
        watch = config.watch,
        "memory-exchange starting"
    );

    let embedder: Arc<EmbedderHandle> = Arc::new(match config.provider {
        Provider::Local => EmbedderHandle::local(config.model_path.as_deref())?,
        Provider::Azure => EmbedderHandle::hosted(config.azure.as_ref().expect(
            "AppConfig::from_env guarantees azure config is present when provider is azure",
        )),
    });

    let store: Arc<StoreHandle> = Arc::new(match config.provider {
        Provider::Local => StoreHandle::local(&config.database_path)?,
        Provider::Azure => StoreHandle::hosted(config.azure.as_ref().expect(
            "AppConfig::from_env guarantees azure config is present when provider is azure",
        )),
    });
    let write_index: Arc<dyn store::WriteIndex> = store.clone();
    let read_index: Arc<dyn store::ReadIndex> = store.clone();

    if config.build_index {
        if let Err(e) = pipeline::run(
            write_index.as_ref(),
            embedder.as_ref(),
            &config.source_path,
            true,
            &config.index_name,
            &config.exclude_patterns,
        ) {
            error!(error = %e, "initial full index build failed");
        }
    }

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    let watcher_handle = if config.watch {
        let source_root = config.source_path.clone();
        let debounce_ms = config.watcher_debounce_ms;
        let watch_write_index: Arc<dyn store::WriteIndex> = write_index.clone();
        let watch_embedder: Arc<dyn embedding::Embedder> = embedder.clone();
        let index_name = config.index_name.clone();
        let exclude_patterns = config.exclude_patterns.clone();
        Some(tokio::spawn(async move {
            watcher::run(
                source_root,
                debounce_ms,
                watch_write_index,
                watch_embedder,
                index_name,
                exclude_patterns,
                stop_rx,
            )
            .await;
        }))
    } else {
        None
    };

    let routing_map = std::fs::read_to_string(config.source_path.join("MemoryExchangeManagement.md"))
        .ok()
        .map(|text| RoutingMap::parse(&text));
    let source_root_display = Some(config.source_path.display().to_string());

    let orchestrator = SearchOrchestrator::new(
        embedder.as_ref(),
        read_index.as_ref(),
        routing_map.as_ref(),
        source_root_display,
    );

    tokio::select! {
        result = rpc::run(&config, read_index.as_ref(), &orchestrator) => {
            if let Err(e) = result {
                error!(error = %e, "rpc loop ended with error");
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    let _ = stop_tx.send(true);
    if let Some(handle) = watcher_handle {
        let _ = handle.await;
    }

    info!("memory-exchange shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
