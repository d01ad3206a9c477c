use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::embedding::Embedder;
use crate::pipeline;
use crate::store::WriteIndex;

/// Runs one indexing pass on startup (`force=false`), then observes
/// filesystem events under `source_root` restricted to `*.md` files,
/// recursively, coalescing bursts via a debounce window before each
/// subsequent re-index. Models `Idle -> Dirty -> Rebuilding -> Idle` as a
/// single-slot channel: `try_send` on a capacity-1 channel collapses
/// redundant signals, and `recv` with a timeout implements the debounce
/// wait. `stop_rx` becoming `true` drains the current state and ends the
/// loop; any in-flight pipeline pass is allowed to complete.
pub async fn run(
    source_root: PathBuf,
    debounce_ms: u64,
    write_index: Arc<dyn WriteIndex>,
    embedder: Arc<dyn Embedder>,
    index_name: String,
    exclude_patterns: Vec<String>,
    mut stop_rx: watch::Receiver<bool>,
) {
    if let Err(e) = pipeline::run(
        write_index.as_ref(),
        embedder.as_ref(),
        &source_root,
        false,
        &index_name,
        &exclude_patterns,
    ) {
        warn!(error = %e, "initial indexing pass failed");
    }

    let (dirty_tx, mut dirty_rx) = mpsc::channel::<()>(1);
    let watch_root = source_root.clone();

    let watcher_result: notify::Result<RecommendedWatcher> =
        notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_relevant(&event, &watch_root) {
                    let _ = dirty_tx.try_send(());
                }
            }
            Err(e) => {
                error!(error = %e, "watcher event error");
            }
        });

    let mut watcher = match watcher_result {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "failed to create file watcher");
            return;
        }
    };

    if let Err(e) = watcher.watch(&source_root, RecursiveMode::Recursive) {
        error!(error = %e, "failed to watch source root");
        return;
    }

    let debounce = Duration::from_millis(debounce_ms);

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    info!("watcher stopping");
                    break;
                }
            }
            maybe = dirty_rx.recv() => {
                if maybe.is_none() {
                    break;
                }
                if !wait_for_quiescence(&mut dirty_rx, &mut stop_rx, debounce).await {
                    break;
                }
                info!("rebuilding after filesystem quiescence");
                if let Err(e) = pipeline::run(
                    write_index.as_ref(),
                    embedder.as_ref(),
                    &source_root,
                    false,
                    &index_name,
                    &exclude_patterns,
                ) {
                    warn!(error = %e, "watch-triggered indexing pass failed");
                }
            }
        }
    }
}

/// `Dirty` state: waits for the debounce timeout, restarting on every new
/// signal. Returns `false` if the stop signal fired while waiting.
async fn wait_for_quiescence(
    dirty_rx: &mut mpsc::Receiver<()>,
    stop_rx: &mut watch::Receiver<bool>,
    debounce: Duration,
) -> bool {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(debounce) => return true,
            signal = dirty_rx.recv() => {
                if signal.is_none() {
                    return false;
                }
                // another event arrived before quiescence; restart the wait
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    return false;
                }
            }
        }
    }
}

fn is_relevant(event: &Event, root: &std::path::Path) -> bool {
    use notify::EventKind;
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }
    event.paths.iter().any(|p| {
        p.starts_with(root) && p.extension().and_then(|e| e.to_str()) == Some("md")
    })
}
