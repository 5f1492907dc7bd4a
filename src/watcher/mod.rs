// Filesystem watcher - keeps the catalog in step with the content root
mod events;
mod handlers;

pub use events::{FsEvent, classify};
pub use handlers::{EventOutcome, handle_created, handle_event, handle_removed, handle_renamed};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::catalog::{CatalogError, SharedRegistry};

// Raw notifications queued between the notify thread and the dispatch loop.
// Overflow is dropped with a warning.
const EVENT_BUFFER: usize = 4096;

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub max_concurrent_events: usize,
    pub settle_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            max_concurrent_events: 64,
            settle_interval: Duration::from_millis(250),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// A recursive watch on the content root plus the task that dispatches its
/// events. Each event is handled on its own task, bounded by a semaphore.
pub struct FsWatcher {
    root: PathBuf,
    watcher: RecommendedWatcher,
    cancel: CancellationToken,
    event_loop: JoinHandle<()>,
}

impl FsWatcher {
    pub fn start(registry: SharedRegistry, settings: WatcherSettings) -> Result<Self, CatalogError> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<notify::Event>| {
                if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(result) {
                    warn!("Filesystem event queue full, dropping event");
                }
            },
            notify::Config::default(),
        )?;

        let root = registry.root().to_path_buf();
        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!("Watching {:?} for changes", root);

        let cancel = CancellationToken::new();
        let event_loop = tokio::spawn(run_event_loop(registry, rx, settings, cancel.clone()));

        Ok(Self {
            root,
            watcher,
            cancel,
            event_loop,
        })
    }

    /// Stop accepting events and give in-flight handlers the grace period to
    /// finish.
    pub async fn shutdown(self) {
        let FsWatcher {
            root,
            mut watcher,
            cancel,
            event_loop,
        } = self;

        cancel.cancel();
        if let Err(e) = watcher.unwatch(&root) {
            debug!("Failed to unwatch {:?}: {}", root, e);
        }
        drop(watcher);

        if let Err(e) = event_loop.await {
            error!("Filesystem event loop failed: {}", e);
        }
        info!("Stopped watching {:?}", root);
    }
}

async fn run_event_loop(
    registry: SharedRegistry,
    mut events: mpsc::Receiver<notify::Result<notify::Event>>,
    settings: WatcherSettings,
    cancel: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(settings.max_concurrent_events.max(1)));
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = events.recv() => match received {
                Some(Ok(event)) => {
                    let Some(fs_event) = classify(&event) else {
                        continue;
                    };

                    let permit = tokio::select! {
                        _ = cancel.cancelled() => break,
                        permit = permits.clone().acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                    };

                    let registry = registry.clone();
                    let settle_interval = settings.settle_interval;
                    in_flight.spawn(async move {
                        let _permit = permit;
                        let description = format!("{:?}", fs_event);
                        match handle_event(&registry, fs_event, settle_interval).await {
                            Ok(outcome) => trace!("{} => {:?}", description, outcome),
                            Err(e) => error!("Failed to handle {}: {}", description, e),
                        }
                    });
                }
                Some(Err(e)) => warn!("Filesystem watcher error: {}", e),
                None => break,
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!("Filesystem event handler panicked: {}", e);
                }
            }
        }
    }

    drop(events);

    let drained = tokio::time::timeout(settings.shutdown_grace, async {
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("Filesystem event handler panicked: {}", e);
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            "Abandoning {} filesystem event handlers after {:?}",
            in_flight.len(),
            settings.shutdown_grace
        );
        in_flight.abort_all();
    }
}
