//! React to configuration edits.
//!
//! Two halves: a file watcher that reloads the [`FileSettings`] store when
//! one of its files changes on disk, and a listener that re-runs startup
//! selection whenever the store reports that one of the three selection
//! settings changed (whoever changed it).

use crate::select::EnvironmentSelector;
use crate::settings::SettingsStore;
use crate::store::FileSettings;
use log::{error, info, warn};
use notify_debouncer_mini::DebounceEventResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Re-run selection for all open scopes whenever a selection setting
/// changes. Selection only caches and reports, so re-running is safe at any
/// time.
pub fn spawn_settings_listener(
    store: &dyn SettingsStore,
    selector: Arc<EnvironmentSelector>,
) -> JoinHandle<()> {
    let mut rx = store.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(change) => {
                    if change.keys.is_empty() {
                        continue;
                    }
                    info!(
                        "[settings-watch] {:?} changed, re-running selection",
                        change.keys
                    );
                    if let Err(e) = selector.select_all().await {
                        error!("[settings-watch] re-selection failed: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!("[settings-watch] dropped {} change events", count);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Watch the store's settings files for external edits, reloading the store
/// (which then emits change events) on each debounced batch.
///
/// Files that do not exist yet are covered by watching their parent
/// directory and filtering events back down to the known paths.
pub fn spawn_settings_watcher(store: Arc<FileSettings>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let paths = store.watched_paths();

        let (tx, mut rx) = tokio::sync::mpsc::channel::<DebounceEventResult>(16);
        let debouncer =
            notify_debouncer_mini::new_debouncer(DEBOUNCE_WINDOW, move |result| {
                let _ = tx.blocking_send(result);
            });
        let mut debouncer = match debouncer {
            Ok(debouncer) => debouncer,
            Err(e) => {
                error!("[settings-watch] failed to create file watcher: {}", e);
                return;
            }
        };

        for path in &paths {
            let watch_path = if path.exists() {
                path.clone()
            } else if let Some(parent) = path.parent() {
                parent.to_path_buf()
            } else {
                continue;
            };
            if let Err(e) = debouncer
                .watcher()
                .watch(&watch_path, notify::RecursiveMode::NonRecursive)
            {
                warn!("[settings-watch] cannot watch {:?}: {}", watch_path, e);
            }
        }

        info!(
            "[settings-watch] watching {} settings file(s) for external changes",
            paths.len()
        );

        while let Some(result) = rx.recv().await {
            match result {
                Ok(events) => {
                    let relevant = events.iter().any(|event| paths.contains(&event.path));
                    if !relevant {
                        continue;
                    }
                    let changed = store.reload();
                    if !changed.is_empty() {
                        info!("[settings-watch] reloaded, changed: {:?}", changed);
                    }
                }
                Err(e) => {
                    warn!("[settings-watch] watch error: {}", e);
                }
            }
        }
    })
}
