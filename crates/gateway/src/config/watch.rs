//! File-watch-driven hot reload. Debounced so a burst of saves during an
//! editor write collapses into one reload (spec §4.8 "Reload triggers").

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Config, ConfigError};

/// A reload attempt, either a freshly-parsed config or a validation/parse
/// failure. On failure the caller discards the diff and keeps the prior
/// config (spec §4.8 step 4).
pub enum ReloadSignal {
    Applied(Config),
    Failed(ConfigError),
}

/// Watches `path` for changes and emits `ReloadSignal`s on `rx`. Keeps the
/// underlying OS watcher alive for as long as the returned guard is held.
pub struct ConfigWatcher {
    _debouncer: notify_debouncer_full::Debouncer<
        notify::RecommendedWatcher,
        notify_debouncer_full::RecommendedCache,
    >,
}

impl ConfigWatcher {
    pub fn watch(path: &Path, tx: mpsc::Sender<ReloadSignal>) -> anyhow::Result<Self> {
        let path = path.to_path_buf();
        let watch_path = canonical_parent(&path);

        let mut debouncer = new_debouncer(
            Duration::from_millis(300),
            None,
            move |result: DebounceEventResult| {
                let events = match result {
                    Ok(events) => events,
                    Err(errors) => {
                        for e in errors {
                            warn!(error = %e, "config watch error");
                        }
                        return;
                    }
                };
                let touches_target = events.iter().any(|e| e.paths.contains(&path));
                if !touches_target {
                    return;
                }
                debug!(path = %path.display(), "config file changed, reloading");
                let signal = match Config::load(&path) {
                    Ok(cfg) => ReloadSignal::Applied(cfg),
                    Err(e) => ReloadSignal::Failed(e),
                };
                let _ = tx.blocking_send(signal);
            },
        )?;

        debouncer
            .watch(&watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| anyhow::anyhow!("failed to watch {}: {e}", watch_path.display()))?;

        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

fn canonical_parent(path: &Path) -> PathBuf {
    path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
