//! Rule File Watcher
//!
//! Reloads a rule list when its file is edited outside the process, so an
//! operator can hand-edit the whitelist without restarting the service.
//! The watcher is best-effort: if it cannot be set up the store still
//! works, it just won't see external edits until restart.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;

use super::store::{RuleStore, RuleStoreError};

/// Watch both rule files for external modification.
///
/// Returns the watcher; the caller must keep it alive for the watch to
/// stay active.
pub fn spawn_watcher(store: Arc<RuleStore>, dir: &Path) -> Result<RecommendedWatcher, RuleStoreError> {
    let whitelist_path = store.whitelist().path().to_path_buf();
    let blacklist_path = store.blacklist().path().to_path_buf();

    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Rule watcher error: {}", e);
                return;
            }
        };
        if !matches!(
            event.kind,
            EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
        ) {
            return;
        }
        for path in &event.paths {
            if path == &whitelist_path {
                log::info!("Whitelist file changed on disk, reloading");
                store.whitelist().reload();
            } else if path == &blacklist_path {
                log::info!("Blacklist file changed on disk, reloading");
                store.blacklist().reload();
            }
        }
    })
    .map_err(|e| RuleStoreError(format!("create watcher: {}", e)))?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| RuleStoreError(format!("watch {:?}: {}", dir, e)))?;

    log::info!("Watching rule directory {:?}", dir);
    Ok(watcher)
}

// ============================================================================
// TESTS
// ============================================================================
