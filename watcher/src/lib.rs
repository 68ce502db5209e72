//! Filesystem watcher (spec.md §4.5): debounces local events, filters out
//! echoes of remote-applied writes and editor backup artifacts, computes
//! deltas against the stored signature, and broadcasts the result.
//!
//! The debounce/dispatch shape mirrors the original synchronizer's own
//! `notify` + `notify-debouncer-full` + `rayon` event loop; only the
//! per-event handling changes, from local-backup mirroring to mesh
//! broadcast.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use meshsync_net::fs_util::{is_backup_artifact, mtime_secs, relative_path_str, system_time_to_secs};
use meshsync_net::{EchoGuard, PeerRegistry};
use meshsync_protocol::{Action, DeltaItem, Message, ModificationUpdate};
use meshsync_store::{SignatureStore, generate_delta};
use notify::EventKind;
use notify::event::{ModifyKind, RenameMode};
use notify_debouncer_full::{DebouncedEvent, new_debouncer};
use rayon::prelude::{IntoParallelRefIterator, ParallelIterator};

/// At most one broadcast per path per this window (spec.md §4.5, tunable
/// per spec.md's Open Questions). `notify-debouncer-full`'s own timer
/// naturally provides this, since it coalesces repeated events on one path
/// into a single delivery per tick.
pub const MODIFY_DEBOUNCE: Duration = Duration::from_millis(100);

pub struct ChangeWatcher {
    root: std::path::PathBuf,
    store: SignatureStore,
    registry: Arc<PeerRegistry>,
    echo_guard: Arc<EchoGuard>,
}

impl ChangeWatcher {
    pub fn new(
        root: std::path::PathBuf,
        store: SignatureStore,
        registry: Arc<PeerRegistry>,
        echo_guard: Arc<EchoGuard>,
    ) -> Self {
        Self {
            root,
            store,
            registry,
            echo_guard,
        }
    }

    /// Blocks the calling thread, watching `root` until the debouncer's
    /// channel is closed (i.e. the debouncer is dropped, typically by the
    /// caller holding a stop flag and dropping this watcher's thread).
    pub fn run(&self) -> anyhow::Result<()> {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(MODIFY_DEBOUNCE, None, tx)?;
        debouncer.watch(&self.root, notify::RecursiveMode::Recursive)?;

        while let Ok(result) = rx.recv() {
            match result {
                Ok(events) => {
                    events.par_iter().for_each(|event| self.handle_event(event));
                }
                Err(errors) => {
                    for error in errors {
                        tracing::warn!(%error, "watcher backend error");
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_event(&self, event: &DebouncedEvent) {
        if let Err(e) = self.try_handle_event(event) {
            tracing::error!(error = %e, "failure handling filesystem event; continuing");
        }
    }

    fn try_handle_event(&self, event: &DebouncedEvent) -> anyhow::Result<()> {
        match &event.kind {
            EventKind::Modify(ModifyKind::Data(_)) => {
                for path in &event.paths {
                    self.build_and_broadcast(path, Action::Modify)?;
                }
            }
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in &event.paths {
                    self.build_and_broadcast(path, Action::Create)?;
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if event.paths.len() >= 2 {
                    self.handle_rename(&event.paths[0], &event.paths[1])?;
                }
            }
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in &event.paths {
                    self.handle_delete(path)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn should_process(&self, path: &Path) -> bool {
        !is_backup_artifact(path) && !self.echo_guard.should_suppress(path)
    }

    /// Create/modify handling (spec.md §4.5 "Build and broadcast").
    fn build_and_broadcast(&self, path: &Path, action: Action) -> anyhow::Result<()> {
        if !self.should_process(path) || path.is_dir() || !path.is_file() {
            return Ok(());
        }
        let Some(relative) = relative_path_str(&self.root, path) else {
            return Ok(());
        };

        let old_signature = self.store.load(&relative)?;
        let new_signature = self.store.compute(path)?;
        let mtime = mtime_secs(path)?;

        let (delta, is_full_file) = match old_signature {
            Some(old) => {
                let data = fs::read(path)?;
                (generate_delta(&old, &data), false)
            }
            None => (vec![DeltaItem::Literal(fs::read(path)?)], true),
        };

        self.store.save(&new_signature, &relative)?;

        self.registry.broadcast(&Message::ModificationUpdate(ModificationUpdate {
            file_path: relative,
            action,
            mtime,
            delta: Some(delta),
            dest_path: None,
            is_full_file: Some(is_full_file),
        }));
        Ok(())
    }

    fn handle_delete(&self, path: &Path) -> anyhow::Result<()> {
        if !self.should_process(path) {
            return Ok(());
        }
        let Some(relative) = relative_path_str(&self.root, path) else {
            return Ok(());
        };
        self.store.remove(&relative)?;
        self.registry.broadcast(&Message::ModificationUpdate(ModificationUpdate {
            file_path: relative,
            action: Action::Delete,
            mtime: system_time_to_secs(SystemTime::now()),
            delta: None,
            dest_path: None,
            is_full_file: None,
        }));
        Ok(())
    }

    fn handle_rename(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
        if !self.should_process(from) || !self.should_process(to) {
            return Ok(());
        }
        let (Some(from_relative), Some(to_relative)) = (
            relative_path_str(&self.root, from),
            relative_path_str(&self.root, to),
        ) else {
            return Ok(());
        };

        if let Some(signature) = self.store.load(&from_relative)? {
            self.store.save(&signature, &to_relative)?;
            self.store.remove(&from_relative)?;
        }

        let mtime = mtime_secs(to).unwrap_or_else(|_| system_time_to_secs(SystemTime::now()));
        self.registry.broadcast(&Message::ModificationUpdate(ModificationUpdate {
            file_path: from_relative,
            action: Action::Rename,
            mtime,
            delta: None,
            dest_path: Some(to_relative),
            is_full_file: None,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshsync_net::EchoGuard;
    use std::time::Duration as StdDuration;

    fn new_watcher() -> (
        ChangeWatcher,
        tempfile::TempDir,
        tempfile::TempDir,
        Arc<PeerRegistry>,
    ) {
        let root = tempfile::tempdir().unwrap();
        let sig_dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(sig_dir.path());
        store.init().unwrap();
        let registry = PeerRegistry::new(root.path().to_path_buf(), store.clone(), Arc::new(EchoGuard::new()));
        let watcher = ChangeWatcher::new(
            root.path().to_path_buf(),
            store,
            Arc::clone(&registry),
            Arc::new(EchoGuard::new()),
        );
        (watcher, root, sig_dir, registry)
    }

    #[test]
    fn new_file_is_saved_as_a_full_signature_on_broadcast() {
        let (watcher, root, _sig, _registry) = new_watcher();
        fs::write(root.path().join("a.txt"), b"hello").unwrap();
        watcher
            .build_and_broadcast(&root.path().join("a.txt"), Action::Create)
            .unwrap();
        assert!(watcher.store.load("a.txt").unwrap().is_some());
    }

    #[test]
    fn backup_artifact_is_never_processed() {
        let (watcher, root, _sig, _registry) = new_watcher();
        fs::write(root.path().join("a.txt~"), b"hello").unwrap();
        watcher
            .build_and_broadcast(&root.path().join("a.txt~"), Action::Create)
            .unwrap();
        assert!(watcher.store.load("a.txt~").unwrap().is_none());
    }

    #[test]
    fn suppressed_echo_is_skipped() {
        let (watcher, root, _sig, _registry) = new_watcher();
        let path = root.path().join("a.txt");
        fs::write(&path, b"hello").unwrap();
        watcher.echo_guard.mark(path.clone());
        watcher.build_and_broadcast(&path, Action::Modify).unwrap();
        assert!(watcher.store.load("a.txt").unwrap().is_none());
    }

    #[test]
    fn rename_moves_the_signature() {
        let (watcher, root, _sig, _registry) = new_watcher();
        fs::write(root.path().join("a.txt"), b"hello").unwrap();
        watcher
            .build_and_broadcast(&root.path().join("a.txt"), Action::Create)
            .unwrap();
        fs::rename(root.path().join("a.txt"), root.path().join("b.txt")).unwrap();
        watcher
            .handle_rename(&root.path().join("a.txt"), &root.path().join("b.txt"))
            .unwrap();
        assert!(watcher.store.load("a.txt").unwrap().is_none());
        assert!(watcher.store.load("b.txt").unwrap().is_some());
    }

    #[test]
    fn delete_removes_signature() {
        let (watcher, root, _sig, _registry) = new_watcher();
        fs::write(root.path().join("a.txt"), b"hello").unwrap();
        watcher
            .build_and_broadcast(&root.path().join("a.txt"), Action::Create)
            .unwrap();
        fs::remove_file(root.path().join("a.txt")).unwrap();
        watcher.handle_delete(&root.path().join("a.txt")).unwrap();
        assert!(watcher.store.load("a.txt").unwrap().is_none());
    }

    #[test]
    fn modify_debounce_constant_is_short() {
        assert!(MODIFY_DEBOUNCE < StdDuration::from_secs(1));
    }
}
