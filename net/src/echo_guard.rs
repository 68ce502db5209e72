//! The process-wide echo-guard table (spec.md §3, §4.3.2, §4.5).
//!
//! A remote-applied write inserts its absolute path here *before* touching
//! disk; the local watcher consults the table and drops any filesystem
//! event on a path whose entry is still within the suppression window,
//! which is how a two-node mesh avoids broadcasting a change straight back
//! to the peer that sent it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long a remote-applied write suppresses local watcher events on the
/// same path. Tunable (spec.md Open Questions): 500 ms matches the
/// original implementation's hardcoded window.
pub const ECHO_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct EchoGuard {
    entries: Mutex<HashMap<PathBuf, Instant>>,
    window: Duration,
}

impl Default for EchoGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoGuard {
    pub fn new() -> Self {
        Self::with_window(ECHO_WINDOW)
    }

    /// Builds a guard with a non-default window, for tests that need to
    /// observe expiry without sleeping 500 ms.
    pub fn with_window(window: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            window,
        }
    }

    /// Records that `path` was just written by an incoming delta/update,
    /// stamped with the current instant. Must happen before the write
    /// reaches disk (spec.md §4.3.2's ordering rationale).
    pub fn mark(&self, path: impl Into<PathBuf>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(path.into(), Instant::now());
    }

    /// Checks whether an event on `path` should be suppressed. A fresh
    /// entry (within the guard's window) suppresses and is kept; a stale
    /// one is evicted and the event proceeds normally.
    pub fn should_suppress(&self, path: &Path) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(path) {
            Some(marked_at) if marked_at.elapsed() < self.window => true,
            Some(_) => {
                entries.remove(path);
                false
            }
            None => false,
        }
    }
}
