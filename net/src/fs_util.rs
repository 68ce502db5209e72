//! Small filesystem helpers shared by reconciliation and the watcher: mtime
//! conversion, relative-path normalization, and the editor-backup filter.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// A file's modification time as seconds since the Unix epoch, matching the
/// `mtime: float seconds` field of the wire protocol (spec.md §3).
pub fn mtime_secs(path: &Path) -> io::Result<f64> {
    let modified = path.metadata()?.modified()?;
    Ok(system_time_to_secs(modified))
}

pub fn system_time_to_secs(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

/// Sets both mtime and atime of `path` to `secs` seconds since the epoch
/// (spec.md §4.3.2 step 4).
pub fn set_mtime(path: &Path, secs: f64) -> io::Result<()> {
    let time = filetime::FileTime::from_unix_time(
        secs.trunc() as i64,
        (secs.fract() * 1_000_000_000.0).round() as u32,
    );
    filetime::set_file_times(path, time, time)
}

/// Converts an absolute path under `root` into the forward-slash relative
/// path used on the wire, or `None` if `path` is not under `root`.
pub fn relative_path_str(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        parts.push(component.as_os_str().to_str()?.to_string());
    }
    Some(parts.join("/"))
}

/// Resolves a forward-slash relative path (as carried on the wire) back to
/// a native path under `root`.
pub fn resolve_relative(root: &Path, relative: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for part in relative.split('/') {
        path.push(part);
    }
    path
}

/// Editor backup artifacts are filtered everywhere a filename is
/// considered, both in the watcher (spec.md §4.5) and when building a
/// reconciliation manifest, so a stray `~` file never enters either side's
/// baseline.
pub fn is_backup_artifact(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.contains('~'))
}
