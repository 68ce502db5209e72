//! Applying one incoming delta/update entry to the local filesystem
//! (spec.md §4.3.2). Shared between `DELTA_TRANSFER` (a batch of entries,
//! each implicitly a CREATE) and `MODIFICATION_UPDATE` (one entry of any
//! action).

use std::fs;
use std::io;
use std::path::Path;

use meshsync_protocol::{Action, DeltaItem};
use meshsync_store::{SignatureStore, StoreError, apply_delta};

use crate::echo_guard::EchoGuard;
use crate::fs_util::{resolve_relative, set_mtime};

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("rename update is missing dest_path")]
    MissingDestPath,
}

/// Reconstructs the literal bytes of a full-file (or empty) delta by
/// concatenating its chunks; a delta made of `BlockRef`s with no base file
/// present is a contract violation by the sender and yields an empty write.
fn concat_literal(delta: &[DeltaItem]) -> Vec<u8> {
    let mut out = Vec::new();
    for item in delta {
        if let DeltaItem::Literal(bytes) = item {
            out.extend_from_slice(bytes);
        }
    }
    out
}

/// The action-specific fields of one incoming delta/update entry, grouped
/// so `apply_update` takes one payload argument instead of five.
pub struct UpdateOp<'a> {
    pub action: Action,
    pub mtime: f64,
    pub delta: Option<&'a [DeltaItem]>,
    pub dest_path: Option<&'a str>,
    pub is_full_file: Option<bool>,
}

/// Applies one update for relative path `relative` under `root`.
pub fn apply_update(
    root: &Path,
    store: &SignatureStore,
    echo_guard: &EchoGuard,
    relative: &str,
    op: &UpdateOp<'_>,
) -> Result<(), ApplyError> {
    let absolute = resolve_relative(root, relative);
    echo_guard.mark(absolute.clone());

    match op.action {
        Action::Create | Action::Modify => {
            if let Some(parent) = absolute.parent() {
                fs::create_dir_all(parent)?;
            }
            let delta = op.delta.unwrap_or(&[]);
            if op.is_full_file.unwrap_or(false) {
                fs::write(&absolute, concat_literal(delta))?;
            } else {
                if !absolute.exists() {
                    tracing::warn!(relative, "delta update for missing base file; skipping");
                    return Ok(());
                }
                if store.load(relative)?.is_none() {
                    tracing::warn!(relative, "delta update with no local signature; skipping");
                    return Ok(());
                }
                apply_delta(&absolute, delta)?;
            }
            set_mtime(&absolute, op.mtime)?;
            let signature = store.compute(&absolute)?;
            store.save(&signature, relative)?;
        }
        Action::Delete => {
            match fs::remove_file(&absolute) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            store.remove(relative)?;
        }
        Action::Rename => {
            let dest = op.dest_path.ok_or(ApplyError::MissingDestPath)?;
            if !absolute.exists() {
                tracing::warn!(relative, dest, "rename source missing; skipping rename entirely");
                return Ok(());
            }
            let dest_absolute = resolve_relative(root, dest);
            if let Some(parent) = dest_absolute.parent() {
                fs::create_dir_all(parent)?;
            }
            echo_guard.mark(dest_absolute.clone());
            fs::rename(&absolute, &dest_absolute)?;
            set_mtime(&dest_absolute, op.mtime)?;

            let sig_src = store.sig_path(relative);
            if sig_src.exists() {
                let sig_dest = store.sig_path(dest);
                if let Some(parent) = sig_dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::rename(&sig_src, &sig_dest)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_full_file_writes_bytes_and_signature() {
        let dir = tempfile::tempdir().unwrap();
        let sig_dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(sig_dir.path());
        store.init().unwrap();
        let guard = EchoGuard::new();

        apply_update(
            dir.path(),
            &store,
            &guard,
            "a/b.txt",
            &UpdateOp {
                action: Action::Create,
                mtime: 1_700_000_000.0,
                delta: Some(&[DeltaItem::Literal(b"hello".to_vec())]),
                dest_path: None,
                is_full_file: Some(true),
            },
        )
        .unwrap();

        let written = fs::read(dir.path().join("a/b.txt")).unwrap();
        assert_eq!(written, b"hello");
        assert!(store.load("a/b.txt").unwrap().is_some());
    }

    #[test]
    fn delete_removes_file_and_signature() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f.txt"), b"x").unwrap();
        let sig_dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(sig_dir.path());
        store.init().unwrap();
        let sig = store.compute(dir.path().join("f.txt")).unwrap();
        store.save(&sig, "f.txt").unwrap();
        let guard = EchoGuard::new();

        apply_update(
            dir.path(),
            &store,
            &guard,
            "f.txt",
            &UpdateOp {
                action: Action::Delete,
                mtime: 0.0,
                delta: None,
                dest_path: None,
                is_full_file: None,
            },
        )
        .unwrap();

        assert!(!dir.path().join("f.txt").exists());
        assert!(store.load("f.txt").unwrap().is_none());
    }

    #[test]
    fn rename_moves_file_and_signature() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("a/b.txt"), b"x").unwrap();
        let sig_dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(sig_dir.path());
        store.init().unwrap();
        let sig = store.compute(dir.path().join("a/b.txt")).unwrap();
        store.save(&sig, "a/b.txt").unwrap();
        let guard = EchoGuard::new();

        apply_update(
            dir.path(),
            &store,
            &guard,
            "a/b.txt",
            &UpdateOp {
                action: Action::Rename,
                mtime: 1_700_000_000.0,
                delta: None,
                dest_path: Some("c/d.txt"),
                is_full_file: None,
            },
        )
        .unwrap();

        assert!(!dir.path().join("a/b.txt").exists());
        assert!(dir.path().join("c/d.txt").exists());
        assert!(store.sig_path("c/d.txt").exists());
        assert!(!store.sig_path("a/b.txt").exists());
    }

    #[test]
    fn rename_with_missing_source_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let sig_dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(sig_dir.path());
        store.init().unwrap();
        let guard = EchoGuard::new();

        apply_update(
            dir.path(),
            &store,
            &guard,
            "gone.txt",
            &UpdateOp {
                action: Action::Rename,
                mtime: 0.0,
                delta: None,
                dest_path: Some("new.txt"),
                is_full_file: None,
            },
        )
        .unwrap();

        assert!(!dir.path().join("new.txt").exists());
    }
}
