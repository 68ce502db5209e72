//! Building a local directory manifest and diffing it against a peer's
//! (spec.md §4.3.1).

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use base64::Engine;
use meshsync_protocol::{Action, DeltaTransferEntry, DeltaTransferPayload, DirectoryManifest, ManifestEntry};
use meshsync_store::{SignatureStore, StoreError, generate_delta};
use walkdir::WalkDir;

use crate::fs_util::{is_backup_artifact, mtime_secs, relative_path_str, resolve_relative};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Walks `root`, computing and saving a signature for every regular file,
/// and returns the resulting manifest (spec.md §4.3.1 step 1).
pub fn build_manifest(root: &Path, store: &SignatureStore) -> Result<DirectoryManifest, ReconcileError> {
    let mut manifest = DirectoryManifest::new();
    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if !entry.file_type().is_file() || is_backup_artifact(path) {
            continue;
        }
        let Some(relative) = relative_path_str(root, path) else {
            continue;
        };

        let signature = store.compute(path)?;
        let compressed = store.save(&signature, &relative)?;
        let mtime = mtime_secs(path)?;
        let size = path.metadata()?.len();

        manifest.insert(
            relative,
            ManifestEntry {
                mtime,
                size,
                signature: base64::engine::general_purpose::STANDARD.encode(compressed),
            },
        );
    }
    Ok(manifest)
}

/// Diffs `local` against `remote`, producing the `DELTA_TRANSFER` payload
/// this node owes its peer (spec.md §4.3.1 step 2): newer local files are
/// sent as deltas against the peer's signature, local-only files are sent
/// in full, and everything else is left for the peer to send us.
pub fn diff_manifest(
    root: &Path,
    store: &SignatureStore,
    local: &DirectoryManifest,
    remote: &DirectoryManifest,
) -> Result<DeltaTransferPayload, ReconcileError> {
    let mut payload = DeltaTransferPayload::new();
    let mut keys: HashSet<&String> = local.keys().collect();
    keys.extend(remote.keys());

    for key in keys {
        match (local.get(key), remote.get(key)) {
            (Some(local_entry), Some(remote_entry)) => {
                if local_entry.mtime > remote_entry.mtime {
                    let remote_sig_bytes = base64::engine::general_purpose::STANDARD
                        .decode(&remote_entry.signature)
                        .unwrap_or_default();
                    let remote_signature = store.parse(&remote_sig_bytes)?;
                    let data = fs::read(resolve_relative(root, key))?;
                    let delta = generate_delta(&remote_signature, &data);
                    payload.insert(
                        key.clone(),
                        DeltaTransferEntry {
                            delta,
                            mtime: local_entry.mtime,
                            action: Action::Create,
                            is_full_file: false,
                        },
                    );
                }
                // local.mtime <= remote.mtime: remote will send us theirs, or a tie is a no-op.
            }
            (Some(local_entry), None) => {
                let data = fs::read(resolve_relative(root, key))?;
                payload.insert(
                    key.clone(),
                    DeltaTransferEntry {
                        delta: vec![meshsync_protocol::DeltaItem::Literal(data)],
                        mtime: local_entry.mtime,
                        action: Action::Create,
                        is_full_file: true,
                    },
                );
            }
            (None, Some(_)) => {
                // Present only on the remote side: the peer will send it to us.
            }
            (None, None) => unreachable!("key came from one of the two maps"),
        }
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn build_manifest_covers_nested_files_and_skips_backups() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"there").unwrap();
        fs::write(dir.path().join("sub/c.txt~"), b"backup").unwrap();

        let sig_dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(sig_dir.path());
        store.init().unwrap();

        let manifest = build_manifest(dir.path(), &store).unwrap();
        assert_eq!(manifest.len(), 2);
        assert!(manifest.contains_key("a.txt"));
        assert!(manifest.contains_key("sub/b.txt"));
    }

    #[test]
    fn diff_manifest_sends_local_only_files_in_full() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("only-local.txt"), b"mine").unwrap();
        let sig_dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(sig_dir.path());
        store.init().unwrap();

        let local = build_manifest(dir.path(), &store).unwrap();
        let remote = DirectoryManifest::new();

        let payload = diff_manifest(dir.path(), &store, &local, &remote).unwrap();
        let entry = payload.get("only-local.txt").unwrap();
        assert!(entry.is_full_file);
    }

    #[test]
    fn diff_manifest_skips_when_remote_is_newer() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f.txt"), b"mine").unwrap();
        let sig_dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(sig_dir.path());
        store.init().unwrap();

        let local = build_manifest(dir.path(), &store).unwrap();
        let mut remote = DirectoryManifest::new();
        let mut remote_entry = local.get("f.txt").unwrap().clone();
        remote_entry.mtime = local["f.txt"].mtime + 1000.0;
        remote.insert("f.txt".to_string(), remote_entry);

        let payload = diff_manifest(dir.path(), &store, &local, &remote).unwrap();
        assert!(payload.is_empty());
    }
}
