//! Signature store: per-file block-checksum manifests and the rsync-style
//! delta codec built on top of them (spec.md §4.1).
//!
//! A [`SignatureStore`] owns a root directory that mirrors the shape of the
//! monitored tree: for a monitored file at relative path `p`, its signature
//! lives at `<root>/p.sig`, compressed on disk exactly as it travels on the
//! wire.

pub mod checksum;
pub mod delta;
pub mod signature;

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

pub use delta::{DeltaError, apply_delta, generate_delta};
pub use meshsync_protocol::{DeltaCodecError, DeltaItem, deserialize_delta, serialize_delta};
pub use signature::{BLOCK_SIZE, BlockChecksum, Signature, SignatureError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Delta(#[from] DeltaError),
}

/// Owns the on-disk signature manifests for a monitored directory tree.
#[derive(Debug, Clone)]
pub struct SignatureStore {
    root: PathBuf,
}

impl SignatureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Wipes and recreates the signature root. Called once at startup so a
    /// stale signature tree from a previous run never shadows the files
    /// actually present now.
    pub fn init(&self) -> Result<(), StoreError> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Maps a path relative to the monitored root to its signature file.
    pub fn sig_path(&self, relative_path: impl AsRef<Path>) -> PathBuf {
        let mut path = self.root.join(relative_path.as_ref());
        let mut name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".sig");
        path.set_file_name(name);
        path
    }

    /// Streams `file_path` and builds its block-checksum manifest.
    pub fn compute(&self, file_path: impl AsRef<Path>) -> Result<Signature, StoreError> {
        let file = File::open(file_path)?;
        Ok(Signature::compute(file)?)
    }

    /// Compresses `signature` and writes it to `<root>/relative_path.sig`,
    /// creating parent directories as needed. Returns the compressed bytes
    /// written, for callers that also want to send them over the wire.
    pub fn save(
        &self,
        signature: &Signature,
        relative_path: impl AsRef<Path>,
    ) -> Result<Vec<u8>, StoreError> {
        let path = self.sig_path(relative_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let compressed = signature.compress()?;
        fs::write(&path, &compressed)?;
        Ok(compressed)
    }

    /// Loads and decompresses the signature for `relative_path`, or `None`
    /// if no signature has been saved for it yet.
    pub fn load(&self, relative_path: impl AsRef<Path>) -> Result<Option<Signature>, StoreError> {
        let path = self.sig_path(relative_path);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(Signature::decompress(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Decompresses a signature received from a peer.
    pub fn parse(&self, compressed: &[u8]) -> Result<Signature, StoreError> {
        Ok(Signature::decompress(compressed)?)
    }

    /// Removes the signature for `relative_path`, if one exists (spec.md
    /// §4.1: a DELETE reconciliation removes the signature alongside the
    /// file it described).
    pub fn remove(&self, relative_path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = self.sig_path(relative_path);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sig_path_appends_extension() {
        let store = SignatureStore::new("/tmp/sigs");
        assert_eq!(
            store.sig_path("a/b/file.txt"),
            PathBuf::from("/tmp/sigs/a/b/file.txt.sig")
        );
    }

    #[test]
    fn init_wipes_and_recreates() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("sigs");
        let store = SignatureStore::new(&root);
        store.init().unwrap();
        fs::write(root.join("stale.sig"), b"leftover").unwrap();
        store.init().unwrap();
        assert!(root.is_dir());
        assert!(!root.join("stale.sig").exists());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(dir.path());
        store.init().unwrap();
        let sig = Signature::compute(std::io::Cursor::new(b"hello world".to_vec())).unwrap();
        store.save(&sig, "docs/readme.txt").unwrap();
        let loaded = store.load("docs/readme.txt").unwrap();
        assert_eq!(loaded, Some(sig));
    }

    #[test]
    fn load_missing_signature_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(dir.path());
        store.init().unwrap();
        assert_eq!(store.load("never-saved.txt").unwrap(), None);
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(dir.path());
        store.init().unwrap();
        store.remove("nothing-here.txt").unwrap();
        store.remove("nothing-here.txt").unwrap();
    }
}
