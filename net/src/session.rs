//! Per-peer session state machine (spec.md §4.3): owns one framed channel,
//! drives the initial reconciliation handshake, and applies whatever
//! arrives afterward.

use std::fmt;
use std::net::{IpAddr, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use meshsync_protocol::Message;
use meshsync_store::SignatureStore;

use crate::apply::{ApplyError, UpdateOp, apply_update};
use crate::echo_guard::EchoGuard;
use crate::frame::{FrameError, FramedChannel};
use crate::reconcile::{ReconcileError, build_manifest, diff_manifest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId {
    pub ip: IpAddr,
    pub port: u16,
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

/// One peer connection: a framed channel plus the `synchronized` flag that
/// gates live broadcasts (spec.md §3, §4.3).
pub struct PeerSession {
    id: PeerId,
    channel: FramedChannel,
    synchronized: AtomicBool,
}

impl PeerSession {
    pub fn new(id: PeerId, stream: TcpStream) -> std::io::Result<Self> {
        Ok(Self {
            id,
            channel: FramedChannel::new(stream)?,
            synchronized: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn channel(&self) -> &FramedChannel {
        &self.channel
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.channel.shutdown();
    }

    /// HANDSHAKING entry point (spec.md §4.3 state table): sends this
    /// node's own `DIRECTORY_STATE`.
    pub fn send_handshake(
        &self,
        root: &Path,
        store: &SignatureStore,
    ) -> Result<(), SessionError> {
        let manifest = build_manifest(root, store)?;
        self.channel.send(&Message::DirectoryState(manifest))?;
        Ok(())
    }

    /// Dispatches one received message. Blocking I/O and disk access happen
    /// on the caller's thread (the peer's receive loop).
    pub fn handle_message(
        &self,
        message: Message,
        root: &Path,
        store: &SignatureStore,
        echo_guard: &EchoGuard,
    ) -> Result<(), SessionError> {
        match message {
            Message::DirectoryState(remote_manifest) => {
                let local_manifest = build_manifest(root, store)?;
                let payload = diff_manifest(root, store, &local_manifest, &remote_manifest)?;
                if !payload.is_empty() {
                    self.channel.send(&Message::DeltaTransfer(payload))?;
                }
                // spec.md §4.3.1 step 4: mark synchronized once the
                // incoming DIRECTORY_STATE has been fully processed.
                self.synchronized.store(true, Ordering::Release);
            }
            Message::DeltaTransfer(payload) => {
                for (relative, entry) in payload {
                    let op = UpdateOp {
                        action: entry.action,
                        mtime: entry.mtime,
                        delta: Some(&entry.delta),
                        dest_path: None,
                        is_full_file: Some(entry.is_full_file),
                    };
                    if let Err(e) = apply_update(root, store, echo_guard, &relative, &op) {
                        tracing::error!(peer = %self.id, relative, error = %e, "failed to apply reconciliation entry");
                    }
                }
            }
            Message::ModificationUpdate(update) => {
                let op = UpdateOp {
                    action: update.action,
                    mtime: update.mtime,
                    delta: update.delta.as_deref(),
                    dest_path: update.dest_path.as_deref(),
                    is_full_file: update.is_full_file,
                };
                apply_update(root, store, echo_guard, &update.file_path, &op)?;
            }
        }
        Ok(())
    }
}
