//! The live set of peer sessions: connect/accept/remove/broadcast, all
//! mediated by one mutex (spec.md §4.4).

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use meshsync_protocol::Message;
use meshsync_store::SignatureStore;

use crate::echo_guard::EchoGuard;
use crate::session::{PeerId, PeerSession};

pub struct PeerRegistry {
    root: PathBuf,
    store: SignatureStore,
    echo_guard: Arc<EchoGuard>,
    peers: Mutex<HashMap<PeerId, Arc<PeerSession>>>,
}

impl PeerRegistry {
    pub fn new(root: PathBuf, store: SignatureStore, echo_guard: Arc<EchoGuard>) -> Arc<Self> {
        Arc::new(Self {
            root,
            store,
            echo_guard,
            peers: Mutex::new(HashMap::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.peers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    /// Opens an outgoing connection to `(ip, port)` and registers it, if
    /// not already known. A peer already present is a silent no-op,
    /// matching the original's `connect_to_node` behavior.
    pub fn connect(self: &Arc<Self>, ip: IpAddr, port: u16) -> io::Result<()> {
        let id = PeerId { ip, port };
        if self.contains(&id) {
            return Ok(());
        }
        let stream = TcpStream::connect((ip, port))?;
        self.register(id, stream);
        Ok(())
    }

    /// Registers an inbound connection. The peer's registry key uses the
    /// accepted socket's remote endpoint (spec.md §4.4), which is an
    /// ephemeral client port, not the peer's own listen port.
    pub fn accept(self: &Arc<Self>, stream: TcpStream) -> io::Result<()> {
        let peer_addr = stream.peer_addr()?;
        let id = PeerId {
            ip: peer_addr.ip(),
            port: peer_addr.port(),
        };
        if self.contains(&id) {
            return Ok(());
        }
        self.register(id, stream);
        Ok(())
    }

    fn register(self: &Arc<Self>, id: PeerId, stream: TcpStream) {
        let session = match PeerSession::new(id, stream) {
            Ok(session) => Arc::new(session),
            Err(e) => {
                tracing::error!(peer = %id, error = %e, "failed to wrap peer socket");
                return;
            }
        };

        {
            let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
            peers.insert(id, Arc::clone(&session));
        }

        if let Err(e) = session.send_handshake(&self.root, &self.store) {
            tracing::error!(peer = %id, error = %e, "handshake send failed");
            self.remove(id);
            return;
        }

        let registry = Arc::clone(self);
        thread::spawn(move || registry.run_receive_loop(session));
    }

    fn run_receive_loop(self: Arc<Self>, session: Arc<PeerSession>) {
        loop {
            match session.channel().recv() {
                Ok(Some(message)) => {
                    if let Err(e) =
                        session.handle_message(message, &self.root, &self.store, &self.echo_guard)
                    {
                        tracing::error!(peer = %session.id(), error = %e, "closing peer after a message error");
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(peer = %session.id(), error = %e, "peer receive error");
                    break;
                }
            }
        }
        self.remove(session.id());
    }

    /// Closes and forgets the peer, if present.
    pub fn remove(&self, id: PeerId) {
        let removed = {
            let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
            peers.remove(&id)
        };
        if let Some(session) = removed {
            session.close();
        }
    }

    /// Sends `message` to every peer whose handshake has completed. Holds
    /// the registry mutex for the whole iteration so a concurrent `remove`
    /// cannot invalidate it.
    pub fn broadcast(&self, message: &Message) {
        let peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        for session in peers.values() {
            if session.is_synchronized()
                && let Err(e) = session.channel().send(message)
            {
                tracing::warn!(peer = %session.id(), error = %e, "broadcast send failed");
            }
        }
    }

    /// Closes every peer and drains the registry.
    pub fn stop(&self) {
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        for (_, session) in peers.drain() {
            session.close();
        }
    }
}
