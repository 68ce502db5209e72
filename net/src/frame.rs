//! Length-prefixed, compressed message framing over a `TcpStream` (spec.md §4.2).
//!
//! Each frame is `length: u64 big-endian || deflate(payload)`, where
//! `payload` is the UTF-8 JSON encoding of a [`meshsync_protocol::Message`].
//! An explicit length turns framing into a pure I/O concern instead of
//! relying on a streaming JSON parser to find message boundaries.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Mutex;

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use meshsync_protocol::Message;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed frame payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One bidirectional framed channel over a TCP socket.
///
/// Reads and writes use independent clones of the underlying socket, so a
/// `recv()` in one thread never blocks a concurrent `send()` in another;
/// sends are serialized by `write_half`'s mutex (spec.md §3: "exactly one
/// inflight outbound send per peer at any time").
pub struct FramedChannel {
    write_half: Mutex<TcpStream>,
    read_half: Mutex<TcpStream>,
}

impl FramedChannel {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let read_half = stream.try_clone()?;
        Ok(Self {
            write_half: Mutex::new(stream),
            read_half: Mutex::new(read_half),
        })
    }

    /// Serializes, compresses, length-prefixes, and writes `message` as one
    /// atomic operation with respect to other senders on this channel.
    pub fn send(&self, message: &Message) -> Result<(), FrameError> {
        let json = serde_json::to_vec(message)?;
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        let compressed = encoder.finish()?;

        let mut stream = self.write_half.lock().unwrap_or_else(|e| e.into_inner());
        stream.write_all(&(compressed.len() as u64).to_be_bytes())?;
        stream.write_all(&compressed)?;
        stream.flush()?;
        Ok(())
    }

    /// Blocks until a full frame has been read, decompressed, and parsed.
    /// Returns `Ok(None)` on a clean end-of-stream; any decode failure is
    /// reported as `Err` and the caller must treat the channel as closed.
    pub fn recv(&self) -> Result<Option<Message>, FrameError> {
        let mut stream = self.read_half.lock().unwrap_or_else(|e| e.into_inner());

        let mut len_bytes = [0u8; 8];
        if let Err(e) = stream.read_exact(&mut len_bytes) {
            return if e.kind() == io::ErrorKind::UnexpectedEof {
                Ok(None)
            } else {
                Err(e.into())
            };
        }
        let len = u64::from_be_bytes(len_bytes) as usize;

        let mut compressed = vec![0u8; len];
        stream.read_exact(&mut compressed)?;

        let mut decoder = DeflateDecoder::new(&compressed[..]);
        let mut json = Vec::new();
        decoder.read_to_end(&mut json)?;

        let message = serde_json::from_slice(&json)?;
        Ok(Some(message))
    }

    /// Closes both directions of the underlying socket, unblocking any
    /// thread parked in `recv`.
    pub fn shutdown(&self) {
        if let Ok(stream) = self.write_half.lock() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshsync_protocol::{Action, ModificationUpdate};
    use std::net::TcpListener;
    use std::thread;

    fn pair() -> (FramedChannel, FramedChannel) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || listener.accept().unwrap().0);
        let client_stream = TcpStream::connect(addr).unwrap();
        let server_stream = server.join().unwrap();
        (
            FramedChannel::new(client_stream).unwrap(),
            FramedChannel::new(server_stream).unwrap(),
        )
    }

    #[test]
    fn send_then_recv_round_trips_a_message() {
        let (a, b) = pair();
        let msg = Message::ModificationUpdate(ModificationUpdate {
            file_path: "docs/a.txt".into(),
            action: Action::Modify,
            mtime: 42.0,
            delta: None,
            dest_path: None,
            is_full_file: Some(true),
        });
        a.send(&msg).unwrap();
        let received = b.recv().unwrap().unwrap();
        match received {
            Message::ModificationUpdate(update) => {
                assert_eq!(update.file_path, "docs/a.txt");
                assert_eq!(update.mtime, 42.0);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn shutdown_unblocks_recv_with_none() {
        let (a, b) = pair();
        a.shutdown();
        assert!(b.recv().unwrap().is_none());
    }
}
