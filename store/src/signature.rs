//! Block-checksum manifests: computing them, and their on-disk binary layout.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::checksum::{RollingChecksum, strong_checksum};

/// Fixed block size for every signature and delta in this implementation.
/// Both sides of a connection must agree on this value (spec.md §3); since
/// this is the only implementation in play, a shared constant satisfies
/// that by construction.
pub const BLOCK_SIZE: usize = 4096;

/// Size in bytes of one packed `(weak, strong)` record: 4-byte LE weak
/// checksum + 16-byte MD5 strong checksum.
const RECORD_SIZE: usize = 4 + 16;

/// One block's weak/strong checksum pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockChecksum {
    pub weak: u32,
    pub strong: [u8; 16],
}

/// A full per-file block-checksum manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    pub blocks: Vec<BlockChecksum>,
}

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("signature I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt signature: length {0} is not a multiple of the record size")]
    MisalignedLength(usize),
}

impl Signature {
    /// Stream a file and build its block-checksum manifest, one
    /// `BLOCK_SIZE` chunk at a time (the last chunk may be shorter).
    pub fn compute(mut reader: impl Read) -> Result<Self, SignatureError> {
        let mut blocks = Vec::new();
        let mut buf = vec![0u8; BLOCK_SIZE];
        loop {
            let n = read_fill(&mut reader, &mut buf)?;
            if n == 0 {
                break;
            }
            let chunk = &buf[..n];
            blocks.push(BlockChecksum {
                weak: RollingChecksum::of(chunk).value(),
                strong: strong_checksum(chunk),
            });
            if n < BLOCK_SIZE {
                break;
            }
        }
        Ok(Signature { blocks })
    }

    /// Pack the manifest into the fixed binary layout (spec.md §4.1):
    /// `concat(weak:u32le || strong:16 bytes)` for each block.
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.blocks.len() * RECORD_SIZE);
        for block in &self.blocks {
            out.extend_from_slice(&block.weak.to_le_bytes());
            out.extend_from_slice(&block.strong);
        }
        out
    }

    /// Inverse of [`pack`](Self::pack).
    pub fn unpack(data: &[u8]) -> Result<Self, SignatureError> {
        if data.len() % RECORD_SIZE != 0 {
            return Err(SignatureError::MisalignedLength(data.len()));
        }
        let blocks = data
            .chunks_exact(RECORD_SIZE)
            .map(|record| {
                let weak = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
                let mut strong = [0u8; 16];
                strong.copy_from_slice(&record[4..20]);
                BlockChecksum { weak, strong }
            })
            .collect();
        Ok(Signature { blocks })
    }

    /// Compress the packed layout with deflate (zlib framing).
    pub fn compress(&self) -> Result<Vec<u8>, SignatureError> {
        let packed = self.pack();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&packed)?;
        Ok(encoder.finish()?)
    }

    /// Inverse of [`compress`](Self::compress).
    pub fn decompress(compressed: &[u8]) -> Result<Self, SignatureError> {
        let mut decoder = ZlibDecoder::new(compressed);
        let mut packed = Vec::new();
        decoder.read_to_end(&mut packed)?;
        Self::unpack(&packed)
    }
}

/// Fills `buf` from `reader`, looping over short reads, stopping at EOF.
/// Returns the number of bytes placed in `buf` (may be less than
/// `buf.len()` only at end of stream).
fn read_fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn compress_then_decompress_round_trips() {
        let sig = Signature::compute(Cursor::new(b"a".repeat(10_000))).unwrap();
        let compressed = sig.compress().unwrap();
        let restored = Signature::decompress(&compressed).unwrap();
        assert_eq!(sig, restored);
    }

    #[test]
    fn empty_file_has_no_blocks() {
        let sig = Signature::compute(Cursor::new(Vec::new())).unwrap();
        assert!(sig.blocks.is_empty());
    }

    #[test]
    fn last_block_may_be_shorter() {
        let data = vec![7u8; BLOCK_SIZE + 10];
        let sig = Signature::compute(Cursor::new(data)).unwrap();
        assert_eq!(sig.blocks.len(), 2);
    }

    #[test]
    fn misaligned_bytes_are_rejected() {
        let err = Signature::unpack(&[0u8; 5]).unwrap_err();
        assert!(matches!(err, SignatureError::MisalignedLength(5)));
    }
}
