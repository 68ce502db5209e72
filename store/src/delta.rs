//! Delta generation and application — the actual "diff" half of the rsync
//! algorithm, working against a [`Signature`](crate::Signature) computed by
//! the other side.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub use meshsync_protocol::DeltaItem;

use crate::checksum::{RollingChecksum, strong_checksum};
use crate::signature::{BLOCK_SIZE, Signature};

#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("delta references base block {0} but the base only has {1} blocks")]
    BlockOutOfRange(u64, usize),
}

/// Produce a sequence of [`DeltaItem`]s describing how to reconstruct
/// `new_data` from a base file whose block checksums are `base_signature`.
///
/// Classic two-checksum rsync matching: a rolling weak checksum is used as
/// a cheap first-pass filter into a hash table of the base's blocks; a
/// strong (MD5) checksum confirms any weak hit before it is trusted. On a
/// confirmed match the window jumps a full block ahead; otherwise it
/// advances one byte and the skipped byte joins the pending literal run.
pub fn generate_delta(base_signature: &Signature, new_data: &[u8]) -> Vec<DeltaItem> {
    let mut by_weak: HashMap<u32, Vec<(usize, [u8; 16])>> = HashMap::new();
    for (index, block) in base_signature.blocks.iter().enumerate() {
        by_weak
            .entry(block.weak)
            .or_default()
            .push((index, block.strong));
    }

    let mut items = Vec::new();
    let mut literal: Vec<u8> = Vec::new();

    let len = new_data.len();
    if len == 0 {
        return items;
    }
    if base_signature.blocks.is_empty() {
        items.push(DeltaItem::Literal(new_data.to_vec()));
        return items;
    }

    let mut pos = 0usize;
    let mut window = BLOCK_SIZE.min(len - pos);
    let mut rolling = RollingChecksum::of(&new_data[pos..pos + window]);

    while pos < len {
        let window_end = pos + window;
        let mut matched_index = None;
        if let Some(candidates) = by_weak.get(&rolling.value()) {
            let strong = strong_checksum(&new_data[pos..window_end]);
            matched_index = candidates
                .iter()
                .find(|(_, s)| *s == strong)
                .map(|(index, _)| *index);
        }

        if let Some(index) = matched_index {
            if !literal.is_empty() {
                items.push(DeltaItem::Literal(std::mem::take(&mut literal)));
            }
            items.push(DeltaItem::BlockRef(index as u64));
            pos = window_end;
            if pos >= len {
                break;
            }
            window = BLOCK_SIZE.min(len - pos);
            rolling.reset_to(&new_data[pos..pos + window]);
            continue;
        }

        if window_end < len {
            // No match: the window's leading byte becomes literal and the
            // window slides forward by one byte.
            let outgoing = new_data[pos];
            let incoming = new_data[window_end];
            literal.push(outgoing);
            pos += 1;
            rolling.roll(outgoing, incoming, window as u32);
        } else {
            // The window already reaches end of data with no match: the
            // rest of the file has no counterpart in the base.
            literal.extend_from_slice(&new_data[pos..]);
            pos = len;
        }
    }

    if !literal.is_empty() {
        items.push(DeltaItem::Literal(literal));
    }
    items
}

/// Reconstruct a new file from `base_file_path` plus `delta`, writing the
/// result into a temp file in the same directory and atomically replacing
/// the base (spec.md §4.1: "Why atomic replace"). The temp file is removed
/// on any failure.
pub fn apply_delta(base_file_path: &Path, delta: &[DeltaItem]) -> Result<(), DeltaError> {
    let parent = base_file_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;

    let apply = || -> Result<(), DeltaError> {
        let mut base = File::open(base_file_path)?;
        let base_len = base.metadata()?.len();
        let block_count = base_len.div_ceil(BLOCK_SIZE as u64) as usize;

        for item in delta {
            match item {
                DeltaItem::BlockRef(index) => {
                    let index = *index;
                    if index as usize >= block_count {
                        return Err(DeltaError::BlockOutOfRange(index, block_count));
                    }
                    let offset = index * BLOCK_SIZE as u64;
                    let len = BLOCK_SIZE.min((base_len - offset) as usize);
                    let mut buf = vec![0u8; len];
                    base.seek(SeekFrom::Start(offset))?;
                    base.read_exact(&mut buf)?;
                    temp.write_all(&buf)?;
                }
                DeltaItem::Literal(bytes) => {
                    temp.write_all(bytes)?;
                }
            }
        }
        temp.flush()?;
        Ok(())
    };

    apply()?;
    temp.persist(base_file_path)
        .map_err(|e| DeltaError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::Signature;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn apply_in_memory(base: &[u8], delta: &[DeltaItem]) -> Vec<u8> {
        let mut out = Vec::new();
        for item in delta {
            match item {
                DeltaItem::BlockRef(index) => {
                    let start = *index as usize * BLOCK_SIZE;
                    let end = (start + BLOCK_SIZE).min(base.len());
                    out.extend_from_slice(&base[start..end]);
                }
                DeltaItem::Literal(bytes) => out.extend_from_slice(bytes),
            }
        }
        out
    }

    proptest! {
        #[test]
        fn delta_reconstructs_target_exactly(
            base in proptest::collection::vec(any::<u8>(), 0..20_000),
            target in proptest::collection::vec(any::<u8>(), 0..20_000),
        ) {
            let sig = Signature::compute(Cursor::new(&base)).unwrap();
            let delta = generate_delta(&sig, &target);
            let reconstructed = apply_in_memory(&base, &delta);
            prop_assert_eq!(reconstructed, target);
        }
    }

    #[test]
    fn identical_content_is_all_block_refs() {
        let data = b"x".repeat(BLOCK_SIZE * 3);
        let sig = Signature::compute(Cursor::new(&data)).unwrap();
        let delta = generate_delta(&sig, &data);
        assert!(delta.iter().all(|item| matches!(item, DeltaItem::BlockRef(_))));
    }

    #[test]
    fn small_edit_yields_mostly_block_refs_and_one_literal() {
        let mut data = b"The quick brown fox".repeat(400);
        let sig = Signature::compute(Cursor::new(&data)).unwrap();
        data[100] = b'Z';
        let delta = generate_delta(&sig, &data);
        assert!(delta.iter().any(|item| matches!(item, DeltaItem::BlockRef(_))));
        assert!(delta.iter().any(|item| matches!(item, DeltaItem::Literal(_))));
    }

    #[test]
    fn empty_base_yields_single_literal() {
        let sig = Signature::default();
        let delta = generate_delta(&sig, b"hello");
        assert_eq!(delta, vec![DeltaItem::Literal(b"hello".to_vec())]);
    }

    #[test]
    fn empty_target_yields_empty_delta() {
        let sig = Signature::compute(Cursor::new(b"hello".to_vec())).unwrap();
        let delta = generate_delta(&sig, b"");
        assert!(delta.is_empty());
    }
}
