//! Weak (rolling) and strong block checksums, adapted from rsync.
//!
//! The weak checksum mirrors classic rsync's Adler-32-style `rsum`: two
//! 16-bit accumulators (`s1`, the byte sum; `s2`, the running sum of
//! prefix sums) packed into a 32-bit value. It is cheap to update
//! incrementally as a window slides one byte at a time, which is the whole
//! point of using it as the first-pass filter before the strong checksum.

use md5::{Digest, Md5};

/// A rolling weak checksum over a sliding window of bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollingChecksum {
    s1: u32,
    s2: u32,
}

impl RollingChecksum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the checksum of `data` from scratch.
    pub fn of(data: &[u8]) -> Self {
        let mut checksum = Self::new();
        checksum.reset_to(data);
        checksum
    }

    /// Resets the accumulators to the checksum of `data`.
    pub fn reset_to(&mut self, data: &[u8]) {
        let mut s1: u32 = 0;
        let mut s2: u32 = 0;
        let len = data.len() as u32;
        for (i, &byte) in data.iter().enumerate() {
            s1 = s1.wrapping_add(byte as u32);
            s2 = s2.wrapping_add((len - i as u32) * byte as u32);
        }
        self.s1 = s1 & 0xffff;
        self.s2 = s2 & 0xffff;
    }

    /// Slides the window forward by one byte: `outgoing` leaves at the back,
    /// `incoming` joins at the front, `window_len` is the window size after
    /// the roll (constant in practice, but threaded through explicitly).
    pub fn roll(&mut self, outgoing: u8, incoming: u8, window_len: u32) {
        self.s1 = self
            .s1
            .wrapping_sub(outgoing as u32)
            .wrapping_add(incoming as u32)
            & 0xffff;
        self.s2 = self
            .s2
            .wrapping_sub(window_len.wrapping_mul(outgoing as u32))
            .wrapping_add(self.s1)
            & 0xffff;
    }

    pub fn value(&self) -> u32 {
        (self.s2 << 16) | self.s1
    }
}

/// Strong (MD5) checksum of a block.
pub fn strong_checksum(data: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}
