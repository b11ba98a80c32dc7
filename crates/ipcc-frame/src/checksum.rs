//! Fletcher-16 checksum.

/// Streaming Fletcher-16 state.
///
/// Both accumulators are reduced modulo 255 after every byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fletcher16 {
    s1: u16,
    s2: u16,
}

impl Fletcher16 {
    pub const fn new() -> Self {
        Self { s1: 0, s2: 0 }
    }

    /// Fold `buf` into the running sums.
    pub fn update(&mut self, buf: &[u8]) {
        for &byte in buf {
            self.s1 = (self.s1 + u16::from(byte)) % 255;
            self.s2 = (self.s2 + self.s1) % 255;
        }
    }

    /// The checksum of everything folded in so far.
    pub fn finish(&self) -> u16 {
        (self.s2 << 8) | self.s1
    }
}

/// Checksum of `buf`. Zero for an empty buffer.
pub fn checksum(buf: &[u8]) -> u16 {
    let mut sum = Fletcher16::new();
    sum.update(buf);
    sum.finish()
}
