use std::hash::Hasher;

/// A deterministic FNV-1a 64-bit hasher.
///
/// Used instead of `DefaultHasher` (which is randomized) wherever a seed or
/// digest must be identical across processes.
#[derive(Debug)]
pub struct FnvHasher {
    state: u64,
}

impl Default for FnvHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl FnvHasher {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }
}

/// Derive a per-object, per-tick seed that does not depend on iteration order.
pub fn object_seed(seed: u64, tick: u64, object: u64) -> u64 {
    let mut hasher = FnvHasher::new();
    hasher.write_u64(seed);
    hasher.write_u64(tick);
    hasher.write_u64(object);
    hasher.finish()
}
