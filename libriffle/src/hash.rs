use foldhash::fast::FixedState;
use std::hash::BuildHasher as _;
use std::hash::Hash;
use std::hash::Hasher;

/// A map keyed by values that are already hashes. Hashing a key just passes the key through.
pub(crate) type HashedFeatureMap<V> = std::collections::HashMap<u64, V, PassThroughHashBuilder>;

pub(crate) fn hash_bytes(bytes: &[u8]) -> u64 {
    FixedState::default().hash_one(bytes)
}

/// Hashes an arbitrary value with a fixed seed, so the result is stable from run to run.
pub(crate) fn hash_value(value: impl Hash) -> u64 {
    FixedState::default().hash_one(value)
}

#[derive(Default, Clone, Copy)]
pub(crate) struct PassThroughHashBuilder;

pub(crate) struct PassThroughHasher {
    hash: u64,
}

impl std::hash::BuildHasher for PassThroughHashBuilder {
    type Hasher = PassThroughHasher;

    fn build_hasher(&self) -> PassThroughHasher {
        PassThroughHasher { hash: 0 }
    }
}

impl Hasher for PassThroughHasher {
    fn finish(&self) -> u64 {
        self.hash
    }

    fn write(&mut self, _bytes: &[u8]) {
        unimplemented!("PassThroughHasher used with non-u64 key");
    }

    fn write_u64(&mut self, value: u64) {
        debug_assert_eq!(self.hash, 0);
        self.hash = value;
    }
}
