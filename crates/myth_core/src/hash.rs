//! Content hashing helpers shared by the caches.

use std::hash::{Hash, Hasher};

use xxhash_rust::xxh3::Xxh3;

/// Computes a 64-bit hash for a key using `FxHasher`.
///
/// Suitable for in-process lookup keys; not stable across builds.
#[inline]
pub fn fx_hash_key<K: Hash>(key: &K) -> u64 {
    let mut hasher = rustc_hash::FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

/// xxh3 hash of a key's `Hash` encoding.
///
/// Independent of process state and hash seeds, so it can key data that
/// is persisted. Only fields with a stable meaning across runs (no native
/// handles) may take part in the key.
#[must_use]
pub fn xxh3_key<K: Hash>(key: &K) -> u64 {
    let mut hasher = Xxh3::new();
    key.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fx_hash_is_deterministic() {
        assert_eq!(fx_hash_key(&(1u32, 2u64)), fx_hash_key(&(1u32, 2u64)));
        assert_ne!(fx_hash_key(&(1u32, 2u64)), fx_hash_key(&(2u32, 1u64)));
    }

    #[test]
    fn test_xxh3_key_depends_only_on_value() {
        let a = (7u32, String::from("blur"));
        assert_eq!(xxh3_key(&a), xxh3_key(&a.clone()));
        assert_ne!(xxh3_key(&a), xxh3_key(&(8u32, String::from("blur"))));
    }
}
