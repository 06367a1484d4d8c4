//! Partitioning hash shared by every worker in a job.
//!
//! Every worker must compute the same bucket for the same key, so this uses FNV-1a rather
//! than a randomly-seeded hasher: deterministic, and stable across processes and platforms.

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Hash `key` to a nonnegative integer that is stable across processes.
///
/// Computes the 64-bit FNV-1a hash of the key's UTF-8 bytes and returns its low 31 bits.
pub fn ihash(key: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    (hash & 0x7fff_ffff) as u32
}

/// The reduce partition a key belongs to, for a job with `n_reduce` reduce tasks.
pub fn partition_for_key(key: &str, n_reduce: u32) -> u32 {
    ihash(key) % n_reduce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_hashes_identically_every_call() {
        assert_eq!(ihash("hello"), ihash("hello"));
        assert_eq!(ihash(""), ihash(""));
    }

    #[test]
    fn different_keys_usually_differ() {
        assert_ne!(ihash("hello"), ihash("world"));
    }

    #[test]
    fn result_fits_in_31_bits() {
        for key in ["a", "word", "programming", "", "x".repeat(500).as_str()] {
            assert!(ihash(key) <= 0x7fff_ffff);
        }
    }

    #[test]
    fn partition_is_within_range() {
        for key in ["alpha", "beta", "gamma", "delta"] {
            let p = partition_for_key(key, 5);
            assert!(p < 5);
        }
    }
}
