use std::hash::Hasher;

/// Hashes an intermediate key. FNV has no per-process seed, so every
/// worker of a job computes the same value for the same key.
pub fn ihash(key: &str) -> u32 {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(key.as_bytes());
    (hasher.finish() & 0x7fff_ffff) as u32
}

/// Reduce bucket for `key`. `n_reduce` must be non-zero.
pub fn partition(key: &str, n_reduce: u64) -> u64 {
    debug_assert!(n_reduce > 0, "partition over zero buckets");
    u64::from(ihash(key)) % n_reduce
}
