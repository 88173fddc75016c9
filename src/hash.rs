//! Content hashing shared by uniform-block keys and the stage cache.

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub fn fnv1a64(bytes: &[u8]) -> u64 {
    fnv1a64_with_seed(bytes, 0)
}

pub fn fnv1a64_with_seed(bytes: &[u8], seed: u64) -> u64 {
    let mut hash = FNV_OFFSET ^ seed;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Order-independent key for a set of uniform names.
///
/// Names are sorted first, then folded as `hash += hash * 101 + fnv(name)` so
/// two stages touching the same uniforms map to the same block.
pub fn name_set_hash<'a, I>(names: I) -> u64
where
    I: IntoIterator<Item = &'a str>,
{
    let mut sorted: Vec<&str> = names.into_iter().collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.into_iter().fold(0_u64, |hash, name| {
        hash.wrapping_add(hash.wrapping_mul(101).wrapping_add(fnv1a64(name.as_bytes())))
    })
}
