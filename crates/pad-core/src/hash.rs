//! Content hash for cheap "definitely unchanged" checks.
//!
//! FNV-1a (32-bit) over the UTF-8 bytes of a body. Not cryptographic; a
//! matching hash is always confirmed with a full comparison by callers that
//! need certainty.

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1a hash of `text`. Stable across Rust versions (unlike DefaultHasher).
pub fn content_hash(text: &str) -> u32 {
    let mut hash = FNV_OFFSET;
    for byte in text.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// 64-bit FNV-1a, used where a match is trusted without the full text.
pub fn fingerprint_hash(text: &str) -> u64 {
    const FNV_OFFSET_64: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME_64: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET_64;
    for byte in text.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME_64);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_offset_basis() {
        assert_eq!(content_hash(""), FNV_OFFSET);
    }

    #[test]
    fn test_known_vector() {
        // Published FNV-1a 32-bit test vector.
        assert_eq!(content_hash("a"), 0xe40c_292c);
    }

    #[test]
    fn test_order_sensitive() {
        assert_ne!(content_hash("ab"), content_hash("ba"));
    }

    #[test]
    fn test_fingerprint_known_vector() {
        // Published FNV-1a 64-bit test vector.
        assert_eq!(fingerprint_hash("a"), 0xaf63_dc4c_8601_ec8c);
    }
}
