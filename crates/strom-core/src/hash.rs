//! Kafka-compatible key hashing.
//!
//! Partition selection for keyed records must agree with whatever the broker
//! side does, otherwise key ordering silently breaks the moment a second
//! writer shows up. This module is the single implementation used for that
//! purpose; do not fork it per call site.

/// Murmur2, matching the Kafka Java client's `Utils.murmur2()`.
///
/// 32-bit unsigned result with the Java seed (`0x9747b28c`) and mixing
/// constants. Java's signed int arithmetic wraps the same way as `u32`
/// wrapping ops, so the outputs are bit-identical.
pub fn murmur2(data: &[u8]) -> u32 {
    const SEED: u32 = 0x9747b28c;
    const M: u32 = 0x5bd1e995;
    const R: u32 = 24;

    let mut h: u32 = SEED ^ (data.len() as u32);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        h ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;

    h
}

/// Deterministic partition for a key: `toPositive(murmur2(key)) % n`.
///
/// Same key always resolves to the same partition as long as the partition
/// count is stable.
#[inline]
pub fn murmur2_partition(key: &[u8], num_partitions: u32) -> u32 {
    (murmur2(key) & 0x7fffffff) % num_partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn murmur2_reference_vectors() {
        // Values produced by the Kafka Java client's Utils.murmur2().
        assert_eq!(murmur2(b""), 275646681);
        assert_eq!(murmur2(b"hello"), 1682149141);
        assert_eq!(murmur2(b"kafka"), 1762226537);
    }

    #[test]
    fn same_key_same_partition() {
        let key = b"entity-42";
        assert_eq!(murmur2_partition(key, 12), murmur2_partition(key, 12));
        assert!(murmur2_partition(key, 12) < 12);
    }

    #[test]
    fn tail_lengths_covered() {
        // 0..=3 trailing bytes after the 4-byte chunks all take distinct paths.
        for len in 0..16usize {
            let data: Vec<u8> = (0..len as u8).collect();
            assert!(murmur2_partition(&data, 7) < 7);
        }
    }

    #[test]
    fn keys_spread_across_partitions() {
        let mut hits = [0u32; 8];
        for i in 0..1000u32 {
            let p = murmur2_partition(&i.to_be_bytes(), 8);
            hits[p as usize] += 1;
        }
        for count in &hits {
            assert!(*count > 0, "a partition received no keys");
        }
    }
}
