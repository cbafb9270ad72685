//! Hashing utilities for minisearch
//!
//! - MurmurHash3 (x86, 32-bit) for document routing
//! - Shard selection from a routing value

/// MurmurHash3 x86 32-bit over `data` with the given seed.
pub fn murmur3_x86_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h1 = seed;
    let mut blocks = data.chunks_exact(4);

    for block in blocks.by_ref() {
        let mut k1 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);

        h1 ^= k1;
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    let mut k1 = 0u32;
    if tail.len() >= 3 {
        k1 ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        k1 ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        k1 ^= tail[0] as u32;
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u32;
    fmix32(h1)
}

fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Widen every byte `c` of the routing value to the pair `[c, c >> 8]`.
fn expand_routing_bytes(routing: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(routing.len() * 2);
    for c in routing.bytes() {
        out.push(c);
        out.push(((c as u16) >> 8) as u8);
    }
    out
}

/// Routing hash of a document id or custom routing value.
pub fn routing_hash(routing: &str) -> u32 {
    murmur3_x86_32(&expand_routing_bytes(routing), 0)
}

/// Shard number for a routing value.
///
/// The hash is read as a signed 32-bit value and reduced with a floored
/// modulo, so the result is always in `0..routing_num_shards`.
pub fn shard_for_routing(routing: &str, routing_num_shards: u32) -> u32 {
    debug_assert!(routing_num_shards > 0);
    let hash = i64::from(routing_hash(routing) as i32);
    hash.rem_euclid(i64::from(routing_num_shards)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_hash_reference_vectors() {
        assert_eq!(routing_hash("hell"), 0x5a0c_b7c3);
        assert_eq!(routing_hash("hello"), 0xd7c3_1989);
        assert_eq!(routing_hash("hello w"), 0x22ab_2984);
    }

    #[test]
    fn test_murmur3_known_values() {
        assert_eq!(murmur3_x86_32(b"", 0), 0);
        assert_eq!(murmur3_x86_32(b"", 1), 0x514e_28b7);
        assert_eq!(murmur3_x86_32(b"hello", 0), 0x248b_fa47);
    }

    #[test]
    fn test_expand_routing_bytes() {
        assert_eq!(expand_routing_bytes("ab"), vec![b'a', 0, b'b', 0]);
        assert!(expand_routing_bytes("").is_empty());
    }

    #[test]
    fn test_shard_for_routing_in_range() {
        for i in 0..500 {
            let id = format!("doc-{}", i);
            let shard = shard_for_routing(&id, 5);
            assert!(shard < 5);
            assert_eq!(shard, shard_for_routing(&id, 5));
        }
    }

    #[test]
    fn test_shard_for_routing_above_i32_range() {
        let routing = (0..100)
            .map(|i| format!("doc-{}", i))
            .find(|r| (routing_hash(r) as i32) < 0)
            .unwrap();
        let hash = i64::from(routing_hash(&routing) as i32);
        for shards in [u32::MAX, 1 << 31] {
            let shard = shard_for_routing(&routing, shards);
            assert_eq!(shard, (hash + i64::from(shards)) as u32);
            assert!(shard < shards);
        }
    }

    #[test]
    fn test_shard_for_routing_spreads() {
        let mut seen = [0usize; 4];
        for i in 0..400 {
            seen[shard_for_routing(&format!("user-{}", i), 4) as usize] += 1;
        }
        assert!(seen.iter().all(|&n| n > 0));
    }
}
