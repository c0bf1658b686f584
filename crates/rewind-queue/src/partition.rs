//! Stable partition assignment

/// Pick the partition for a key
///
/// Uses the first eight bytes of the BLAKE3 hash of the key, so the mapping
/// is stable across processes and restarts.
pub fn partition_for(key: &str, partitions: usize) -> usize {
    if partitions <= 1 {
        return 0;
    }
    let hash = blake3::hash(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    (u64::from_le_bytes(prefix) % partitions as u64) as usize
}
