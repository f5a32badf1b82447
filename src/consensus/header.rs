//! 80-byte block header assembly.

/// Serialize a block header in wire order.
///
/// `prev_hash_le` and `merkle_root_le` are in header (little-endian) byte
/// order; scalar fields are encoded little-endian.
pub fn build_header(
    version: i32,
    prev_hash_le: &[u8; 32],
    merkle_root_le: &[u8; 32],
    time: u32,
    bits: u32,
    nonce: u32,
) -> [u8; 80] {
    let mut header = [0u8; 80];
    header[0..4].copy_from_slice(&version.to_le_bytes());
    header[4..36].copy_from_slice(prev_hash_le);
    header[36..68].copy_from_slice(merkle_root_le);
    header[68..72].copy_from_slice(&time.to_le_bytes());
    header[72..76].copy_from_slice(&bits.to_le_bytes());
    header[76..80].copy_from_slice(&nonce.to_le_bytes());
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_layout() {
        let prev = [0x11u8; 32];
        let root = [0x22u8; 32];
        let header = build_header(2, &prev, &root, 0x5f5e_1000, 0x1d00_ffff, 0xdead_beef);

        assert_eq!(&header[0..4], &[0x02, 0x00, 0x00, 0x00]);
        assert_eq!(&header[4..36], &prev);
        assert_eq!(&header[36..68], &root);
        assert_eq!(&header[68..72], &[0x00, 0x10, 0x5e, 0x5f]);
        assert_eq!(&header[72..76], &[0xff, 0xff, 0x00, 0x1d]);
        assert_eq!(&header[76..80], &[0xef, 0xbe, 0xad, 0xde]);
    }
}
