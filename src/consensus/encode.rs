//! Wire-format primitives shared by the consensus builders.
//!
//! Every byte-order decision lives here or in the sibling modules so the
//! little-endian header fields and big-endian hash displays cannot drift
//! apart across call sites.

use crate::error::{Result, StratumError};

/// Bitcoin-style variable-length integer.
pub fn var_int(n: u64) -> Vec<u8> {
    if n < 0xfd {
        vec![n as u8]
    } else if n <= 0xffff {
        let mut v = vec![0xfd];
        v.extend_from_slice(&(n as u16).to_le_bytes());
        v
    } else if n <= 0xffff_ffff {
        let mut v = vec![0xfe];
        v.extend_from_slice(&(n as u32).to_le_bytes());
        v
    } else {
        let mut v = vec![0xff];
        v.extend_from_slice(&n.to_le_bytes());
        v
    }
}

/// Script data-push opcode prefix for a payload of `len` bytes.
pub fn op_push(len: usize) -> Vec<u8> {
    if len < 0x4c {
        vec![len as u8]
    } else if len <= 0xff {
        vec![0x4c, len as u8]
    } else if len <= 0xffff {
        let mut v = vec![0x4d];
        v.extend_from_slice(&(len as u16).to_le_bytes());
        v
    } else {
        let mut v = vec![0x4e];
        v.extend_from_slice(&(len as u32).to_le_bytes());
        v
    }
}

/// Decode a 64-character big-endian hash hex string into 32 bytes.
pub fn hash_from_be_hex(s: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(s).map_err(|e| StratumError::Protocol {
        message: format!("invalid hash hex: {e}"),
        method: None,
    })?;
    bytes.try_into().map_err(|_| StratumError::Protocol {
        message: format!("hash must be 32 bytes, got {}", s.len() / 2),
        method: None,
    })
}

/// Reverse a 32-byte hash in place-copy; converts between the wire (LE)
/// and display (BE) conventions.
pub fn reverse32(h: &[u8; 32]) -> [u8; 32] {
    let mut out = *h;
    out.reverse();
    out
}

/// Byte-swap each 4-byte word of a 32-byte hash.
///
/// Stratum `mining.notify` carries the previous block hash as eight
/// 32-bit words, each word byte-swapped relative to header byte order.
pub fn swap_words32(h: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (src, dst) in h.chunks_exact(4).zip(out.chunks_exact_mut(4)) {
        dst.copy_from_slice(src);
        dst.reverse();
    }
    out
}

/// Parse a fixed-width big-endian hex field (ntime, nonce, version, bits).
pub fn u32_from_be_hex(s: &str) -> Result<u32> {
    let bytes = hex::decode(s).map_err(|e| StratumError::Protocol {
        message: format!("invalid hex field: {e}"),
        method: None,
    })?;
    let bytes: [u8; 4] = bytes.try_into().map_err(|_| StratumError::Protocol {
        message: format!("field must be 4 bytes, got {}", s.len() / 2),
        method: None,
    })?;
    Ok(u32::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_int_boundaries() {
        assert_eq!(var_int(0), vec![0x00]);
        assert_eq!(var_int(0xfc), vec![0xfc]);
        assert_eq!(var_int(0xfd), vec![0xfd, 0xfd, 0x00]);
        assert_eq!(var_int(0xffff), vec![0xfd, 0xff, 0xff]);
        assert_eq!(var_int(0x1_0000), vec![0xfe, 0x00, 0x00, 0x01, 0x00]);
        assert_eq!(
            var_int(0x1_0000_0000),
            vec![0xff, 0, 0, 0, 0, 1, 0, 0, 0]
        );
    }

    #[test]
    fn op_push_boundaries() {
        assert_eq!(op_push(0x4b), vec![0x4b]);
        assert_eq!(op_push(0x4c), vec![0x4c, 0x4c]);
        assert_eq!(op_push(0xff), vec![0x4c, 0xff]);
        assert_eq!(op_push(0x100), vec![0x4d, 0x00, 0x01]);
    }

    #[test]
    fn word_swap_round_trips() {
        let mut h = [0u8; 32];
        for (i, b) in h.iter_mut().enumerate() {
            *b = i as u8;
        }
        let swapped = swap_words32(&h);
        assert_eq!(&swapped[..4], &[3, 2, 1, 0]);
        assert_eq!(swap_words32(&swapped), h);
    }

    #[test]
    fn be_hex_fields() {
        assert_eq!(u32_from_be_hex("207fffff").unwrap(), 0x207f_ffff);
        assert!(u32_from_be_hex("ff").is_err());
        assert!(u32_from_be_hex("zzzzzzzz").is_err());
    }
}
