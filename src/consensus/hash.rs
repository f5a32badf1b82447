//! Hash families used by the relay.
//!
//! Two independent families coexist at runtime: the proof-of-work hash
//! (shared by both chains of a merged-mining pair, used for every
//! difficulty comparison) and the block-identification hash (used only for
//! explorers, logs, and upstream submission identifiers). The two must
//! never be mixed: a header's display hash says nothing about its work.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

/// Double SHA-256. Transaction ids, merkle nodes, and block identifiers.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// SHA-512 truncated to 256 bits.
pub fn sha512_256(data: &[u8]) -> [u8; 32] {
    let digest = Sha512::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    out
}

/// Double truncated SHA-512: the Radiant proof-of-work function.
pub fn sha512d_256(data: &[u8]) -> [u8; 32] {
    sha512_256(&sha512_256(data))
}

/// A proof-of-work hash function over an 80-byte header.
///
/// The digest is produced in wire order: interpreting it as a little-endian
/// 256-bit integer gives the value compared against a [`super::Target`].
pub trait PowHash: Send + Sync {
    fn pow_hash(&self, header: &[u8]) -> [u8; 32];
}

/// Proof-of-work algorithms supported by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowAlgorithm {
    /// Double truncated SHA-512 (Radiant).
    Sha512d256,
    /// Double SHA-256 (Bitcoin-family).
    Sha256d,
}

impl Default for PowAlgorithm {
    fn default() -> Self {
        PowAlgorithm::Sha512d256
    }
}

impl PowHash for PowAlgorithm {
    fn pow_hash(&self, header: &[u8]) -> [u8; 32] {
        match self {
            PowAlgorithm::Sha512d256 => sha512d_256(header),
            PowAlgorithm::Sha256d => sha256d(header),
        }
    }
}

/// The chain-identification hash of a block header.
///
/// Returned in wire (little-endian) order; reverse for display hex. Never
/// valid for difficulty comparison.
pub fn display_hash(header: &[u8]) -> [u8; 32] {
    sha256d(header)
}
