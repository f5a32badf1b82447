//! Difficulty targets.
//!
//! A target is a 256-bit unsigned integer stored big-endian. A
//! proof-of-work digest (wire order, little-endian integer) meets a target
//! iff `digest <= target`; a numerically lower target is harder.

use std::cmp::Ordering;
use std::fmt;

use crate::consensus::encode::{hash_from_be_hex, reverse32};
use crate::error::{Result, StratumError};

/// The diff1 reference target used for difficulty scaling.
const DIFF1_BYTES: [u8; 32] = [
    0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00,
];

/// A 256-bit difficulty target, big-endian.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Target([u8; 32]);

impl Target {
    /// The difficulty-1 reference target.
    pub fn diff1() -> Self {
        Target(DIFF1_BYTES)
    }

    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Target(bytes)
    }

    pub fn as_be_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a 64-character big-endian hex string (the node's `target` field).
    pub fn from_be_hex(s: &str) -> Result<Self> {
        Ok(Target(hash_from_be_hex(s)?))
    }

    /// Expand a compact "bits" encoding into a full-width target.
    pub fn from_compact(bits: u32) -> Result<Self> {
        let exponent = (bits >> 24) as usize;
        let mantissa = bits & 0x00ff_ffff;
        let mut out = [0u8; 32];

        if exponent <= 3 {
            let shifted = mantissa >> (8 * (3 - exponent));
            out[29] = (shifted >> 16) as u8;
            out[30] = (shifted >> 8) as u8;
            out[31] = shifted as u8;
        } else {
            if exponent > 32 {
                return Err(StratumError::ConsensusBuild {
                    message: format!("compact bits exponent {exponent} overflows 256 bits"),
                });
            }
            let idx = 32 - exponent;
            out[idx] = (mantissa >> 16) as u8;
            out[idx + 1] = (mantissa >> 8) as u8;
            out[idx + 2] = mantissa as u8;
        }

        Ok(Target(out))
    }

    /// Whether a proof-of-work digest (wire order) meets this target.
    pub fn met_by(&self, digest_le: &[u8; 32]) -> bool {
        reverse32(digest_le) <= self.0
    }

    /// The diff1-scaled difficulty of this target.
    pub fn difficulty(&self) -> f64 {
        let value = be_to_f64(&self.0);
        if value == 0.0 {
            return f64::INFINITY;
        }
        be_to_f64(&DIFF1_BYTES) / value
    }

    /// The diff1-scaled difficulty achieved by a proof-of-work digest.
    pub fn digest_difficulty(digest_le: &[u8; 32]) -> f64 {
        let value = be_to_f64(&reverse32(digest_le));
        if value == 0.0 {
            return f64::INFINITY;
        }
        be_to_f64(&DIFF1_BYTES) / value
    }
}

fn be_to_f64(bytes: &[u8; 32]) -> f64 {
    bytes.iter().fold(0.0, |acc, &b| acc * 256.0 + b as f64)
}

impl PartialOrd for Target {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Target {
    fn cmp(&self, other: &Self) -> Ordering {
        // Big-endian byte order matches numeric order.
        self.0.cmp(&other.0)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target({})", hex::encode(self.0))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
