//! Payout address decoding.
//!
//! Radiant uses legacy base58check P2PKH addresses; the hash160 inside
//! becomes the coinbase payout script. Worker identities arrive as
//! `address.worker`; only the address part is decoded.

use crate::error::{Result, StratumError};

const MAINNET_VERSIONS: [u8; 2] = [0, 5];
const TESTNET_VERSIONS: [u8; 2] = [111, 196];

/// Decode a base58check address into its 20-byte script hash, validating
/// the network version byte.
pub fn decode_p2pkh_address(address: &str, testnet: bool) -> Result<[u8; 20]> {
    let invalid = |message: String| StratumError::Unauthorized { message };

    let decoded = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|e| invalid(format!("address {address} failed base58check: {e}")))?;

    if decoded.len() != 21 {
        return Err(invalid(format!(
            "address {address} has payload of {} bytes",
            decoded.len().saturating_sub(1)
        )));
    }

    let expected = if testnet {
        TESTNET_VERSIONS
    } else {
        MAINNET_VERSIONS
    };
    if !expected.contains(&decoded[0]) {
        return Err(invalid(format!(
            "address {address} has wrong network version {}",
            decoded[0]
        )));
    }

    let mut h160 = [0u8; 20];
    h160.copy_from_slice(&decoded[1..]);
    Ok(h160)
}

/// Split an `address.worker` identity into its address part.
pub fn address_part(identity: &str) -> &str {
    identity.split('.').next().unwrap_or(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    // The well-known genesis address: version 0, hash160 62e907b1...
    const GENESIS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    #[test]
    fn decodes_known_mainnet_address() {
        let h160 = decode_p2pkh_address(GENESIS, false).unwrap();
        assert_eq!(
            hex::encode(h160),
            "62e907b15cbf27d5425399ebf6f0fb50ebb88f18"
        );
    }

    #[test]
    fn rejects_wrong_network() {
        assert!(decode_p2pkh_address(GENESIS, true).is_err());
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let mut corrupted = GENESIS.to_string();
        corrupted.pop();
        corrupted.push('b');
        assert!(decode_p2pkh_address(&corrupted, false).is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_p2pkh_address("not-an-address", false).is_err());
        assert!(decode_p2pkh_address("", false).is_err());
    }

    #[test]
    fn identity_splits_on_dot() {
        assert_eq!(address_part("addr.rig1"), "addr");
        assert_eq!(address_part("addr"), "addr");
        assert_eq!(address_part("addr.rig1.extra"), "addr");
    }
}
