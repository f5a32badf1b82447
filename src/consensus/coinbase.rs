//! Coinbase transaction construction.
//!
//! Radiant uses standard pre-SegWit Bitcoin transaction encoding. The
//! coinbase scriptSig carries the BIP34 height push, the proxy signature,
//! and an 8-byte extranonce window (4-byte session prefix + 4-byte miner
//! suffix). The transaction is produced split into prefix/suffix around
//! that window so every share reassembles the same byte layout.

use crate::consensus::auxpow::MergedCommitment;
use crate::consensus::encode::{op_push, var_int};
use crate::error::{Result, StratumError};

/// Bytes reserved in the scriptSig for session prefix + miner suffix.
pub const EXTRANONCE_TOTAL_SIZE: usize = 8;

/// Consensus cap on the coinbase scriptSig.
const MAX_SCRIPT_SIG: usize = 100;

/// Inputs to coinbase construction, one set per template refresh.
#[derive(Debug, Clone)]
pub struct CoinbaseParams<'a> {
    pub height: u64,
    /// Proxy signature tag; truncated if it would overflow the scriptSig.
    pub signature: &'a [u8],
    /// HASH160 of the resolved payout address (P2PKH output).
    pub payout_pub_h160: [u8; 20],
    /// Block subsidy plus fees, from the template.
    pub value: u64,
    /// Extra outputs required by the template (e.g. miner fund).
    pub extra_outputs: &'a [(u64, Vec<u8>)],
    /// Merged-mining commitment output, when an auxiliary chain is active.
    pub merged_commitment: Option<MergedCommitment>,
}

/// A coinbase split around the extranonce window.
#[derive(Debug, Clone)]
pub struct CoinbaseParts {
    /// Everything before the extranonce bytes.
    pub prefix: Vec<u8>,
    /// Everything after the extranonce bytes.
    pub suffix: Vec<u8>,
}

impl CoinbaseParts {
    /// Reassemble the full transaction for a given extranonce.
    pub fn assemble(&self, extranonce: &[u8]) -> Result<Vec<u8>> {
        if extranonce.len() != EXTRANONCE_TOTAL_SIZE {
            return Err(StratumError::ConsensusBuild {
                message: format!(
                    "extranonce must be {EXTRANONCE_TOTAL_SIZE} bytes, got {}",
                    extranonce.len()
                ),
            });
        }
        let mut tx = Vec::with_capacity(self.prefix.len() + extranonce.len() + self.suffix.len());
        tx.extend_from_slice(&self.prefix);
        tx.extend_from_slice(extranonce);
        tx.extend_from_slice(&self.suffix);
        Ok(tx)
    }
}

/// BIP34 height-in-coinbase serialization: minimal little-endian with a
/// spare high bit, as the reference implementation encodes script numbers.
pub fn bip34_height(height: u64) -> Vec<u8> {
    let mut extra = 0u32;
    while height > (1u64 << (7 + 8 * extra)) - 1 {
        extra += 1;
    }
    height.to_le_bytes()[..(extra as usize + 1)].to_vec()
}

/// Build the coinbase transaction for a template.
pub fn build_coinbase(params: &CoinbaseParams<'_>) -> Result<CoinbaseParts> {
    let height_bytes = bip34_height(params.height);

    // Keep the scriptSig within consensus bounds regardless of the
    // configured signature length. Capping at 0x4b keeps the signature
    // push a single opcode byte.
    let fixed = height_bytes.len() + 2 + EXTRANONCE_TOTAL_SIZE;
    let sig_budget = MAX_SCRIPT_SIG
        .saturating_sub(fixed)
        .min(0x4b)
        .min(params.signature.len());
    let signature = &params.signature[..sig_budget];

    let mut script_head = Vec::new();
    script_head.extend_from_slice(&op_push(height_bytes.len()));
    script_head.extend_from_slice(&height_bytes);
    script_head.extend_from_slice(&op_push(signature.len()));
    script_head.extend_from_slice(signature);

    let script_len = script_head.len() + EXTRANONCE_TOTAL_SIZE;
    if script_len > MAX_SCRIPT_SIG {
        return Err(StratumError::ConsensusBuild {
            message: format!("coinbase scriptSig {script_len} bytes exceeds {MAX_SCRIPT_SIG}"),
        });
    }

    // Prefix: version, input count, null outpoint, script up to the window.
    let mut prefix = Vec::new();
    prefix.extend_from_slice(&1u32.to_le_bytes());
    prefix.push(0x01);
    prefix.extend_from_slice(&[0u8; 32]);
    prefix.extend_from_slice(&[0xff; 4]);
    prefix.extend_from_slice(&var_int(script_len as u64));
    prefix.extend_from_slice(&script_head);

    // Outputs: payout P2PKH, then template extras, then the merged-mining
    // commitment when active.
    let mut outputs: Vec<Vec<u8>> = Vec::new();

    let mut p2pkh = Vec::with_capacity(25);
    p2pkh.extend_from_slice(&[0x76, 0xa9, 0x14]);
    p2pkh.extend_from_slice(&params.payout_pub_h160);
    p2pkh.extend_from_slice(&[0x88, 0xac]);
    outputs.push(encode_output(params.value, &p2pkh));

    for (value, script) in params.extra_outputs {
        outputs.push(encode_output(*value, script));
    }

    if let Some(commitment) = &params.merged_commitment {
        outputs.push(encode_output(0, &commitment.script()));
    }

    // Suffix: input sequence, outputs, locktime.
    let mut suffix = Vec::new();
    suffix.extend_from_slice(&[0xff; 4]);
    suffix.extend_from_slice(&var_int(outputs.len() as u64));
    for output in &outputs {
        suffix.extend_from_slice(output);
    }
    suffix.extend_from_slice(&[0u8; 4]);

    Ok(CoinbaseParts { prefix, suffix })
}

fn encode_output(value: u64, script: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 1 + script.len());
    out.extend_from_slice(&value.to_le_bytes());
    out.extend_from_slice(&var_int(script.len() as u64));
    out.extend_from_slice(script);
    out
}
