//! Domain types decoded from the node RPC surface.

use serde::Deserialize;

use crate::consensus::encode::hash_from_be_hex;
use crate::consensus::target::Target;
use crate::error::{Result, StratumError};

/// One non-coinbase template transaction: raw bytes plus wire-order txid.
#[derive(Debug, Clone)]
pub struct TemplateTx {
    pub raw: Vec<u8>,
    pub txid_le: [u8; 32],
}

/// An immutable snapshot of `getblocktemplate`.
///
/// Owned by the job layer; superseded wholesale by a newer template.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub height: u64,
    pub version: i32,
    /// Previous block hash in display (big-endian) order.
    pub prev_hash_be: [u8; 32],
    pub bits: u32,
    pub target: Target,
    pub coinbase_value: u64,
    pub cur_time: u32,
    pub min_time: u32,
    pub transactions: Vec<TemplateTx>,
    /// Extra coinbase outputs required by the template (miner fund).
    pub extra_outputs: Vec<(u64, Vec<u8>)>,
}

/// An auxiliary chain block awaiting a merged-mining commitment.
#[derive(Debug, Clone)]
pub struct AuxBlock {
    /// The hash to commit, as reported (display order).
    pub hash_be: [u8; 32],
    pub chain_id: u32,
    pub bits: u32,
    pub target: Target,
    pub height: u64,
}

impl AuxBlock {
    /// The commitment leaf: the aux hash in wire (little-endian) order.
    pub fn hash_le(&self) -> [u8; 32] {
        crate::consensus::encode::reverse32(&self.hash_be)
    }
}

// Raw RPC shapes, kept private to this module.

#[derive(Debug, Deserialize)]
pub(crate) struct GbtResult {
    pub version: i32,
    pub height: u64,
    pub bits: String,
    pub previousblockhash: String,
    #[serde(default)]
    pub transactions: Vec<GbtTx>,
    pub coinbasevalue: u64,
    pub target: String,
    pub curtime: u32,
    pub mintime: Option<u32>,
    pub minerfund: Option<GbtMinerFund>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GbtTx {
    pub data: String,
    pub txid: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GbtMinerFund {
    #[serde(default)]
    pub outputs: Vec<GbtMinerFundOutput>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GbtMinerFundOutput {
    pub value: u64,
    pub script: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateAuxBlockResult {
    pub hash: String,
    pub chainid: u32,
    pub bits: String,
    pub height: u64,
}

impl BlockTemplate {
    pub(crate) fn from_gbt(chain: &str, gbt: GbtResult) -> Result<Self> {
        let invalid = |message: String| StratumError::UpstreamUnavailable {
            chain: chain.to_string(),
            message,
        };

        let bits = u32::from_str_radix(&gbt.bits, 16)
            .map_err(|e| invalid(format!("bad bits {:?}: {e}", gbt.bits)))?;
        let target = Target::from_be_hex(&gbt.target)
            .map_err(|e| invalid(format!("bad target: {e}")))?;
        let prev_hash_be = hash_from_be_hex(&gbt.previousblockhash)
            .map_err(|e| invalid(format!("bad previousblockhash: {e}")))?;

        let mut transactions = Vec::with_capacity(gbt.transactions.len());
        for tx in gbt.transactions {
            let raw = hex::decode(&tx.data)
                .map_err(|e| invalid(format!("bad transaction data: {e}")))?;
            let txid_be = hash_from_be_hex(&tx.txid)
                .map_err(|e| invalid(format!("bad txid: {e}")))?;
            transactions.push(TemplateTx {
                raw,
                txid_le: crate::consensus::encode::reverse32(&txid_be),
            });
        }

        let mut extra_outputs = Vec::new();
        if let Some(fund) = gbt.minerfund {
            for output in fund.outputs {
                if output.value == 0 {
                    continue;
                }
                let script = hex::decode(&output.script)
                    .map_err(|e| invalid(format!("bad minerfund script: {e}")))?;
                extra_outputs.push((output.value, script));
            }
        }

        Ok(BlockTemplate {
            height: gbt.height,
            version: gbt.version,
            prev_hash_be,
            bits,
            target,
            coinbase_value: gbt.coinbasevalue,
            cur_time: gbt.curtime,
            min_time: gbt.mintime.unwrap_or(gbt.curtime),
            transactions,
            extra_outputs,
        })
    }
}

impl AuxBlock {
    pub(crate) fn from_rpc(chain: &str, raw: CreateAuxBlockResult) -> Result<Self> {
        let invalid = |message: String| StratumError::UpstreamUnavailable {
            chain: chain.to_string(),
            message,
        };

        let bits = u32::from_str_radix(&raw.bits, 16)
            .map_err(|e| invalid(format!("bad aux bits {:?}: {e}", raw.bits)))?;
        let hash_be =
            hash_from_be_hex(&raw.hash).map_err(|e| invalid(format!("bad aux hash: {e}")))?;

        Ok(AuxBlock {
            hash_be,
            chain_id: raw.chainid,
            bits,
            target: Target::from_compact(bits)?,
            height: raw.height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_decodes_from_gbt_json() {
        let json = serde_json::json!({
            "version": 536870912u32,
            "height": 123456,
            "bits": "1d00ffff",
            "previousblockhash": "00000000000000000000000000000000000000000000000000000000000000aa",
            "transactions": [
                {"data": "deadbeef", "txid": format!("{:0>64}", "11")}
            ],
            "coinbasevalue": 5_000_000_000u64,
            "target": "00000000ffff0000000000000000000000000000000000000000000000000000",
            "curtime": 1_700_000_000u32,
            "minerfund": {"outputs": [{"value": 100u64, "script": "51"}]}
        });
        let gbt: GbtResult = serde_json::from_value(json).unwrap();
        let template = BlockTemplate::from_gbt("RXD", gbt).unwrap();

        assert_eq!(template.height, 123_456);
        assert_eq!(template.bits, 0x1d00ffff);
        assert_eq!(template.prev_hash_be[31], 0xaa);
        assert_eq!(template.transactions.len(), 1);
        // txid is reversed into wire order.
        assert_eq!(template.transactions[0].txid_le[0], 0x11);
        assert_eq!(template.extra_outputs, vec![(100, vec![0x51])]);
        assert_eq!(template.min_time, template.cur_time);
    }

    #[test]
    fn aux_block_decodes_and_reverses() {
        let raw = CreateAuxBlockResult {
            hash: format!("{:0>64}", "ff"),
            chainid: 42,
            bits: "1e0fffff".into(),
            height: 99,
        };
        let aux = AuxBlock::from_rpc("AUX", raw).unwrap();
        assert_eq!(aux.hash_be[31], 0xff);
        assert_eq!(aux.hash_le()[0], 0xff);
        assert_eq!(aux.chain_id, 42);
        assert_eq!(aux.target, Target::from_compact(0x1e0fffff).unwrap());
    }
}
