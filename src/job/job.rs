//! Immutable mining-job snapshots.

use serde_json::{json, Value};

use crate::consensus::coinbase::CoinbaseParts;
use crate::consensus::encode::{swap_words32, var_int};
use crate::consensus::target::Target;

/// Auxiliary chain material carried by a merged-mining job.
#[derive(Debug, Clone)]
pub struct AuxJobInfo {
    pub chain: String,
    /// Hash to commit, display order as reported by the node.
    pub hash_be: [u8; 32],
    pub target: Target,
    pub height: u64,
    pub chain_id: u32,
}

/// A versioned, immutable snapshot of broadcastable work.
///
/// Combines one primary template (and optionally one aux block) into
/// miner-ready material. Never mutated after creation; superseding jobs
/// are new objects, so concurrent readers can never observe a torn job.
#[derive(Debug, Clone)]
pub struct Job {
    /// Opaque time-based token, unique per broadcast.
    pub id: String,
    pub height: u64,
    pub version: i32,
    /// Previous block hash in header (little-endian) byte order.
    pub prev_hash_le: [u8; 32],
    /// Coinbase split around the 8-byte extranonce window.
    pub coinbase: CoinbaseParts,
    /// Index-0 sibling branch over the template transaction ids.
    pub merkle_branch: Vec<[u8; 32]>,
    pub bits: u32,
    pub time: u32,
    /// True when outstanding work on prior jobs must be discarded.
    pub clean: bool,
    pub primary_target: Target,
    pub aux: Option<AuxJobInfo>,
    /// Share-acceptance difficulty basis: the easier chain's network
    /// difficulty when `use-easier-target` is set, the primary's otherwise.
    pub network_difficulty: f64,
    /// Raw non-coinbase transactions in block order.
    pub external_txs: Vec<Vec<u8>>,
}

impl Job {
    /// `mining.notify` parameter list.
    ///
    /// The previous hash travels as eight 32-bit words, each byte-swapped;
    /// version, bits, and ntime as big-endian hex.
    pub fn notify_params(&self) -> Value {
        let branches: Vec<String> = self.merkle_branch.iter().map(hex::encode).collect();
        json!([
            self.id,
            hex::encode(swap_words32(&self.prev_hash_le)),
            hex::encode(&self.coinbase.prefix),
            hex::encode(&self.coinbase.suffix),
            branches,
            hex::encode(self.version.to_be_bytes()),
            hex::encode(self.bits.to_be_bytes()),
            hex::encode(self.time.to_be_bytes()),
            self.clean,
        ])
    }

    /// Serialize a full block around a solved header and coinbase.
    pub fn assemble_block(&self, header: &[u8; 80], coinbase: &[u8]) -> Vec<u8> {
        let tx_count = self.external_txs.len() + 1;
        let mut block = Vec::with_capacity(
            80 + 9 + coinbase.len() + self.external_txs.iter().map(Vec::len).sum::<usize>(),
        );
        block.extend_from_slice(header);
        block.extend_from_slice(&var_int(tx_count as u64));
        block.extend_from_slice(coinbase);
        for tx in &self.external_txs {
            block.extend_from_slice(tx);
        }
        block
    }
}
