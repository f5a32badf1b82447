//! Merged-mining commitment and AuxPoW proof assembly.
//!
//! The parent (primary) chain commits to the auxiliary chain's block hash
//! inside its coinbase; once a parent header meets the auxiliary target,
//! the proof below lets the auxiliary chain verify that commitment. Every
//! byte order here follows the auxiliary chain's consensus decoder, so the
//! encoding is covered by fixture tests.

use crate::consensus::encode::var_int;
use crate::consensus::merkle;
use crate::error::{Result, StratumError};

/// 4-byte marker preceding the merge commitment inside the coinbase script.
pub const MERGED_MINING_MAGIC: [u8; 4] = [0xfa, 0xbe, 0x6d, 0x6d];

/// The merge-tree commitment embedded in the parent coinbase.
///
/// With a single auxiliary chain the tree is one leaf (the aux block hash
/// itself, an empty branch), but the encoding stays correct for wider
/// trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergedCommitment {
    /// Merkle root over the auxiliary block hashes being merged.
    pub root: [u8; 32],
    /// Number of leaves in the merge tree.
    pub size: u32,
    /// Merge-tree nonce (leaf-slot selector for multi-aux setups).
    pub nonce: u32,
}

impl MergedCommitment {
    /// Commitment for a single auxiliary chain.
    pub fn single(aux_hash_le: [u8; 32]) -> Self {
        MergedCommitment {
            root: aux_hash_le,
            size: 1,
            nonce: 0,
        }
    }

    /// OP_RETURN script carrying magic, root, tree size, and nonce.
    pub fn script(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(44);
        payload.extend_from_slice(&MERGED_MINING_MAGIC);
        payload.extend_from_slice(&self.root);
        payload.extend_from_slice(&self.size.to_le_bytes());
        payload.extend_from_slice(&self.nonce.to_le_bytes());

        let mut script = Vec::with_capacity(2 + payload.len());
        script.push(0x6a);
        script.push(payload.len() as u8);
        script.extend_from_slice(&payload);
        script
    }
}

/// The proof an auxiliary chain verifies against its committed block hash.
#[derive(Debug, Clone)]
pub struct AuxPowProof {
    /// Full parent coinbase transaction bytes (extranonces included).
    pub parent_coinbase: Vec<u8>,
    /// Parent block identification hash, wire order.
    pub parent_hash: [u8; 32],
    /// Branch proving the coinbase is in the parent transaction tree.
    pub coinbase_branch: Vec<[u8; 32]>,
    /// Branch proving the aux hash is in the merge tree (empty single-aux).
    pub chain_branch: Vec<[u8; 32]>,
    /// Leaf index of the aux hash inside the merge tree.
    pub chain_index: u32,
    /// The solved 80-byte parent header.
    pub parent_header: [u8; 80],
}

impl AuxPowProof {
    /// Assemble a proof for a solved parent header.
    ///
    /// `coinbase` must be the exact bytes submitted in the parent block and
    /// `merkle_branch` the template's index-0 branch; a mismatch between
    /// the folded branch and the header's merkle root is an internal
    /// invariant violation and fails share-locally.
    pub fn build(
        coinbase: Vec<u8>,
        merkle_branch: Vec<[u8; 32]>,
        parent_header: [u8; 80],
        parent_hash: [u8; 32],
    ) -> Result<Self> {
        let coinbase_txid = crate::consensus::hash::sha256d(&coinbase);
        let folded = merkle::fold_branch_index0(&coinbase_txid, &merkle_branch);
        if folded != parent_header[36..68] {
            return Err(StratumError::ConsensusBuild {
                message: "coinbase branch does not fold to the header merkle root".into(),
            });
        }

        Ok(AuxPowProof {
            parent_coinbase: coinbase,
            parent_hash,
            coinbase_branch: merkle_branch,
            chain_branch: Vec::new(),
            chain_index: 0,
            parent_header,
        })
    }

    /// Serialize to the auxiliary chain's wire encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.parent_coinbase);
        out.extend_from_slice(&self.parent_hash);

        out.extend_from_slice(&var_int(self.coinbase_branch.len() as u64));
        for node in &self.coinbase_branch {
            out.extend_from_slice(node);
        }
        // The coinbase always sits at index 0 of the parent tree.
        out.extend_from_slice(&0u32.to_le_bytes());

        out.extend_from_slice(&var_int(self.chain_branch.len() as u64));
        for node in &self.chain_branch {
            out.extend_from_slice(node);
        }
        out.extend_from_slice(&self.chain_index.to_le_bytes());

        out.extend_from_slice(&self.parent_header);
        out
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::hash::sha256d;
    use crate::consensus::header::build_header;
    use crate::consensus::merkle::{branch_for_index0, fold_branch_index0, merkle_root};

    #[test]
    fn commitment_script_fixture() {
        let commitment = MergedCommitment {
            root: [0x11; 32],
            size: 1,
            nonce: 0,
        };
        let expected = format!(
            "6a2cfabe6d6d{}0100000000000000",
            "11".repeat(32)
        );
        assert_eq!(hex::encode(commitment.script()), expected);
    }

    #[test]
    fn proof_serialization_fixture() {
        let proof = AuxPowProof {
            parent_coinbase: vec![0xde, 0xad],
            parent_hash: [0x11; 32],
            coinbase_branch: vec![[0x22; 32]],
            chain_branch: Vec::new(),
            chain_index: 0,
            parent_header: [0x33; 80],
        };
        // coinbase | parent hash | branch(1 node, index 0) |
        // empty chain branch(index 0) | parent header
        let expected = format!(
            "dead{}01{}000000000000000000{}",
            "11".repeat(32),
            "22".repeat(32),
            "33".repeat(80),
        );
        assert_eq!(proof.to_hex(), expected);
    }

    #[test]
    fn build_checks_branch_against_header() {
        let coinbase = vec![0x01, 0x02, 0x03];
        let coinbase_txid = sha256d(&coinbase);
        let other_txid = sha256d(b"tx1");

        let txids = [coinbase_txid, other_txid];
        let branch = branch_for_index0(&txids);
        let root = merkle_root(&txids);
        assert_eq!(fold_branch_index0(&coinbase_txid, &branch), root);

        let header = build_header(1, &[0u8; 32], &root, 0, 0x1d00ffff, 0);
        let parent_hash = sha256d(&header);

        let proof =
            AuxPowProof::build(coinbase.clone(), branch.to_vec(), header, parent_hash).unwrap();
        assert_eq!(proof.parent_coinbase, coinbase);
        assert_eq!(proof.chain_branch.len(), 0);

        // A branch that does not fold to the header root is rejected.
        let bad = AuxPowProof::build(coinbase, vec![[0xff; 32]], header, parent_hash);
        assert!(bad.is_err());
    }
}
