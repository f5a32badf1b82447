//! Transaction merkle tree and coinbase branch computation.
//!
//! All node hashes are double SHA-256 over the concatenation of the two
//! children in wire (little-endian) order, with the duplicate-last-node
//! rule at odd levels. The coinbase is assumed to occupy index 0, which
//! keeps every branch sibling independent of the coinbase id itself: the
//! branch is computed once per template and folded per share.

use crate::consensus::hash::sha256d;

/// Merkle root of a full txid list (wire order), coinbase at index 0.
pub fn merkle_root(txids: &[[u8; 32]]) -> [u8; 32] {
    if txids.is_empty() {
        return sha256d(b"");
    }
    if txids.len() == 1 {
        return txids[0];
    }

    let mut level = txids.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().expect("level is non-empty"));
        }
        level = level
            .chunks_exact(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }
    level[0]
}

/// Sibling branch that folds the index-0 leaf up to the root.
pub fn branch_for_index0(txids: &[[u8; 32]]) -> Vec<[u8; 32]> {
    if txids.len() <= 1 {
        return Vec::new();
    }

    let mut branch = Vec::new();
    let mut level = txids.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().expect("level is non-empty"));
        }
        // The index-0 path always pairs with its right neighbor.
        branch.push(level[1]);
        level = level
            .chunks_exact(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }
    branch
}

/// Fold a leaf through an index-0 branch, reproducing the root.
pub fn fold_branch_index0(leaf: &[u8; 32], branch: &[[u8; 32]]) -> [u8; 32] {
    branch
        .iter()
        .fold(*leaf, |acc, sibling| hash_pair(&acc, sibling))
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    sha256d(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txid(seed: u8) -> [u8; 32] {
        sha256d(&[seed])
    }

    #[test]
    fn single_txid_is_its_own_root() {
        let only = txid(1);
        assert_eq!(merkle_root(&[only]), only);
        assert!(branch_for_index0(&[only]).is_empty());
        assert_eq!(fold_branch_index0(&only, &[]), only);
    }

    #[test]
    fn two_leaves() {
        let txids = [txid(1), txid(2)];
        let branch = branch_for_index0(&txids);
        assert_eq!(branch, vec![txid(2)]);
        assert_eq!(fold_branch_index0(&txids[0], &branch), merkle_root(&txids));
    }

    #[test]
    fn branch_folds_to_root_for_all_sizes() {
        for n in 1..=13usize {
            let txids: Vec<[u8; 32]> = (0..n as u8).map(txid).collect();
            let branch = branch_for_index0(&txids);
            let folded = fold_branch_index0(&txids[0], &branch);
            assert_eq!(folded, merkle_root(&txids), "tree of {n} leaves");
        }
    }

    #[test]
    fn branch_independent_of_coinbase_leaf() {
        // The index-0 siblings never contain leaf 0, so a placeholder
        // coinbase id yields the same branch as the real one.
        let mut txids: Vec<[u8; 32]> = (0..7u8).map(txid).collect();
        let branch = branch_for_index0(&txids);
        txids[0] = [0u8; 32];
        assert_eq!(branch_for_index0(&txids), branch);
    }

    #[test]
    fn odd_level_duplicates_last_node() {
        let txids = [txid(1), txid(2), txid(3)];
        let level1 = [
            sha256d(&[txids[0], txids[1]].concat()),
            sha256d(&[txids[2], txids[2]].concat()),
        ];
        let expected = sha256d(&[level1[0], level1[1]].concat());
        assert_eq!(merkle_root(&txids), expected);
    }
}
