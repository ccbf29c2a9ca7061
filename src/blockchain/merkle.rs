//! Merkle aggregation of a block's transactions
//!
//! Leaves are the digests of the transaction ids, in block order. Each level
//! is reduced pairwise; an odd level duplicates its last element.

use super::digest::KeyedDigest;
use super::transaction::Transaction;

/// Root of an empty transaction set
pub const EMPTY_ROOT: &str = "";

/// Calculate the merkle root of an ordered sequence of transactions
pub fn merkle_root(digest: &KeyedDigest, transactions: &[Transaction]) -> String {
    let leaves: Vec<String> = transactions
        .iter()
        .map(|tx| digest.digest(&[tx.tx_id.as_str()]))
        .collect();

    merkle_root_from_leaves(digest, leaves)
}

/// Reduce already-hashed leaves to a single root
pub fn merkle_root_from_leaves(digest: &KeyedDigest, leaves: Vec<String>) -> String {
    if leaves.is_empty() {
        return EMPTY_ROOT.to_string();
    }

    let mut current_level = leaves;

    while current_level.len() > 1 {
        if current_level.len() % 2 == 1 {
            if let Some(last) = current_level.last().cloned() {
                current_level.push(last);
            }
        }

        current_level = current_level
            .chunks(2)
            .map(|pair| digest.digest(&[pair[0].as_str(), pair[1].as_str()]))
            .collect();
    }

    current_level.remove(0)
}
