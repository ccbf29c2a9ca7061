use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::crypto::PublicKey;
use super::digest::KeyedDigest;
use super::identity::ParticipantId;
use super::merkle::{merkle_root, EMPTY_ROOT};
use super::transaction::Transaction;

/// Previous-hash sentinel carried by the genesis block
pub const GENESIS_PREV_HASH: &str = "0";

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Index of the block in the chain
    pub index: u64,

    /// Timestamp when the block was created
    pub timestamp: DateTime<Utc>,

    /// Transactions folded into this block, in pool order
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block
    pub prev_hash: String,

    /// Hash of (prev_hash, merkle_root, nonce)
    pub hash: String,

    /// Proof of work
    pub nonce: u64,

    /// Merkle root of `transactions`
    pub merkle_root: String,

    /// Difficulty in effect when the block was mined
    pub difficulty: u32,

    /// Participant credited with mining the block
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub miner: Option<ParticipantId>,

    /// Registered public key of the miner at mining time
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub miner_public_key: Option<PublicKey>,
}

impl Block {
    /// Creates a new block, computing its merkle root and hash
    ///
    /// # Arguments
    ///
    /// * `digest` - The digest shared with the rest of the chain
    /// * `index` - The index of the block in the chain
    /// * `transactions` - The transactions to include in the block
    /// * `prev_hash` - The hash of the previous block
    /// * `nonce` - The proof of work
    /// * `difficulty` - The difficulty the nonce was searched for
    pub fn new(
        digest: &KeyedDigest,
        index: u64,
        transactions: Vec<Transaction>,
        prev_hash: String,
        nonce: u64,
        difficulty: u32,
    ) -> Self {
        let merkle_root = merkle_root(digest, &transactions);
        let hash = digest.block_hash(&prev_hash, &merkle_root, nonce);

        Block {
            index,
            timestamp: Utc::now(),
            transactions,
            prev_hash,
            hash,
            nonce,
            merkle_root,
            difficulty,
            miner: None,
            miner_public_key: None,
        }
    }

    /// Creates the genesis block: no transactions, sentinel prev hash, nonce 0
    pub fn genesis(digest: &KeyedDigest, difficulty: u32) -> Self {
        Block::new(digest, 0, Vec::new(), GENESIS_PREV_HASH.to_string(), 0, difficulty)
    }

    /// Credits the block to a miner
    pub fn with_miner(mut self, miner: ParticipantId, public_key: Option<PublicKey>) -> Self {
        self.miner = Some(miner);
        self.miner_public_key = public_key;
        self
    }

    /// Recomputes the merkle root from the stored transactions
    pub fn calculate_merkle_root(&self, digest: &KeyedDigest) -> String {
        merkle_root(digest, &self.transactions)
    }

    /// Recomputes the hash from the stored prev hash, transactions and nonce
    pub fn calculate_hash(&self, digest: &KeyedDigest) -> String {
        digest.block_hash(&self.prev_hash, &self.calculate_merkle_root(digest), self.nonce)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.prev_hash == GENESIS_PREV_HASH
    }

    pub fn has_empty_root(&self) -> bool {
        self.merkle_root == EMPTY_ROOT
    }
}
