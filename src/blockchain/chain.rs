use log::{debug, info, warn};
use thiserror::Error;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use super::block::{Block, GENESIS_PREV_HASH};
use super::config::{ChainConfig, ConfigError};
use super::crypto::{Credential, CryptoError};
use super::difficulty::next_difficulty;
use super::digest::KeyedDigest;
use super::identity::{IdentityRegistry, ParticipantId};
use super::merkle::merkle_root;
use super::pool::TransactionPool;
use super::pow::{self, CancelToken, Solution};
use super::transaction::Transaction;

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Unknown sender: {0}")]
    SenderUnknown(ParticipantId),

    #[error("Invalid signature on transaction {tx_id} from {sender}")]
    SignatureInvalid { tx_id: String, sender: ParticipantId },

    #[error("Mining aborted: pending transaction {tx_id} failed re-validation")]
    MiningAborted { tx_id: String },

    #[error("Mining cancelled")]
    MiningCancelled,

    #[error("Unknown miner: {0}")]
    MinerUnknown(ParticipantId),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),
}

/// Reasons a stored chain fails validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("block {position} carries index {found}")]
    IndexMismatch { position: u64, found: u64 },

    #[error("block {index} does not link to its predecessor")]
    PrevHashMismatch { index: u64 },

    #[error("block {index} has a stale merkle root")]
    MerkleRootMismatch { index: u64 },

    #[error("block {index} hash does not match its contents")]
    HashMismatch { index: u64 },

    #[error("block {index} hash does not meet difficulty {difficulty}")]
    TargetNotMet { index: u64, difficulty: u32 },

    #[error("block {index} contains transaction {tx_id} with an invalid signature")]
    TransactionSignature { index: u64, tx_id: String },
}

/// Mining statistics of one block
#[derive(Debug, Clone, PartialEq)]
pub struct MiningStats {
    /// Index of the mined block
    pub block_index: u64,
    /// Number of hash attempts
    pub hash_attempts: u64,
    /// Time taken in milliseconds
    pub time_ms: u128,
    /// Hash rate (hashes per second)
    pub hash_rate: f64,
}

impl MiningStats {
    fn new(block_index: u64, solution: &Solution, started: Instant) -> Self {
        let elapsed = started.elapsed();
        let seconds = elapsed.as_secs_f64();
        let hash_rate = if seconds > 0.0 {
            solution.attempts as f64 / seconds
        } else {
            solution.attempts as f64
        };

        MiningStats {
            block_index,
            hash_attempts: solution.attempts,
            time_ms: elapsed.as_millis(),
            hash_rate,
        }
    }
}

/// Represents the blockchain
///
/// All operations take `&self`; wrap the chain in an `Arc` to share it across
/// threads. Miners are serialized, while reads and transaction admission
/// proceed during a nonce search.
#[derive(Debug)]
pub struct Blockchain {
    /// The chain of blocks, append-only
    chain: RwLock<Vec<Block>>,

    /// Pending transactions to be included in the next block
    pending: TransactionPool,

    /// Mining difficulty (number of leading zeros required in hash)
    difficulty: AtomicU32,

    /// Participants allowed to sign transactions and mine
    registry: IdentityRegistry,

    /// Digest shared by block hashing and Merkle hashing
    digest: KeyedDigest,

    config: ChainConfig,

    /// Held for the whole mine sequence
    mining: Mutex<()>,

    last_stats: Mutex<Option<MiningStats>>,
}

impl Blockchain {
    /// Creates a new blockchain with a genesis block and the default config
    ///
    /// # Arguments
    ///
    /// * `registry` - The identity registry used to admit transactions
    pub fn new(registry: IdentityRegistry) -> Self {
        Blockchain::build(ChainConfig::default(), registry)
    }

    /// Creates a new blockchain with a genesis block
    ///
    /// # Arguments
    ///
    /// * `config` - Difficulty, digest and mining parameters
    /// * `registry` - The identity registry used to admit transactions
    ///
    /// # Returns
    ///
    /// A new Blockchain instance, or an error if the config is invalid
    pub fn with_config(config: ChainConfig, registry: IdentityRegistry) -> Result<Self, ChainError> {
        config.validate()?;
        Ok(Blockchain::build(config, registry))
    }

    fn build(config: ChainConfig, registry: IdentityRegistry) -> Self {
        let blockchain = Blockchain {
            chain: RwLock::new(Vec::new()),
            pending: TransactionPool::new(),
            difficulty: AtomicU32::new(config.initial_difficulty),
            registry,
            digest: KeyedDigest::new(&config.digest_secret),
            config,
            mining: Mutex::new(()),
            last_stats: Mutex::new(None),
        };

        blockchain.create_genesis_block();

        blockchain
    }

    /// Creates the genesis block (first block in the chain)
    fn create_genesis_block(&self) {
        let genesis = Block::genesis(&self.digest, self.difficulty());
        info!("Created genesis block {}", genesis.hash);

        self.chain_mut().push(genesis);
        self.adjust_difficulty(1);
    }

    fn chain_ref(&self) -> RwLockReadGuard<'_, Vec<Block>> {
        self.chain.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn chain_mut(&self) -> RwLockWriteGuard<'_, Vec<Block>> {
        self.chain.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a participant's credential with the injected registry
    ///
    /// Re-registering an existing participant replaces its credential.
    pub fn add_participant(
        &self,
        id: ParticipantId,
        credential: Arc<dyn Credential>,
    ) -> Option<Arc<dyn Credential>> {
        self.registry.register(id, credential)
    }

    /// Creates, signs and admits a new transaction
    ///
    /// The sender's registered credential signs the message, and the result is
    /// verified against the sender's registered public key before admission.
    ///
    /// # Returns
    ///
    /// The admitted transaction
    pub fn create_transaction(
        &self,
        amount: f64,
        sender: ParticipantId,
        recipient: ParticipantId,
    ) -> Result<Transaction, ChainError> {
        let credential = self.sender_credential(&sender)?;

        let mut transaction = Transaction::new(amount, sender, recipient);
        transaction.sign(&*credential)?;

        self.admit(transaction, &*credential)
    }

    /// Admits a transaction signed outside the chain
    pub fn submit_transaction(&self, transaction: Transaction) -> Result<Transaction, ChainError> {
        let credential = self.sender_credential(&transaction.sender)?;
        self.admit(transaction, &*credential)
    }

    fn sender_credential(&self, sender: &ParticipantId) -> Result<Arc<dyn Credential>, ChainError> {
        self.registry.get(sender).ok_or_else(|| {
            warn!("Rejected transaction from unknown sender {}", sender);
            ChainError::SenderUnknown(sender.clone())
        })
    }

    fn admit(&self, transaction: Transaction, credential: &dyn Credential) -> Result<Transaction, ChainError> {
        if !transaction.verify_with(credential, &credential.public_key()) {
            warn!(
                "Rejected transaction {} from {}: invalid signature",
                transaction.tx_id, transaction.sender
            );
            return Err(ChainError::SignatureInvalid {
                tx_id: transaction.tx_id,
                sender: transaction.sender,
            });
        }

        debug!(
            "Admitted transaction {}: {} -> {} ({})",
            transaction.tx_id, transaction.sender, transaction.recipient, transaction.amount
        );
        self.pending.push(transaction.clone());

        Ok(transaction)
    }

    /// Removes a pending transaction, e.g. the one that made mining abort
    ///
    /// Waits for any running mine, since mining drains the pool prefix it
    /// snapshotted.
    pub fn evict_transaction(&self, tx_id: &str) -> Option<Transaction> {
        let _mining = self.mining.lock().unwrap_or_else(PoisonError::into_inner);
        let evicted = self.pending.evict(tx_id);
        if evicted.is_some() {
            info!("Evicted pending transaction {}", tx_id);
        }
        evicted
    }

    /// Mines a new block with the pending transactions
    ///
    /// Blocks the caller until a nonce is found.
    ///
    /// # Arguments
    ///
    /// * `miner` - The participant credited with the block
    ///
    /// # Returns
    ///
    /// The newly appended block, or `MiningAborted` if a pending transaction
    /// no longer verifies (chain and pool are then left untouched)
    pub fn mine(&self, miner: &ParticipantId) -> Result<Block, ChainError> {
        self.mine_block(miner, None)
    }

    /// Same as [`Blockchain::mine`] but stops with `MiningCancelled` once
    /// `cancel` is triggered; chain and pool are then left untouched
    pub fn mine_with_cancel(&self, miner: &ParticipantId, cancel: &CancelToken) -> Result<Block, ChainError> {
        self.mine_block(miner, Some(cancel))
    }

    fn mine_block(&self, miner: &ParticipantId, cancel: Option<&CancelToken>) -> Result<Block, ChainError> {
        let miner_key = self
            .registry
            .public_key(miner)
            .ok_or_else(|| ChainError::MinerUnknown(miner.clone()))?;

        let _mining = self.mining.lock().unwrap_or_else(PoisonError::into_inner);

        let transactions = self.pending.snapshot();
        self.revalidate(&transactions)?;

        let merkle_root = merkle_root(&self.digest, &transactions);
        let (index, prev_hash) = {
            let chain = self.chain_ref();
            let prev_hash = chain
                .last()
                .map(|block| block.hash.clone())
                .unwrap_or_else(|| GENESIS_PREV_HASH.to_string());
            (chain.len() as u64, prev_hash)
        };
        let difficulty = self.difficulty();

        info!(
            "Mining block {} with difficulty {} ({} transactions)...",
            index,
            difficulty,
            transactions.len()
        );

        let started = Instant::now();
        let solution = self.find_nonce(&prev_hash, &merkle_root, difficulty, cancel).ok_or_else(|| {
            warn!("Mining of block {} cancelled", index);
            ChainError::MiningCancelled
        })?;
        let stats = MiningStats::new(index, &solution, started);

        let mined_count = transactions.len();
        let block = Block::new(&self.digest, index, transactions, prev_hash, solution.nonce, difficulty)
            .with_miner(miner.clone(), Some(miner_key));

        let length = {
            let mut chain = self.chain_mut();
            chain.push(block.clone());
            chain.len() as u64
        };
        self.pending.remove_mined(mined_count);
        self.adjust_difficulty(length);

        info!(
            "Block {} mined in {}ms ({} attempts, {:.2} H/s)",
            index, stats.time_ms, stats.hash_attempts, stats.hash_rate
        );
        *self.last_stats.lock().unwrap_or_else(PoisonError::into_inner) = Some(stats);

        Ok(block)
    }

    /// Re-verifies pending transactions against the senders' current keys
    fn revalidate(&self, transactions: &[Transaction]) -> Result<(), ChainError> {
        for transaction in transactions {
            let valid = self
                .registry
                .get(&transaction.sender)
                .map(|credential| transaction.verify_with(&*credential, &credential.public_key()))
                .unwrap_or(false);

            if !valid {
                warn!(
                    "Mining aborted: transaction {} from {} failed re-validation",
                    transaction.tx_id, transaction.sender
                );
                return Err(ChainError::MiningAborted {
                    tx_id: transaction.tx_id.clone(),
                });
            }
        }

        Ok(())
    }

    fn find_nonce(
        &self,
        prev_hash: &str,
        merkle_root: &str,
        difficulty: u32,
        cancel: Option<&CancelToken>,
    ) -> Option<Solution> {
        let threads = self.config.mining_threads;

        match cancel {
            None if threads <= 1 => Some(pow::search(&self.digest, prev_hash, merkle_root, difficulty)),
            None => pow::search_parallel(
                &self.digest,
                prev_hash,
                merkle_root,
                difficulty,
                threads,
                &CancelToken::new(),
            ),
            Some(cancel) => {
                pow::search_parallel(&self.digest, prev_hash, merkle_root, difficulty, threads, cancel)
            }
        }
    }

    fn adjust_difficulty(&self, chain_length: u64) {
        let current = self.difficulty();
        let next = next_difficulty(current, chain_length, self.config.adjustment_interval);

        if next != current {
            self.difficulty.store(next, Ordering::SeqCst);
            info!("Difficulty raised from {} to {} at chain length {}", current, next, chain_length);
        }
    }

    /// Validates the blockchain
    ///
    /// Recomputes every merkle root and hash from the stored blocks and checks
    /// the links between them. Never modifies the chain.
    ///
    /// # Returns
    ///
    /// true if the blockchain is valid, false otherwise
    pub fn chain_is_valid(&self) -> bool {
        match self.validate() {
            Ok(()) => true,
            Err(failure) => {
                warn!("Chain validation failed: {}", failure);
                false
            }
        }
    }

    /// Same checks as [`Blockchain::chain_is_valid`], reporting the first failure
    pub fn validate(&self) -> Result<(), ValidationFailure> {
        let chain = self.chain_ref();

        for (position, block) in chain.iter().enumerate() {
            let position = position as u64;
            let index = block.index;

            if index != position {
                return Err(ValidationFailure::IndexMismatch { position, found: index });
            }

            let linked = match position {
                0 => block.prev_hash == GENESIS_PREV_HASH,
                _ => block.prev_hash == chain[position as usize - 1].hash,
            };
            if !linked {
                return Err(ValidationFailure::PrevHashMismatch { index });
            }

            let root = block.calculate_merkle_root(&self.digest);
            if root != block.merkle_root {
                return Err(ValidationFailure::MerkleRootMismatch { index });
            }

            if self.digest.block_hash(&block.prev_hash, &root, block.nonce) != block.hash {
                return Err(ValidationFailure::HashMismatch { index });
            }

            // Genesis is appended without a search
            if position > 0 && !pow::meets_target(&block.hash, block.difficulty) {
                return Err(ValidationFailure::TargetNotMet {
                    index,
                    difficulty: block.difficulty,
                });
            }

            // The embedded key must be one the sender has registered, current or past
            for transaction in &block.transactions {
                let key_registered = transaction
                    .sender_public_key
                    .as_ref()
                    .map(|key| self.registry.has_key(&transaction.sender, key))
                    .unwrap_or(false);
                let verified = key_registered
                    && self
                        .registry
                        .get(&transaction.sender)
                        .map(|verifier| transaction.verify_embedded(&*verifier))
                        .unwrap_or(false);

                if !verified {
                    return Err(ValidationFailure::TransactionSignature {
                        index,
                        tx_id: transaction.tx_id.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Gets a copy of the entire blockchain
    pub fn get_chain(&self) -> Vec<Block> {
        self.chain_ref().clone()
    }

    /// Gets a block by index
    pub fn get_block(&self, index: u64) -> Option<Block> {
        self.chain_ref().get(index as usize).cloned()
    }

    /// Gets the last block in the chain
    pub fn get_last_block(&self) -> Option<Block> {
        self.chain_ref().last().cloned()
    }

    /// Number of blocks, genesis included
    pub fn len(&self) -> usize {
        self.chain_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain_ref().is_empty()
    }

    /// Gets all pending transactions
    pub fn get_pending_transactions(&self) -> Vec<Transaction> {
        self.pending.snapshot()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, tx_id: &str) -> bool {
        self.pending.contains(tx_id)
    }

    /// Difficulty the next block will be mined at
    pub fn difficulty(&self) -> u32 {
        self.difficulty.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn digest(&self) -> &KeyedDigest {
        &self.digest
    }

    /// Statistics of the most recent successful mine
    pub fn last_mining_stats(&self) -> Option<MiningStats> {
        self.last_stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;
    use std::collections::HashSet;
    use std::thread;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn config(difficulty: u32) -> ChainConfig {
        ChainConfig {
            initial_difficulty: difficulty,
            ..ChainConfig::default()
        }
    }

    /// Chain with alice, bob and a miner registered
    fn setup(difficulty: u32) -> (Blockchain, Wallet) {
        init_logging();

        let registry = IdentityRegistry::new();
        let alice = Wallet::new();
        registry.register("alice".into(), Arc::new(alice.clone()));
        registry.register("bob".into(), Arc::new(Wallet::new()));
        registry.register("miner".into(), Arc::new(Wallet::new()));

        let blockchain = Blockchain::with_config(config(difficulty), registry).unwrap();
        (blockchain, alice)
    }

    fn id(name: &str) -> ParticipantId {
        ParticipantId::from(name)
    }

    #[test]
    fn test_new_blockchain() {
        let (blockchain, _) = setup(3);
        let chain = blockchain.get_chain();

        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].index, 0);
        assert_eq!(chain[0].prev_hash, "0");
        assert!(chain[0].transactions.is_empty());
        assert_eq!(chain[0].merkle_root, "");
        assert_eq!(blockchain.difficulty(), 3);
        assert!(blockchain.chain_is_valid());
    }

    #[test]
    fn test_default_config() {
        let blockchain = Blockchain::new(IdentityRegistry::new());

        assert_eq!(blockchain.difficulty(), 3);
        assert_eq!(blockchain.len(), 1);
        assert_eq!(blockchain.config(), &ChainConfig::default());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ChainConfig {
            adjustment_interval: 0,
            ..ChainConfig::default()
        };

        assert!(matches!(
            Blockchain::with_config(config, IdentityRegistry::new()),
            Err(ChainError::ConfigError(_))
        ));
    }

    #[test]
    fn test_create_transaction() {
        let (blockchain, alice) = setup(1);

        let transaction = blockchain.create_transaction(10.0, id("alice"), id("bob")).unwrap();

        assert_eq!(blockchain.pending_len(), 1);
        assert!(blockchain.is_pending(&transaction.tx_id));
        assert_eq!(transaction.sender_public_key, Some(alice.public_key()));
        assert!(transaction.verify_embedded(&alice));
    }

    #[test]
    fn test_create_transaction_unknown_sender() {
        let (blockchain, _) = setup(1);

        let result = blockchain.create_transaction(10.0, id("mallory"), id("bob"));

        assert!(matches!(result, Err(ChainError::SenderUnknown(sender)) if sender == id("mallory")));
        assert_eq!(blockchain.pending_len(), 0);
    }

    #[test]
    fn test_unknown_recipient_is_allowed() {
        let (blockchain, _) = setup(1);

        assert!(blockchain.create_transaction(1.0, id("alice"), id("nobody")).is_ok());
    }

    #[test]
    fn test_submit_transaction() {
        let (blockchain, alice) = setup(1);

        let mut transaction = Transaction::new(5.0, id("alice"), id("bob"));
        transaction.sign(&alice).unwrap();

        blockchain.submit_transaction(transaction.clone()).unwrap();
        assert!(blockchain.is_pending(&transaction.tx_id));
    }

    #[test]
    fn test_submit_transaction_signed_by_wrong_key() {
        let (blockchain, _) = setup(1);

        let mut forged = Transaction::new(5.0, id("alice"), id("bob"));
        forged.sign(&Wallet::new()).unwrap();

        let result = blockchain.submit_transaction(forged);
        assert!(matches!(result, Err(ChainError::SignatureInvalid { .. })));

        let unsigned = Transaction::new(5.0, id("alice"), id("bob"));
        let result = blockchain.submit_transaction(unsigned);
        assert!(matches!(result, Err(ChainError::SignatureInvalid { .. })));

        assert_eq!(blockchain.pending_len(), 0);
    }

    #[test]
    fn test_mine_block() {
        let (blockchain, _) = setup(2);
        let first = blockchain.create_transaction(10.0, id("alice"), id("bob")).unwrap();
        let second = blockchain.create_transaction(20.0, id("bob"), id("alice")).unwrap();

        let block = blockchain.mine(&id("miner")).unwrap();

        assert_eq!(block.index, 1);
        assert_eq!(block.transactions, vec![first, second]);
        assert_eq!(block.prev_hash, blockchain.get_chain()[0].hash);
        assert_eq!(block.difficulty, 2);
        assert!(block.hash.starts_with("00"));
        assert_eq!(block.miner, Some(id("miner")));
        assert_eq!(block.miner_public_key, blockchain.registry().public_key(&id("miner")));
        assert_eq!(
            block.hash,
            blockchain.digest().block_hash(&block.prev_hash, &block.merkle_root, block.nonce)
        );

        assert_eq!(blockchain.pending_len(), 0);
        assert_eq!(blockchain.get_last_block(), Some(block));
        assert!(blockchain.chain_is_valid());
    }

    #[test]
    fn test_mine_finds_minimal_nonce() {
        let (blockchain, _) = setup(2);
        blockchain.create_transaction(1.0, id("alice"), id("bob")).unwrap();

        let block = blockchain.mine(&id("miner")).unwrap();
        let digest = blockchain.digest();

        for smaller in 0..block.nonce {
            let hash = digest.block_hash(&block.prev_hash, &block.merkle_root, smaller);
            assert!(!pow::meets_target(&hash, block.difficulty));
        }
    }

    #[test]
    fn test_mine_empty_block() {
        let (blockchain, _) = setup(1);

        let block = blockchain.mine(&id("miner")).unwrap();

        assert!(block.transactions.is_empty());
        assert_eq!(block.merkle_root, "");
        assert_eq!(block.hash, blockchain.digest().block_hash(&block.prev_hash, "", block.nonce));
    }

    #[test]
    fn test_mine_unknown_miner() {
        let (blockchain, _) = setup(1);
        blockchain.create_transaction(1.0, id("alice"), id("bob")).unwrap();

        let result = blockchain.mine(&id("stranger"));

        assert!(matches!(result, Err(ChainError::MinerUnknown(_))));
        assert_eq!(blockchain.len(), 1);
        assert_eq!(blockchain.pending_len(), 1);
    }

    #[test]
    fn test_mining_stats_recorded() {
        let (blockchain, _) = setup(1);
        assert!(blockchain.last_mining_stats().is_none());

        let block = blockchain.mine(&id("miner")).unwrap();
        let stats = blockchain.last_mining_stats().unwrap();

        assert_eq!(stats.block_index, block.index);
        assert_eq!(stats.hash_attempts, block.nonce + 1);
        assert!(stats.hash_rate > 0.0);
    }

    #[test]
    fn test_mining_stats_readable_while_mining_lock_held() {
        let (blockchain, _) = setup(1);
        blockchain.mine(&id("miner")).unwrap();

        let _mining = blockchain.mining.lock().unwrap();
        let stats = blockchain.last_mining_stats();

        assert_eq!(stats.map(|stats| stats.block_index), Some(1));
    }

    #[test]
    fn test_mining_stats_readable_during_search() {
        let (blockchain, _) = setup(8);
        let cancel = CancelToken::new();

        thread::scope(|scope| {
            let miner = scope.spawn(|| blockchain.mine_with_cancel(&id("miner"), &cancel));

            // Wait for the miner to take the lock, then read while it searches
            while blockchain.mining.try_lock().is_ok() {
                if miner.is_finished() {
                    break;
                }
                thread::yield_now();
            }
            assert!(blockchain.last_mining_stats().is_none());

            cancel.cancel();
            assert!(matches!(miner.join().unwrap(), Err(ChainError::MiningCancelled)));
        });
    }

    #[test]
    fn test_rotated_key_aborts_mining() {
        let (blockchain, _) = setup(1);
        let transaction = blockchain.create_transaction(10.0, id("alice"), id("bob")).unwrap();

        // alice's registered key no longer matches the signature
        blockchain.add_participant(id("alice"), Arc::new(Wallet::new()));

        let result = blockchain.mine(&id("miner"));

        assert!(matches!(result, Err(ChainError::MiningAborted { ref tx_id }) if *tx_id == transaction.tx_id));
        assert_eq!(blockchain.len(), 1);
        assert_eq!(blockchain.get_pending_transactions(), vec![transaction]);
    }

    #[test]
    fn test_evict_and_retry_after_abort() {
        let (blockchain, _) = setup(1);
        let stale = blockchain.create_transaction(10.0, id("alice"), id("bob")).unwrap();
        let fresh = blockchain.create_transaction(5.0, id("bob"), id("alice")).unwrap();
        blockchain.add_participant(id("alice"), Arc::new(Wallet::new()));

        let tx_id = match blockchain.mine(&id("miner")) {
            Err(ChainError::MiningAborted { tx_id }) => tx_id,
            other => panic!("expected MiningAborted, got {:?}", other),
        };
        assert_eq!(tx_id, stale.tx_id);

        assert!(blockchain.evict_transaction(&tx_id).is_some());
        let block = blockchain.mine(&id("miner")).unwrap();

        assert_eq!(block.transactions, vec![fresh]);
        assert_eq!(blockchain.len(), 2);
    }

    #[test]
    fn test_difficulty_raised_every_ten_blocks() {
        let (blockchain, _) = setup(3);

        for i in 0..9 {
            blockchain.create_transaction(i as f64, id("alice"), id("bob")).unwrap();
            let block = blockchain.mine(&id("miner")).unwrap();
            assert_eq!(block.difficulty, 3);
        }

        assert_eq!(blockchain.len(), 10);
        assert_eq!(blockchain.difficulty(), 4);

        let block = blockchain.mine(&id("miner")).unwrap();
        assert_eq!(block.difficulty, 4);
        assert!(block.hash.starts_with("0000"));
        assert!(blockchain.chain_is_valid());
    }

    #[test]
    fn test_chain_valid_after_many_mines() {
        let (blockchain, _) = setup(1);

        for round in 0..5 {
            for _ in 0..round {
                blockchain.create_transaction(1.0, id("alice"), id("bob")).unwrap();
            }
            blockchain.mine(&id("miner")).unwrap();
        }

        assert_eq!(blockchain.len(), 6);
        assert!(blockchain.chain_is_valid());
        assert_eq!(blockchain.validate(), Ok(()));
    }

    #[test]
    fn test_validation_survives_key_rotation() {
        let (blockchain, _) = setup(1);
        blockchain.create_transaction(1.0, id("alice"), id("bob")).unwrap();
        blockchain.mine(&id("miner")).unwrap();

        blockchain.add_participant(id("alice"), Arc::new(Wallet::new()));

        assert!(blockchain.chain_is_valid());
    }

    fn mined_chain() -> Blockchain {
        let (blockchain, _) = setup(1);
        blockchain.create_transaction(10.0, id("alice"), id("bob")).unwrap();
        blockchain.create_transaction(20.0, id("bob"), id("alice")).unwrap();
        blockchain.mine(&id("miner")).unwrap();
        blockchain.create_transaction(30.0, id("alice"), id("bob")).unwrap();
        blockchain.mine(&id("miner")).unwrap();
        assert!(blockchain.chain_is_valid());
        blockchain
    }

    #[test]
    fn test_tampered_amount_detected() {
        let blockchain = mined_chain();
        blockchain.chain_mut()[1].transactions[0].amount = 1_000_000.0;

        assert!(!blockchain.chain_is_valid());
        assert!(matches!(
            blockchain.validate(),
            Err(ValidationFailure::TransactionSignature { index: 1, .. })
        ));
    }

    #[test]
    fn test_resigned_transaction_detected() {
        let blockchain = mined_chain();
        {
            let mut chain = blockchain.chain_mut();
            let transaction = &mut chain[1].transactions[0];
            transaction.amount = 1_000_000.0;
            transaction.recipient = id("mallory");
            transaction.sign(&Wallet::new()).unwrap();
        }

        assert!(!blockchain.chain_is_valid());
        assert!(matches!(
            blockchain.validate(),
            Err(ValidationFailure::TransactionSignature { index: 1, .. })
        ));
    }

    #[test]
    fn test_resigned_with_another_participants_key_detected() {
        let (blockchain, _) = setup(1);
        let bob = Wallet::new();
        blockchain.add_participant(id("bob"), Arc::new(bob.clone()));
        blockchain.create_transaction(10.0, id("alice"), id("bob")).unwrap();
        blockchain.mine(&id("miner")).unwrap();

        // bob's key is registered, but not for alice
        blockchain.chain_mut()[1].transactions[0].sign(&bob).unwrap();

        assert!(!blockchain.chain_is_valid());
    }

    #[test]
    fn test_missing_embedded_key_detected() {
        let blockchain = mined_chain();
        blockchain.chain_mut()[2].transactions[0].sender_public_key = None;

        assert!(matches!(
            blockchain.validate(),
            Err(ValidationFailure::TransactionSignature { index: 2, .. })
        ));
    }

    #[test]
    fn test_tampered_recipient_detected() {
        let blockchain = mined_chain();
        blockchain.chain_mut()[2].transactions[0].recipient = id("mallory");

        assert!(!blockchain.chain_is_valid());
    }

    #[test]
    fn test_tampered_tx_id_detected() {
        let blockchain = mined_chain();
        blockchain.chain_mut()[1].transactions[1].tx_id = "forged".to_string();

        assert_eq!(
            blockchain.validate(),
            Err(ValidationFailure::MerkleRootMismatch { index: 1 })
        );

        // Refreshing the stored root alone still breaks the hash
        let root = {
            let chain = blockchain.chain_ref();
            chain[1].calculate_merkle_root(blockchain.digest())
        };
        blockchain.chain_mut()[1].merkle_root = root;
        assert_eq!(blockchain.validate(), Err(ValidationFailure::HashMismatch { index: 1 }));
    }

    #[test]
    fn test_reordered_transactions_detected() {
        let blockchain = mined_chain();
        blockchain.chain_mut()[1].transactions.swap(0, 1);

        assert!(!blockchain.chain_is_valid());
    }

    #[test]
    fn test_tampered_links_detected() {
        let blockchain = mined_chain();
        blockchain.chain_mut()[2].prev_hash = "deadbeef".to_string();
        assert_eq!(blockchain.validate(), Err(ValidationFailure::PrevHashMismatch { index: 2 }));

        let blockchain = mined_chain();
        blockchain.chain_mut()[0].prev_hash = "1".to_string();
        assert_eq!(blockchain.validate(), Err(ValidationFailure::PrevHashMismatch { index: 0 }));

        let blockchain = mined_chain();
        blockchain.chain_mut()[1].nonce += 1;
        assert!(!blockchain.chain_is_valid());

        let blockchain = mined_chain();
        blockchain.chain_mut()[2].index = 7;
        assert_eq!(
            blockchain.validate(),
            Err(ValidationFailure::IndexMismatch { position: 2, found: 7 })
        );
    }

    #[test]
    fn test_validation_does_not_repair() {
        let blockchain = mined_chain();
        blockchain.chain_mut()[1].transactions[0].amount = 0.0;
        let before = blockchain.get_chain();

        assert!(!blockchain.chain_is_valid());
        assert_eq!(blockchain.get_chain(), before);
    }

    #[test]
    fn test_duplicate_tx_ids_are_not_rejected() {
        let (blockchain, alice) = setup(1);
        let transaction = blockchain.create_transaction(1.0, id("alice"), id("bob")).unwrap();

        let mut duplicate = Transaction::new(2.0, id("alice"), id("bob"));
        duplicate.tx_id = transaction.tx_id.clone();
        duplicate.sign(&alice).unwrap();
        blockchain.submit_transaction(duplicate).unwrap();

        let block = blockchain.mine(&id("miner")).unwrap();
        assert_eq!(block.transactions.len(), 2);
        assert!(blockchain.chain_is_valid());
    }

    #[test]
    fn test_cancelled_mining_leaves_state_untouched() {
        let (blockchain, _) = setup(65);
        blockchain.create_transaction(1.0, id("alice"), id("bob")).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();

        let result = blockchain.mine_with_cancel(&id("miner"), &cancel);

        assert!(matches!(result, Err(ChainError::MiningCancelled)));
        assert_eq!(blockchain.len(), 1);
        assert_eq!(blockchain.pending_len(), 1);
    }

    #[test]
    fn test_mine_with_cancel_completes() {
        let (blockchain, _) = setup(1);

        let block = blockchain.mine_with_cancel(&id("miner"), &CancelToken::new()).unwrap();

        assert_eq!(block.index, 1);
        assert!(blockchain.chain_is_valid());
    }

    #[test]
    fn test_parallel_mining() {
        init_logging();
        let registry = IdentityRegistry::new();
        registry.register("alice".into(), Arc::new(Wallet::new()));
        registry.register("miner".into(), Arc::new(Wallet::new()));
        let config = ChainConfig {
            initial_difficulty: 2,
            mining_threads: 4,
            ..ChainConfig::default()
        };
        let blockchain = Blockchain::with_config(config, registry).unwrap();

        for _ in 0..3 {
            blockchain.create_transaction(1.0, id("alice"), id("bob")).unwrap();
            let block = blockchain.mine(&id("miner")).unwrap();
            assert!(block.hash.starts_with("00"));
        }

        assert!(blockchain.chain_is_valid());
    }

    #[test]
    fn test_concurrent_submission_during_mining() {
        let (blockchain, _) = setup(2);
        let blockchain = Arc::new(blockchain);

        let submitters: Vec<_> = (0..4)
            .map(|_| {
                let blockchain = Arc::clone(&blockchain);
                thread::spawn(move || {
                    (0..25)
                        .map(|i| {
                            blockchain
                                .create_transaction(i as f64, id("alice"), id("bob"))
                                .unwrap()
                                .tx_id
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let miner = {
            let blockchain = Arc::clone(&blockchain);
            thread::spawn(move || {
                for _ in 0..5 {
                    blockchain.mine(&id("miner")).unwrap();
                }
            })
        };

        let submitted: Vec<String> = submitters
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        miner.join().unwrap();

        let mut seen: Vec<String> = blockchain
            .get_chain()
            .iter()
            .flat_map(|block| block.transactions.iter().map(|tx| tx.tx_id.clone()))
            .collect();
        seen.extend(blockchain.get_pending_transactions().into_iter().map(|tx| tx.tx_id));

        assert_eq!(seen.len(), submitted.len());
        let unique: HashSet<String> = seen.into_iter().collect();
        assert_eq!(unique, submitted.into_iter().collect::<HashSet<_>>());
        assert!(blockchain.chain_is_valid());
    }
}
