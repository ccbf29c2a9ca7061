//! A minimal proof-of-work ledger.
//!
//! Blocks are chained by a keyed HMAC-SHA256 digest over the previous hash,
//! the Merkle root of the block's transactions and the proof-of-work nonce.
//! Transactions are admitted only after their sender's signature verifies
//! against the key held in an [`IdentityRegistry`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use powledger::{Blockchain, IdentityRegistry, Wallet};
//!
//! let registry = IdentityRegistry::new();
//! registry.register("alice".into(), Arc::new(Wallet::new()));
//! registry.register("miner".into(), Arc::new(Wallet::new()));
//!
//! let blockchain = Blockchain::new(registry);
//! blockchain.create_transaction(10.0, "alice".into(), "bob".into())?;
//! blockchain.mine(&"miner".into())?;
//! assert!(blockchain.chain_is_valid());
//! # Ok::<(), powledger::ChainError>(())
//! ```

pub mod blockchain;

pub use blockchain::{
    Block, Blockchain, CancelToken, ChainConfig, ChainError, ConfigError, Credential, CryptoError,
    DigitalSignature, IdentityRegistry, KeyedDigest, MiningStats, ParticipantId, PublicKey,
    Transaction, ValidationFailure, Verifier, Wallet,
};
