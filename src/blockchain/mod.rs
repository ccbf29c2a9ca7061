// Blockchain module
//
// This module contains the core ledger implementation including:
// - Keyed digest shared by block and Merkle hashing
// - Merkle aggregation of transactions
// - Signature gate (credentials and identity registry)
// - Transaction pool
// - Proof of work search and difficulty adjustment
// - Block and Blockchain structures

pub mod block;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod difficulty;
pub mod digest;
pub mod identity;
pub mod merkle;
pub mod pool;
pub mod pow;
pub mod transaction;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, ChainError, MiningStats, ValidationFailure};
pub use config::{ChainConfig, ConfigError};
pub use crypto::{Credential, CryptoError, DigitalSignature, PublicKey, Verifier, Wallet};
pub use digest::KeyedDigest;
pub use identity::{IdentityRegistry, ParticipantId};
pub use pow::CancelToken;
pub use transaction::Transaction;
