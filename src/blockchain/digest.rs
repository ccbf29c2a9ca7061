use hmac::{Hmac, Mac};
use sha2::Sha256;

use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Secret used when no other key is configured
pub const DEFAULT_SECRET: &str = "secret";

/// Keyed HMAC-SHA256 digest shared by block hashing and Merkle hashing
///
/// Every hash in the ledger goes through the same instance, so a validator
/// holding the same secret can recompute the whole chain from scratch.
#[derive(Clone)]
pub struct KeyedDigest {
    /// Keyed but unfed MAC, cloned for every digest
    mac: HmacSha256,
}

impl KeyedDigest {
    /// Creates a digest keyed with the given secret
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        KeyedDigest {
            mac: HmacSha256::new_from_slice(secret.as_ref()).expect("HMAC accepts keys of any length"),
        }
    }

    /// Digests the concatenation of `parts` (no separator)
    ///
    /// # Returns
    ///
    /// The digest as a 64 character lowercase hexadecimal string
    pub fn digest<S: AsRef<str>>(&self, parts: &[S]) -> String {
        let mut mac = self.mac.clone();
        for part in parts {
            mac.update(part.as_ref().as_bytes());
        }

        hex::encode(mac.finalize().into_bytes())
    }

    /// Digest of a block header triple
    pub fn block_hash(&self, prev_hash: &str, merkle_root: &str, nonce: u64) -> String {
        let nonce = nonce.to_string();
        self.digest(&[prev_hash, merkle_root, nonce.as_str()])
    }
}

impl fmt::Debug for KeyedDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedDigest").finish_non_exhaustive()
    }
}

impl Default for KeyedDigest {
    fn default() -> Self {
        KeyedDigest::new(DEFAULT_SECRET)
    }
}
