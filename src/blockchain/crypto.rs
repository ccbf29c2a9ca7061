use ed25519_dalek::{Signature, Signer, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fmt;
use std::str::FromStr;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Failed to sign message: {0}")]
    SigningError(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// Public key material of a participant, base58 encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub String);

impl PublicKey {
    /// Creates a public key from an Ed25519 verifying key
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        PublicKey(bs58::encode(key.as_bytes()).into_string())
    }

    /// Converts the public key back to an Ed25519 verifying key
    pub fn to_verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let key_bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidPublicKey("Invalid public key length".to_string())
        })?;

        VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PublicKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        bs58::decode(s)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        Ok(PublicKey(s.to_string()))
    }
}

/// Represents a digital signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    /// Creates a new digital signature from a signature
    pub fn from_signature(signature: &Signature) -> Self {
        let bytes = signature.to_bytes();
        DigitalSignature(bs58::encode(bytes).into_string())
    }

    /// Converts the digital signature to a signature
    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let signature_bytes: [u8; 64] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSignature("Invalid signature length".to_string())
        })?;

        Ok(Signature::from_bytes(&signature_bytes))
    }
}

/// Scheme-level signature verification
///
/// Not bound to any single key: the key to check against is passed in, so a
/// verifier can also check historical transactions signed with a key that
/// has since been rotated.
pub trait Verifier: Send + Sync {
    /// Returns true when `signature` over `message` was produced by the
    /// holder of `public_key`. Malformed keys or signatures verify as false.
    fn verify(&self, signature: &DigitalSignature, message: &[u8], public_key: &PublicKey) -> bool;
}

/// Capability record of a registered participant
pub trait Credential: Verifier {
    /// The participant's current public key
    fn public_key(&self) -> PublicKey;

    /// Signs a message with the participant's private key
    fn sign(&self, message: &[u8]) -> Result<DigitalSignature, CryptoError>;
}

/// Ed25519 keypair used as the bundled [`Credential`]
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    public_key: PublicKey,
}

impl Wallet {
    /// Creates a new wallet with a random keypair
    pub fn new() -> Self {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        Wallet::from_signing_key(signing_key)
    }

    /// Creates a wallet from an existing secret key
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_array: [u8; 32] = secret_key_bytes.try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey("Invalid private key length".to_string())
        })?;

        Ok(Wallet::from_signing_key(SigningKey::from_bytes(&bytes_array)))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        let public_key = PublicKey::from_verifying_key(&verifying_key);

        Wallet {
            signing_key,
            verifying_key,
            public_key,
        }
    }

    /// Gets the wallet's verifying key
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Exports the wallet's secret key as bytes
    pub fn export_secret_key(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Wallet::new()
    }
}

impl Verifier for Wallet {
    fn verify(&self, signature: &DigitalSignature, message: &[u8], public_key: &PublicKey) -> bool {
        verify_signature(message, signature, public_key).unwrap_or(false)
    }
}

impl Credential for Wallet {
    fn public_key(&self) -> PublicKey {
        self.public_key.clone()
    }

    fn sign(&self, message: &[u8]) -> Result<DigitalSignature, CryptoError> {
        let signature = self
            .signing_key
            .try_sign(message)
            .map_err(|e| CryptoError::SigningError(e.to_string()))?;
        Ok(DigitalSignature::from_signature(&signature))
    }
}

/// Verifies an Ed25519 signature against a message and public key
pub fn verify_signature(
    message: &[u8],
    signature: &DigitalSignature,
    public_key: &PublicKey,
) -> Result<bool, CryptoError> {
    let signature = signature.to_signature()?;
    let verifying_key = public_key.to_verifying_key()?;

    Ok(verifying_key.verify(message, &signature).is_ok())
}
