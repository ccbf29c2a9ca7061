use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::crypto::{Credential, CryptoError, DigitalSignature, PublicKey, Verifier};
use super::identity::ParticipantId;

/// Represents a transfer between two participants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Amount being transferred (sign and magnitude are not constrained)
    pub amount: f64,

    /// Sender's identity
    pub sender: ParticipantId,

    /// Recipient's identity
    pub recipient: ParticipantId,

    /// Unique identifier assigned at creation
    pub tx_id: String,

    /// Sender's signature over the transaction message
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sender_signature: Option<DigitalSignature>,

    /// Public key the signature was produced with
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sender_public_key: Option<PublicKey>,
}

impl Transaction {
    /// Creates a new unsigned transaction with a fresh id
    ///
    /// # Arguments
    ///
    /// * `amount` - The amount to transfer
    /// * `sender` - The sender's identity
    /// * `recipient` - The recipient's identity
    pub fn new(amount: f64, sender: ParticipantId, recipient: ParticipantId) -> Self {
        Transaction {
            amount,
            sender,
            recipient,
            tx_id: Uuid::new_v4().simple().to_string(),
            sender_signature: None,
            sender_public_key: None,
        }
    }

    /// Builds the message covered by the sender's signature
    ///
    /// The message is the concatenation of amount, sender and recipient.
    pub fn signing_message(&self) -> Vec<u8> {
        format!("{}{}{}", self.amount, self.sender, self.recipient).into_bytes()
    }

    /// Signs the transaction with the sender's credential
    ///
    /// Stores both the signature and the public key it was made with.
    pub fn sign<C: Credential + ?Sized>(&mut self, credential: &C) -> Result<(), CryptoError> {
        let signature = credential.sign(&self.signing_message())?;

        self.sender_signature = Some(signature);
        self.sender_public_key = Some(credential.public_key());

        Ok(())
    }

    /// Checks the signature against the given public key
    ///
    /// # Returns
    ///
    /// false when the transaction is unsigned or the signature does not match
    pub fn verify_with<V: Verifier + ?Sized>(&self, verifier: &V, public_key: &PublicKey) -> bool {
        match &self.sender_signature {
            Some(signature) => verifier.verify(signature, &self.signing_message(), public_key),
            None => false,
        }
    }

    /// Checks the signature against the public key embedded in the transaction
    pub fn verify_embedded<V: Verifier + ?Sized>(&self, verifier: &V) -> bool {
        match &self.sender_public_key {
            Some(public_key) => self.verify_with(verifier, public_key),
            None => false,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.sender_signature.is_some()
    }
}
