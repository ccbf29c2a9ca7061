use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::info;
use serde::{Deserialize, Serialize};

use std::fmt;
use std::mem;
use std::sync::Arc;

use super::crypto::{Credential, PublicKey};

/// Reference to a participant of the ledger (sender, recipient or miner)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        ParticipantId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        ParticipantId(id.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        ParticipantId(id)
    }
}

/// A registered participant: its current credential and every key it has held
struct RegisteredIdentity {
    credential: Arc<dyn Credential>,
    keys: Vec<PublicKey>,
}

/// Maps participant ids to their signing capability
///
/// The registry is owned by the caller and shared with any number of chains.
/// Registering an id that is already present replaces its credential; the
/// replaced key stays in the participant's key history.
#[derive(Clone, Default)]
pub struct IdentityRegistry {
    identities: Arc<DashMap<ParticipantId, RegisteredIdentity>>,
}

impl IdentityRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        IdentityRegistry {
            identities: Arc::new(DashMap::new()),
        }
    }

    /// Registers (or replaces) the credential of a participant
    ///
    /// # Arguments
    ///
    /// * `id` - The participant being registered
    /// * `credential` - The capability record used to sign and verify for it
    ///
    /// # Returns
    ///
    /// The credential previously registered under `id`, if any
    pub fn register(
        &self,
        id: ParticipantId,
        credential: Arc<dyn Credential>,
    ) -> Option<Arc<dyn Credential>> {
        let public_key = credential.public_key();
        info!("Registered participant {} with key {}", id, public_key);

        match self.identities.entry(id) {
            Entry::Occupied(mut entry) => {
                let identity = entry.get_mut();
                if !identity.keys.contains(&public_key) {
                    identity.keys.push(public_key);
                }
                Some(mem::replace(&mut identity.credential, credential))
            }
            Entry::Vacant(entry) => {
                entry.insert(RegisteredIdentity {
                    credential,
                    keys: vec![public_key],
                });
                None
            }
        }
    }

    /// Gets the credential of a participant
    pub fn get(&self, id: &ParticipantId) -> Option<Arc<dyn Credential>> {
        self.identities
            .get(id)
            .map(|entry| Arc::clone(&entry.value().credential))
    }

    /// Gets the currently registered public key of a participant
    pub fn public_key(&self, id: &ParticipantId) -> Option<PublicKey> {
        self.identities
            .get(id)
            .map(|entry| entry.value().credential.public_key())
    }

    /// Checks whether `key` is, or once was, registered for `id`
    pub fn has_key(&self, id: &ParticipantId, key: &PublicKey) -> bool {
        self.identities
            .get(id)
            .map(|entry| entry.value().keys.contains(key))
            .unwrap_or(false)
    }

    /// Every key registered for `id`, oldest first
    pub fn key_history(&self, id: &ParticipantId) -> Vec<PublicKey> {
        self.identities
            .get(id)
            .map(|entry| entry.value().keys.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.identities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Gets all registered participant ids, sorted
    pub fn participants(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self
            .identities
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("participants", &self.participants())
            .finish()
    }
}
