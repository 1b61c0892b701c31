//! The credential store contract and sign counter policy.

use std::fmt;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{WebauthnError, WebauthnResult};
use crate::interface::StoredCredential;
use crate::proto::CredentialID;

/// What to do when a signature counter fails to advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CounterPolicy {
    /// Fail the ceremony.
    #[default]
    Reject,
    /// Let the ceremony succeed, flagging the result so the caller can alert on it.
    Report,
}

/// Compare a received counter against the stored one.
///
/// Authenticators without a counter report zero, so when either side is zero nothing is
/// checked. Otherwise the received counter must be strictly greater. Returns whether the counter
/// regressed under [CounterPolicy::Report].
pub fn check_sign_counter(stored: u32, received: u32, policy: CounterPolicy) -> WebauthnResult<bool> {
    if stored == 0 || received == 0 || received > stored {
        return Ok(false);
    }

    warn!(stored, received, "sign counter did not advance, credential may be cloned");
    match policy {
        CounterPolicy::Reject => Err(WebauthnError::CredentialPossibleCompromise { stored, received }),
        CounterPolicy::Report => Ok(true),
    }
}

/// Looks up registered credentials and persists their counters.
///
/// `update_sign_count` must compare and store atomically per credential, so that a replayed
/// assertion can not overtake a legitimate one.
pub trait CredentialStore: Send + Sync {
    /// Fetch a credential by id.
    fn lookup(&self, cred_id: &CredentialID) -> WebauthnResult<StoredCredential>;

    /// Record a counter value seen in a successful assertion.
    fn update_sign_count(&self, cred_id: &CredentialID, counter: u32) -> WebauthnResult<()>;
}

/// A process local [CredentialStore].
#[derive(Default)]
pub struct InMemoryCredentialStore {
    credentials: DashMap<Vec<u8>, StoredCredential>,
    policy: CounterPolicy,
}

impl InMemoryCredentialStore {
    /// An empty store applying `policy` on counter updates.
    pub fn new(policy: CounterPolicy) -> Self {
        InMemoryCredentialStore {
            credentials: DashMap::new(),
            policy,
        }
    }

    /// Register a credential. Fails if its id is already known.
    pub fn insert(&self, cred: StoredCredential) -> WebauthnResult<()> {
        match self.credentials.entry(cred.cred_id.0.clone()) {
            Entry::Occupied(_) => {
                debug!("credential id already registered");
                Err(WebauthnError::CredentialAlreadyExists)
            }
            Entry::Vacant(v) => {
                v.insert(cred);
                Ok(())
            }
        }
    }

    /// Forget a credential, returning it if it was known.
    pub fn remove(&self, cred_id: &CredentialID) -> Option<StoredCredential> {
        self.credentials.remove(cred_id.0.as_slice()).map(|(_, cred)| cred)
    }

    /// The number of registered credentials.
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// True when no credentials are registered.
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn lookup(&self, cred_id: &CredentialID) -> WebauthnResult<StoredCredential> {
        self.credentials
            .get(cred_id.0.as_slice())
            .map(|c| c.value().clone())
            .ok_or(WebauthnError::CredentialNotFound)
    }

    fn update_sign_count(&self, cred_id: &CredentialID, counter: u32) -> WebauthnResult<()> {
        let mut cred = self
            .credentials
            .get_mut(cred_id.0.as_slice())
            .ok_or(WebauthnError::CredentialNotFound)?;

        // Re-check under the entry lock, a concurrent assertion may have advanced it.
        let regressed = check_sign_counter(cred.counter, counter, self.policy)?;
        if !regressed && counter > cred.counter {
            cred.counter = counter;
        }
        Ok(())
    }
}

impl fmt::Debug for InMemoryCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCredentialStore")
            .field("credentials", &self.credentials.len())
            .field("policy", &self.policy)
            .finish()
    }
}
