//! Issuing and consuming single use challenges.

use std::fmt;
use std::time::{Duration, Instant};

use base64urlsafedata::Base64UrlSafeData;
use dashmap::DashMap;
use rand::prelude::*;

use crate::constants::{CHALLENGE_SIZE_BYTES, DEFAULT_CHALLENGE_TTL};
use crate::error::WebauthnResult;

/// A challenge issued to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// The random value the authenticator must sign over.
    pub value: Base64UrlSafeData,
    /// When the challenge was issued.
    pub issued_at: Instant,
}

impl Challenge {
    /// Generate a fresh random challenge.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Challenge {
            value: Base64UrlSafeData(rng.gen::<[u8; CHALLENGE_SIZE_BYTES]>().to_vec()),
            issued_at: Instant::now(),
        }
    }
}

/// Issues challenges and later consumes them exactly once.
///
/// `consume` must check and invalidate atomically: if two verifications race with the same
/// value, at most one may observe `true`.
pub trait ChallengeStore: Send + Sync {
    /// Issue and remember a new challenge.
    fn issue(&self) -> WebauthnResult<Challenge>;

    /// True iff `value` was issued, has not expired, and was not consumed before. The value can
    /// never be consumed again afterwards, whatever the answer.
    fn consume(&self, value: &[u8]) -> bool;
}

/// A process local [ChallengeStore].
pub struct InMemoryChallengeStore {
    entries: DashMap<Vec<u8>, Instant>,
    ttl: Duration,
}

impl Default for InMemoryChallengeStore {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_CHALLENGE_TTL)
    }
}

impl InMemoryChallengeStore {
    /// A store whose challenges live for the default time.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose challenges live for `ttl`.
    pub fn with_ttl(ttl: Duration) -> Self {
        InMemoryChallengeStore {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Drop challenges that can no longer be consumed. [ChallengeStore::issue] also does this.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, expires_at| *expires_at > now);
    }

    /// The number of outstanding challenges, including any that expired since the last issue.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no challenges are outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ChallengeStore for InMemoryChallengeStore {
    fn issue(&self) -> WebauthnResult<Challenge> {
        self.cleanup_expired();
        let chal = Challenge::generate();
        self.entries
            .insert(chal.value.0.clone(), chal.issued_at + self.ttl);
        Ok(chal)
    }

    fn consume(&self, value: &[u8]) -> bool {
        match self.entries.remove(value) {
            Some((_, expires_at)) if expires_at > Instant::now() => true,
            Some(_) => {
                debug!("challenge expired");
                false
            }
            None => {
                debug!("challenge unknown or already consumed");
                false
            }
        }
    }
}

impl fmt::Debug for InMemoryChallengeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryChallengeStore")
            .field("outstanding", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}
