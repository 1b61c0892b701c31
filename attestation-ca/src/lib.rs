//! Trust anchors for attestation certificate chains.
//!
//! A [TrustAnchorSet] holds the root certificates an operator is willing to accept attestation
//! chains from, optionally scoped to the AAGUIDs each root may vouch for. Anchors are addressed
//! either by an authenticator's AAGUID or by the issuer name found at the top of a presented
//! chain. Sets are immutable while a verification is running: refreshes (for example from a
//! periodic metadata download) replace the whole snapshot through [RefreshableTrustAnchors].

#![deny(warnings)]
#![warn(unused_extern_crates)]
#![warn(missing_docs)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

#[macro_use]
extern crate tracing;

use base64urlsafedata::Base64UrlSafeData;
use openssl::error::ErrorStack as OpenSSLErrorStack;
use openssl::{hash, x509};
use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use uuid::Uuid;

/// How a caller addresses the anchors relevant to one attestation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnchorKey {
    /// The AAGUID reported in the attested credential data.
    Aaguid(Uuid),
    /// The issuer distinguished name of the top-most certificate in the presented chain, in
    /// the `SN=value,SN=value` form produced by [x509_name_to_string].
    Issuer(String),
}

/// A serialised trust anchor, with the certificate carried as DER.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialisableTrustAnchor {
    pub(crate) ca: Base64UrlSafeData,
    pub(crate) aaguids: BTreeSet<Uuid>,
}

/// A root certificate that attestation chains may terminate in, and the authenticators it
/// is allowed to vouch for.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "SerialisableTrustAnchor")]
pub struct TrustAnchor {
    /// The x509 root of the attestation chain.
    pub ca: x509::X509,
    /// If not empty, the set of AAGUIDs this root may attest. A chain for any other AAGUID that
    /// terminates in this root is NOT trusted.
    pub aaguids: BTreeSet<Uuid>,
}

impl TryFrom<&TrustAnchor> for SerialisableTrustAnchor {
    type Error = OpenSSLErrorStack;

    fn try_from(anchor: &TrustAnchor) -> Result<Self, Self::Error> {
        Ok(SerialisableTrustAnchor {
            ca: Base64UrlSafeData(anchor.ca.to_der()?),
            aaguids: anchor.aaguids.clone(),
        })
    }
}

impl Serialize for TrustAnchor {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        SerialisableTrustAnchor::try_from(self)
            .map_err(|e| {
                error!(?e, "unable to encode trust anchor");
                S::Error::custom(e)
            })?
            .serialize(serializer)
    }
}

impl TryFrom<SerialisableTrustAnchor> for TrustAnchor {
    type Error = OpenSSLErrorStack;

    fn try_from(data: SerialisableTrustAnchor) -> Result<Self, Self::Error> {
        Ok(TrustAnchor {
            ca: x509::X509::from_der(&data.ca.0)?,
            aaguids: data.aaguids,
        })
    }
}

impl TryFrom<&[u8]> for TrustAnchor {
    type Error = OpenSSLErrorStack;

    /// Parse a PEM encoded root. The anchor accepts any AAGUID.
    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        Ok(TrustAnchor {
            ca: x509::X509::from_pem(data)?,
            aaguids: Default::default(),
        })
    }
}

impl TrustAnchor {
    /// Retrieve the key identifier (sha256 digest of the DER certificate) for this anchor.
    pub fn get_kid(&self) -> Result<Vec<u8>, OpenSSLErrorStack> {
        self.ca
            .digest(hash::MessageDigest::sha256())
            .map(|bytes| bytes.to_vec())
    }

    /// The subject name of this root, in the form used by [AnchorKey::Issuer].
    pub fn subject(&self) -> Result<String, OpenSSLErrorStack> {
        x509_name_to_string(self.ca.subject_name())
    }

    /// Replace the set of AAGUIDs this anchor may attest. An empty set allows all AAGUIDs.
    pub fn set_aaguids(&mut self, aaguids: BTreeSet<Uuid>) {
        self.aaguids = aaguids;
    }

    /// Add an AAGUID to the set this anchor may attest.
    pub fn insert_aaguid(&mut self, aaguid: Uuid) {
        self.aaguids.insert(aaguid);
    }

    /// True if this anchor may vouch for `aaguid`.
    pub fn permits(&self, aaguid: &Uuid) -> bool {
        self.aaguids.is_empty() || self.aaguids.contains(aaguid)
    }

    /// Create an anchor from a DER certificate.
    pub fn new_from_der(data: &[u8]) -> Result<Self, OpenSSLErrorStack> {
        Ok(TrustAnchor {
            ca: x509::X509::from_der(data)?,
            aaguids: BTreeSet::default(),
        })
    }
}

/// Render an x509 name as `SN=value,SN=value` in certificate order.
#[allow(deprecated)]
pub fn x509_name_to_string(name: &x509::X509NameRef) -> Result<String, OpenSSLErrorStack> {
    let mut parts = Vec::new();
    for entry in name.entries() {
        let sn = entry.object().nid().short_name()?;
        let value = entry.data().as_utf8()?;
        parts.push(format!("{}={}", sn, value));
    }
    Ok(parts.join(","))
}

/// The set of trust anchors in force for a verification, keyed by certificate digest.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<TrustAnchor>", into = "Vec<TrustAnchor>")]
pub struct TrustAnchorSet {
    /// The anchors we trust in this operation.
    pub cas: BTreeMap<Vec<u8>, TrustAnchor>,
}

impl TryFrom<Vec<TrustAnchor>> for TrustAnchorSet {
    type Error = OpenSSLErrorStack;

    fn try_from(anchors: Vec<TrustAnchor>) -> Result<Self, Self::Error> {
        let mut new = Self::default();
        for anchor in anchors {
            new.insert(anchor)?;
        }
        Ok(new)
    }
}

impl From<TrustAnchorSet> for Vec<TrustAnchor> {
    fn from(set: TrustAnchorSet) -> Self {
        set.cas.into_values().collect()
    }
}

impl TryFrom<TrustAnchor> for TrustAnchorSet {
    type Error = OpenSSLErrorStack;

    fn try_from(anchor: TrustAnchor) -> Result<Self, Self::Error> {
        let mut new = Self::default();
        new.insert(anchor)?;
        Ok(new)
    }
}

impl TryFrom<&[u8]> for TrustAnchorSet {
    type Error = OpenSSLErrorStack;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        let mut new = Self::default();
        new.insert(TrustAnchor::try_from(data)?)?;
        Ok(new)
    }
}

impl TrustAnchorSet {
    /// Build a set from roots paired with the AAGUID they attest. A root that appears more than
    /// once accumulates every AAGUID it was paired with.
    pub fn from_iter<I: IntoIterator<Item = (x509::X509, Uuid)>>(
        iter: I,
    ) -> Result<Self, OpenSSLErrorStack> {
        let mut cas: BTreeMap<Vec<u8>, TrustAnchor> = BTreeMap::default();

        for (ca, aaguid) in iter {
            let kid = ca.digest(hash::MessageDigest::sha256())?.to_vec();

            cas.entry(kid)
                .or_insert_with(|| TrustAnchor {
                    ca,
                    aaguids: BTreeSet::default(),
                })
                .insert_aaguid(aaguid);
        }

        Ok(TrustAnchorSet { cas })
    }

    /// Determine if this set contains any anchors.
    pub fn is_empty(&self) -> bool {
        self.cas.is_empty()
    }

    /// The number of anchors in this set.
    pub fn len(&self) -> usize {
        self.cas.len()
    }

    /// Insert an anchor, returning the anchor it replaced if the same root was present.
    pub fn insert(&mut self, anchor: TrustAnchor) -> Result<Option<TrustAnchor>, OpenSSLErrorStack> {
        let kid = anchor.get_kid()?;
        Ok(self.cas.insert(kid, anchor))
    }

    /// Iterate the anchors in this set.
    pub fn iter(&self) -> impl Iterator<Item = &TrustAnchor> {
        self.cas.values()
    }

    /// Look up an anchor by its key identifier.
    pub fn get(&self, kid: &[u8]) -> Option<&TrustAnchor> {
        self.cas.get(kid)
    }

    /// Select the anchors that apply to `key`. Anchors whose subject can not be rendered are
    /// skipped for issuer lookups.
    pub fn anchors_for(&self, key: &AnchorKey) -> TrustAnchorSet {
        let cas = self
            .cas
            .iter()
            .filter(|(_, anchor)| match key {
                AnchorKey::Aaguid(aaguid) => anchor.permits(aaguid),
                AnchorKey::Issuer(issuer) => anchor
                    .subject()
                    .map(|subject| &subject == issuer)
                    .unwrap_or_else(|e| {
                        debug!(?e, "unable to render anchor subject");
                        false
                    }),
            })
            .map(|(kid, anchor)| (kid.clone(), anchor.clone()))
            .collect();
        TrustAnchorSet { cas }
    }

    /// Merge the anchors of `other` into this set.
    pub fn extend(&mut self, other: TrustAnchorSet) {
        self.cas.extend(other.cas);
    }
}

/// A supplier of trust anchors. Implementations may be refreshed out of band, but each call
/// returns a snapshot that does not change underneath the caller.
pub trait TrustAnchorSource: Send + Sync {
    /// The anchors relevant to `key`.
    fn anchors_for(&self, key: &AnchorKey) -> TrustAnchorSet;
}

impl TrustAnchorSource for TrustAnchorSet {
    fn anchors_for(&self, key: &AnchorKey) -> TrustAnchorSet {
        TrustAnchorSet::anchors_for(self, key)
    }
}

/// A trust anchor source whose contents can be swapped while verifications are running.
#[derive(Debug, Default)]
pub struct RefreshableTrustAnchors {
    inner: RwLock<Arc<TrustAnchorSet>>,
}

impl RefreshableTrustAnchors {
    /// Create a source holding `anchors`.
    pub fn new(anchors: TrustAnchorSet) -> Self {
        RefreshableTrustAnchors {
            inner: RwLock::new(Arc::new(anchors)),
        }
    }

    /// Replace the current anchors. Verifications already holding a snapshot are unaffected.
    pub fn replace(&self, anchors: TrustAnchorSet) {
        match self.inner.write() {
            Ok(mut guard) => *guard = Arc::new(anchors),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(anchors),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<TrustAnchorSet> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl TrustAnchorSource for RefreshableTrustAnchors {
    fn anchors_for(&self, key: &AnchorKey) -> TrustAnchorSet {
        self.snapshot().anchors_for(key)
    }
}
