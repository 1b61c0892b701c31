//! Trust evaluation of attestation certificate paths, and the policy deciding which attestation
//! types a relying party accepts.

use std::time::Duration;

use base64urlsafedata::Base64UrlSafeData;
use openssl::hash::MessageDigest;
use openssl::stack;
use openssl::x509::{self, store, verify};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use webauthn_rp_attestation_ca::{x509_name_to_string, AnchorKey, TrustAnchorSet, TrustAnchorSource};

use crate::constants::DEFAULT_SAFETYNET_MAX_AGE;
use crate::error::{ErrorKind, WebauthnError, WebauthnResult};
use crate::interface::{AttestationTrustworthiness, ParsedAttestationData};

/// Which attestations a relying party accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationPolicy {
    /// Accept registrations that carry no attestation.
    pub allow_none: bool,
    /// Accept registrations where the credential signs its own attestation.
    pub allow_self: bool,
    /// Reject any registration whose attestation does not chain to a trust anchor.
    pub require_trusted: bool,
    /// Skip certificate validity periods and SafetyNet timestamp checks. Only for testing
    /// with recorded attestations.
    pub danger_disable_certificate_time_checks: bool,
    /// The oldest SafetyNet response accepted.
    pub safetynet_max_age: Duration,
    /// Reject android-key attestations whose key is not held in a trusted execution
    /// environment.
    pub require_android_tee: bool,
}

impl Default for AttestationPolicy {
    fn default() -> Self {
        AttestationPolicy {
            allow_none: true,
            allow_self: true,
            require_trusted: false,
            danger_disable_certificate_time_checks: false,
            safetynet_max_age: DEFAULT_SAFETYNET_MAX_AGE,
            require_android_tee: false,
        }
    }
}

/// A revocation check run on attestation paths after they were traced to a trust anchor.
pub trait RevocationChecker: Send + Sync {
    /// Fail if any certificate in `chain` (leaf first, as presented) is revoked.
    fn check(&self, chain: &[x509::X509]) -> WebauthnResult<()>;
}

/// Performs no revocation checks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRevocationCheck;

impl RevocationChecker for NoRevocationCheck {
    fn check(&self, _chain: &[x509::X509]) -> WebauthnResult<()> {
        Ok(())
    }
}

/// Gather the anchors that may terminate `chain`: those scoped to `aaguid`, and those whose
/// subject is the issuer of the top-most presented certificate.
pub fn select_anchors(
    source: &dyn TrustAnchorSource,
    aaguid: Uuid,
    chain: &[x509::X509],
) -> TrustAnchorSet {
    let mut anchors = source.anchors_for(&AnchorKey::Aaguid(aaguid));

    if let Some(top) = chain.last() {
        match x509_name_to_string(top.issuer_name()) {
            Ok(issuer) => anchors.extend(source.anchors_for(&AnchorKey::Issuer(issuer))),
            Err(e) => debug!(?e, "unable to render chain issuer"),
        }
    }

    anchors
}

/// Build a path from the leaf of `chain` to one of `anchors`. Returns the key identifier of
/// the anchor that terminated the path.
pub fn verify_attestation_chain(
    chain: &[x509::X509],
    anchors: &TrustAnchorSet,
    aaguid: Uuid,
    danger_disable_certificate_time_checks: bool,
) -> WebauthnResult<Vec<u8>> {
    if anchors.is_empty() {
        return Err(WebauthnError::AttestationChainNotTrusted(
            "no trust anchors apply".to_string(),
        ));
    }

    let (leaf, intermediates) = chain
        .split_first()
        .ok_or(WebauthnError::AttestationStatementX5CInvalid)?;

    for crt in chain {
        trace!(?crt);
    }

    let mut chain_stack = stack::Stack::new()?;
    for crt in intermediates {
        chain_stack.push(crt.clone())?;
    }

    let mut ca_store = store::X509StoreBuilder::new()?;
    if danger_disable_certificate_time_checks {
        ca_store.set_flags(verify::X509VerifyFlags::NO_CHECK_TIME)?;
    }
    for anchor in anchors.iter() {
        ca_store.add_cert(anchor.ca.clone())?;
    }
    let ca_store = ca_store.build();

    let mut ca_ctx = x509::X509StoreContext::new()?;

    // The outer result carries openssl failures, the inner one the verification outcome.
    let outcome: Result<Vec<u8>, String> =
        ca_ctx.init(&ca_store, leaf, &chain_stack, |ca_ctx_ref| {
            ca_ctx_ref.verify_cert()?;
            let res = ca_ctx_ref.error();
            if res != x509::X509VerifyResult::OK {
                debug!(
                    depth = ca_ctx_ref.error_depth(),
                    current = ?ca_ctx_ref
                        .current_cert()
                        .and_then(|crt| x509_name_to_string(crt.subject_name()).ok()),
                    "attestation chain verification failed"
                );
                return Ok(Err(res.to_string()));
            }

            let root = ca_ctx_ref
                .chain()
                .and_then(|chain| chain.iter().last())
                .map(|root| root.digest(MessageDigest::sha256()))
                .transpose()?;

            Ok(root
                .map(|dgst| dgst.to_vec())
                .ok_or_else(|| "verified chain has no root".to_string()))
        })?;

    let kid = outcome.map_err(|reason| {
        error!(%reason, "attestation chain is not trusted");
        WebauthnError::AttestationChainNotTrusted(reason)
    })?;

    let anchor = anchors.get(&kid).ok_or_else(|| {
        WebauthnError::AttestationChainNotTrusted("chain root is not a configured anchor".to_string())
    })?;

    if !anchor.permits(&aaguid) {
        debug!(%aaguid, "anchor does not vouch for this aaguid");
        return Err(WebauthnError::AttestationChainNotTrusted(
            "anchor does not vouch for this aaguid".to_string(),
        ));
    }

    Ok(kid)
}

/// Decide how far a verified attestation can be trusted, and apply `policy` to the answer.
pub fn evaluate_trust(
    parsed: &ParsedAttestationData,
    aaguid: Uuid,
    source: &dyn TrustAnchorSource,
    policy: &AttestationPolicy,
    revocation: &dyn RevocationChecker,
) -> WebauthnResult<AttestationTrustworthiness> {
    let chain = match parsed {
        ParsedAttestationData::None => {
            if !policy.allow_none || policy.require_trusted {
                return Err(WebauthnError::AttestationTypeNotAllowed("none"));
            }
            return Ok(AttestationTrustworthiness::Absent);
        }
        ParsedAttestationData::Self_ => {
            if !policy.allow_self || policy.require_trusted {
                return Err(WebauthnError::AttestationTypeNotAllowed("self"));
            }
            return Ok(AttestationTrustworthiness::SelfAttested);
        }
        ParsedAttestationData::Basic(chain)
        | ParsedAttestationData::AttCa(chain)
        | ParsedAttestationData::AnonCa(chain) => chain,
    };

    let anchors = select_anchors(source, aaguid, chain);

    match verify_attestation_chain(
        chain,
        &anchors,
        aaguid,
        policy.danger_disable_certificate_time_checks,
    ) {
        Ok(kid) => {
            revocation.check(chain).map_err(|e| match e.kind() {
                ErrorKind::UntrustedAttestation => e,
                _ => WebauthnError::AttestationRevoked(e.to_string()),
            })?;
            Ok(AttestationTrustworthiness::Trusted {
                anchor: Base64UrlSafeData(kid),
            })
        }
        Err(WebauthnError::AttestationChainNotTrusted(reason)) => {
            if policy.require_trusted {
                Err(WebauthnError::AttestationChainNotTrusted(reason))
            } else {
                debug!(%reason, "accepting untrusted attestation");
                Ok(AttestationTrustworthiness::Untrusted)
            }
        }
        Err(e) => Err(e),
    }
}
