//! The relying party: configuration, options generation and the two verification ceremonies.
//!
//! [WebauthnCore::verify_registration] and [WebauthnCore::verify_authentication] work on the raw
//! bytes a client returned. [WebauthnCore::finish_registration] and
//! [WebauthnCore::finish_authentication] wrap them for the JSON shapes in [crate::proto], and
//! also apply the per ceremony state created by the matching `start_*` call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;
use uuid::Uuid;
use webauthn_rp_attestation_ca::TrustAnchorSource;

use crate::attestation::verify_attestation_statement;
use crate::cbor::DecodeLimits;
use crate::challenge::{ChallengeStore, InMemoryChallengeStore};
use crate::constants::{DEFAULT_AUTHENTICATOR_TIMEOUT, DEFAULT_CHALLENGE_TTL};
use crate::credential::{check_sign_counter, CounterPolicy, CredentialStore};
use crate::crypto::compute_sha256;
use crate::error::{WebauthnError, WebauthnResult};
use crate::interface::*;
use crate::internals::{decode_attestation_object, decode_authenticator_data, decode_client_data};
use crate::proto::*;
use crate::trust::{evaluate_trust, AttestationPolicy, NoRevocationCheck, RevocationChecker};

/// A constructor for a new [WebauthnCore] instance. This accepts and configures a number of
/// site-wide properties that apply to all webauthn operations of this service.
pub struct WebauthnBuilder<'a> {
    rp_name: Option<&'a str>,
    rp_id: &'a str,
    allowed_origins: Vec<Url>,
    allow_subdomains: bool,
    allow_any_port: bool,
    timeout: u32,
    algorithms: Vec<COSEAlgorithm>,
    attestation_policy: AttestationPolicy,
    counter_policy: CounterPolicy,
    challenge_ttl: Duration,
    challenge_store: Option<Arc<dyn ChallengeStore>>,
    decode_limits: DecodeLimits,
    revocation_checker: Arc<dyn RevocationChecker>,
}

/// True when `rp_id` is `domain` or one of its parent domains.
fn is_effective_domain(domain: &str, rp_id: &str) -> bool {
    // The '.' makes sure myexample.com is not accepted for example.com.
    domain == rp_id || domain.ends_with(&format!(".{rp_id}"))
}

impl<'a> WebauthnBuilder<'a> {
    /// Initiate a new builder. This takes the relying party id and relying party origin.
    ///
    /// rp_id is what credentials bind themselves to, it can NOT be changed later without
    /// breaking every registered credential.
    ///
    /// # Errors
    ///
    /// rp_id *must* be an effective domain of rp_origin. This means that if you are hosting
    /// `https://idm.example.com`, rp_id must be `idm.example.com`, `example.com` or `com`.
    pub fn new(rp_id: &'a str, rp_origin: &Url) -> WebauthnResult<Self> {
        let valid = rp_origin
            .domain()
            .map(|effective_domain| is_effective_domain(effective_domain, rp_id))
            .unwrap_or(false);

        if !valid {
            error!(%rp_id, %rp_origin, "rp_id is not an effective domain of rp_origin");
            return Err(WebauthnError::Configuration(format!(
                "{rp_id} is not an effective domain of {rp_origin}"
            )));
        }

        Ok(WebauthnBuilder {
            rp_name: None,
            rp_id,
            allowed_origins: vec![rp_origin.clone()],
            allow_subdomains: false,
            allow_any_port: false,
            timeout: DEFAULT_AUTHENTICATOR_TIMEOUT,
            algorithms: COSEAlgorithm::secure_algs(),
            attestation_policy: AttestationPolicy::default(),
            counter_policy: CounterPolicy::default(),
            challenge_ttl: DEFAULT_CHALLENGE_TTL,
            challenge_store: None,
            decode_limits: DecodeLimits::default(),
            revocation_checker: Arc::new(NoRevocationCheck),
        })
    }

    /// Set the relying party name. This may be shown to the user. Defaults to the rp_id.
    pub fn rp_name(mut self, rp_name: &'a str) -> Self {
        self.rp_name = Some(rp_name);
        self
    }

    /// Accept client data from another origin as well as the one given to [Self::new].
    pub fn append_allowed_origin(mut self, origin: &Url) -> Self {
        self.allowed_origins.push(origin.clone());
        self
    }

    /// Accept origins whose host is a subdomain of an allowed origin's host, for example
    /// `https://au.idm.example.com` when `https://idm.example.com` is allowed.
    ///
    /// If in doubt, do NOT change this value. Defaults to false.
    pub fn allow_subdomains(mut self, allow: bool) -> Self {
        self.allow_subdomains = allow;
        self
    }

    /// Skip port checks on origin matches.
    pub fn allow_any_port(mut self, allow: bool) -> Self {
        self.allow_any_port = allow;
        self
    }

    /// How long, in milliseconds, the client is given to complete a ceremony.
    pub fn timeout(mut self, timeout_ms: u32) -> Self {
        self.timeout = timeout_ms;
        self
    }

    /// The credential algorithms offered to clients, in preference order.
    pub fn algorithms(mut self, algorithms: Vec<COSEAlgorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    /// Which attestations are accepted, and how they are judged.
    pub fn attestation_policy(mut self, policy: AttestationPolicy) -> Self {
        self.attestation_policy = policy;
        self
    }

    /// What happens when a credential's sign counter fails to advance.
    pub fn counter_policy(mut self, policy: CounterPolicy) -> Self {
        self.counter_policy = policy;
        self
    }

    /// How long issued challenges stay valid in the default challenge store.
    pub fn challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = ttl;
        self
    }

    /// Use a shared challenge store, for example one that spans several servers. This replaces
    /// the in-memory store, and `challenge_ttl` is then up to that store.
    pub fn challenge_store(mut self, store: Arc<dyn ChallengeStore>) -> Self {
        self.challenge_store = Some(store);
        self
    }

    /// Bounds applied when decoding CBOR from clients.
    pub fn decode_limits(mut self, limits: DecodeLimits) -> Self {
        self.decode_limits = limits;
        self
    }

    /// Check attestation chains for revocation once they have been built.
    pub fn revocation_checker(mut self, checker: Arc<dyn RevocationChecker>) -> Self {
        self.revocation_checker = checker;
        self
    }

    /// Complete the construction of the [WebauthnCore] instance.
    pub fn build(self) -> WebauthnResult<WebauthnCore> {
        if self.algorithms.is_empty() {
            return Err(WebauthnError::Configuration(
                "at least one algorithm must be offered".to_string(),
            ));
        }
        if self.algorithms.contains(&COSEAlgorithm::INSECURE_RS1) {
            return Err(WebauthnError::Configuration(
                "INSECURE_RS1 can not be offered".to_string(),
            ));
        }
        if self.decode_limits.max_depth == 0 || self.decode_limits.max_collection_items == 0 {
            return Err(WebauthnError::Configuration(
                "decode limits must be non zero".to_string(),
            ));
        }

        let challenges: Arc<dyn ChallengeStore> = match self.challenge_store {
            Some(store) => store,
            None => Arc::new(InMemoryChallengeStore::with_ttl(self.challenge_ttl)),
        };

        Ok(WebauthnCore {
            rp_name: self.rp_name.unwrap_or(self.rp_id).to_string(),
            rp_id: self.rp_id.to_string(),
            rp_id_hash: compute_sha256(self.rp_id.as_bytes()),
            allowed_origins: self.allowed_origins,
            allow_subdomains: self.allow_subdomains,
            allow_any_port: self.allow_any_port,
            timeout: self.timeout,
            algorithms: self.algorithms,
            attestation_policy: self.attestation_policy,
            counter_policy: self.counter_policy,
            decode_limits: self.decode_limits,
            challenges,
            revocation_checker: self.revocation_checker,
        })
    }
}

/// A configured relying party. Verifications hold no locks and may run concurrently; the only
/// shared mutation is challenge consumption, which the challenge store makes atomic.
pub struct WebauthnCore {
    rp_name: String,
    rp_id: String,
    rp_id_hash: [u8; 32],
    allowed_origins: Vec<Url>,
    allow_subdomains: bool,
    allow_any_port: bool,
    timeout: u32,
    algorithms: Vec<COSEAlgorithm>,
    attestation_policy: AttestationPolicy,
    counter_policy: CounterPolicy,
    decode_limits: DecodeLimits,
    challenges: Arc<dyn ChallengeStore>,
    revocation_checker: Arc<dyn RevocationChecker>,
}

impl fmt::Debug for WebauthnCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebauthnCore")
            .field("rp_name", &self.rp_name)
            .field("rp_id", &self.rp_id)
            .field("allowed_origins", &self.allowed_origins)
            .field("allow_subdomains", &self.allow_subdomains)
            .field("allow_any_port", &self.allow_any_port)
            .field("algorithms", &self.algorithms)
            .field("attestation_policy", &self.attestation_policy)
            .field("counter_policy", &self.counter_policy)
            .finish_non_exhaustive()
    }
}

impl WebauthnCore {
    /// The relying party id credentials are bound to.
    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }

    /// The origins client data may come from.
    pub fn allowed_origins(&self) -> &[Url] {
        &self.allowed_origins
    }

    fn origin_allowed(&self, origin: &Url) -> bool {
        self.allowed_origins.iter().any(|allowed| {
            if allowed.scheme() != origin.scheme() {
                return false;
            }
            if !self.allow_any_port && allowed.port_or_known_default() != origin.port_or_known_default()
            {
                return false;
            }
            match (allowed.host_str(), origin.host_str()) {
                (Some(a), Some(o)) => {
                    a == o || (self.allow_subdomains && o.ends_with(&format!(".{a}")))
                }
                _ => false,
            }
        })
    }

    /// Check the client data against the ceremony: type, challenge and origin.
    ///
    /// The context's challenge is consumed whatever the outcome, so a response can only be
    /// verified once.
    fn verify_client_data(
        &self,
        client_data_bytes: &[u8],
        ctx: &ValidationContext,
        ceremony: ClientDataType,
    ) -> WebauthnResult<CollectedClientData> {
        if ctx.expected_type != ceremony {
            return Err(WebauthnError::Configuration(format!(
                "validation context expects {} in a {} ceremony",
                ctx.expected_type.as_str(),
                ceremony.as_str()
            )));
        }

        let consumed = self.challenges.consume(&ctx.challenge.0);

        let client_data = decode_client_data(client_data_bytes)?;

        if client_data.type_ != ceremony.as_str() {
            debug!(expected = ceremony.as_str(), received = %client_data.type_, "client data type mismatch");
            return Err(WebauthnError::InvalidClientDataType);
        }

        if client_data.challenge != ctx.challenge {
            debug!(expected = %ctx.challenge, received = %client_data.challenge, "challenge mismatch");
            return Err(WebauthnError::MismatchedChallenge);
        }

        if !consumed {
            debug!(challenge = %ctx.challenge, "challenge was not issued, expired or already used");
            return Err(WebauthnError::ChallengeNotFound);
        }

        let origin_ok = match Url::parse(&client_data.origin) {
            Ok(origin) => self.origin_allowed(&origin),
            Err(e) => {
                debug!(?e, "client data origin is not a url");
                false
            }
        };
        if !origin_ok {
            debug!(origin = %client_data.origin, allowed = ?self.allowed_origins, "origin not allowed");
            return Err(WebauthnError::InvalidRPOrigin(client_data.origin));
        }

        Ok(client_data)
    }

    fn verify_flags(&self, auth_data: &AuthenticatorData, ctx: &ValidationContext) -> WebauthnResult<()> {
        if auth_data.rp_id_hash != self.rp_id_hash {
            debug!(rp_id = %self.rp_id, "rp id hash mismatch");
            return Err(WebauthnError::InvalidRPIDHash);
        }

        if !auth_data.user_present {
            debug!("user present flag not set");
            return Err(WebauthnError::UserNotPresent);
        }

        if ctx.user_verification_required && !auth_data.user_verified {
            debug!("user verification required but not performed");
            return Err(WebauthnError::UserNotVerified);
        }

        Ok(())
    }

    /// Verify a registration response.
    ///
    /// The checks run in order, and the first that fails is returned:
    ///
    /// 1. client data type is `webauthn.create`
    /// 2. the challenge matches and is consumed from the challenge store
    /// 3. the origin is allowed
    /// 4. the authenticator data is bound to our rp id
    /// 5. the user was present, and verified if required
    /// 6. attested credential data is present
    /// 7. the attestation statement verifies, and its trust is acceptable to policy
    pub fn verify_registration(
        &self,
        attestation_object: &[u8],
        client_data_json: &[u8],
        ctx: &ValidationContext,
        anchors: &dyn TrustAnchorSource,
    ) -> WebauthnResult<StoredCredential> {
        self.verify_client_data(client_data_json, ctx, ClientDataType::Create)?;

        let att_obj = decode_attestation_object(attestation_object, self.decode_limits)?;
        self.verify_flags(&att_obj.auth_data, ctx)?;

        let acd = att_obj.auth_data.acd.as_ref().ok_or_else(|| {
            debug!("registration has no attested credential data");
            WebauthnError::MissingAttestationCredentialData
        })?;

        if let Some(ext) = &att_obj.auth_data.extensions {
            trace!(?ext, "authenticator extensions");
        }

        let client_data_hash = compute_sha256(client_data_json);
        let (parsed, metadata) =
            verify_attestation_statement(&att_obj, &client_data_hash, &self.attestation_policy)?;

        let aaguid = Uuid::from_bytes(acd.aaguid);
        let trust = evaluate_trust(
            &parsed,
            aaguid,
            anchors,
            &self.attestation_policy,
            self.revocation_checker.as_ref(),
        )?;

        debug!(fmt = att_obj.format.as_str(), %aaguid, ?trust, "registration verified");

        Ok(StoredCredential {
            cred_id: acd.credential_id.clone(),
            cred: acd.credential_pk.clone(),
            counter: att_obj.auth_data.counter,
            aaguid,
            user_verified: att_obj.auth_data.user_verified,
            backup_eligible: att_obj.auth_data.backup_eligible,
            attestation_format: att_obj.format,
            trust,
            metadata,
            user_id: None,
        })
    }

    /// Verify an authentication response made with `cred`.
    ///
    /// After the same client data and flag checks as registration, the assertion must carry
    /// no attested credential data, its signature over `authenticatorData || SHA-256(clientData)`
    /// must verify with the stored key, and its counter must advance per the counter policy.
    pub fn verify_authentication(
        &self,
        authenticator_data: &[u8],
        client_data_json: &[u8],
        signature: &[u8],
        cred: &StoredCredential,
        ctx: &ValidationContext,
    ) -> WebauthnResult<AuthenticationResult> {
        self.verify_client_data(client_data_json, ctx, ClientDataType::Get)?;

        let auth_data = decode_authenticator_data(authenticator_data, self.decode_limits)?;
        self.verify_flags(&auth_data, ctx)?;

        if auth_data.acd.is_some() {
            debug!("assertion carries attested credential data");
            return Err(WebauthnError::UnexpectedAttestationCredentialData);
        }

        let client_data_hash = compute_sha256(client_data_json);
        let verification_data: Vec<u8> = authenticator_data
            .iter()
            .chain(client_data_hash.iter())
            .copied()
            .collect();

        if !cred.cred.verify_signature(signature, &verification_data)? {
            error!(cred_id = %cred.cred_id, "assertion signature invalid");
            return Err(WebauthnError::AuthenticationFailure);
        }

        let counter_regressed =
            check_sign_counter(cred.counter, auth_data.counter, self.counter_policy)?;

        Ok(AuthenticationResult {
            cred_id: cred.cred_id.clone(),
            counter: auth_data.counter,
            user_verified: auth_data.user_verified,
            backup_state: auth_data.backup_state,
            counter_regressed,
            needs_update: auth_data.counter > cred.counter,
        })
    }

    /// Generate the options for a new credential registration, and the state that
    /// [Self::finish_registration] needs. Persist the state against the user.
    ///
    /// `exclude_credentials` should list the credentials the user already has, so that an
    /// authenticator is not registered twice.
    pub fn start_registration(
        &self,
        user_id: &[u8],
        user_name: &str,
        user_display_name: &str,
        exclude_credentials: Option<Vec<CredentialID>>,
        user_verification: UserVerificationPolicy,
    ) -> WebauthnResult<(CreationChallengeResponse, RegistrationState)> {
        let challenge = self.challenges.issue()?.value;
        let exclude_credentials = exclude_credentials.unwrap_or_default();

        let attestation = if self.attestation_policy.require_trusted {
            AttestationConveyancePreference::Direct
        } else {
            AttestationConveyancePreference::None
        };

        let options = PublicKeyCredentialCreationOptions {
            rp: RelyingParty {
                name: self.rp_name.clone(),
                id: self.rp_id.clone(),
            },
            user: User {
                id: user_id.to_vec().into(),
                name: user_name.to_string(),
                display_name: user_display_name.to_string(),
            },
            challenge: challenge.clone(),
            pub_key_cred_params: self
                .algorithms
                .iter()
                .map(|alg| PubKeyCredParams {
                    type_: "public-key".to_string(),
                    alg: (*alg).into(),
                })
                .collect(),
            timeout: Some(self.timeout),
            attestation: Some(attestation),
            exclude_credentials: if exclude_credentials.is_empty() {
                None
            } else {
                Some(exclude_credentials.iter().map(Into::into).collect())
            },
            authenticator_selection: Some(AuthenticatorSelectionCriteria {
                require_resident_key: false,
                user_verification,
            }),
        };

        let state = RegistrationState {
            user_id: user_id.to_vec().into(),
            policy: user_verification,
            exclude_credentials,
            challenge,
            credential_algorithms: self.algorithms.clone(),
        };

        Ok((CreationChallengeResponse { public_key: options }, state))
    }

    /// Verify the client's response to [Self::start_registration]. On success the caller
    /// persists the returned credential against the user.
    pub fn finish_registration(
        &self,
        reg: &RegisterPublicKeyCredential,
        state: &RegistrationState,
        anchors: &dyn TrustAnchorSource,
    ) -> WebauthnResult<StoredCredential> {
        let ctx = ValidationContext::registration(state.challenge.clone(), state.policy.is_required());

        let mut cred = self.verify_registration(
            &reg.response.attestation_object.0,
            &reg.response.client_data_json.0,
            &ctx,
            anchors,
        )?;

        if !state.credential_algorithms.contains(&cred.cred.type_) {
            debug!(alg = ?cred.cred.type_, "credential algorithm was not offered");
            return Err(WebauthnError::CredentialAlteredAlgFromRequest);
        }

        if state.exclude_credentials.contains(&cred.cred_id) {
            debug!(cred_id = %cred.cred_id, "credential is excluded");
            return Err(WebauthnError::CredentialExcluded);
        }

        cred.user_id = Some(state.user_id.clone());
        Ok(cred)
    }

    /// Generate the options for an authentication, and the state that
    /// [Self::finish_authentication] needs.
    ///
    /// An empty `allow_credentials` lets the authenticator choose any discoverable credential
    /// for this rp.
    pub fn start_authentication(
        &self,
        allow_credentials: Vec<CredentialID>,
        user_verification: UserVerificationPolicy,
    ) -> WebauthnResult<(RequestChallengeResponse, AuthenticationState)> {
        let challenge = self.challenges.issue()?.value;

        let options = PublicKeyCredentialRequestOptions {
            challenge: challenge.clone(),
            timeout: Some(self.timeout),
            rp_id: self.rp_id.clone(),
            allow_credentials: allow_credentials.iter().map(Into::into).collect(),
            user_verification,
        };

        let state = AuthenticationState {
            allow_credentials,
            policy: user_verification,
            challenge,
        };

        Ok((RequestChallengeResponse { public_key: options }, state))
    }

    /// Verify the client's response to [Self::start_authentication], and record the new sign
    /// counter in `store`.
    pub fn finish_authentication(
        &self,
        rsp: &PublicKeyCredential,
        state: &AuthenticationState,
        store: &dyn CredentialStore,
    ) -> WebauthnResult<AuthenticationResult> {
        let cred_id = &rsp.raw_id;

        let allowed = state.allow_credentials.is_empty() || state.allow_credentials.contains(cred_id);
        let cred = if allowed {
            store
                .lookup(cred_id)
                .and_then(|cred| check_user_handle(rsp, &cred).map(|()| cred))
        } else {
            debug!(%cred_id, "credential is not in the allowed set");
            Err(WebauthnError::CredentialNotAllowed)
        };

        let cred = match cred {
            Ok(cred) => cred,
            Err(e) => {
                // This response has been judged, it must not be retried with this challenge.
                self.challenges.consume(&state.challenge.0);
                return Err(e);
            }
        };

        let ctx = ValidationContext::authentication(state.challenge.clone(), state.policy.is_required());

        let result = self.verify_authentication(
            &rsp.response.authenticator_data.0,
            &rsp.response.client_data_json.0,
            &rsp.response.signature.0,
            &cred,
            &ctx,
        )?;

        if result.needs_update {
            store.update_sign_count(cred_id, result.counter)?;
        }

        Ok(result)
    }
}

/// A discoverable credential assertion names its user. It must be the user the credential was
/// registered to.
fn check_user_handle(rsp: &PublicKeyCredential, cred: &StoredCredential) -> WebauthnResult<()> {
    match (rsp.get_user_unique_id(), cred.user_id.as_ref()) {
        (Some(received), Some(registered)) if received != registered.0.as_slice() => {
            debug!(cred_id = %cred.cred_id, "user handle does not match the credential's user");
            Err(WebauthnError::CredentialUserHandleMismatch)
        }
        _ => Ok(()),
    }
}
