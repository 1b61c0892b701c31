//! Extended Structs and representations for Webauthn Operations. The serialisable types here
//! are designed to allow persistence and should not change.

use base64urlsafedata::Base64UrlSafeData;
use serde::{Deserialize, Serialize};
use serde_cbor_2::Value;
use uuid::Uuid;

use openssl::x509;

use crate::attestation::AttestationFormat;
use crate::proto::{CredentialID, UserVerificationPolicy};

/// Representation of an AAGUID
/// <https://www.w3.org/TR/webauthn/#aaguid>
pub type Aaguid = [u8; 16];

/// A COSE signature algorithm identifier.
/// <https://www.iana.org/assignments/cose/cose.xhtml#algorithms>
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum COSEAlgorithm {
    /// ECDSA with SHA-256 on P-256
    ES256 = -7,
    /// ECDSA with SHA-384 on P-384
    ES384 = -35,
    /// ECDSA with SHA-512 on P-521
    ES512 = -36,
    /// RSASSA-PKCS1-v1_5 with SHA-256
    RS256 = -257,
    /// RSASSA-PKCS1-v1_5 with SHA-384
    RS384 = -258,
    /// RSASSA-PKCS1-v1_5 with SHA-512
    RS512 = -259,
    /// RSASSA-PSS with SHA-256
    PS256 = -37,
    /// RSASSA-PSS with SHA-384
    PS384 = -38,
    /// RSASSA-PSS with SHA-512
    PS512 = -39,
    /// EdDSA with Ed25519 or Ed448
    EDDSA = -8,
    /// RSASSA-PKCS1-v1_5 with SHA-1. Only recognised so that it can be refused.
    INSECURE_RS1 = -65535,
}

impl COSEAlgorithm {
    /// The algorithms offered to clients by default, in preference order.
    pub fn secure_algs() -> Vec<Self> {
        vec![
            COSEAlgorithm::ES256,
            COSEAlgorithm::RS256,
            COSEAlgorithm::EDDSA,
            COSEAlgorithm::ES384,
            COSEAlgorithm::PS256,
        ]
    }
}

impl TryFrom<i128> for COSEAlgorithm {
    type Error = ();

    fn try_from(i: i128) -> Result<Self, Self::Error> {
        match i {
            -7 => Ok(COSEAlgorithm::ES256),
            -35 => Ok(COSEAlgorithm::ES384),
            -36 => Ok(COSEAlgorithm::ES512),
            -257 => Ok(COSEAlgorithm::RS256),
            -258 => Ok(COSEAlgorithm::RS384),
            -259 => Ok(COSEAlgorithm::RS512),
            -37 => Ok(COSEAlgorithm::PS256),
            -38 => Ok(COSEAlgorithm::PS384),
            -39 => Ok(COSEAlgorithm::PS512),
            -8 => Ok(COSEAlgorithm::EDDSA),
            -65535 => Ok(COSEAlgorithm::INSECURE_RS1),
            _ => Err(()),
        }
    }
}

impl From<COSEAlgorithm> for i64 {
    fn from(c: COSEAlgorithm) -> Self {
        c as i64
    }
}

/// An ECDSACurve identifier. You probably will never need to alter
/// or use this value, as it is set inside the Credential for you.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ECDSACurve {
    // +---------+-------+----------+------------------------------------+
    // | Name    | Value | Key Type | Description                        |
    // +---------+-------+----------+------------------------------------+
    // | P-256   | 1     | EC2      | NIST P-256 also known as secp256r1 |
    // | P-384   | 2     | EC2      | NIST P-384 also known as secp384r1 |
    // | P-521   | 3     | EC2      | NIST P-521 also known as secp521r1 |
    // +---------+-------+----------+------------------------------------+
    /// Identifies this curve as SECP256R1 (X9_62_PRIME256V1 in OpenSSL)
    SECP256R1 = 1,
    /// Identifies this curve as SECP384R1
    SECP384R1 = 2,
    /// Identifies this curve as SECP521R1
    SECP521R1 = 3,
}

impl ECDSACurve {
    /// The size in bytes of one affine coordinate on this curve.
    pub fn coordinate_size(self) -> usize {
        match self {
            ECDSACurve::SECP256R1 => 32,
            ECDSACurve::SECP384R1 => 48,
            ECDSACurve::SECP521R1 => 66,
        }
    }
}

/// An EDDSACurve identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EDDSACurve {
    // +---------+-------+----------+------------------------------------+
    // | Ed25519 | 6     | OKP      | Ed25519 for use w/ EdDSA only      |
    // | Ed448   | 7     | OKP      | Ed448 for use w/ EdDSA only        |
    // +---------+-------+----------+------------------------------------+
    /// Identifies this OKP as ED25519
    ED25519 = 6,
    /// Identifies this OKP as ED448
    ED448 = 7,
}

impl EDDSACurve {
    /// The size in bytes of a public key on this curve.
    pub fn coordinate_size(self) -> usize {
        match self {
            EDDSACurve::ED25519 => 32,
            EDDSACurve::ED448 => 57,
        }
    }
}

/// A COSE Elliptic Curve Public Key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct COSEEC2Key {
    /// The curve that this key references.
    pub curve: ECDSACurve,
    /// The key's public X coordinate.
    pub x: Base64UrlSafeData,
    /// The key's public Y coordinate.
    pub y: Base64UrlSafeData,
}

/// A COSE Octet Key Pair public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct COSEOKPKey {
    /// The curve that this key references.
    pub curve: EDDSACurve,
    /// The public key.
    pub x: Base64UrlSafeData,
}

/// A COSE RSA PublicKey.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct COSERSAKey {
    /// An RSA modulus
    pub n: Base64UrlSafeData,
    /// An RSA exponent
    pub e: Base64UrlSafeData,
}

/// The type of Key contained within a COSE value.
#[allow(non_camel_case_types)]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum COSEKeyType {
    /// Identifies this as an Elliptic Curve octet key pair
    EC_OKP(COSEOKPKey),
    /// Identifies this as an Elliptic Curve EC2 key
    EC_EC2(COSEEC2Key),
    /// Identifies this as an RSA key
    RSA(COSERSAKey),
}

/// The numeric id of the COSEKeyType used in the CBOR fields.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i64)]
pub enum COSEKeyTypeId {
    /// Octet Key Pair
    EC_OKP = 1,
    /// Elliptic Curve Keys w/ x- and y-coordinate
    EC_EC2 = 2,
    /// RSA
    EC_RSA = 3,
}

/// A COSE Key as provided by the Authenticator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct COSEKey {
    /// The algorithm this key signs with.
    pub type_: COSEAlgorithm,
    /// The public key
    pub key: COSEKeyType,
}

/// Attested Credential Data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    /// The guid of the authenticator. May indicate manufacturer.
    pub aaguid: Aaguid,
    /// The credential ID.
    pub credential_id: CredentialID,
    /// The credentials public Key.
    pub credential_pk: COSEKey,
}

/// Authenticator data, as signed by the authenticator.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatorData {
    /// Hash of the relying party id.
    pub rp_id_hash: [u8; 32],
    /// The counter of this credentials activations.
    pub counter: u32,
    /// Flag if the user was present.
    pub user_present: bool,
    /// Flag is the user verified to the device. Implies presence.
    pub user_verified: bool,
    /// Flag if this credential may be backed up or synchronised.
    pub backup_eligible: bool,
    /// Flag if this credential is currently backed up.
    pub backup_state: bool,
    /// The attested credential, present only during registration.
    pub acd: Option<AttestedCredentialData>,
    /// Extensions supplied by the device. Always a map when present.
    pub extensions: Option<Value>,
}

/// A decoded attestation object.
#[derive(Debug, Clone)]
pub struct AttestationObject {
    /// The format of the attestation statement.
    pub format: AttestationFormat,
    /// The decoded authenticator data.
    pub auth_data: AuthenticatorData,
    /// The exact authenticator data bytes, which attestation signatures cover.
    pub auth_data_bytes: Vec<u8>,
    /// The format specific attestation statement.
    pub att_stmt: Value,
}

/// The processed attestation and its certificate path.
#[derive(Debug)]
pub enum ParsedAttestationData {
    /// The credential is authenticated by a signing X509 Certificate
    /// from a vendor or provider.
    Basic(Vec<x509::X509>),
    /// The credential is authenticated using surrogate basic attestation
    /// it uses the credential private key to create the attestation signature
    Self_,
    /// The credential is authenticated using a CA, and may provide a
    /// ca chain to validate to its root.
    AttCa(Vec<x509::X509>),
    /// The credential is authenticated using an anonymization CA, and may provide a ca chain to
    /// validate to its root.
    AnonCa(Vec<x509::X509>),
    /// No Attestation type was provided with this Credential.
    None,
}

impl ParsedAttestationData {
    /// The certificate path carried by this attestation, leaf first.
    pub fn chain(&self) -> Option<&[x509::X509]> {
        match self {
            ParsedAttestationData::Basic(c)
            | ParsedAttestationData::AttCa(c)
            | ParsedAttestationData::AnonCa(c) => Some(c.as_slice()),
            ParsedAttestationData::Self_ | ParsedAttestationData::None => None,
        }
    }
}

/// How far an attestation could be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttestationTrustworthiness {
    /// No attestation was provided.
    Absent,
    /// The credential signed its own attestation. Proves possession only.
    SelfAttested,
    /// The attestation chain terminated in a configured trust anchor.
    Trusted {
        /// The sha256 digest of the anchor that was used.
        anchor: Base64UrlSafeData,
    },
    /// A certificate chain was provided but no configured anchor accepted it.
    Untrusted,
}

/// Additional details that an attestation statement exposes about its authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttestationMetadata {
    /// no metadata available
    None,
    /// Packed attestation with a certificate.
    Packed {
        /// The AAGUID the certificate vouches for.
        aaguid: Uuid,
    },
    /// TPM attestation.
    Tpm {
        /// The AAGUID of the TPM authenticator.
        aaguid: Uuid,
        /// The firmware version of the TPM.
        firmware_version: u64,
    },
    /// Android key attestation.
    AndroidKey {
        /// The keymaster security level is a trusted execution environment.
        is_km_tee: bool,
        /// The attestation security level is a trusted execution environment.
        is_attest_tee: bool,
    },
    /// Android SafetyNet attestation.
    AndroidSafetyNet {
        /// The name of the app that requested the attestation.
        apk_package_name: String,
        /// Digests of the certificates that signed the app.
        apk_certificate_digest_sha256: Vec<Base64UrlSafeData>,
        /// The device passed the compatibility profile.
        cts_profile_match: bool,
        /// The device passed basic integrity checks.
        basic_integrity: bool,
        /// How the integrity verdict was reached.
        evaluation_type: Option<String>,
    },
}

/// A registered credential. This is produced by registration, persisted by the caller, and
/// read back for each authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    /// The ID of this credential.
    pub cred_id: CredentialID,
    /// The public key of this credential
    pub cred: COSEKey,
    /// The last counter value seen for this credential.
    pub counter: u32,
    /// The authenticator model identifier.
    pub aaguid: Uuid,
    /// The user was verified when this credential was registered.
    pub user_verified: bool,
    /// This credential may be backed up.
    pub backup_eligible: bool,
    /// The attestation format presented at registration.
    pub attestation_format: AttestationFormat,
    /// How far the registration attestation could be trusted.
    pub trust: AttestationTrustworthiness,
    /// Details reported by the attestation statement.
    pub metadata: AttestationMetadata,
    /// The user handle this credential was registered to, when known.
    #[serde(default)]
    pub user_id: Option<Base64UrlSafeData>,
}

/// The outcome of a successful authentication. The caller persists `counter` when
/// `needs_update` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResult {
    /// The credential that was used.
    pub cred_id: CredentialID,
    /// The counter reported by the authenticator.
    pub counter: u32,
    /// The user was verified in this ceremony.
    pub user_verified: bool,
    /// The credential is currently backed up.
    pub backup_state: bool,
    /// The counter did not advance but policy let the ceremony succeed. Treat as a possible
    /// clone.
    pub counter_regressed: bool,
    /// The stored credential should be updated with `counter`.
    pub needs_update: bool,
}

/// The client data type a ceremony expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientDataType {
    /// `webauthn.create`
    Create,
    /// `webauthn.get`
    Get,
}

impl ClientDataType {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ClientDataType::Create => crate::constants::CLIENT_DATA_TYPE_CREATE,
            ClientDataType::Get => crate::constants::CLIENT_DATA_TYPE_GET,
        }
    }
}

/// The per call inputs of a verification that are not in the client response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationContext {
    /// The challenge that was issued for this ceremony.
    pub challenge: Base64UrlSafeData,
    /// Fail unless the authenticator verified the user.
    pub user_verification_required: bool,
    /// The client data type this ceremony expects.
    pub expected_type: ClientDataType,
}

impl ValidationContext {
    /// The context of a registration ceremony.
    pub fn registration(challenge: Base64UrlSafeData, user_verification_required: bool) -> Self {
        ValidationContext {
            challenge,
            user_verification_required,
            expected_type: ClientDataType::Create,
        }
    }

    /// The context of an authentication ceremony.
    pub fn authentication(challenge: Base64UrlSafeData, user_verification_required: bool) -> Self {
        ValidationContext {
            challenge,
            user_verification_required,
            expected_type: ClientDataType::Get,
        }
    }
}

/// The in progress state of a credential registration attempt. You must persist this associated
/// to the UserID requesting the registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationState {
    pub(crate) user_id: Base64UrlSafeData,
    pub(crate) policy: UserVerificationPolicy,
    pub(crate) exclude_credentials: Vec<CredentialID>,
    pub(crate) challenge: Base64UrlSafeData,
    pub(crate) credential_algorithms: Vec<COSEAlgorithm>,
}

/// The in progress state of an authentication attempt. You must persist this associated to the
/// UserID requesting the authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationState {
    pub(crate) allow_credentials: Vec<CredentialID>,
    pub(crate) policy: UserVerificationPolicy,
    pub(crate) challenge: Base64UrlSafeData,
}

impl AuthenticationState {
    /// Set which credentials the user is allowed to authenticate with. An empty list allows any
    /// credential the store knows, for discoverable credentials.
    pub fn set_allowed_credentials(&mut self, credentials: Vec<CredentialID>) {
        self.allow_credentials = credentials;
    }
}
