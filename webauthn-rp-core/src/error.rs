//! Possible errors that may occur during Webauthn Operation processing.
//!
//! Every [WebauthnError] belongs to exactly one [ErrorKind]. Endpoint layers should match on
//! the kind to decide how to answer a client, and log the error itself for audit.

use openssl::error::ErrorStack as OpenSSLErrorStack;
use std::fmt;

/// A wrapper type for Results from Webauthn operations.
pub type WebauthnResult<T> = core::result::Result<T, WebauthnError>;

/// The two families of malformed binary input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// Input was cut short, had bytes left over, or tripped a resource limit.
    TruncatedOrOversized,
    /// Input was well framed, but a field or flag contradicts the required layout.
    SchemaViolation,
}

/// The classification of a failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed binary or JSON input.
    Decode(DecodeErrorKind),
    /// The challenge was missing, mismatched, expired, or already consumed.
    BadChallenge,
    /// The client data origin is not one we serve.
    BadOrigin,
    /// The authenticator data is bound to a different relying party.
    BadRpId,
    /// The client data type does not match the ceremony.
    BadClientDataType,
    /// A cryptographic signature did not verify.
    BadSignature,
    /// The attestation statement or its certificates are malformed, or break a format rule.
    BadAttestationStatement,
    /// The attestation could not be traced to an acceptable trust anchor, or its type is not
    /// accepted by policy.
    UntrustedAttestation,
    /// The signature counter did not advance. The credential may be cloned.
    MaliciousCounterValue,
    /// An algorithm, curve or format we do not support or do not allow.
    UnsupportedAlgorithm,
    /// The user presence flag was not set.
    UserNotPresent,
    /// User verification was required but not performed.
    UserNotVerified,
    /// The credential is unknown or not allowed for this ceremony.
    CredentialNotFound,
    /// The credential is excluded or already registered.
    CredentialRejected,
    /// The relying party configuration is invalid.
    Configuration,
    /// A failure inside a cryptographic library.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Possible errors that may occur during Webauthn Operation processing.
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum WebauthnError {
    #[error("The relying party configuration is invalid: {0}")]
    Configuration(String),

    // Binary decoding
    #[error("CBOR input ended early at offset {offset}")]
    CborTruncated { offset: usize },

    #[error("CBOR {limit} limit exceeded at offset {offset}")]
    CborLimitExceeded { offset: usize, limit: &'static str },

    #[error("CBOR input has trailing bytes at offset {offset}")]
    CborTrailingBytes { offset: usize },

    #[error("Unsupported CBOR construct at offset {offset}: {reason}")]
    CborUnsupported { offset: usize, reason: &'static str },

    #[error("Non-canonical CBOR length or integer at offset {offset}")]
    CborNonCanonical { offset: usize },

    #[error("Duplicate CBOR map key at offset {offset}")]
    CborDuplicateKey { offset: usize },

    #[error("Invalid UTF-8 in CBOR text string at offset {offset}")]
    CborInvalidUtf8 { offset: usize },

    #[error("Authenticator data truncated reading {field} at offset {offset}")]
    AuthenticatorDataTruncated { field: &'static str, offset: usize },

    #[error("Authenticator data has trailing bytes at offset {offset}")]
    AuthenticatorDataTrailingBytes { offset: usize },

    #[error("Authenticator data flags contradict content: {field}")]
    AuthenticatorDataFlagMismatch { field: &'static str },

    #[error("Attestation object is invalid: {0}")]
    AttestationObjectInvalid(&'static str),

    #[error("JSON parse failure: {0}")]
    ParseJSONFailure(#[from] serde_json::Error),

    #[error("Base64 parse failure: {0}")]
    ParseBase64Failure(#[from] base64::DecodeError),

    #[error("Binary structure parse failure")]
    ParseNOMFailure,

    // COSE keys
    #[error("COSE key has an invalid CBOR layout")]
    COSEKeyInvalidCBORValue,

    #[error("COSE key combination is not supported: kty {key_type}, alg {alg}")]
    COSEKeyUnsupported { key_type: i128, alg: i128 },

    #[error("COSE algorithm identifier is not supported")]
    COSEKeyInvalidAlgorithm,

    #[error("COSE EC2 key has invalid coordinates")]
    COSEKeyECDSAXYInvalid,

    #[error("COSE RSA key has invalid modulus or exponent")]
    COSEKeyRSANEInvalid,

    #[error("COSE OKP key has an invalid x value")]
    COSEKeyEDDSAXInvalid,

    #[error("COSE key material is not a valid public key")]
    COSEKeyInvalidPoint,

    #[error("Insecure cryptography was requested")]
    CredentialInsecureCryptography,

    #[error("The credential algorithm was not offered in the request")]
    CredentialAlteredAlgFromRequest,

    #[error("The attestation format is not supported")]
    AttestationNotSupported,

    // Ceremony binding
    #[error("Client data type does not match the ceremony")]
    InvalidClientDataType,

    #[error("Challenge does not match the expected challenge")]
    MismatchedChallenge,

    #[error("Challenge was not issued, has expired, or was already consumed")]
    ChallengeNotFound,

    #[error("Client data origin {0} is not allowed")]
    InvalidRPOrigin(String),

    #[error("Authenticator data rp id hash does not match")]
    InvalidRPIDHash,

    #[error("User present flag not set")]
    UserNotPresent,

    #[error("User verified flag not set while verification is required")]
    UserNotVerified,

    #[error("Registration did not carry attested credential data")]
    MissingAttestationCredentialData,

    #[error("Assertion unexpectedly carried attested credential data")]
    UnexpectedAttestationCredentialData,

    // Signatures
    #[error("Assertion signature is invalid")]
    AuthenticationFailure,

    #[error("Attestation statement signature is invalid")]
    AttestationStatementSigInvalid,

    // Attestation statements
    #[error("Attestation statement is not a map")]
    AttestationStatementMapInvalid,

    #[error("Attestation statement sig missing")]
    AttestationStatementSigMissing,

    #[error("Attestation statement alg missing")]
    AttestationStatementAlgMissing,

    #[error("Attestation statement alg invalid")]
    AttestationStatementAlgInvalid,

    #[error("Attestation statement alg does not match the credential")]
    AttestationStatementAlgMismatch,

    #[error("Attestation statement x5c missing")]
    AttestationStatementX5CMissing,

    #[error("Attestation statement x5c invalid")]
    AttestationStatementX5CInvalid,

    #[error("Attestation statement ver missing")]
    AttestationStatementVerMissing,

    #[error("Attestation statement ver invalid")]
    AttestationStatementVerInvalid,

    #[error("Attestation statement ver unsupported")]
    AttestationStatementVerUnsupported,

    #[error("Attestation statement certInfo missing")]
    AttestationStatementCertInfoMissing,

    #[error("Attestation statement pubArea missing")]
    AttestationStatementPubAreaMissing,

    #[error("Attestation statement response missing")]
    AttestationStatementResponseMissing,

    #[error("Attestation statement response invalid: {0}")]
    AttestationStatementResponseInvalid(String),

    #[error("Attestation certificate is missing a required extension")]
    AttestationStatementMissingExtension,

    #[error("Attestation certificate could not be parsed")]
    AttestationCertificateParseFailure,

    #[error("Attestation certificate does not meet format requirements")]
    AttestationCertificateRequirementsNotMet,

    #[error("Attestation certificate aaguid does not match the authenticator")]
    AttestationCertificateAAGUIDMismatch,

    #[error("Attestation certificate nonce or challenge does not match")]
    AttestationCertificateNonceMismatch,

    #[error("Attestation certificate key does not match the credential key")]
    AttestationCredentialSubjectKeyMismatch,

    #[error("Attestation certificate key is not an EC P-256 key")]
    AttestationU2FKeyNotP256,

    #[error("Android key attestation is not backed by a trusted execution environment")]
    AttestationAndroidKeyNotHardwareBacked,

    #[error("TPM attestation type is not ATTEST_CERTIFY")]
    AttestationTpmStInvalid,

    #[error("TPM extraData is missing")]
    AttestationTpmExtraDataInvalid,

    #[error("TPM extraData does not match the attested data")]
    AttestationTpmExtraDataMismatch,

    #[error("TPM pubArea does not match the credential key")]
    AttestationTpmPubAreaMismatch,

    #[error("TPM pubArea name algorithm is unsupported")]
    AttestationTpmPubAreaHashUnknown,

    #[error("TPM pubArea name does not match certInfo")]
    AttestationTpmPubAreaHashInvalid,

    #[error("TPM certInfo does not contain a certify structure")]
    AttestationTpmAttestCertifyInvalid,

    // Trust
    #[error("Attestation chain is not trusted: {0}")]
    AttestationChainNotTrusted(String),

    #[error("Attestation chain was revoked: {0}")]
    AttestationRevoked(String),

    #[error("Attestation type {0} is not allowed by policy")]
    AttestationTypeNotAllowed(&'static str),

    // Counters
    #[error("Sign counter did not advance: stored {stored}, received {received}")]
    CredentialPossibleCompromise { stored: u32, received: u32 },

    // Credentials
    #[error("Credential is not known")]
    CredentialNotFound,

    #[error("Credential is not in the allowed set for this ceremony")]
    CredentialNotAllowed,

    #[error("Credential is in the exclusion set for this registration")]
    CredentialExcluded,

    #[error("Credential is already registered")]
    CredentialAlreadyExists,

    #[error("User handle does not match the user the credential was registered to")]
    CredentialUserHandleMismatch,

    #[error("OpenSSL error: {0}")]
    OpenSSLError(#[from] OpenSSLErrorStack),

    #[error("OpenSSL could not determine a curve name")]
    OpenSSLErrorNoCurveName,
}

impl WebauthnError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        use DecodeErrorKind::*;
        use WebauthnError::*;

        match self {
            Configuration(_) => ErrorKind::Configuration,

            CborTruncated { .. }
            | CborLimitExceeded { .. }
            | CborTrailingBytes { .. }
            | AuthenticatorDataTruncated { .. }
            | AuthenticatorDataTrailingBytes { .. } => ErrorKind::Decode(TruncatedOrOversized),

            CborUnsupported { .. }
            | CborNonCanonical { .. }
            | CborDuplicateKey { .. }
            | CborInvalidUtf8 { .. }
            | AuthenticatorDataFlagMismatch { .. }
            | AttestationObjectInvalid(_)
            | ParseJSONFailure(_)
            | ParseBase64Failure(_)
            | COSEKeyInvalidCBORValue
            | COSEKeyECDSAXYInvalid
            | COSEKeyRSANEInvalid
            | COSEKeyEDDSAXInvalid
            | COSEKeyInvalidPoint
            | MissingAttestationCredentialData
            | UnexpectedAttestationCredentialData => ErrorKind::Decode(SchemaViolation),

            COSEKeyUnsupported { .. }
            | COSEKeyInvalidAlgorithm
            | CredentialInsecureCryptography
            | CredentialAlteredAlgFromRequest
            | AttestationNotSupported => ErrorKind::UnsupportedAlgorithm,

            InvalidClientDataType => ErrorKind::BadClientDataType,
            MismatchedChallenge | ChallengeNotFound => ErrorKind::BadChallenge,
            InvalidRPOrigin(_) => ErrorKind::BadOrigin,
            InvalidRPIDHash => ErrorKind::BadRpId,
            UserNotPresent => ErrorKind::UserNotPresent,
            UserNotVerified => ErrorKind::UserNotVerified,

            AuthenticationFailure | AttestationStatementSigInvalid => ErrorKind::BadSignature,

            ParseNOMFailure
            | AttestationStatementMapInvalid
            | AttestationStatementSigMissing
            | AttestationStatementAlgMissing
            | AttestationStatementAlgInvalid
            | AttestationStatementAlgMismatch
            | AttestationStatementX5CMissing
            | AttestationStatementX5CInvalid
            | AttestationStatementVerMissing
            | AttestationStatementVerInvalid
            | AttestationStatementVerUnsupported
            | AttestationStatementCertInfoMissing
            | AttestationStatementPubAreaMissing
            | AttestationStatementResponseMissing
            | AttestationStatementResponseInvalid(_)
            | AttestationStatementMissingExtension
            | AttestationCertificateParseFailure
            | AttestationCertificateRequirementsNotMet
            | AttestationCertificateAAGUIDMismatch
            | AttestationCertificateNonceMismatch
            | AttestationCredentialSubjectKeyMismatch
            | AttestationU2FKeyNotP256
            | AttestationAndroidKeyNotHardwareBacked
            | AttestationTpmStInvalid
            | AttestationTpmExtraDataInvalid
            | AttestationTpmExtraDataMismatch
            | AttestationTpmPubAreaMismatch
            | AttestationTpmPubAreaHashUnknown
            | AttestationTpmPubAreaHashInvalid
            | AttestationTpmAttestCertifyInvalid => ErrorKind::BadAttestationStatement,

            AttestationChainNotTrusted(_)
            | AttestationRevoked(_)
            | AttestationTypeNotAllowed(_) => ErrorKind::UntrustedAttestation,

            CredentialPossibleCompromise { .. } => ErrorKind::MaliciousCounterValue,

            CredentialNotFound | CredentialNotAllowed => ErrorKind::CredentialNotFound,
            CredentialExcluded | CredentialAlreadyExists | CredentialUserHandleMismatch => {
                ErrorKind::CredentialRejected
            }

            OpenSSLError(_) | OpenSSLErrorNoCurveName => ErrorKind::Internal,
        }
    }

    /// True when the input looks adversarial rather than merely unsupported or misconfigured.
    pub fn is_malicious(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Decode(_)
                | ErrorKind::BadSignature
                | ErrorKind::BadAttestationStatement
                | ErrorKind::MaliciousCounterValue
        )
    }
}
