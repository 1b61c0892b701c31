//! Attestation statement verification.
//!
//! Each supported format checks that its statement is well formed and that the signature it
//! carries covers this registration. Deciding whether the resulting certificate path is trusted
//! is left to [crate::trust].

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64urlsafedata::Base64UrlSafeData;
use der_parser::error::{BerError, BerResult};
use openssl::hash::{hash, MessageDigest};
use openssl::nid::Nid;
use openssl::x509;
use serde_cbor_2::Value;
use uuid::Uuid;
use x509_parser::oid_registry::Oid;

use crate::constants::{SAFETYNET_CLOCK_SKEW, SAFETYNET_HOSTNAME};
use crate::crypto::{
    assert_p256, assert_packed_attest_req, assert_tpm_attest_req, compute_sha256,
    only_hash_from_type, verify_signature,
};
use crate::error::{WebauthnError, WebauthnResult};
use crate::interface::*;
use crate::tpm::*;
use crate::trust::AttestationPolicy;

/// The type of attestation on the credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Hash)]
pub enum AttestationFormat {
    /// Packed attestation
    Packed,
    /// TPM attestation
    Tpm,
    /// Android hardware attestation
    AndroidKey,
    /// Android SafetyNet
    AndroidSafetyNet,
    /// Legacy U2F attestation
    FIDOU2F,
    /// Apple anonymous attestation
    AppleAnonymous,
    /// No attestation
    None,
}

impl AttestationFormat {
    /// The `fmt` identifier of this format.
    pub fn as_str(self) -> &'static str {
        match self {
            AttestationFormat::Packed => "packed",
            AttestationFormat::Tpm => "tpm",
            AttestationFormat::AndroidKey => "android-key",
            AttestationFormat::AndroidSafetyNet => "android-safetynet",
            AttestationFormat::FIDOU2F => "fido-u2f",
            AttestationFormat::AppleAnonymous => "apple",
            AttestationFormat::None => "none",
        }
    }
}

impl TryFrom<&str> for AttestationFormat {
    type Error = WebauthnError;

    fn try_from(a: &str) -> Result<AttestationFormat, Self::Error> {
        match a {
            "packed" => Ok(AttestationFormat::Packed),
            "tpm" => Ok(AttestationFormat::Tpm),
            "android-key" => Ok(AttestationFormat::AndroidKey),
            "android-safetynet" => Ok(AttestationFormat::AndroidSafetyNet),
            "fido-u2f" => Ok(AttestationFormat::FIDOU2F),
            "apple" => Ok(AttestationFormat::AppleAnonymous),
            "none" => Ok(AttestationFormat::None),
            _ => Err(WebauthnError::AttestationNotSupported),
        }
    }
}

/// An x509 extension whose value an attestation format compares with something it knows.
trait CertificateExtension {
    type Output;

    const OID: Oid<'static>;

    fn parse(i: &[u8]) -> BerResult<'_, Self::Output>;
}

/// id-fido-gen-ce-aaguid
struct FidoGenCeAaguid;

/// The nonce Apple embeds in anonymous attestation certificates.
struct AppleAnonymousNonce;

/// The Android key description.
struct AndroidKeyDescription;

impl CertificateExtension for FidoGenCeAaguid {
    type Output = Aaguid;

    const OID: Oid<'static> = der_parser::oid!(1.3.6 .1 .4 .1 .45724 .1 .1 .4);

    fn parse(i: &[u8]) -> BerResult<'_, Aaguid> {
        let (rem, aaguid) = der_parser::der::parse_der_octetstring(i)?;
        let aaguid: Aaguid = aaguid
            .as_slice()?
            .try_into()
            .map_err(|_| BerError::InvalidLength)?;
        Ok((rem, aaguid))
    }
}

impl CertificateExtension for AppleAnonymousNonce {
    type Output = [u8; 32];

    const OID: Oid<'static> = der_parser::oid!(1.2.840 .113635 .100 .8 .2);

    fn parse(i: &[u8]) -> BerResult<'_, [u8; 32]> {
        use der_parser::der::*;
        parse_der_container(|i: &[u8], hdr: Header| {
            if hdr.tag() != Tag::Sequence {
                return Err(nom::Err::Error(BerError::BerTypeError));
            }
            let (i, tagged_nonce) = parse_der_tagged_explicit(1, parse_der_octetstring)(i)?;
            let (class, _tag, nonce) = tagged_nonce.as_tagged()?;
            if class != Class::ContextSpecific {
                return Err(nom::Err::Error(BerError::BerTypeError));
            }
            let nonce = nonce
                .as_slice()?
                .try_into()
                .map_err(|_| BerError::InvalidLength)?;
            Ok((i, nonce))
        })(i)
    }
}

impl CertificateExtension for AndroidKeyDescription {
    type Output = android_key::KeyDescription;

    const OID: Oid<'static> = der_parser::oid!(1.3.6 .1 .4 .1 .11129 .2 .1 .17);

    fn parse(i: &[u8]) -> BerResult<'_, android_key::KeyDescription> {
        android_key::KeyDescription::parse(i)
    }
}

/// Find and decode extension `T` in `certificate`. A malformed extension fails the statement.
fn find_extension<T: CertificateExtension>(
    certificate: &x509::X509Ref,
) -> WebauthnResult<Option<T::Output>> {
    let der_bytes = certificate.to_der()?;
    let (_, cert) = x509_parser::parse_x509_certificate(&der_bytes)
        .map_err(|_| WebauthnError::AttestationCertificateParseFailure)?;

    cert.extensions()
        .iter()
        .find(|extension| extension.oid == T::OID)
        .map(|extension| {
            T::parse(extension.value)
                .map(|(_, output)| output)
                .map_err(|e| {
                    debug!(?e, oid = ?T::OID, "certificate extension is malformed");
                    WebauthnError::AttestationStatementX5CInvalid
                })
        })
        .transpose()
}

pub(crate) mod android_key {
    //! The Android keystore KeyDescription, reduced to the fields attestation depends on.
    //! <https://source.android.com/docs/security/features/keystore/attestation#schema>

    use der_parser::ber::BerObjectContent;
    use der_parser::der::*;
    use der_parser::error::{BerError, BerResult};

    const KM_ORIGIN_GENERATED: u32 = 0;
    const KM_PURPOSE_SIGN: u32 = 2;

    const TAG_PURPOSE: u32 = 1;
    const TAG_ALL_APPLICATIONS: u32 = 600;
    const TAG_ORIGIN: u32 = 702;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum SecurityLevel {
        Software,
        TrustedEnvironment,
    }

    impl TryFrom<u32> for SecurityLevel {
        type Error = BerError;

        fn try_from(v: u32) -> Result<Self, BerError> {
            match v {
                0 => Ok(SecurityLevel::Software),
                1 => Ok(SecurityLevel::TrustedEnvironment),
                _ => Err(BerError::InvalidTag),
            }
        }
    }

    #[derive(Debug, Default, Clone, Copy)]
    struct AuthorizationList {
        all_applications: bool,
        origin: Option<u32>,
        purpose: Option<u32>,
    }

    impl AuthorizationList {
        fn parse(i: &[u8]) -> BerResult<'_, Self> {
            parse_der_container(|i: &[u8], hdr: Header| {
                if hdr.tag() != Tag::Sequence {
                    return Err(nom::Err::Error(BerError::BerTypeError));
                }

                let mut al = AuthorizationList::default();
                let mut i = i;
                while let Ok((k, obj)) = parse_der(i) {
                    i = k;
                    let tag = obj.tag();
                    let BerObjectContent::Unknown(o) = obj.content else {
                        continue;
                    };
                    if tag == Tag(TAG_ALL_APPLICATIONS) {
                        al.all_applications = true;
                    } else if tag == Tag(TAG_ORIGIN) {
                        let (_, val) = parse_der_integer(o.data)?;
                        al.origin = Some(val.as_u32()?);
                    } else if tag == Tag(TAG_PURPOSE) {
                        let (_, val) = parse_der_container(|i, _| parse_der_integer(i))(o.data)?;
                        al.purpose = Some(val.as_u32()?);
                    }
                }

                Ok((i, al))
            })(i)
        }

        /// True when the list says the key was generated on device for signing, false when it
        /// says nothing about either.
        fn generated_for_signing(&self, which: &'static str) -> Result<bool, BerError> {
            match (self.origin, self.purpose) {
                (Some(KM_ORIGIN_GENERATED), Some(KM_PURPOSE_SIGN)) => Ok(true),
                (None, None) => Ok(false),
                _ => Err(BerError::InvalidValue {
                    tag: Tag(TAG_ORIGIN),
                    msg: format!("invalid key master values ({which})"),
                }),
            }
        }
    }

    /// The parts of a KeyDescription that attestation verification reads.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct KeyDescription {
        pub attestation_challenge: Vec<u8>,
        pub is_attest_tee: bool,
        pub is_km_tee: bool,
        /// The tee enforced list carries the origin and purpose of the key.
        pub tee_enforced: bool,
    }

    impl KeyDescription {
        pub(crate) fn parse(i: &[u8]) -> BerResult<'_, Self> {
            parse_der_container(|i: &[u8], hdr: Header| {
                if hdr.tag() != Tag::Sequence {
                    return Err(nom::Err::Error(BerError::BerTypeError));
                }
                let (i, _attestation_version) = parse_der_integer(i)?;
                let (i, attest_sec_level) = parse_der_enum(i)?;
                let attest_sec_level = SecurityLevel::try_from(attest_sec_level.as_u32()?)?;
                let (i, _km_version) = parse_der_integer(i)?;
                let (i, km_sec_level) = parse_der_enum(i)?;
                let km_sec_level = SecurityLevel::try_from(km_sec_level.as_u32()?)?;

                let (i, attestation_challenge) = parse_der_octetstring(i)?;
                let attestation_challenge = attestation_challenge.as_slice()?.to_vec();

                let (i, _unique_id) = parse_der_octetstring(i)?;

                let (i, software_enforced) = AuthorizationList::parse(i)?;
                let (i, tee_enforced) = AuthorizationList::parse(i)?;

                // The key must be scoped to this application.
                if software_enforced.all_applications || tee_enforced.all_applications {
                    return Err(BerError::InvalidValue {
                        tag: Tag(TAG_ALL_APPLICATIONS),
                        msg: "all_applications must not be set".to_string(),
                    })?;
                }

                let software_set = software_enforced.generated_for_signing("software")?;
                let tee_set = tee_enforced.generated_for_signing("tee")?;

                if !tee_set && !software_set {
                    return Err(BerError::InvalidValue {
                        tag: Tag(TAG_ORIGIN),
                        msg: "key master values not set".to_string(),
                    })?;
                }

                Ok((
                    i,
                    KeyDescription {
                        attestation_challenge,
                        is_attest_tee: attest_sec_level == SecurityLevel::TrustedEnvironment,
                        is_km_tee: km_sec_level == SecurityLevel::TrustedEnvironment,
                        tee_enforced: tee_set,
                    },
                ))
            })(i)
        }
    }
}

fn att_stmt_map(att_stmt: &Value) -> WebauthnResult<&BTreeMap<Value, Value>> {
    cbor_try_map!(att_stmt).map_err(|_| WebauthnError::AttestationStatementMapInvalid)
}

fn att_stmt_alg(m: &BTreeMap<Value, Value>) -> WebauthnResult<COSEAlgorithm> {
    let alg = att_stmt_get!(m, "alg", WebauthnError::AttestationStatementAlgMissing)?;
    cbor_try_i128!(alg)
        .map_err(|_| WebauthnError::AttestationStatementAlgInvalid)
        .and_then(|v| {
            COSEAlgorithm::try_from(v).map_err(|_| WebauthnError::COSEKeyInvalidAlgorithm)
        })
}

fn att_stmt_sig(m: &BTreeMap<Value, Value>) -> WebauthnResult<&[u8]> {
    let sig = att_stmt_get!(m, "sig", WebauthnError::AttestationStatementSigMissing)?;
    cbor_try_bytes!(sig)
        .map(Vec::as_slice)
        .map_err(|_| WebauthnError::AttestationStatementSigMissing)
}

/// Decode `x5c`: a non empty array of DER certificates, leaf first.
fn att_stmt_x5c(m: &BTreeMap<Value, Value>) -> WebauthnResult<Vec<x509::X509>> {
    let x5c = att_stmt_get!(m, "x5c", WebauthnError::AttestationStatementX5CMissing)?;
    let x5c = cbor_try_array!(x5c).map_err(|_| WebauthnError::AttestationStatementX5CInvalid)?;

    if x5c.is_empty() {
        return Err(WebauthnError::AttestationStatementX5CInvalid);
    }

    x5c.iter()
        .map(|value| {
            cbor_try_bytes!(value)
                .map_err(|_| WebauthnError::AttestationStatementX5CInvalid)
                .and_then(|der| {
                    x509::X509::from_der(der).map_err(|e| {
                        debug!(?e, "x5c certificate");
                        WebauthnError::AttestationCertificateParseFailure
                    })
                })
        })
        .collect()
}

/// authenticatorData || clientDataHash, the input most formats sign.
fn signed_data(att_obj: &AttestationObject, client_data_hash: &[u8]) -> Vec<u8> {
    att_obj
        .auth_data_bytes
        .iter()
        .chain(client_data_hash.iter())
        .copied()
        .collect()
}

fn verify_none_attestation(
    att_obj: &AttestationObject,
) -> WebauthnResult<(ParsedAttestationData, AttestationMetadata)> {
    // The attestation statement must be an empty map.
    if !att_stmt_map(&att_obj.att_stmt)?.is_empty() {
        debug!("none attestation with a non-empty statement");
        return Err(WebauthnError::AttestationStatementMapInvalid);
    }
    Ok((ParsedAttestationData::None, AttestationMetadata::None))
}

// https://w3c.github.io/webauthn/#sctn-packed-attestation
fn verify_packed_attestation(
    acd: &AttestedCredentialData,
    att_obj: &AttestationObject,
    client_data_hash: &[u8],
) -> WebauthnResult<(ParsedAttestationData, AttestationMetadata)> {
    let m = att_stmt_map(&att_obj.att_stmt)?;
    let alg = att_stmt_alg(m)?;
    let sig = att_stmt_sig(m)?;
    let verification_data = signed_data(att_obj, client_data_hash);

    let has_x5c = m.contains_key(&Value::Text("x5c".to_string()));
    let has_ecdaa = m.contains_key(&Value::Text("ecdaaKeyId".to_string()));

    match (has_x5c, has_ecdaa) {
        (true, _) => {
            let x5c = att_stmt_x5c(m)?;
            let attestn_cert = &x5c[0];

            if !verify_signature(alg, attestn_cert, sig, &verification_data)? {
                error!("packed x509 signature invalid");
                return Err(WebauthnError::AttestationStatementSigInvalid);
            }

            assert_packed_attest_req(attestn_cert)?;

            // The aaguid extension is optional, but must agree when present.
            if let Some(cert_aaguid) = find_extension::<FidoGenCeAaguid>(attestn_cert)? {
                if cert_aaguid != acd.aaguid {
                    return Err(WebauthnError::AttestationCertificateAAGUIDMismatch);
                }
            }

            Ok((
                ParsedAttestationData::Basic(x5c),
                AttestationMetadata::Packed {
                    aaguid: Uuid::from_bytes(acd.aaguid),
                },
            ))
        }
        (false, true) => {
            debug!("ecdaa packed attestation");
            Err(WebauthnError::AttestationNotSupported)
        }
        (false, false) => {
            // Self attestation, signed by the credential itself.
            if alg != acd.credential_pk.type_ {
                return Err(WebauthnError::AttestationStatementAlgMismatch);
            }

            if !acd.credential_pk.verify_signature(sig, &verification_data)? {
                error!("packed self attestation signature invalid");
                return Err(WebauthnError::AttestationStatementSigInvalid);
            }

            Ok((ParsedAttestationData::Self_, AttestationMetadata::None))
        }
    }
}

// https://w3c.github.io/webauthn/#sctn-fido-u2f-attestation
fn verify_fidou2f_attestation(
    acd: &AttestedCredentialData,
    att_obj: &AttestationObject,
    client_data_hash: &[u8],
) -> WebauthnResult<(ParsedAttestationData, AttestationMetadata)> {
    let m = att_stmt_map(&att_obj.att_stmt)?;
    let sig = att_stmt_sig(m)?;
    let x5c = att_stmt_x5c(m)?;

    if x5c.len() != 1 {
        return Err(WebauthnError::AttestationStatementX5CInvalid);
    }
    let att_cert = &x5c[0];

    assert_p256(att_cert)?;

    match &acd.credential_pk.key {
        COSEKeyType::EC_EC2(k) if k.curve == ECDSACurve::SECP256R1 => {}
        _ => return Err(WebauthnError::AttestationU2FKeyNotP256),
    }
    let public_key_u2f = acd.credential_pk.get_alg_key_ecc_x962_raw()?;

    // 0x00 || rpIdHash || clientDataHash || credentialId || publicKeyU2F
    let verification_data: Vec<u8> = [0x00]
        .iter()
        .chain(att_obj.auth_data.rp_id_hash.iter())
        .chain(client_data_hash.iter())
        .chain(acd.credential_id.0.iter())
        .chain(public_key_u2f.iter())
        .copied()
        .collect();

    if !verify_signature(COSEAlgorithm::ES256, att_cert, sig, &verification_data)? {
        error!("fido-u2f signature invalid");
        return Err(WebauthnError::AttestationStatementSigInvalid);
    }

    Ok((ParsedAttestationData::Basic(x5c), AttestationMetadata::None))
}

fn tpm_curve_matches(curve: TpmiEccCurve, cose: ECDSACurve) -> bool {
    matches!(
        (curve, cose),
        (TpmiEccCurve::NistP256, ECDSACurve::SECP256R1)
            | (TpmiEccCurve::NistP384, ECDSACurve::SECP384R1)
            | (TpmiEccCurve::NistP521, ECDSACurve::SECP521R1)
    )
}

/// The exponent of a COSE RSA key, which is a big endian unsigned integer.
fn rsa_exponent(e: &[u8]) -> Option<u64> {
    if e.len() > 8 {
        return None;
    }
    Some(e.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

fn tpm_pub_area_matches(pub_area: &TpmtPublic, credential: &COSEKey) -> bool {
    match (&pub_area.parameters, &pub_area.unique, &credential.key) {
        (TpmuPublicParms::Rsa(parms), TpmuPublicId::Rsa(n), COSEKeyType::RSA(k)) => {
            n.as_slice() == k.n.0.as_slice()
                && rsa_exponent(&k.e.0) == Some(u64::from(parms.exponent))
        }
        (TpmuPublicParms::Ecc(parms), TpmuPublicId::Ecc(point), COSEKeyType::EC_EC2(k)) => {
            tpm_curve_matches(parms.curve_id, k.curve)
                && point.x == k.x.0
                && point.y == k.y.0
        }
        _ => false,
    }
}

/// The TPM name of an object: nameAlg || H_nameAlg(pubArea)
fn tpm_name(name_alg: TpmAlgId, pub_area: &[u8]) -> WebauthnResult<Vec<u8>> {
    let md = match name_alg {
        TpmAlgId::Sha1 => MessageDigest::sha1(),
        TpmAlgId::Sha256 => MessageDigest::sha256(),
        TpmAlgId::Sha384 => MessageDigest::sha384(),
        TpmAlgId::Sha512 => MessageDigest::sha512(),
        _ => return Err(WebauthnError::AttestationTpmPubAreaHashUnknown),
    };
    let digest = hash(md, pub_area)?;
    Ok((name_alg as u16)
        .to_be_bytes()
        .iter()
        .chain(digest.iter())
        .copied()
        .collect())
}

// https://w3c.github.io/webauthn/#sctn-tpm-attestation
fn verify_tpm_attestation(
    acd: &AttestedCredentialData,
    att_obj: &AttestationObject,
    client_data_hash: &[u8],
) -> WebauthnResult<(ParsedAttestationData, AttestationMetadata)> {
    let m = att_stmt_map(&att_obj.att_stmt)?;

    let ver = att_stmt_get!(m, "ver", WebauthnError::AttestationStatementVerMissing)?;
    let ver = cbor_try_string!(ver).map_err(|_| WebauthnError::AttestationStatementVerInvalid)?;
    if ver != "2.0" {
        return Err(WebauthnError::AttestationStatementVerUnsupported);
    }

    let alg = att_stmt_alg(m)?;
    let sig = att_stmt_sig(m)?;

    let cert_info_bytes =
        att_stmt_get!(m, "certInfo", WebauthnError::AttestationStatementCertInfoMissing)?;
    let cert_info_bytes = cbor_try_bytes!(cert_info_bytes)
        .map_err(|_| WebauthnError::AttestationStatementCertInfoMissing)?;

    let pub_area_bytes =
        att_stmt_get!(m, "pubArea", WebauthnError::AttestationStatementPubAreaMissing)?;
    let pub_area_bytes = cbor_try_bytes!(pub_area_bytes)
        .map_err(|_| WebauthnError::AttestationStatementPubAreaMissing)?;

    let pub_area = TpmtPublic::try_from(pub_area_bytes.as_slice())?;
    let cert_info = TpmsAttest::try_from(cert_info_bytes.as_slice())?;
    let signature = TpmtSignature::try_from(sig)?;

    // The key in pubArea must be the credential key.
    if !tpm_pub_area_matches(&pub_area, &acd.credential_pk) {
        debug!("tpm pubArea does not match the credential public key");
        return Err(WebauthnError::AttestationTpmPubAreaMismatch);
    }

    if cert_info.type_ != TpmSt::AttestCertify {
        return Err(WebauthnError::AttestationTpmStInvalid);
    }

    // extraData must be the hash of attToBeSigned under alg.
    let extra_data = cert_info
        .extra_data
        .as_ref()
        .ok_or(WebauthnError::AttestationTpmExtraDataInvalid)?;
    let att_to_be_signed = signed_data(att_obj, client_data_hash);
    if extra_data.as_slice() != only_hash_from_type(alg, &att_to_be_signed)?.as_slice() {
        debug!("tpm extraData mismatch");
        return Err(WebauthnError::AttestationTpmExtraDataMismatch);
    }

    // The certified name must be the name of pubArea.
    match &cert_info.typeattested {
        TpmuAttest::AttestCertify(Tpm2bName::Digest(name)) => {
            if *name != tpm_name(pub_area.name_alg, pub_area_bytes)? {
                debug!("tpm certified name does not match pubArea");
                return Err(WebauthnError::AttestationTpmPubAreaHashInvalid);
            }
        }
        _ => return Err(WebauthnError::AttestationTpmAttestCertifyInvalid),
    }

    let x5c = att_stmt_x5c(m)?;
    let aik_cert = &x5c[0];

    if !verify_signature(alg, aik_cert, signature.as_bytes(), cert_info_bytes)? {
        error!("tpm certInfo signature invalid");
        return Err(WebauthnError::AttestationStatementSigInvalid);
    }

    assert_tpm_attest_req(aik_cert)?;

    if let Some(cert_aaguid) = find_extension::<FidoGenCeAaguid>(aik_cert)? {
        if cert_aaguid != acd.aaguid {
            return Err(WebauthnError::AttestationCertificateAAGUIDMismatch);
        }
    }

    Ok((
        ParsedAttestationData::AttCa(x5c),
        AttestationMetadata::Tpm {
            aaguid: Uuid::from_bytes(acd.aaguid),
            firmware_version: cert_info.firmware_version,
        },
    ))
}

// https://www.w3.org/TR/webauthn-3/#sctn-apple-anonymous-attestation
fn verify_apple_anonymous_attestation(
    acd: &AttestedCredentialData,
    att_obj: &AttestationObject,
    client_data_hash: &[u8],
) -> WebauthnResult<(ParsedAttestationData, AttestationMetadata)> {
    let m = att_stmt_map(&att_obj.att_stmt)?;
    let x5c = att_stmt_x5c(m)?;
    let cred_cert = &x5c[0];

    let nonce = compute_sha256(&signed_data(att_obj, client_data_hash));

    match find_extension::<AppleAnonymousNonce>(cred_cert)? {
        Some(cert_nonce) if cert_nonce == nonce => {}
        Some(_) => return Err(WebauthnError::AttestationCertificateNonceMismatch),
        None => return Err(WebauthnError::AttestationStatementMissingExtension),
    }

    if !acd.credential_pk.matches_certificate(cred_cert)? {
        return Err(WebauthnError::AttestationCredentialSubjectKeyMismatch);
    }

    Ok((ParsedAttestationData::AnonCa(x5c), AttestationMetadata::None))
}

// https://w3c.github.io/webauthn/#sctn-android-key-attestation
fn verify_android_key_attestation(
    acd: &AttestedCredentialData,
    att_obj: &AttestationObject,
    client_data_hash: &[u8],
    policy: &AttestationPolicy,
) -> WebauthnResult<(ParsedAttestationData, AttestationMetadata)> {
    let m = att_stmt_map(&att_obj.att_stmt)?;
    let alg = att_stmt_alg(m)?;
    let sig = att_stmt_sig(m)?;
    let x5c = att_stmt_x5c(m)?;
    let attestn_cert = &x5c[0];

    let verification_data = signed_data(att_obj, client_data_hash);
    if !verify_signature(alg, attestn_cert, sig, &verification_data)? {
        error!("android-key signature invalid");
        return Err(WebauthnError::AttestationStatementSigInvalid);
    }

    if !acd.credential_pk.matches_certificate(attestn_cert)? {
        return Err(WebauthnError::AttestationCredentialSubjectKeyMismatch);
    }

    let description = find_extension::<AndroidKeyDescription>(attestn_cert)?
        .ok_or(WebauthnError::AttestationStatementMissingExtension)?;

    if description.attestation_challenge != client_data_hash {
        return Err(WebauthnError::AttestationCertificateNonceMismatch);
    }

    if policy.require_android_tee && !(description.is_km_tee && description.tee_enforced) {
        debug!(?description, "android key is not tee backed");
        return Err(WebauthnError::AttestationAndroidKeyNotHardwareBacked);
    }

    Ok((
        ParsedAttestationData::Basic(x5c),
        AttestationMetadata::AndroidKey {
            is_km_tee: description.is_km_tee,
            is_attest_tee: description.is_attest_tee,
        },
    ))
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SafetyNetResponse {
    pub timestamp_ms: u64,
    pub nonce: Base64UrlSafeData,
    pub apk_package_name: String,
    pub apk_certificate_digest_sha256: Vec<Base64UrlSafeData>,
    pub cts_profile_match: bool,
    pub basic_integrity: bool,
    pub evaluation_type: Option<String>,
}

/// Check the verified claims of a SafetyNet response. `now` is the time since the unix epoch,
/// and `max_age` is `None` when timestamps are not checked.
pub(crate) fn check_safetynet_claims(
    claims: &SafetyNetResponse,
    expected_nonce: &[u8],
    now: Duration,
    max_age: Option<Duration>,
) -> WebauthnResult<()> {
    let invalid = |msg: &str| WebauthnError::AttestationStatementResponseInvalid(msg.to_string());

    if claims.nonce.0.as_slice() != expected_nonce {
        return Err(invalid("nonce mismatch"));
    }

    if !claims.cts_profile_match {
        return Err(invalid("ctsProfileMatch is false"));
    }

    if let Some(max_age) = max_age {
        let issued = u128::from(claims.timestamp_ms);
        if issued > (now + SAFETYNET_CLOCK_SKEW).as_millis() {
            return Err(invalid("timestamp is in the future"));
        }
        if issued < now.saturating_sub(max_age).as_millis() {
            return Err(invalid("timestamp is too old"));
        }
    }

    Ok(())
}

#[allow(deprecated)]
fn leaf_common_name(certificate: &x509::X509Ref) -> Option<String> {
    certificate
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|e| e.data().as_utf8().ok())
        .map(|s| s.to_string())
}

// https://w3c.github.io/webauthn/#sctn-android-safetynet-attestation
fn verify_android_safetynet_attestation(
    att_obj: &AttestationObject,
    client_data_hash: &[u8],
    policy: &AttestationPolicy,
) -> WebauthnResult<(ParsedAttestationData, AttestationMetadata)> {
    let m = att_stmt_map(&att_obj.att_stmt)?;

    let ver = att_stmt_get!(m, "ver", WebauthnError::AttestationStatementVerMissing)?;
    cbor_try_string!(ver).map_err(|_| WebauthnError::AttestationStatementVerInvalid)?;

    let response = att_stmt_get!(m, "response", WebauthnError::AttestationStatementResponseMissing)?;
    let response = cbor_try_bytes!(response)
        .map_err(|_| WebauthnError::AttestationStatementResponseMissing)?;

    let invalid = |msg: String| {
        debug!(%msg, "safetynet response");
        WebauthnError::AttestationStatementResponseInvalid(msg)
    };

    let token = std::str::from_utf8(response).map_err(|e| invalid(e.to_string()))?;
    let jwsu = compact_jwt::JwsUnverified::from_str(token).map_err(|e| invalid(format!("{e:?}")))?;

    let x5c = jwsu
        .get_x5c_chain()
        .map_err(|e| invalid(format!("{e:?}")))?
        .filter(|chain| !chain.is_empty())
        .ok_or_else(|| invalid("missing x5c chain".to_string()))?;

    // Signed by the leaf of its own chain. The chain is judged by the trust policy.
    let jws: compact_jwt::Jws<SafetyNetResponse> = jwsu
        .validate_embeded()
        .map_err(|e| match e {
            compact_jwt::JwtError::InvalidSignature => {
                error!("safetynet response signature invalid");
                WebauthnError::AttestationStatementSigInvalid
            }
            e => invalid(format!("{e:?}")),
        })?;
    let claims = jws.into_inner();

    if leaf_common_name(&x5c[0]).as_deref() != Some(SAFETYNET_HOSTNAME) {
        return Err(invalid("certificate is not issued to the attestation service".into()));
    }

    let nonce = compute_sha256(&signed_data(att_obj, client_data_hash));
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| invalid(e.to_string()))?;
    let max_age =
        (!policy.danger_disable_certificate_time_checks).then_some(policy.safetynet_max_age);
    check_safetynet_claims(&claims, &nonce, now, max_age)?;

    let SafetyNetResponse {
        apk_package_name,
        apk_certificate_digest_sha256,
        cts_profile_match,
        basic_integrity,
        evaluation_type,
        ..
    } = claims;

    Ok((
        ParsedAttestationData::Basic(x5c),
        AttestationMetadata::AndroidSafetyNet {
            apk_package_name,
            apk_certificate_digest_sha256,
            cts_profile_match,
            basic_integrity,
            evaluation_type,
        },
    ))
}

/// Verify the attestation statement of `att_obj` for its format. This checks the statement
/// structure and signature only; trust in the returned path is decided separately.
pub fn verify_attestation_statement(
    att_obj: &AttestationObject,
    client_data_hash: &[u8],
    policy: &AttestationPolicy,
) -> WebauthnResult<(ParsedAttestationData, AttestationMetadata)> {
    let acd = att_obj
        .auth_data
        .acd
        .as_ref()
        .ok_or(WebauthnError::MissingAttestationCredentialData)?;

    debug!(fmt = att_obj.format.as_str(), "verifying attestation statement");

    match att_obj.format {
        AttestationFormat::None => verify_none_attestation(att_obj),
        AttestationFormat::Packed => verify_packed_attestation(acd, att_obj, client_data_hash),
        AttestationFormat::FIDOU2F => verify_fidou2f_attestation(acd, att_obj, client_data_hash),
        AttestationFormat::Tpm => verify_tpm_attestation(acd, att_obj, client_data_hash),
        AttestationFormat::AppleAnonymous => {
            verify_apple_anonymous_attestation(acd, att_obj, client_data_hash)
        }
        AttestationFormat::AndroidKey => {
            verify_android_key_attestation(acd, att_obj, client_data_hash, policy)
        }
        AttestationFormat::AndroidSafetyNet => {
            verify_android_safetynet_attestation(att_obj, client_data_hash, policy)
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use super::*;
    use crate::test_utils::*;
    use crate::tpm::test_encode;
    use openssl::ecdsa::EcdsaSig;
    use openssl::pkey::{PKey, Private};

    const AAGUID: Aaguid = [7; 16];
    const CDH: [u8; 32] = [0x5a; 32];

    fn att_obj(
        format: AttestationFormat,
        credential: &COSEKey,
        att_stmt: BTreeMap<Value, Value>,
    ) -> AttestationObject {
        let auth_data = AuthenticatorData {
            rp_id_hash: compute_sha256(b"example.com"),
            counter: 0,
            user_present: true,
            user_verified: true,
            backup_eligible: false,
            backup_state: false,
            acd: Some(AttestedCredentialData {
                aaguid: AAGUID,
                credential_id: Base64UrlSafeData(vec![1, 2, 3, 4]),
                credential_pk: credential.clone(),
            }),
            extensions: None,
        };
        let auth_data_bytes = auth_data.to_bytes().unwrap();
        AttestationObject {
            format,
            auth_data,
            auth_data_bytes,
            att_stmt: Value::Map(att_stmt),
        }
    }

    fn stmt(entries: Vec<(&str, Value)>) -> BTreeMap<Value, Value> {
        entries
            .into_iter()
            .map(|(k, v)| (Value::Text(k.to_string()), v))
            .collect()
    }

    fn x5c(certs: &[&x509::X509]) -> Value {
        Value::Array(
            certs
                .iter()
                .map(|c| Value::Bytes(c.to_der().unwrap()))
                .collect(),
        )
    }

    fn alg(a: COSEAlgorithm) -> Value {
        Value::Integer(i64::from(a) as i128)
    }

    fn policy() -> AttestationPolicy {
        AttestationPolicy::default()
    }

    fn verify(obj: &AttestationObject) -> WebauthnResult<(ParsedAttestationData, AttestationMetadata)> {
        verify_attestation_statement(obj, &CDH, &policy())
    }

    fn ec_credential(key: &PKey<Private>) -> COSEKey {
        cose_key_of(COSEAlgorithm::ES256, key)
    }

    fn packed_subject() -> Vec<(&'static str, &'static str)> {
        vec![
            ("C", "US"),
            ("O", "Example Vendor"),
            ("OU", "Authenticator Attestation"),
            ("CN", "Example Batch"),
        ]
    }

    #[test]
    fn format_identifiers() {
        for f in [
            AttestationFormat::Packed,
            AttestationFormat::Tpm,
            AttestationFormat::AndroidKey,
            AttestationFormat::AndroidSafetyNet,
            AttestationFormat::FIDOU2F,
            AttestationFormat::AppleAnonymous,
            AttestationFormat::None,
        ] {
            assert_eq!(AttestationFormat::try_from(f.as_str()).unwrap(), f);
        }
        assert!(matches!(
            AttestationFormat::try_from("fido-u3f"),
            Err(WebauthnError::AttestationNotSupported)
        ));
    }

    #[test]
    fn none_requires_empty_statement() {
        init();
        let cred_key = ec_pkey(Nid::X9_62_PRIME256V1);
        let cred = ec_credential(&cred_key);

        let obj = att_obj(AttestationFormat::None, &cred, BTreeMap::new());
        let (parsed, meta) = verify(&obj).unwrap();
        assert!(matches!(parsed, ParsedAttestationData::None));
        assert_eq!(meta, AttestationMetadata::None);

        let obj = att_obj(
            AttestationFormat::None,
            &cred,
            stmt(vec![("sig", Value::Bytes(vec![0]))]),
        );
        assert!(matches!(
            verify(&obj),
            Err(WebauthnError::AttestationStatementMapInvalid)
        ));
    }

    #[test]
    fn packed_self_attestation() {
        init();
        let cred_key = ec_pkey(Nid::X9_62_PRIME256V1);
        let cred = ec_credential(&cred_key);

        let unsigned = att_obj(AttestationFormat::Packed, &cred, BTreeMap::new());
        let sig = sign(COSEAlgorithm::ES256, &cred_key, &signed_data(&unsigned, &CDH));

        let obj = att_obj(
            AttestationFormat::Packed,
            &cred,
            stmt(vec![
                ("alg", alg(COSEAlgorithm::ES256)),
                ("sig", Value::Bytes(sig.clone())),
            ]),
        );
        let (parsed, _) = verify(&obj).unwrap();
        assert!(matches!(parsed, ParsedAttestationData::Self_));

        // The statement alg must be the credential alg.
        let obj = att_obj(
            AttestationFormat::Packed,
            &cred,
            stmt(vec![
                ("alg", alg(COSEAlgorithm::ES384)),
                ("sig", Value::Bytes(sig.clone())),
            ]),
        );
        assert!(matches!(
            verify(&obj),
            Err(WebauthnError::AttestationStatementAlgMismatch)
        ));

        // A signature over a different client data hash.
        let err = verify_attestation_statement(
            &obj_with_stmt(&unsigned, sig),
            &[0; 32],
            &policy(),
        )
        .unwrap_err();
        assert!(matches!(err, WebauthnError::AttestationStatementSigInvalid));
    }

    fn obj_with_stmt(base: &AttestationObject, sig: Vec<u8>) -> AttestationObject {
        let mut obj = base.clone();
        obj.att_stmt = Value::Map(stmt(vec![
            ("alg", alg(COSEAlgorithm::ES256)),
            ("sig", Value::Bytes(sig)),
        ]));
        obj
    }

    #[test]
    fn packed_full_attestation() {
        init();
        let cred_key = ec_pkey(Nid::X9_62_PRIME256V1);
        let cred = ec_credential(&cred_key);
        let attest_key = ec_pkey(Nid::X9_62_PRIME256V1);

        let mint_packed = |aaguid: Aaguid, ou: &'static str| {
            let mut subject = packed_subject();
            subject[2] = ("OU", ou);
            mint(CertSpec {
                subject,
                key: &attest_key,
                issuer: None,
                ca: false,
                extensions: vec![custom_ext(
                    "1.3.6.1.4.1.45724.1.1.4",
                    &der_octet_string(&aaguid),
                )],
            })
        };

        let run = |cert: &x509::X509| {
            let unsigned = att_obj(AttestationFormat::Packed, &cred, BTreeMap::new());
            let sig = sign(COSEAlgorithm::ES256, &attest_key, &signed_data(&unsigned, &CDH));
            let obj = att_obj(
                AttestationFormat::Packed,
                &cred,
                stmt(vec![
                    ("alg", alg(COSEAlgorithm::ES256)),
                    ("sig", Value::Bytes(sig)),
                    ("x5c", x5c(&[cert])),
                ]),
            );
            verify(&obj)
        };

        let cert = mint_packed(AAGUID, "Authenticator Attestation");
        let (parsed, meta) = run(&cert).unwrap();
        assert_eq!(parsed.chain().map(|c| c.len()), Some(1));
        assert!(matches!(parsed, ParsedAttestationData::Basic(_)));
        assert_eq!(
            meta,
            AttestationMetadata::Packed {
                aaguid: Uuid::from_bytes(AAGUID)
            }
        );

        let cert = mint_packed([9; 16], "Authenticator Attestation");
        assert!(matches!(
            run(&cert),
            Err(WebauthnError::AttestationCertificateAAGUIDMismatch)
        ));

        let cert = mint_packed(AAGUID, "Somebody Else");
        assert!(matches!(
            run(&cert),
            Err(WebauthnError::AttestationCertificateRequirementsNotMet)
        ));
    }

    #[test]
    fn packed_rejects_ecdaa_and_bad_x5c() {
        init();
        let cred_key = ec_pkey(Nid::X9_62_PRIME256V1);
        let cred = ec_credential(&cred_key);

        let obj = att_obj(
            AttestationFormat::Packed,
            &cred,
            stmt(vec![
                ("alg", alg(COSEAlgorithm::ES256)),
                ("sig", Value::Bytes(vec![1])),
                ("ecdaaKeyId", Value::Bytes(vec![1])),
            ]),
        );
        assert_eq!(
            verify(&obj).unwrap_err().kind(),
            crate::error::ErrorKind::UnsupportedAlgorithm
        );

        let obj = att_obj(
            AttestationFormat::Packed,
            &cred,
            stmt(vec![
                ("alg", alg(COSEAlgorithm::ES256)),
                ("sig", Value::Bytes(vec![1])),
                ("x5c", Value::Array(vec![Value::Bytes(vec![0x30, 0x03, 1])])),
            ]),
        );
        assert!(matches!(
            verify(&obj),
            Err(WebauthnError::AttestationCertificateParseFailure)
        ));

        let obj = att_obj(
            AttestationFormat::Packed,
            &cred,
            stmt(vec![
                ("alg", alg(COSEAlgorithm::ES256)),
                ("sig", Value::Bytes(vec![1])),
                ("x5c", Value::Array(vec![])),
            ]),
        );
        assert!(matches!(
            verify(&obj),
            Err(WebauthnError::AttestationStatementX5CInvalid)
        ));
    }

    #[test]
    fn fidou2f_attestation() {
        init();
        let cred_key = ec_pkey(Nid::X9_62_PRIME256V1);
        let cred = ec_credential(&cred_key);
        let attest_key = ec_pkey(Nid::X9_62_PRIME256V1);
        let cert = mint(CertSpec {
            subject: vec![("CN", "U2F Batch")],
            key: &attest_key,
            issuer: None,
            ca: false,
            extensions: vec![],
        });

        let unsigned = att_obj(AttestationFormat::FIDOU2F, &cred, BTreeMap::new());
        let acd = unsigned.auth_data.acd.as_ref().unwrap();
        let verification_data: Vec<u8> = [0x00]
            .iter()
            .chain(unsigned.auth_data.rp_id_hash.iter())
            .chain(CDH.iter())
            .chain(acd.credential_id.0.iter())
            .chain(cred.get_alg_key_ecc_x962_raw().unwrap().iter())
            .copied()
            .collect();
        let sig = sign(COSEAlgorithm::ES256, &attest_key, &verification_data);

        let obj = att_obj(
            AttestationFormat::FIDOU2F,
            &cred,
            stmt(vec![
                ("sig", Value::Bytes(sig.clone())),
                ("x5c", x5c(&[&cert])),
            ]),
        );
        let (parsed, _) = verify(&obj).unwrap();
        assert!(matches!(parsed, ParsedAttestationData::Basic(_)));

        // Exactly one certificate.
        let obj = att_obj(
            AttestationFormat::FIDOU2F,
            &cred,
            stmt(vec![
                ("sig", Value::Bytes(sig.clone())),
                ("x5c", x5c(&[&cert, &cert])),
            ]),
        );
        assert!(matches!(
            verify(&obj),
            Err(WebauthnError::AttestationStatementX5CInvalid)
        ));

        // The attestation key must be on P-256.
        let p384_key = ec_pkey(Nid::SECP384R1);
        let p384_cert = mint(CertSpec {
            subject: vec![("CN", "U2F Batch")],
            key: &p384_key,
            issuer: None,
            ca: false,
            extensions: vec![],
        });
        let obj = att_obj(
            AttestationFormat::FIDOU2F,
            &cred,
            stmt(vec![
                ("sig", Value::Bytes(sig)),
                ("x5c", x5c(&[&p384_cert])),
            ]),
        );
        assert!(matches!(
            verify(&obj),
            Err(WebauthnError::AttestationU2FKeyNotP256)
        ));
    }

    struct TpmFixture {
        cred: COSEKey,
        aik_key: PKey<Private>,
        aik_cert: x509::X509,
        pub_area: Vec<u8>,
    }

    impl TpmFixture {
        fn new() -> Self {
            let cred_key = ec_pkey(Nid::X9_62_PRIME256V1);
            let cred = ec_credential(&cred_key);
            let (x, y) = match &cred.key {
                COSEKeyType::EC_EC2(k) => (k.x.0.clone(), k.y.0.clone()),
                _ => panic!("expected an ec2 key"),
            };
            let aik_key = ec_pkey(Nid::X9_62_PRIME256V1);
            let aik_cert = mint(CertSpec {
                subject: vec![],
                key: &aik_key,
                issuer: None,
                ca: false,
                extensions: vec![
                    eku_ext("2.23.133.8.3"),
                    custom_ext("1.3.6.1.4.1.45724.1.1.4", &der_octet_string(&AAGUID)),
                ],
            });
            TpmFixture {
                cred,
                aik_key,
                aik_cert,
                pub_area: test_encode::ecc_pub_area(0x0003, &x, &y),
            }
        }

        fn obj(&self, extra_data: Option<Vec<u8>>, pub_area: &[u8]) -> AttestationObject {
            let unsigned = att_obj(AttestationFormat::Tpm, &self.cred, BTreeMap::new());
            let extra_data =
                extra_data.unwrap_or_else(|| compute_sha256(&signed_data(&unsigned, &CDH)).to_vec());
            let name = tpm_name(TpmAlgId::Sha256, pub_area).unwrap();
            let cert_info = test_encode::certify_info(0x8017, &extra_data, &name);

            let der = sign(COSEAlgorithm::ES256, &self.aik_key, &cert_info);
            let ecdsa = EcdsaSig::from_der(&der).unwrap();
            let sig = test_encode::ecdsa_signature(&ecdsa.r().to_vec(), &ecdsa.s().to_vec());

            att_obj(
                AttestationFormat::Tpm,
                &self.cred,
                stmt(vec![
                    ("ver", Value::Text("2.0".to_string())),
                    ("alg", alg(COSEAlgorithm::ES256)),
                    ("sig", Value::Bytes(sig)),
                    ("certInfo", Value::Bytes(cert_info)),
                    ("pubArea", Value::Bytes(pub_area.to_vec())),
                    ("x5c", x5c(&[&self.aik_cert])),
                ]),
            )
        }
    }

    #[test]
    fn tpm_attestation() {
        init();
        let fx = TpmFixture::new();
        let (parsed, meta) = verify(&fx.obj(None, &fx.pub_area)).unwrap();
        assert!(matches!(parsed, ParsedAttestationData::AttCa(_)));
        assert_eq!(
            meta,
            AttestationMetadata::Tpm {
                aaguid: Uuid::from_bytes(AAGUID),
                firmware_version: 0x0102_0304_0506_0708,
            }
        );
    }

    #[test]
    fn tpm_rejections() {
        init();
        let fx = TpmFixture::new();

        assert!(matches!(
            verify(&fx.obj(Some(vec![0; 32]), &fx.pub_area)),
            Err(WebauthnError::AttestationTpmExtraDataMismatch)
        ));

        // A pubArea for some other key.
        let other = test_encode::ecc_pub_area(0x0003, &[1; 32], &[2; 32]);
        assert!(matches!(
            verify(&fx.obj(None, &other)),
            Err(WebauthnError::AttestationTpmPubAreaMismatch)
        ));

        let mut obj = fx.obj(None, &fx.pub_area);
        if let Value::Map(m) = &mut obj.att_stmt {
            m.insert(Value::Text("ver".to_string()), Value::Text("1.2".to_string()));
        }
        assert!(matches!(
            verify(&obj),
            Err(WebauthnError::AttestationStatementVerUnsupported)
        ));
    }

    #[test]
    fn apple_anonymous_attestation() {
        init();
        let cred_key = ec_pkey(Nid::X9_62_PRIME256V1);
        let cred = ec_credential(&cred_key);
        let unsigned = att_obj(AttestationFormat::AppleAnonymous, &cred, BTreeMap::new());
        let nonce = compute_sha256(&signed_data(&unsigned, &CDH));

        let mint_apple = |key: &PKey<Private>, nonce: &[u8; 32]| {
            mint(CertSpec {
                subject: vec![("CN", "Apple Credential")],
                key,
                issuer: None,
                ca: false,
                extensions: vec![custom_ext("1.2.840.113635.100.8.2", &apple_nonce_der(nonce))],
            })
        };
        let run = |cert: &x509::X509| {
            verify(&att_obj(
                AttestationFormat::AppleAnonymous,
                &cred,
                stmt(vec![("x5c", x5c(&[cert]))]),
            ))
        };

        let (parsed, _) = run(&mint_apple(&cred_key, &nonce)).unwrap();
        assert!(matches!(parsed, ParsedAttestationData::AnonCa(_)));

        assert!(matches!(
            run(&mint_apple(&cred_key, &[0; 32])),
            Err(WebauthnError::AttestationCertificateNonceMismatch)
        ));

        let other_key = ec_pkey(Nid::X9_62_PRIME256V1);
        assert!(matches!(
            run(&mint_apple(&other_key, &nonce)),
            Err(WebauthnError::AttestationCredentialSubjectKeyMismatch)
        ));
    }

    fn android_key_cert(key: &PKey<Private>, challenge: &[u8; 32], km_tee: bool) -> x509::X509 {
        mint(CertSpec {
            subject: vec![("CN", "Android Keystore Key")],
            key,
            issuer: None,
            ca: false,
            extensions: vec![custom_ext(
                "1.3.6.1.4.1.11129.2.1.17",
                &android_key_description_der(challenge, km_tee),
            )],
        })
    }

    #[test]
    fn android_key_description_parses() {
        let der = android_key_description_der(&CDH, true);
        let (_, kd) = android_key::KeyDescription::parse(&der).unwrap();
        assert_eq!(kd.attestation_challenge, CDH.to_vec());
        assert!(kd.is_km_tee);
        assert!(kd.is_attest_tee);
        assert!(kd.tee_enforced);
    }

    #[test]
    fn android_key_attestation() {
        init();
        let cred_key = ec_pkey(Nid::X9_62_PRIME256V1);
        let cred = ec_credential(&cred_key);
        let unsigned = att_obj(AttestationFormat::AndroidKey, &cred, BTreeMap::new());
        let sig = sign(COSEAlgorithm::ES256, &cred_key, &signed_data(&unsigned, &CDH));

        let obj_for = |cert: &x509::X509| {
            att_obj(
                AttestationFormat::AndroidKey,
                &cred,
                stmt(vec![
                    ("alg", alg(COSEAlgorithm::ES256)),
                    ("sig", Value::Bytes(sig.clone())),
                    ("x5c", x5c(&[cert])),
                ]),
            )
        };

        let cert = android_key_cert(&cred_key, &CDH, true);
        let (parsed, meta) = verify(&obj_for(&cert)).unwrap();
        assert!(matches!(parsed, ParsedAttestationData::Basic(_)));
        assert_eq!(
            meta,
            AttestationMetadata::AndroidKey {
                is_km_tee: true,
                is_attest_tee: true
            }
        );

        let cert = android_key_cert(&cred_key, &[0; 32], true);
        assert!(matches!(
            verify(&obj_for(&cert)),
            Err(WebauthnError::AttestationCertificateNonceMismatch)
        ));

        // Software backed keys pass unless the policy wants a tee.
        let cert = android_key_cert(&cred_key, &CDH, false);
        assert!(verify(&obj_for(&cert)).is_ok());
        let strict = AttestationPolicy {
            require_android_tee: true,
            ..AttestationPolicy::default()
        };
        assert!(matches!(
            verify_attestation_statement(&obj_for(&cert), &CDH, &strict),
            Err(WebauthnError::AttestationAndroidKeyNotHardwareBacked)
        ));
    }

    fn safetynet_claims(nonce: &[u8], cts: bool, timestamp_ms: u64) -> SafetyNetResponse {
        SafetyNetResponse {
            timestamp_ms,
            nonce: Base64UrlSafeData(nonce.to_vec()),
            apk_package_name: "com.google.android.gms".to_string(),
            apk_certificate_digest_sha256: vec![],
            cts_profile_match: cts,
            basic_integrity: true,
            evaluation_type: Some("BASIC".to_string()),
        }
    }

    #[test]
    fn safetynet_claim_checks() {
        let now = Duration::from_secs(1_700_000_000);
        let now_ms = now.as_millis() as u64;
        let max_age = Some(Duration::from_secs(60));

        assert!(check_safetynet_claims(&safetynet_claims(&CDH, true, now_ms), &CDH, now, max_age)
            .is_ok());

        let reject = |claims: SafetyNetResponse, max_age| {
            matches!(
                check_safetynet_claims(&claims, &CDH, now, max_age),
                Err(WebauthnError::AttestationStatementResponseInvalid(_))
            )
        };
        assert!(reject(safetynet_claims(&[0; 32], true, now_ms), max_age));
        assert!(reject(safetynet_claims(&CDH, false, now_ms), max_age));
        // Too old, and too far in the future.
        assert!(reject(safetynet_claims(&CDH, true, now_ms - 120_000), max_age));
        assert!(reject(safetynet_claims(&CDH, true, now_ms + 120_000), max_age));
        // Timestamps are ignored when time checks are disabled.
        assert!(!reject(safetynet_claims(&CDH, true, now_ms - 120_000), None));
    }

    #[test]
    fn safetynet_rejects_garbage_response() {
        init();
        let cred_key = ec_pkey(Nid::X9_62_PRIME256V1);
        let cred = ec_credential(&cred_key);
        let obj = att_obj(
            AttestationFormat::AndroidSafetyNet,
            &cred,
            stmt(vec![
                ("ver", Value::Text("14366018".to_string())),
                ("response", Value::Bytes(b"not.a.jws".to_vec())),
            ]),
        );
        assert!(matches!(
            verify(&obj),
            Err(WebauthnError::AttestationStatementResponseInvalid(_))
        ));

        let obj = att_obj(
            AttestationFormat::AndroidSafetyNet,
            &cred,
            stmt(vec![("ver", Value::Text("14366018".to_string()))]),
        );
        assert!(matches!(
            verify(&obj),
            Err(WebauthnError::AttestationStatementResponseMissing)
        ));
    }

    fn safetynet_token(
        key: &PKey<Private>,
        cert: &x509::X509,
        claims: &SafetyNetResponse,
    ) -> String {
        use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
        use base64::Engine;

        let header = serde_json::json!({
            "alg": "ES256",
            "x5c": [STANDARD.encode(cert.to_der().unwrap())],
        });
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap()),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap()),
        );

        // ES256 in a JWS is fixed width r || s.
        let der = sign(COSEAlgorithm::ES256, key, signing_input.as_bytes());
        let sig = EcdsaSig::from_der(&der).unwrap();
        let mut raw = sig.r().to_vec_padded(32).unwrap();
        raw.extend(sig.s().to_vec_padded(32).unwrap());

        format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(raw))
    }

    struct SafetyNetFixture {
        cred: COSEKey,
        nonce: [u8; 32],
        attest_key: PKey<Private>,
    }

    impl SafetyNetFixture {
        fn new() -> Self {
            let cred = ec_credential(&ec_pkey(Nid::X9_62_PRIME256V1));
            let unsigned = att_obj(AttestationFormat::AndroidSafetyNet, &cred, BTreeMap::new());
            SafetyNetFixture {
                nonce: compute_sha256(&signed_data(&unsigned, &CDH)),
                cred,
                attest_key: ec_pkey(Nid::X9_62_PRIME256V1),
            }
        }

        fn cert(&self, cn: &'static str) -> x509::X509 {
            mint(CertSpec {
                subject: vec![("CN", cn)],
                key: &self.attest_key,
                issuer: None,
                ca: false,
                extensions: vec![],
            })
        }

        fn verify(
            &self,
            signer: &PKey<Private>,
            cert: &x509::X509,
        ) -> WebauthnResult<(ParsedAttestationData, AttestationMetadata)> {
            let now_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_millis() as u64;
            let token = safetynet_token(signer, cert, &safetynet_claims(&self.nonce, true, now_ms));
            verify(&att_obj(
                AttestationFormat::AndroidSafetyNet,
                &self.cred,
                stmt(vec![
                    ("ver", Value::Text("14366018".to_string())),
                    ("response", Value::Bytes(token.into_bytes())),
                ]),
            ))
        }
    }

    #[test]
    fn safetynet_attestation() {
        init();
        let fx = SafetyNetFixture::new();
        let (parsed, meta) = fx
            .verify(&fx.attest_key, &fx.cert("attest.android.com"))
            .unwrap();

        assert!(matches!(parsed, ParsedAttestationData::Basic(_)));
        assert_eq!(parsed.chain().map(|c| c.len()), Some(1));
        assert_eq!(
            meta,
            AttestationMetadata::AndroidSafetyNet {
                apk_package_name: "com.google.android.gms".to_string(),
                apk_certificate_digest_sha256: vec![],
                cts_profile_match: true,
                basic_integrity: true,
                evaluation_type: Some("BASIC".to_string()),
            }
        );
    }

    #[test]
    fn safetynet_forged_signature() {
        init();
        let fx = SafetyNetFixture::new();
        let forger = ec_pkey(Nid::X9_62_PRIME256V1);

        let err = fx
            .verify(&forger, &fx.cert("attest.android.com"))
            .unwrap_err();
        assert!(matches!(err, WebauthnError::AttestationStatementSigInvalid));
        assert_eq!(err.kind(), crate::error::ErrorKind::BadSignature);
    }

    #[test]
    fn safetynet_wrong_hostname() {
        init();
        let fx = SafetyNetFixture::new();

        let err = fx
            .verify(&fx.attest_key, &fx.cert("attest.example.com"))
            .unwrap_err();
        assert!(matches!(
            err,
            WebauthnError::AttestationStatementResponseInvalid(_)
        ));
        assert_eq!(err.kind(), crate::error::ErrorKind::BadAttestationStatement);
    }

    #[test]
    fn tpm_names_follow_the_name_alg() {
        let name = tpm_name(TpmAlgId::Sha256, b"abc").unwrap();
        assert_eq!(&name[..2], &[0x00, 0x0b]);
        assert_eq!(&name[2..], &compute_sha256(b"abc"));
        assert!(matches!(
            tpm_name(TpmAlgId::Null, b"abc"),
            Err(WebauthnError::AttestationTpmPubAreaHashUnknown)
        ));
    }
}
