//! Cryptographic operation wrapper for Webauthn. This module exists to
//! allow ease of auditing, safe operation wrappers for the webauthn library,
//! and cryptographic provider abstraction. This module currently uses OpenSSL
//! as the cryptographic primitive provider.

#![allow(non_camel_case_types)]

use std::collections::BTreeMap;

use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::{hash, MessageDigest};
use openssl::nid::Nid;
use openssl::pkey::{HasPublic, Id, PKey, PKeyRef, Public};
use openssl::rsa::{Padding, Rsa};
use openssl::sign::{RsaPssSaltlen, Verifier};
use openssl::{sha, x509};
use serde_cbor_2::Value;
use x509_parser::extensions::ParsedExtension;
use x509_parser::oid_registry::Oid;

use crate::error::{WebauthnError, WebauthnResult};
use crate::interface::*;

/// id-kp-tcg-kp-AIKCertificate
const TCG_KP_AIK_CERTIFICATE: Oid<'static> = der_parser::oid!(2.23.133 .8 .3);

const RSA_MODULUS_MIN_BYTES: usize = 256;
const RSA_MODULUS_MAX_BYTES: usize = 512;
const RSA_EXPONENT_MAX_BYTES: usize = 8;

impl TryFrom<i128> for ECDSACurve {
    type Error = ();
    fn try_from(u: i128) -> Result<Self, Self::Error> {
        match u {
            1 => Ok(ECDSACurve::SECP256R1),
            2 => Ok(ECDSACurve::SECP384R1),
            3 => Ok(ECDSACurve::SECP521R1),
            _ => Err(()),
        }
    }
}

impl ECDSACurve {
    pub(crate) fn to_openssl_nid(self) -> Nid {
        match self {
            ECDSACurve::SECP256R1 => Nid::X9_62_PRIME256V1,
            ECDSACurve::SECP384R1 => Nid::SECP384R1,
            ECDSACurve::SECP521R1 => Nid::SECP521R1,
        }
    }

    fn from_openssl_nid(nid: Nid) -> Option<Self> {
        match nid {
            Nid::X9_62_PRIME256V1 => Some(ECDSACurve::SECP256R1),
            Nid::SECP384R1 => Some(ECDSACurve::SECP384R1),
            Nid::SECP521R1 => Some(ECDSACurve::SECP521R1),
            _ => None,
        }
    }

    /// The signing algorithm paired with this curve.
    fn algorithm(self) -> COSEAlgorithm {
        match self {
            ECDSACurve::SECP256R1 => COSEAlgorithm::ES256,
            ECDSACurve::SECP384R1 => COSEAlgorithm::ES384,
            ECDSACurve::SECP521R1 => COSEAlgorithm::ES512,
        }
    }
}

impl TryFrom<i128> for EDDSACurve {
    type Error = ();
    fn try_from(u: i128) -> Result<Self, Self::Error> {
        match u {
            6 => Ok(EDDSACurve::ED25519),
            7 => Ok(EDDSACurve::ED448),
            _ => Err(()),
        }
    }
}

impl EDDSACurve {
    fn to_openssl_id(self) -> Id {
        match self {
            EDDSACurve::ED25519 => Id::ED25519,
            EDDSACurve::ED448 => Id::ED448,
        }
    }
}

impl COSEAlgorithm {
    /// The digest this algorithm signs over. EdDSA hashes internally and has none.
    pub(crate) fn message_digest(self) -> WebauthnResult<Option<MessageDigest>> {
        match self {
            COSEAlgorithm::ES256 | COSEAlgorithm::RS256 | COSEAlgorithm::PS256 => {
                Ok(Some(MessageDigest::sha256()))
            }
            COSEAlgorithm::ES384 | COSEAlgorithm::RS384 | COSEAlgorithm::PS384 => {
                Ok(Some(MessageDigest::sha384()))
            }
            COSEAlgorithm::ES512 | COSEAlgorithm::RS512 | COSEAlgorithm::PS512 => {
                Ok(Some(MessageDigest::sha512()))
            }
            COSEAlgorithm::EDDSA => Ok(None),
            COSEAlgorithm::INSECURE_RS1 => {
                warn!("INSECURE SHA1 USAGE DETECTED");
                Err(WebauthnError::CredentialInsecureCryptography)
            }
        }
    }

    pub(crate) fn is_pss(self) -> bool {
        matches!(
            self,
            COSEAlgorithm::PS256 | COSEAlgorithm::PS384 | COSEAlgorithm::PS512
        )
    }

    fn key_type(self) -> COSEKeyTypeId {
        match self {
            COSEAlgorithm::ES256 | COSEAlgorithm::ES384 | COSEAlgorithm::ES512 => {
                COSEKeyTypeId::EC_EC2
            }
            COSEAlgorithm::EDDSA => COSEKeyTypeId::EC_OKP,
            COSEAlgorithm::RS256
            | COSEAlgorithm::RS384
            | COSEAlgorithm::RS512
            | COSEAlgorithm::PS256
            | COSEAlgorithm::PS384
            | COSEAlgorithm::PS512
            | COSEAlgorithm::INSECURE_RS1 => COSEKeyTypeId::EC_RSA,
        }
    }
}

/// Hash `input` with the digest of `alg`.
pub(crate) fn only_hash_from_type(alg: COSEAlgorithm, input: &[u8]) -> WebauthnResult<Vec<u8>> {
    match alg.message_digest()? {
        Some(md) => Ok(hash(md, input)?.to_vec()),
        None => {
            debug!(?alg, "algorithm has no standalone digest");
            Err(WebauthnError::COSEKeyInvalidAlgorithm)
        }
    }
}

/// Compute the sha256 of a slice of data.
pub fn compute_sha256(data: &[u8]) -> [u8; 32] {
    sha::sha256(data)
}

/// Check a signature with a public key, under the rules of `alg`. A signature that cannot
/// be parsed is reported as invalid.
fn verify_with_pkey<T: HasPublic>(
    alg: COSEAlgorithm,
    pkey: &PKeyRef<T>,
    signature: &[u8],
    verification_data: &[u8],
) -> WebauthnResult<bool> {
    let valid = match alg.message_digest()? {
        None => {
            let mut verifier = Verifier::new_without_digest(pkey)?;
            verifier.verify_oneshot(signature, verification_data)
        }
        Some(md) => {
            let mut verifier = Verifier::new(md, pkey)?;
            if alg.is_pss() {
                verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
                verifier.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
            }
            verifier.update(verification_data)?;
            verifier.verify(signature)
        }
    };

    Ok(valid.unwrap_or_else(|e| {
        debug!(?e, "signature verification error");
        false
    }))
}

fn pkey_matches_alg<T>(alg: COSEAlgorithm, pkey: &PKeyRef<T>) -> bool {
    matches!(
        (alg.key_type(), pkey.id()),
        (COSEKeyTypeId::EC_EC2, Id::EC)
            | (COSEKeyTypeId::EC_RSA, Id::RSA)
            | (COSEKeyTypeId::EC_OKP, Id::ED25519)
            | (COSEKeyTypeId::EC_OKP, Id::ED448)
    )
}

/// Validate an x509 signature is valid for the supplied data
pub fn verify_signature(
    alg: COSEAlgorithm,
    certificate: &x509::X509Ref,
    signature: &[u8],
    verification_data: &[u8],
) -> WebauthnResult<bool> {
    let pkey = certificate.public_key()?;
    if !pkey_matches_alg(alg, &pkey) {
        debug!(?alg, id = ?pkey.id(), "certificate key does not match algorithm");
        return Err(WebauthnError::AttestationStatementAlgMismatch);
    }
    verify_with_pkey(alg, &pkey, signature, verification_data)
}

/// Assert the certificate key is an EC key on P-256.
pub(crate) fn assert_p256(certificate: &x509::X509Ref) -> WebauthnResult<()> {
    let pkey = certificate.public_key()?;
    let ec_key = pkey
        .ec_key()
        .map_err(|_| WebauthnError::AttestationU2FKeyNotP256)?;
    ec_key.check_key()?;

    let curve = ec_key
        .group()
        .curve_name()
        .ok_or(WebauthnError::OpenSSLErrorNoCurveName)?;

    if curve == Nid::X9_62_PRIME256V1 {
        Ok(())
    } else {
        Err(WebauthnError::AttestationU2FKeyNotP256)
    }
}

fn parse_extensions<F, R>(certificate: &x509::X509Ref, f: F) -> WebauthnResult<R>
where
    F: FnOnce(&x509_parser::certificate::X509Certificate<'_>) -> R,
{
    let der_bytes = certificate.to_der()?;
    let (_, cert) = x509_parser::parse_x509_certificate(&der_bytes)
        .map_err(|_| WebauthnError::AttestationCertificateParseFailure)?;
    Ok(f(&cert))
}

fn is_ca(cert: &x509_parser::certificate::X509Certificate<'_>) -> bool {
    cert.extensions()
        .iter()
        .any(|ext| matches!(ext.parsed_extension(), ParsedExtension::BasicConstraints(bc) if bc.ca))
}

#[allow(deprecated)]
fn first_entry_utf8(name: &x509::X509NameRef, nid: Nid) -> Option<String> {
    name.entries_by_nid(nid)
        .next()
        .and_then(|e| e.data().as_utf8().ok())
        .map(|s| s.to_string())
}

/// Packed attestation statement certificate requirements.
/// <https://w3c.github.io/webauthn/#sctn-packed-attestation-cert-requirements>
pub(crate) fn assert_packed_attest_req(certificate: &x509::X509Ref) -> WebauthnResult<()> {
    // Version MUST be set to 3 (which is indicated by an ASN.1 INTEGER with value 2).
    if certificate.version() != 2 {
        return Err(WebauthnError::AttestationCertificateRequirementsNotMet);
    }

    let subject = certificate.subject_name();
    let subject_c = first_entry_utf8(subject, Nid::COUNTRYNAME);
    let subject_o = first_entry_utf8(subject, Nid::ORGANIZATIONNAME);
    let subject_ou = first_entry_utf8(subject, Nid::ORGANIZATIONALUNITNAME);
    let subject_cn = first_entry_utf8(subject, Nid::COMMONNAME);

    if subject_c.is_none() || subject_o.is_none() || subject_cn.is_none() {
        debug!("packed attestation certificate subject is incomplete");
        return Err(WebauthnError::AttestationCertificateRequirementsNotMet);
    }

    if subject_ou.as_deref() != Some("Authenticator Attestation") {
        debug!(?subject_ou, "packed attestation certificate OU");
        return Err(WebauthnError::AttestationCertificateRequirementsNotMet);
    }

    // The Basic Constraints extension MUST have the CA component set to false.
    if parse_extensions(certificate, is_ca)? {
        return Err(WebauthnError::AttestationCertificateRequirementsNotMet);
    }

    Ok(())
}

/// TPM attestation statement certificate requirements.
/// <https://w3c.github.io/webauthn/#sctn-tpm-cert-requirements>
pub(crate) fn assert_tpm_attest_req(certificate: &x509::X509Ref) -> WebauthnResult<()> {
    if certificate.version() != 2 {
        return Err(WebauthnError::AttestationCertificateRequirementsNotMet);
    }

    // Subject field MUST be set to empty.
    if certificate.subject_name().entries().next().is_some() {
        debug!("tpm attestation certificate has a subject");
        return Err(WebauthnError::AttestationCertificateRequirementsNotMet);
    }

    let (ca, aik_eku) = parse_extensions(certificate, |cert| {
        let aik_eku = cert.extensions().iter().any(|ext| {
            matches!(
                ext.parsed_extension(),
                ParsedExtension::ExtendedKeyUsage(eku)
                    if eku.other.iter().any(|oid| *oid == TCG_KP_AIK_CERTIFICATE)
            )
        });
        (is_ca(cert), aik_eku)
    })?;

    if ca || !aik_eku {
        debug!(ca, aik_eku, "tpm attestation certificate constraints");
        return Err(WebauthnError::AttestationCertificateRequirementsNotMet);
    }

    Ok(())
}

fn map_get<'a>(m: &'a BTreeMap<Value, Value>, k: i128) -> WebauthnResult<&'a Value> {
    m.get(&Value::Integer(k))
        .ok_or(WebauthnError::COSEKeyInvalidCBORValue)
}

impl TryFrom<&Value> for COSEKey {
    type Error = WebauthnError;
    fn try_from(d: &Value) -> Result<COSEKey, Self::Error> {
        let m = cbor_try_map!(d)?;

        // See also https://tools.ietf.org/html/rfc8152#section-3.1
        //  1: kty, 3: alg, then key type specific negative labels.
        let key_type = cbor_try_i128!(map_get(m, 1)?)?;
        let content_type = cbor_try_i128!(map_get(m, 3)?)?;

        let type_ = COSEAlgorithm::try_from(content_type).map_err(|_| {
            debug!(?content_type, "unknown cose algorithm");
            WebauthnError::COSEKeyInvalidAlgorithm
        })?;

        if type_ == COSEAlgorithm::INSECURE_RS1 {
            warn!("INSECURE SHA1 USAGE DETECTED");
            return Err(WebauthnError::CredentialInsecureCryptography);
        }

        let unsupported = WebauthnError::COSEKeyUnsupported {
            key_type,
            alg: content_type,
        };

        if key_type != type_.key_type() as i128 {
            debug!(?key_type, ?type_, "key type does not match algorithm");
            return Err(unsupported);
        }

        let key = match type_.key_type() {
            COSEKeyTypeId::EC_EC2 => {
                // crv (-1), x (-2) and y (-3)
                let curve = cbor_try_i128!(map_get(m, -1)?)?;
                let curve = ECDSACurve::try_from(curve)
                    .ok()
                    .filter(|c| c.algorithm() == type_)
                    .ok_or(unsupported)?;

                let x = cbor_try_bytes!(map_get(m, -2)?)?;
                let y = cbor_try_bytes!(map_get(m, -3)?)?;

                let coord_len = curve.coordinate_size();
                if x.len() != coord_len || y.len() != coord_len {
                    return Err(WebauthnError::COSEKeyECDSAXYInvalid);
                }

                COSEKeyType::EC_EC2(COSEEC2Key {
                    curve,
                    x: x.to_vec().into(),
                    y: y.to_vec().into(),
                })
            }
            COSEKeyTypeId::EC_RSA => {
                // n (-1), e (-2)
                let n = cbor_try_bytes!(map_get(m, -1)?)?;
                let e = cbor_try_bytes!(map_get(m, -2)?)?;

                if !(RSA_MODULUS_MIN_BYTES..=RSA_MODULUS_MAX_BYTES).contains(&n.len())
                    || e.is_empty()
                    || e.len() > RSA_EXPONENT_MAX_BYTES
                {
                    return Err(WebauthnError::COSEKeyRSANEInvalid);
                }

                COSEKeyType::RSA(COSERSAKey {
                    n: n.to_vec().into(),
                    e: e.to_vec().into(),
                })
            }
            COSEKeyTypeId::EC_OKP => {
                // https://datatracker.ietf.org/doc/html/rfc8152#section-13.2
                let curve = cbor_try_i128!(map_get(m, -1)?)?;
                let curve = EDDSACurve::try_from(curve).map_err(|_| unsupported)?;

                let x = cbor_try_bytes!(map_get(m, -2)?)?;
                if x.len() != curve.coordinate_size() {
                    return Err(WebauthnError::COSEKeyEDDSAXInvalid);
                }

                COSEKeyType::EC_OKP(COSEOKPKey {
                    curve,
                    x: x.to_vec().into(),
                })
            }
        };

        let cose_key = COSEKey { type_, key };

        // The rfc additionally states:
        //   "   Applications MUST check that the curve and the key type are
        //     consistent and reject a key if they are not."
        // this means feeding the values to openssl to validate them for us!
        cose_key.validate()?;
        Ok(cose_key)
    }
}

/// Express a public key as a COSE key for `alg`.
pub(crate) fn cose_key_from_pkey<T: HasPublic>(
    alg: COSEAlgorithm,
    pkey: &PKeyRef<T>,
) -> WebauthnResult<COSEKey> {
    if !pkey_matches_alg(alg, pkey) {
        debug!(?alg, id = ?pkey.id(), "public key does not match algorithm");
        return Err(WebauthnError::AttestationStatementAlgMismatch);
    }

    let key = match pkey.id() {
        Id::EC => {
            let ec_key = pkey.ec_key()?;
            let group = ec_key.group();
            let curve = group
                .curve_name()
                .and_then(ECDSACurve::from_openssl_nid)
                .ok_or(WebauthnError::OpenSSLErrorNoCurveName)?;
            if curve.algorithm() != alg {
                return Err(WebauthnError::AttestationStatementAlgMismatch);
            }

            let mut ctx = BigNumContext::new()?;
            let mut xbn = BigNum::new()?;
            let mut ybn = BigNum::new()?;
            ec_key
                .public_key()
                .affine_coordinates(group, &mut xbn, &mut ybn, &mut ctx)?;

            let coord_len = curve.coordinate_size() as i32;
            COSEKeyType::EC_EC2(COSEEC2Key {
                curve,
                x: xbn.to_vec_padded(coord_len)?.into(),
                y: ybn.to_vec_padded(coord_len)?.into(),
            })
        }
        Id::RSA => {
            let rsa = pkey.rsa()?;
            COSEKeyType::RSA(COSERSAKey {
                n: rsa.n().to_vec().into(),
                e: rsa.e().to_vec().into(),
            })
        }
        id => {
            let curve = if id == Id::ED25519 {
                EDDSACurve::ED25519
            } else {
                EDDSACurve::ED448
            };
            COSEKeyType::EC_OKP(COSEOKPKey {
                curve,
                x: pkey.raw_public_key()?.into(),
            })
        }
    };

    Ok(COSEKey { type_: alg, key })
}

impl TryFrom<(COSEAlgorithm, &x509::X509)> for COSEKey {
    type Error = WebauthnError;

    fn try_from((alg, certificate): (COSEAlgorithm, &x509::X509)) -> Result<COSEKey, Self::Error> {
        let pkey = certificate.public_key()?;
        cose_key_from_pkey(alg, &pkey)
    }
}

impl COSEKey {
    pub(crate) fn get_alg_key_ecc_x962_raw(&self) -> WebauthnResult<Vec<u8>> {
        // Let publicKeyU2F be the concatenation 0x04 || x || y.
        // Note: This signifies uncompressed ECC key format.
        match &self.key {
            COSEKeyType::EC_EC2(ecpk) => {
                let r: [u8; 1] = [0x04];
                Ok(r.iter()
                    .chain(ecpk.x.0.iter())
                    .chain(ecpk.y.0.iter())
                    .copied()
                    .collect())
            }
            _ => {
                debug!("get_alg_key_ecc_x962_raw");
                Err(WebauthnError::AttestationU2FKeyNotP256)
            }
        }
    }

    pub(crate) fn validate(&self) -> WebauthnResult<()> {
        self.get_openssl_pkey().map(|_| ())
    }

    fn get_openssl_pkey(&self) -> WebauthnResult<PKey<Public>> {
        match &self.key {
            COSEKeyType::EC_EC2(ec2k) => {
                let ec_group = EcGroup::from_curve_name(ec2k.curve.to_openssl_nid())?;
                let xbn = BigNum::from_slice(ec2k.x.as_ref())?;
                let ybn = BigNum::from_slice(ec2k.y.as_ref())?;

                let ec_key = EcKey::from_public_key_affine_coordinates(&ec_group, &xbn, &ybn)
                    .map_err(|e| {
                        debug!(?e, "ec point rejected");
                        WebauthnError::COSEKeyInvalidPoint
                    })?;

                // Checks the point is on the curve and not at infinity.
                ec_key
                    .check_key()
                    .map_err(|_| WebauthnError::COSEKeyInvalidPoint)?;

                Ok(PKey::from_ec_key(ec_key)?)
            }
            COSEKeyType::RSA(rsak) => {
                let n = BigNum::from_slice(rsak.n.as_ref())?;
                let e = BigNum::from_slice(rsak.e.as_ref())?;
                let rsa = Rsa::from_public_components(n, e)
                    .map_err(|_| WebauthnError::COSEKeyRSANEInvalid)?;
                Ok(PKey::from_rsa(rsa)?)
            }
            COSEKeyType::EC_OKP(edk) => {
                PKey::public_key_from_raw_bytes(edk.x.as_ref(), edk.curve.to_openssl_id())
                    .map_err(|_| WebauthnError::COSEKeyInvalidPoint)
            }
        }
    }

    /// Verifies data was signed with this [COSEKey].
    pub fn verify_signature(
        &self,
        signature: &[u8],
        verification_data: &[u8],
    ) -> WebauthnResult<bool> {
        let pkey = self.get_openssl_pkey()?;
        verify_with_pkey(self.type_, &pkey, signature, verification_data)
    }

    /// True when `certificate` carries the same public key as this credential.
    pub(crate) fn matches_certificate(&self, certificate: &x509::X509) -> WebauthnResult<bool> {
        Ok(COSEKey::try_from((self.type_, certificate))
            .map(|cert_key| cert_key.key == self.key)
            .unwrap_or(false))
    }

    /// Encode this key as the COSE_Key map an authenticator would emit.
    pub fn to_cbor_value(&self) -> Value {
        let mut m = BTreeMap::new();
        m.insert(
            Value::Integer(3),
            Value::Integer(i64::from(self.type_) as i128),
        );
        match &self.key {
            COSEKeyType::EC_EC2(k) => {
                m.insert(Value::Integer(1), Value::Integer(COSEKeyTypeId::EC_EC2 as i128));
                m.insert(Value::Integer(-1), Value::Integer(k.curve as i128));
                m.insert(Value::Integer(-2), Value::Bytes(k.x.0.clone()));
                m.insert(Value::Integer(-3), Value::Bytes(k.y.0.clone()));
            }
            COSEKeyType::RSA(k) => {
                m.insert(Value::Integer(1), Value::Integer(COSEKeyTypeId::EC_RSA as i128));
                m.insert(Value::Integer(-1), Value::Bytes(k.n.0.clone()));
                m.insert(Value::Integer(-2), Value::Bytes(k.e.0.clone()));
            }
            COSEKeyType::EC_OKP(k) => {
                m.insert(Value::Integer(1), Value::Integer(COSEKeyTypeId::EC_OKP as i128));
                m.insert(Value::Integer(-1), Value::Integer(k.curve as i128));
                m.insert(Value::Integer(-2), Value::Bytes(k.x.0.clone()));
            }
        }
        Value::Map(m)
    }

    /// Encode this key to CBOR bytes.
    pub fn to_cbor_bytes(&self) -> WebauthnResult<Vec<u8>> {
        serde_cbor_2::to_vec(&self.to_cbor_value())
            .map_err(|_| WebauthnError::COSEKeyInvalidCBORValue)
    }
}
