//! Parsers for the TPM 2.0 structures carried by `tpm` attestation statements.
//!
//! <https://trustedcomputinggroup.org/wp-content/uploads/TPM-Rev-2.0-Part-2-Structures-01.38.pdf>

use nom::bytes::complete::{tag, take};
use nom::number::complete::{be_u16, be_u32, be_u64};
use openssl::bn::BigNum;
use openssl::ecdsa::EcdsaSig;

use crate::error::{WebauthnError, WebauthnResult};

/// TPM_GENERATED_VALUE
const TPM_GENERATED_VALUE: [u8; 4] = [0xff, 0x54, 0x43, 0x47];

/// The default RSA exponent, used when pubArea encodes it as zero.
const TPM_RSA_DEFAULT_EXPONENT: u32 = 65537;

fn fail<T>(i: &[u8]) -> nom::IResult<&[u8], T> {
    Err(nom::Err::Failure(nom::error::Error::new(
        i,
        nom::error::ErrorKind::Verify,
    )))
}

/// A sized buffer: u16 length followed by that many bytes.
fn tpm2b(i: &[u8]) -> nom::IResult<&[u8], &[u8]> {
    let (i, len) = be_u16(i)?;
    take(len as usize)(i)
}

/// TPM_ALG_ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub(crate) enum TpmAlgId {
    Rsa = 0x0001,
    Sha1 = 0x0004,
    Sha256 = 0x000B,
    Sha384 = 0x000C,
    Sha512 = 0x000D,
    Null = 0x0010,
    RsaSsa = 0x0014,
    RsaPss = 0x0016,
    Ecdsa = 0x0018,
    Ecc = 0x0023,
}

impl TryFrom<u16> for TpmAlgId {
    type Error = ();
    fn try_from(v: u16) -> Result<Self, Self::Error> {
        match v {
            0x0001 => Ok(TpmAlgId::Rsa),
            0x0004 => Ok(TpmAlgId::Sha1),
            0x000B => Ok(TpmAlgId::Sha256),
            0x000C => Ok(TpmAlgId::Sha384),
            0x000D => Ok(TpmAlgId::Sha512),
            0x0010 => Ok(TpmAlgId::Null),
            0x0014 => Ok(TpmAlgId::RsaSsa),
            0x0016 => Ok(TpmAlgId::RsaPss),
            0x0018 => Ok(TpmAlgId::Ecdsa),
            0x0023 => Ok(TpmAlgId::Ecc),
            _ => Err(()),
        }
    }
}

fn tpm_alg_id(i: &[u8]) -> nom::IResult<&[u8], TpmAlgId> {
    let (r, v) = be_u16(i)?;
    match TpmAlgId::try_from(v) {
        Ok(alg) => Ok((r, alg)),
        Err(_) => fail(i),
    }
}

/// TPM_ST, the structure tag of an attestation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TpmSt {
    AttestNv,
    AttestCommandAudit,
    AttestSessionAudit,
    AttestCertify,
    AttestQuote,
    AttestTime,
    AttestCreation,
}

impl TryFrom<u16> for TpmSt {
    type Error = ();
    fn try_from(v: u16) -> Result<Self, Self::Error> {
        match v {
            0x8014 => Ok(TpmSt::AttestNv),
            0x8015 => Ok(TpmSt::AttestCommandAudit),
            0x8016 => Ok(TpmSt::AttestSessionAudit),
            0x8017 => Ok(TpmSt::AttestCertify),
            0x8018 => Ok(TpmSt::AttestQuote),
            0x8019 => Ok(TpmSt::AttestTime),
            0x801A => Ok(TpmSt::AttestCreation),
            _ => Err(()),
        }
    }
}

/// TPMI_ECC_CURVE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TpmiEccCurve {
    NistP256,
    NistP384,
    NistP521,
}

/// TPM2B_NAME
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Tpm2bName {
    None,
    Handle,
    /// The hash algorithm id followed by the digest.
    Digest(Vec<u8>),
}

fn tpm2b_name(i: &[u8]) -> nom::IResult<&[u8], Tpm2bName> {
    let (i, raw) = tpm2b(i)?;
    let name = match raw.len() {
        0 => Tpm2bName::None,
        4 => Tpm2bName::Handle,
        _ => Tpm2bName::Digest(raw.to_vec()),
    };
    Ok((i, name))
}

/// TPMU_ATTEST
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TpmuAttest {
    /// The name of the certified object.
    AttestCertify(Tpm2bName),
    Invalid,
}

/// TPMS_ATTEST
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TpmsAttest {
    pub type_: TpmSt,
    pub extra_data: Option<Vec<u8>>,
    pub firmware_version: u64,
    pub typeattested: TpmuAttest,
}

fn tpms_attest_parser(i: &[u8]) -> nom::IResult<&[u8], TpmsAttest> {
    let (i, _magic) = tag(TPM_GENERATED_VALUE)(i)?;
    let st_pos = i;
    let (i, st) = be_u16(i)?;
    let type_ = match TpmSt::try_from(st) {
        Ok(t) => t,
        Err(_) => return fail(st_pos),
    };
    let (i, _qualified_signer) = tpm2b_name(i)?;
    let (i, extra_data) = tpm2b(i)?;
    // TPMS_CLOCK_INFO: clock, resetCount, restartCount, safe
    let (i, _clock_info) = take(17usize)(i)?;
    let (i, firmware_version) = be_u64(i)?;

    let (i, typeattested) = match type_ {
        TpmSt::AttestCertify => {
            let (i, name) = tpm2b_name(i)?;
            let (i, _qualified_name) = tpm2b_name(i)?;
            (i, TpmuAttest::AttestCertify(name))
        }
        // Other attestation bodies are never valid here, so they are not decoded.
        _ => (&i[i.len()..], TpmuAttest::Invalid),
    };

    Ok((
        i,
        TpmsAttest {
            type_,
            extra_data: (!extra_data.is_empty()).then(|| extra_data.to_vec()),
            firmware_version,
            typeattested,
        },
    ))
}

impl TryFrom<&[u8]> for TpmsAttest {
    type Error = WebauthnError;

    fn try_from(data: &[u8]) -> WebauthnResult<TpmsAttest> {
        match tpms_attest_parser(data) {
            Ok((rem, attest)) if rem.is_empty() => Ok(attest),
            Ok((rem, _)) => {
                debug!(remaining = rem.len(), "trailing bytes after certInfo");
                Err(WebauthnError::ParseNOMFailure)
            }
            Err(e) => {
                debug!(?e, "try_from tpms_attest_parser");
                Err(WebauthnError::ParseNOMFailure)
            }
        }
    }
}

/// TPMS_RSA_PARMS
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TpmsRsaParms {
    /// Zero in the structure means the default exponent; that is resolved here.
    pub exponent: u32,
}

/// TPMS_ECC_PARMS
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TpmsEccParms {
    pub curve_id: TpmiEccCurve,
}

/// TPMU_PUBLIC_PARMS
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TpmuPublicParms {
    Rsa(TpmsRsaParms),
    Ecc(TpmsEccParms),
}

/// TPMS_ECC_POINT
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TpmsEccPoint {
    pub x: Vec<u8>,
    pub y: Vec<u8>,
}

/// TPMU_PUBLIC_ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TpmuPublicId {
    Rsa(Vec<u8>),
    Ecc(TpmsEccPoint),
}

/// TPMT_PUBLIC
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TpmtPublic {
    pub name_alg: TpmAlgId,
    pub parameters: TpmuPublicParms,
    pub unique: TpmuPublicId,
}

/// TPMT_SYM_DEF_OBJECT, and the scheme fields that share its "alg, then details unless null"
/// shape.
fn skip_alg_with_details(i: &[u8], detail_len: usize) -> nom::IResult<&[u8], ()> {
    let (i, alg) = be_u16(i)?;
    if alg == TpmAlgId::Null as u16 {
        Ok((i, ()))
    } else {
        let (i, _) = take(detail_len)(i)?;
        Ok((i, ()))
    }
}

fn tpmt_public_parser(i: &[u8]) -> nom::IResult<&[u8], TpmtPublic> {
    let (i, type_) = tpm_alg_id(i)?;
    let (i, name_alg) = tpm_alg_id(i)?;
    let (i, _object_attributes) = be_u32(i)?;
    let (i, _auth_policy) = tpm2b(i)?;

    let (i, parameters, unique) = match type_ {
        TpmAlgId::Rsa => {
            // symmetric: keyBits, mode
            let (i, _) = skip_alg_with_details(i, 4)?;
            // scheme: hashAlg
            let (i, _) = skip_alg_with_details(i, 2)?;
            let (i, _key_bits) = be_u16(i)?;
            let (i, exponent) = be_u32(i)?;
            let (i, modulus) = tpm2b(i)?;
            let exponent = if exponent == 0 {
                TPM_RSA_DEFAULT_EXPONENT
            } else {
                exponent
            };
            (
                i,
                TpmuPublicParms::Rsa(TpmsRsaParms { exponent }),
                TpmuPublicId::Rsa(modulus.to_vec()),
            )
        }
        TpmAlgId::Ecc => {
            let (i, _) = skip_alg_with_details(i, 4)?;
            let (i, _) = skip_alg_with_details(i, 2)?;
            let curve_pos = i;
            let (i, curve) = be_u16(i)?;
            let curve_id = match curve {
                0x0003 => TpmiEccCurve::NistP256,
                0x0004 => TpmiEccCurve::NistP384,
                0x0005 => TpmiEccCurve::NistP521,
                _ => return fail(curve_pos),
            };
            // kdf: hashAlg
            let (i, _) = skip_alg_with_details(i, 2)?;
            let (i, x) = tpm2b(i)?;
            let (i, y) = tpm2b(i)?;
            (
                i,
                TpmuPublicParms::Ecc(TpmsEccParms { curve_id }),
                TpmuPublicId::Ecc(TpmsEccPoint {
                    x: x.to_vec(),
                    y: y.to_vec(),
                }),
            )
        }
        _ => return fail(i),
    };

    Ok((
        i,
        TpmtPublic {
            name_alg,
            parameters,
            unique,
        },
    ))
}

impl TryFrom<&[u8]> for TpmtPublic {
    type Error = WebauthnError;

    fn try_from(data: &[u8]) -> WebauthnResult<TpmtPublic> {
        match tpmt_public_parser(data) {
            Ok((rem, public)) if rem.is_empty() => Ok(public),
            Ok((rem, _)) => {
                debug!(remaining = rem.len(), "trailing bytes after pubArea");
                Err(WebauthnError::ParseNOMFailure)
            }
            Err(e) => {
                debug!(?e, "try_from tpmt_public_parser");
                Err(WebauthnError::ParseNOMFailure)
            }
        }
    }
}

/// The attestation signature. Authenticators send either a TPMT_SIGNATURE or the bare
/// signature bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TpmtSignature {
    RawSignature(Vec<u8>),
    /// An ECDSA signature, converted to DER.
    EcdsaSignature(Vec<u8>),
}

impl TpmtSignature {
    /// The signature in the encoding openssl verifies.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            TpmtSignature::RawSignature(s) | TpmtSignature::EcdsaSignature(s) => s.as_slice(),
        }
    }
}

enum TpmtSignatureRaw<'a> {
    Rsa(&'a [u8]),
    Ecdsa(&'a [u8], &'a [u8]),
}

fn tpmt_signature_parser(i: &[u8]) -> nom::IResult<&[u8], TpmtSignatureRaw<'_>> {
    let (i, sig_alg) = tpm_alg_id(i)?;
    let (i, _hash) = tpm_alg_id(i)?;
    match sig_alg {
        TpmAlgId::RsaSsa | TpmAlgId::RsaPss => {
            let (i, sig) = tpm2b(i)?;
            Ok((i, TpmtSignatureRaw::Rsa(sig)))
        }
        TpmAlgId::Ecdsa => {
            let (i, r) = tpm2b(i)?;
            let (i, s) = tpm2b(i)?;
            Ok((i, TpmtSignatureRaw::Ecdsa(r, s)))
        }
        _ => fail(i),
    }
}

impl TryFrom<&[u8]> for TpmtSignature {
    type Error = WebauthnError;

    fn try_from(data: &[u8]) -> WebauthnResult<TpmtSignature> {
        match tpmt_signature_parser(data) {
            Ok((rem, TpmtSignatureRaw::Rsa(sig))) if rem.is_empty() => {
                Ok(TpmtSignature::RawSignature(sig.to_vec()))
            }
            Ok((rem, TpmtSignatureRaw::Ecdsa(r, s))) if rem.is_empty() => {
                let r = BigNum::from_slice(r)?;
                let s = BigNum::from_slice(s)?;
                let der = EcdsaSig::from_private_components(r, s)?.to_der()?;
                Ok(TpmtSignature::EcdsaSignature(der))
            }
            _ => Ok(TpmtSignature::RawSignature(data.to_vec())),
        }
    }
}


#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use super::test_encode::*;
    use super::*;

    #[test]
    fn parse_certify_info() {
        let raw = certify_info(0x8017, &[9; 32], &[0x00, 0x0b, 7, 7, 7]);
        let attest = TpmsAttest::try_from(raw.as_slice()).unwrap();
        assert_eq!(attest.type_, TpmSt::AttestCertify);
        assert_eq!(attest.extra_data, Some(vec![9; 32]));
        assert_eq!(attest.firmware_version, 0x0102_0304_0506_0708);
        assert_eq!(
            attest.typeattested,
            TpmuAttest::AttestCertify(Tpm2bName::Digest(vec![0x00, 0x0b, 7, 7, 7]))
        );
    }

    #[test]
    fn certify_info_rejections() {
        let mut raw = certify_info(0x8017, &[9; 32], &[0x00, 0x0b, 7, 7, 7]);
        raw[0] = 0;
        assert!(TpmsAttest::try_from(raw.as_slice()).is_err());

        let mut raw = certify_info(0x8017, &[9; 32], &[0x00, 0x0b, 7, 7, 7]);
        raw.push(0);
        assert!(TpmsAttest::try_from(raw.as_slice()).is_err());

        let raw = certify_info(0x8017, &[9; 32], &[0x00, 0x0b, 7, 7, 7]);
        assert!(TpmsAttest::try_from(&raw[..raw.len() - 3]).is_err());

        // A quote parses, but carries no certify body.
        let raw = certify_info(0x8018, &[], &[]);
        let attest = TpmsAttest::try_from(raw.as_slice()).unwrap();
        assert_eq!(attest.type_, TpmSt::AttestQuote);
        assert_eq!(attest.extra_data, None);
        assert_eq!(attest.typeattested, TpmuAttest::Invalid);
    }

    #[test]
    fn parse_pub_areas() {
        let raw = ecc_pub_area(0x0003, &[1; 32], &[2; 32]);
        let public = TpmtPublic::try_from(raw.as_slice()).unwrap();
        assert_eq!(public.name_alg, TpmAlgId::Sha256);
        assert_eq!(
            public.parameters,
            TpmuPublicParms::Ecc(TpmsEccParms {
                curve_id: TpmiEccCurve::NistP256
            })
        );
        assert_eq!(
            public.unique,
            TpmuPublicId::Ecc(TpmsEccPoint {
                x: vec![1; 32],
                y: vec![2; 32]
            })
        );

        let raw = ecc_pub_area(0x0010, &[1; 32], &[2; 32]);
        assert!(TpmtPublic::try_from(raw.as_slice()).is_err());

        let raw = rsa_pub_area(0, &[0xc1; 256]);
        let public = TpmtPublic::try_from(raw.as_slice()).unwrap();
        assert_eq!(
            public.parameters,
            TpmuPublicParms::Rsa(TpmsRsaParms { exponent: 65537 })
        );
        assert_eq!(public.unique, TpmuPublicId::Rsa(vec![0xc1; 256]));
    }

    #[test]
    fn parse_signatures() {
        let raw = vec![0xab; 256];
        assert_eq!(
            TpmtSignature::try_from(raw.as_slice()).unwrap(),
            TpmtSignature::RawSignature(raw)
        );

        let raw = ecdsa_signature(&[0x11; 32], &[0x22; 32]);
        match TpmtSignature::try_from(raw.as_slice()).unwrap() {
            TpmtSignature::EcdsaSignature(der) => {
                let sig = EcdsaSig::from_der(&der).unwrap();
                assert_eq!(sig.r().to_vec(), vec![0x11; 32]);
                assert_eq!(sig.s().to_vec(), vec![0x22; 32]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
