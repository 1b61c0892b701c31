//! Fixtures shared by unit tests: key and certificate minting, and small DER encoders.

#![allow(clippy::panic)]

use openssl::asn1::{Asn1Object, Asn1OctetString, Asn1Time};
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Padding;
use openssl::sign::{RsaPssSaltlen, Signer};
use openssl::x509::extension::{BasicConstraints, ExtendedKeyUsage};
use openssl::x509::{X509Builder, X509Extension, X509NameBuilder, X509};

use crate::crypto::cose_key_from_pkey;
use crate::interface::{COSEAlgorithm, COSEKey};

pub(crate) fn init() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub(crate) fn ec_pkey(nid: Nid) -> PKey<Private> {
    let group = EcGroup::from_curve_name(nid).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

pub(crate) fn cose_key_of(alg: COSEAlgorithm, key: &PKey<Private>) -> COSEKey {
    cose_key_from_pkey(alg, key).unwrap()
}

pub(crate) fn sign(alg: COSEAlgorithm, pkey: &PKey<Private>, data: &[u8]) -> Vec<u8> {
    match alg.message_digest().unwrap() {
        None => {
            let mut signer = Signer::new_without_digest(pkey).unwrap();
            signer.sign_oneshot_to_vec(data).unwrap()
        }
        Some(md) => {
            let mut signer = Signer::new(md, pkey).unwrap();
            if alg.is_pss() {
                signer.set_rsa_padding(Padding::PKCS1_PSS).unwrap();
                signer
                    .set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)
                    .unwrap();
            }
            signer.update(data).unwrap();
            signer.sign_to_vec().unwrap()
        }
    }
}

/// A minted certificate and the key it certifies.
pub(crate) struct Issued {
    pub cert: X509,
    pub key: PKey<Private>,
}

pub(crate) struct CertSpec<'a> {
    /// Subject entries by short name. May be empty.
    pub subject: Vec<(&'a str, &'a str)>,
    pub key: &'a PKey<Private>,
    /// Self signed when `None`.
    pub issuer: Option<&'a Issued>,
    pub ca: bool,
    pub extensions: Vec<X509Extension>,
}

pub(crate) fn mint(spec: CertSpec<'_>) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    for (field, value) in spec.subject.iter() {
        name.append_entry_by_text(field, value).unwrap();
    }
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(rand::random::<u32>() >> 1)
        .and_then(|bn| bn.to_asn1_integer())
        .unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    match spec.issuer {
        Some(issuer) => builder.set_issuer_name(issuer.cert.subject_name()).unwrap(),
        None => builder.set_issuer_name(&name).unwrap(),
    }
    builder.set_pubkey(spec.key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();

    let constraints = if spec.ca {
        BasicConstraints::new().critical().ca().build().unwrap()
    } else {
        BasicConstraints::new().build().unwrap()
    };
    builder.append_extension(constraints).unwrap();
    for ext in spec.extensions {
        builder.append_extension(ext).unwrap();
    }

    let signing_key = spec.issuer.map(|i| &i.key).unwrap_or(spec.key);
    builder.sign(signing_key, MessageDigest::sha256()).unwrap();
    builder.build()
}

/// A self signed CA.
pub(crate) fn mint_ca(cn: &str) -> Issued {
    let key = ec_pkey(Nid::X9_62_PRIME256V1);
    let cert = mint(CertSpec {
        subject: vec![("CN", cn)],
        key: &key,
        issuer: None,
        ca: true,
        extensions: vec![],
    });
    Issued { cert, key }
}

pub(crate) fn custom_ext(oid: &str, der: &[u8]) -> X509Extension {
    let oid = Asn1Object::from_str(oid).unwrap();
    let value = Asn1OctetString::new_from_bytes(der).unwrap();
    X509Extension::new_from_der(&oid, false, &value).unwrap()
}

pub(crate) fn eku_ext(oid: &str) -> X509Extension {
    ExtendedKeyUsage::new().other(oid).build().unwrap()
}

/// A DER element with a short form length.
pub(crate) fn der_tlv(tag: &[u8], content: &[u8]) -> Vec<u8> {
    assert!(content.len() < 0x80);
    let mut out = tag.to_vec();
    out.push(content.len() as u8);
    out.extend_from_slice(content);
    out
}

pub(crate) fn der_octet_string(content: &[u8]) -> Vec<u8> {
    der_tlv(&[0x04], content)
}

/// SEQUENCE { [1] EXPLICIT OCTET STRING nonce }
pub(crate) fn apple_nonce_der(nonce: &[u8; 32]) -> Vec<u8> {
    der_tlv(&[0x30], &der_tlv(&[0xa1], &der_octet_string(nonce)))
}

/// A KeyDescription for a key generated on device for signing. `tee` selects whether the
/// security levels and key properties are those of a trusted environment or of software.
pub(crate) fn android_key_description_der(challenge: &[u8; 32], tee: bool) -> Vec<u8> {
    let integer = |v: u8| der_tlv(&[0x02], &[v]);
    let enumerated = |v: u8| der_tlv(&[0x0a], &[v]);

    // purpose [1] EXPLICIT SET OF INTEGER { sign }, origin [702] EXPLICIT INTEGER generated
    let mut generated_for_signing = der_tlv(&[0xa1], &der_tlv(&[0x31], &integer(2)));
    generated_for_signing.extend(der_tlv(&[0xbf, 0x85, 0x3e], &integer(0)));
    let populated = der_tlv(&[0x30], &generated_for_signing);
    let empty = der_tlv(&[0x30], &[]);

    let level = u8::from(tee);
    let (software_enforced, tee_enforced) = if tee {
        (empty, populated)
    } else {
        (populated, empty)
    };

    let mut body = integer(3);
    body.extend(enumerated(level));
    body.extend(integer(4));
    body.extend(enumerated(level));
    body.extend(der_octet_string(challenge));
    body.extend(der_octet_string(&[]));
    body.extend(software_enforced);
    body.extend(tee_enforced);
    der_tlv(&[0x30], &body)
}
