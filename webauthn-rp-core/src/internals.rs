//! Decoding of the binary structures produced by authenticators: authenticator data, attested
//! credential data and attestation objects. No semantic checks happen here beyond what is needed
//! to frame the input exactly.

use std::collections::BTreeMap;

use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u32, be_u8};
use serde_cbor_2::Value;

use crate::attestation::AttestationFormat;
use crate::cbor::{self, DecodeLimits};
use crate::constants::*;
use crate::error::{WebauthnError, WebauthnResult};
use crate::interface::*;
use crate::proto::CollectedClientData;

/// Run one nom parser over `i`, mapping any failure to a truncation of `name` at the current
/// offset into `whole`.
fn field<'a, O>(
    i: &'a [u8],
    whole: &[u8],
    name: &'static str,
    mut parser: impl FnMut(&'a [u8]) -> nom::IResult<&'a [u8], O>,
) -> WebauthnResult<(&'a [u8], O)> {
    parser(i).map_err(|_| WebauthnError::AuthenticatorDataTruncated {
        field: name,
        offset: whole.len() - i.len(),
    })
}

/// Shift the offset of an error raised while decoding a sub slice that begins at `base`.
fn rebase(e: WebauthnError, base: usize) -> WebauthnError {
    match e {
        WebauthnError::CborTruncated { offset } => WebauthnError::CborTruncated {
            offset: offset + base,
        },
        WebauthnError::CborLimitExceeded { offset, limit } => WebauthnError::CborLimitExceeded {
            offset: offset + base,
            limit,
        },
        WebauthnError::CborTrailingBytes { offset } => WebauthnError::CborTrailingBytes {
            offset: offset + base,
        },
        WebauthnError::CborUnsupported { offset, reason } => WebauthnError::CborUnsupported {
            offset: offset + base,
            reason,
        },
        WebauthnError::CborNonCanonical { offset } => WebauthnError::CborNonCanonical {
            offset: offset + base,
        },
        WebauthnError::CborDuplicateKey { offset } => WebauthnError::CborDuplicateKey {
            offset: offset + base,
        },
        WebauthnError::CborInvalidUtf8 { offset } => WebauthnError::CborInvalidUtf8 {
            offset: offset + base,
        },
        e => e,
    }
}

/// Decode authenticator data. The buffer must be consumed exactly.
///
/// ```text
/// rpIdHash[32] | flags[1] | signCount[4] | (aaguid[16] | credIdLen[2] | credId | COSEKey) | ext
/// ```
pub fn decode_authenticator_data(
    data: &[u8],
    limits: DecodeLimits,
) -> WebauthnResult<AuthenticatorData> {
    let (i, rp_id_hash) = field(data, data, "rp id hash", take(RP_ID_HASH_LEN))?;
    let (i, flags) = field(i, data, "flags", be_u8)?;
    let (i, counter) = field(i, data, "sign count", be_u32)?;

    let mut rp_id_hash_arr = [0; RP_ID_HASH_LEN];
    rp_id_hash_arr.copy_from_slice(rp_id_hash);

    let has_acd = flags & FLAG_ATTESTED_CREDENTIAL_DATA != 0;
    let has_extensions = flags & FLAG_EXTENSION_DATA != 0;

    trace!(flags, counter, has_acd, has_extensions);

    let (i, acd) = if has_acd {
        if i.is_empty() {
            debug!("attested credential data flag set with no data");
            return Err(WebauthnError::AuthenticatorDataFlagMismatch {
                field: "attested credential data",
            });
        }

        let (i, aaguid) = field(i, data, "aaguid", take(AAGUID_LEN))?;
        let (i, cred_id_len) = field(i, data, "credential id length", be_u16)?;
        let (i, cred_id) = field(i, data, "credential id", take(cred_id_len as usize))?;

        let base = data.len() - i.len();
        let (pk_value, used) = cbor::decode_prefix(i, limits).map_err(|e| rebase(e, base))?;
        let credential_pk = COSEKey::try_from(&pk_value)?;

        let mut aaguid_arr = [0; AAGUID_LEN];
        aaguid_arr.copy_from_slice(aaguid);

        (
            &i[used..],
            Some(AttestedCredentialData {
                aaguid: aaguid_arr,
                credential_id: cred_id.to_vec().into(),
                credential_pk,
            }),
        )
    } else {
        (i, None)
    };

    let (i, extensions) = if has_extensions {
        if i.is_empty() {
            debug!("extension data flag set with no data");
            return Err(WebauthnError::AuthenticatorDataFlagMismatch {
                field: "extension data",
            });
        }
        let base = data.len() - i.len();
        let (ext, used) = cbor::decode_prefix(i, limits).map_err(|e| rebase(e, base))?;
        if !matches!(ext, Value::Map(_)) {
            return Err(WebauthnError::AuthenticatorDataFlagMismatch {
                field: "extension data",
            });
        }
        (&i[used..], Some(ext))
    } else {
        (i, None)
    };

    if !i.is_empty() {
        debug!(remaining = i.len(), "authenticator data has trailing bytes");
        return Err(WebauthnError::AuthenticatorDataTrailingBytes {
            offset: data.len() - i.len(),
        });
    }

    Ok(AuthenticatorData {
        rp_id_hash: rp_id_hash_arr,
        counter,
        user_present: flags & FLAG_USER_PRESENT != 0,
        user_verified: flags & FLAG_USER_VERIFIED != 0,
        backup_eligible: flags & FLAG_BACKUP_ELIGIBLE != 0,
        backup_state: flags & FLAG_BACKUP_STATE != 0,
        acd,
        extensions,
    })
}

impl AuthenticatorData {
    /// The flags byte these fields encode to.
    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.user_present {
            flags |= FLAG_USER_PRESENT;
        }
        if self.user_verified {
            flags |= FLAG_USER_VERIFIED;
        }
        if self.backup_eligible {
            flags |= FLAG_BACKUP_ELIGIBLE;
        }
        if self.backup_state {
            flags |= FLAG_BACKUP_STATE;
        }
        if self.acd.is_some() {
            flags |= FLAG_ATTESTED_CREDENTIAL_DATA;
        }
        if self.extensions.is_some() {
            flags |= FLAG_EXTENSION_DATA;
        }
        flags
    }

    /// Encode to the authenticator wire layout.
    pub fn to_bytes(&self) -> WebauthnResult<Vec<u8>> {
        let mut out = Vec::with_capacity(AUTHENTICATOR_DATA_HEADER_LEN);
        out.extend_from_slice(&self.rp_id_hash);
        out.push(self.flags());
        out.extend_from_slice(&self.counter.to_be_bytes());

        if let Some(acd) = &self.acd {
            let cred_id_len = u16::try_from(acd.credential_id.0.len())
                .map_err(|_| WebauthnError::AttestationObjectInvalid("credential id too long"))?;
            out.extend_from_slice(&acd.aaguid);
            out.extend_from_slice(&cred_id_len.to_be_bytes());
            out.extend_from_slice(&acd.credential_id.0);
            out.extend(acd.credential_pk.to_cbor_bytes()?);
        }

        if let Some(ext) = &self.extensions {
            let ext = serde_cbor_2::to_vec(ext)
                .map_err(|_| WebauthnError::AttestationObjectInvalid("extensions"))?;
            out.extend(ext);
        }

        Ok(out)
    }
}

/// Decode an attestation object, `{ fmt, authData, attStmt }`.
pub fn decode_attestation_object(
    data: &[u8],
    limits: DecodeLimits,
) -> WebauthnResult<AttestationObject> {
    let mut map = match cbor::decode(data, limits)? {
        Value::Map(m) => m,
        _ => return Err(WebauthnError::AttestationObjectInvalid("not a map")),
    };

    let fmt = match map.remove(&Value::Text("fmt".to_string())) {
        Some(Value::Text(fmt)) => fmt,
        _ => return Err(WebauthnError::AttestationObjectInvalid("fmt")),
    };

    let auth_data_bytes = match map.remove(&Value::Text("authData".to_string())) {
        Some(Value::Bytes(b)) => b,
        _ => return Err(WebauthnError::AttestationObjectInvalid("authData")),
    };

    let att_stmt = match map.remove(&Value::Text("attStmt".to_string())) {
        Some(v @ Value::Map(_)) => v,
        _ => return Err(WebauthnError::AttestationObjectInvalid("attStmt")),
    };

    let format = AttestationFormat::try_from(fmt.as_str()).map_err(|e| {
        debug!(%fmt, "unsupported attestation format");
        e
    })?;

    let auth_data = decode_authenticator_data(&auth_data_bytes, limits)?;

    Ok(AttestationObject {
        format,
        auth_data,
        auth_data_bytes,
        att_stmt,
    })
}

/// Encode an attestation object from its parts.
pub fn encode_attestation_object(
    fmt: &str,
    auth_data_bytes: &[u8],
    att_stmt: BTreeMap<Value, Value>,
) -> WebauthnResult<Vec<u8>> {
    let mut map = BTreeMap::new();
    map.insert(Value::Text("fmt".to_string()), Value::Text(fmt.to_string()));
    map.insert(
        Value::Text("authData".to_string()),
        Value::Bytes(auth_data_bytes.to_vec()),
    );
    map.insert(Value::Text("attStmt".to_string()), Value::Map(att_stmt));
    serde_cbor_2::to_vec(&Value::Map(map))
        .map_err(|_| WebauthnError::AttestationObjectInvalid("encode"))
}

/// Parse clientDataJSON.
pub fn decode_client_data(data: &[u8]) -> WebauthnResult<CollectedClientData> {
    serde_json::from_slice(data).map_err(WebauthnError::ParseJSONFailure)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use super::*;
    use crate::error::{DecodeErrorKind, ErrorKind};
    use hex_literal::hex;

    fn p256_key() -> COSEKey {
        COSEKey {
            type_: COSEAlgorithm::ES256,
            key: COSEKeyType::EC_EC2(COSEEC2Key {
                curve: ECDSACurve::SECP256R1,
                x: hex!("65eda5a12577c2bae829437fe338701a10aaa375e1bb5b5de108de439c08551d")
                    .to_vec()
                    .into(),
                y: hex!("1e52ed75701163f7f9e40ddf9f341b3dc9ba860af7e0ca7ca7e9eecd0084d19c")
                    .to_vec()
                    .into(),
            }),
        }
    }

    fn sample(acd: bool, ext: bool) -> AuthenticatorData {
        AuthenticatorData {
            rp_id_hash: [7; 32],
            counter: 0x0102_0304,
            user_present: true,
            user_verified: false,
            backup_eligible: false,
            backup_state: false,
            acd: acd.then(|| AttestedCredentialData {
                aaguid: [0xaa; 16],
                credential_id: vec![1, 2, 3, 4].into(),
                credential_pk: p256_key(),
            }),
            extensions: ext.then(|| {
                let mut m = BTreeMap::new();
                m.insert(Value::Text("credProtect".to_string()), Value::Integer(2));
                Value::Map(m)
            }),
        }
    }

    #[test]
    fn header_only() {
        let mut raw = vec![0x11; 32];
        raw.push(0x05);
        raw.extend_from_slice(&hex!("00 00 00 2a"));

        let ad = decode_authenticator_data(&raw, DecodeLimits::default()).unwrap();
        assert_eq!(ad.rp_id_hash, [0x11; 32]);
        assert!(ad.user_present);
        assert!(ad.user_verified);
        assert!(!ad.backup_eligible);
        assert_eq!(ad.counter, 42);
        assert!(ad.acd.is_none());
        assert!(ad.extensions.is_none());
    }

    #[test]
    fn encode_then_decode_every_flag_combination() {
        for bits in 0u8..64 {
            let mut ad = sample(bits & 0x10 != 0, bits & 0x20 != 0);
            ad.user_present = bits & 0x01 != 0;
            ad.user_verified = bits & 0x02 != 0;
            ad.backup_eligible = bits & 0x04 != 0;
            ad.backup_state = bits & 0x08 != 0;

            let raw = ad.to_bytes().unwrap();
            let back = decode_authenticator_data(&raw, DecodeLimits::default()).unwrap();
            assert_eq!(back, ad, "flag bits {:#04x}", bits);
        }
    }

    #[test]
    fn attested_flag_without_data() {
        let mut raw = sample(false, false).to_bytes().unwrap();
        raw[32] |= FLAG_ATTESTED_CREDENTIAL_DATA;

        let e = decode_authenticator_data(&raw, DecodeLimits::default()).unwrap_err();
        assert!(matches!(
            e,
            WebauthnError::AuthenticatorDataFlagMismatch {
                field: "attested credential data"
            }
        ));
        assert_eq!(e.kind(), ErrorKind::Decode(DecodeErrorKind::SchemaViolation));
    }

    #[test]
    fn truncated_credential_block() {
        let raw = sample(true, false).to_bytes().unwrap();

        // Cut inside the credential id.
        let e = decode_authenticator_data(&raw[..37 + 16 + 2 + 2], DecodeLimits::default())
            .unwrap_err();
        assert!(matches!(
            e,
            WebauthnError::AuthenticatorDataTruncated {
                field: "credential id",
                offset: 55
            }
        ));

        // Cut inside the public key.
        let e = decode_authenticator_data(&raw[..raw.len() - 1], DecodeLimits::default())
            .unwrap_err();
        assert_eq!(
            e.kind(),
            ErrorKind::Decode(DecodeErrorKind::TruncatedOrOversized)
        );

        // Header too short.
        assert!(matches!(
            decode_authenticator_data(&raw[..36], DecodeLimits::default()),
            Err(WebauthnError::AuthenticatorDataTruncated {
                field: "sign count",
                offset: 33
            })
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut raw = sample(true, false).to_bytes().unwrap();
        let len = raw.len();
        raw.push(0);
        assert!(matches!(
            decode_authenticator_data(&raw, DecodeLimits::default()),
            Err(WebauthnError::AuthenticatorDataTrailingBytes { offset }) if offset == len
        ));

        // Extensions present without the flag.
        let mut raw = sample(false, true).to_bytes().unwrap();
        raw[32] &= !FLAG_EXTENSION_DATA;
        assert!(matches!(
            decode_authenticator_data(&raw, DecodeLimits::default()),
            Err(WebauthnError::AuthenticatorDataTrailingBytes { offset: 37 })
        ));
    }

    #[test]
    fn cose_errors_are_rebased() {
        let mut raw = sample(false, false).to_bytes().unwrap();
        raw[32] |= FLAG_EXTENSION_DATA;
        // An indefinite length map.
        raw.extend_from_slice(&hex!("bf ff"));
        assert!(matches!(
            decode_authenticator_data(&raw, DecodeLimits::default()),
            Err(WebauthnError::CborUnsupported { offset: 37, .. })
        ));
    }

    #[test]
    fn attestation_object_shape() {
        let ad = sample(true, false).to_bytes().unwrap();
        let raw = encode_attestation_object("none", &ad, BTreeMap::new()).unwrap();
        let ao = decode_attestation_object(&raw, DecodeLimits::default()).unwrap();
        assert_eq!(ao.format, AttestationFormat::None);
        assert_eq!(ao.auth_data_bytes, ad);
        assert!(ao.auth_data.acd.is_some());

        let raw = encode_attestation_object("ecdaa", &ad, BTreeMap::new()).unwrap();
        assert_eq!(
            decode_attestation_object(&raw, DecodeLimits::default())
                .unwrap_err()
                .kind(),
            ErrorKind::UnsupportedAlgorithm
        );

        let mut m = BTreeMap::new();
        m.insert(Value::Text("fmt".to_string()), Value::Text("none".to_string()));
        let raw = serde_cbor_2::to_vec(&Value::Map(m)).unwrap();
        assert!(matches!(
            decode_attestation_object(&raw, DecodeLimits::default()),
            Err(WebauthnError::AttestationObjectInvalid("authData"))
        ));
    }
}
