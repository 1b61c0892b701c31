//! Fixed sizes, flag bits and defaults.

use std::time::Duration;

/// The size of challenges issued to clients.
pub const CHALLENGE_SIZE_BYTES: usize = 32;
/// The default time a client is given to complete a ceremony, in milliseconds.
pub const DEFAULT_AUTHENTICATOR_TIMEOUT: u32 = 60_000;
/// How long an issued challenge remains consumable.
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(300);
/// The oldest SafetyNet response we accept.
pub const DEFAULT_SAFETYNET_MAX_AGE: Duration = Duration::from_secs(60);
/// Tolerated clock skew for SafetyNet timestamps from the future.
pub const SAFETYNET_CLOCK_SKEW: Duration = Duration::from_secs(60);

pub(crate) const RP_ID_HASH_LEN: usize = 32;
pub(crate) const AUTHENTICATOR_DATA_HEADER_LEN: usize = RP_ID_HASH_LEN + 1 + 4;
pub(crate) const AAGUID_LEN: usize = 16;

pub(crate) const FLAG_USER_PRESENT: u8 = 1 << 0;
pub(crate) const FLAG_USER_VERIFIED: u8 = 1 << 2;
pub(crate) const FLAG_BACKUP_ELIGIBLE: u8 = 1 << 3;
pub(crate) const FLAG_BACKUP_STATE: u8 = 1 << 4;
pub(crate) const FLAG_ATTESTED_CREDENTIAL_DATA: u8 = 1 << 6;
pub(crate) const FLAG_EXTENSION_DATA: u8 = 1 << 7;

/// Default nesting limit for CBOR input.
pub const DEFAULT_CBOR_MAX_DEPTH: usize = 16;
/// Default limit on elements in a single CBOR array or map.
pub const DEFAULT_CBOR_MAX_ITEMS: usize = 1024;

pub(crate) const CLIENT_DATA_TYPE_CREATE: &str = "webauthn.create";
pub(crate) const CLIENT_DATA_TYPE_GET: &str = "webauthn.get";

pub(crate) const SAFETYNET_HOSTNAME: &str = "attest.android.com";
