//! Webauthn Relying Party Verification Core
//!
//! Webauthn is a standard allowing communication between servers, browsers and authenticators
//! to allow strong, passwordless, cryptographic authentication to be performed.
//!
//! This crate is the relying party side of that exchange. It turns the untrusted bytes a browser
//! returns into either a validated credential, or a rejection carrying the precise reason. It
//! decodes the CBOR attestation object and authenticator data, verifies every common attestation
//! statement format, traces attestation certificates to configured trust anchors, enforces single
//! use challenges and checks sign counters.
//!
//! Start with [WebauthnBuilder] to configure a [WebauthnCore]. Challenge and credential storage
//! are behind the [challenge::ChallengeStore] and [credential::CredentialStore] traits, with
//! in-memory implementations provided.

#![deny(warnings)]
#![warn(unused_extern_crates)]
#![warn(missing_docs)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

#[macro_use]
extern crate tracing;

#[macro_use]
mod macros;

pub mod constants;

pub mod attestation;
pub mod cbor;
mod crypto;
mod tpm;

pub mod challenge;
pub mod core;
pub mod credential;
pub mod error;
pub mod trust;

pub mod interface;
pub mod internals;
pub mod proto;

#[cfg(test)]
mod test_utils;

pub use attestation::AttestationFormat;
pub use crypto::compute_sha256;

pub use crate::core::*;
