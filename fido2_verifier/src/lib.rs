//! fido2-verifier - FIDO2/WebAuthn attestation and assertion verification
//!
//! This crate verifies the attestation statements an authenticator returns at
//! registration (`none`, `packed`, `tpm`, `android-key`, `android-safetynet`,
//! `fido-u2f`) and the assertions it produces at authentication, including
//! signature counter tracking through a pluggable credential store.

mod assertion;
mod attestation;
mod authenticator_data;
mod certificate;
mod client_data;
mod common;
mod config;
mod cose;
mod credential;
mod errors;
mod trust;
mod utils;
mod verifier;

#[cfg(test)]
mod test_utils;

pub use assertion::{AssertionFormat, AssertionResponse, AssertionResult, finish_assertion};
pub use attestation::{
    AttestationFormat, AttestationObject, AttestationStatement, CredAndCounterData,
    VerificationContext, verify_attestation,
};
pub use authenticator_data::{AuthData, auth_data_flags};
pub use certificate::{
    certificate_aaguid, certificate_key_matches, is_self_signed, select_root_certificates,
    verify_attestation_certificates, verify_issued_by, verify_with_certificate,
};
pub use client_data::{ClientData, ClientDataType, client_data_hash};
pub use common::{
    get_digest, u2f_verification_data, verify_aaguid_zeroed, verify_algorithm,
    verify_assertion_signature, verify_counter, verify_packed_signature, verify_rp_id_hash,
    verify_signature, verify_tpm_version, verify_user_present, verify_user_verification,
    verify_user_verified,
};
pub use config::{UserVerificationPolicy, VerifierConfig};
pub use cose::{CoseAlgorithm, CoseKey, CosePublicKey, KeyType};
pub use credential::{CredentialRecord, CredentialStore, MemoryCredentialStore};
pub use errors::VerificationError;
pub use trust::{StaticTrustAnchors, TrustAnchorProvider};
pub use verifier::{RegistrationResponse, Verifier};
