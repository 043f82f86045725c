//! Verification primitives shared by the attestation and assertion processors.

use ring::digest;
use subtle::ConstantTimeEq;

use crate::authenticator_data::AuthData;
use crate::config::UserVerificationPolicy;
use crate::cose::{CoseAlgorithm, CoseKey, KeyType};
use crate::errors::VerificationError;
use crate::utils::{concat_signed_data, sha256};

/// Resolves a COSE algorithm identifier and checks it fits the key type.
pub fn verify_algorithm(alg: i64, key_type: KeyType) -> Result<CoseAlgorithm, VerificationError> {
    let algorithm = CoseAlgorithm::from_id(alg)?;
    if algorithm.key_type() != key_type {
        return Err(VerificationError::Verification(format!(
            "Algorithm {alg} is not compatible with key type {key_type:?}"
        )));
    }
    Ok(algorithm)
}

pub fn verify_user_present(auth_data: &AuthData) -> Result<(), VerificationError> {
    if !auth_data.is_user_present() {
        return Err(VerificationError::Verification(
            "User not present".to_string(),
        ));
    }
    Ok(())
}

pub fn verify_user_verified(auth_data: &AuthData) -> Result<(), VerificationError> {
    if !auth_data.is_user_verified() {
        return Err(VerificationError::Verification(
            "User verification required but flag not set".to_string(),
        ));
    }
    Ok(())
}

/// Applies the relying party's user-verification policy to the UV flag.
pub fn verify_user_verification(
    auth_data: &AuthData,
    policy: UserVerificationPolicy,
) -> Result<(), VerificationError> {
    match policy {
        UserVerificationPolicy::Required => verify_user_verified(auth_data),
        UserVerificationPolicy::Preferred | UserVerificationPolicy::Discouraged => {
            if !auth_data.is_user_verified() {
                tracing::debug!(
                    "User verification flag not set (policy: {})",
                    policy.as_str()
                );
            }
            Ok(())
        }
    }
}

pub fn verify_aaguid_zeroed(auth_data: &AuthData) -> Result<(), VerificationError> {
    let aaguid = auth_data.aaguid_bytes()?;
    if aaguid.iter().any(|b| *b != 0) {
        return Err(VerificationError::Verification(
            "AAGUID must be zeroed for fido-u2f attestation".to_string(),
        ));
    }
    Ok(())
}

/// SHA-256 of the RP ID must equal the rpIdHash of the authenticator data.
pub fn verify_rp_id_hash(auth_data: &AuthData, rp_id: &str) -> Result<(), VerificationError> {
    let expected = sha256(rp_id.as_bytes());
    if !bool::from(auth_data.rp_id_hash[..].ct_eq(&expected[..])) {
        return Err(VerificationError::Verification(
            "RP ID hash mismatch".to_string(),
        ));
    }
    Ok(())
}

/// Signature counter check.
///
/// A zero counter is accepted only while the stored counter is still zero
/// (authenticators without a counter). Otherwise the presented counter must be
/// strictly greater than the stored one.
pub fn verify_counter(stored: Option<u32>, presented: u32) -> Result<(), VerificationError> {
    let stored = stored.unwrap_or(0);
    if presented == 0 && stored == 0 {
        return Ok(());
    }
    if presented <= stored {
        tracing::warn!(
            "Counter did not increase: stored {}, presented {}",
            stored,
            presented
        );
        return Err(VerificationError::Verification(format!(
            "Counter did not increase (stored {stored}, presented {presented}), possible cloned authenticator"
        )));
    }
    Ok(())
}

pub fn verify_signature(
    data: &[u8],
    signature: &[u8],
    public_key: &CoseKey,
    alg: CoseAlgorithm,
) -> Result<(), VerificationError> {
    public_key.verify(alg, data, signature)
}

/// Signature over `authenticatorData || clientDataHash` (packed, android-key).
pub fn verify_packed_signature(
    auth_data: &AuthData,
    client_data_hash: &[u8],
    signature: &[u8],
    public_key: &CoseKey,
    alg: CoseAlgorithm,
) -> Result<(), VerificationError> {
    let signed_data = concat_signed_data(auth_data.attestation_buffer(), client_data_hash);
    verify_signature(&signed_data, signature, public_key, alg)
}

/// Builds the FIDO U2F registration signature base:
/// `0x00 || rpIdHash || clientDataHash || credentialId || publicKeyU2F`.
pub fn u2f_verification_data(
    auth_data: &AuthData,
    client_data_hash: &[u8],
    public_key_u2f: &[u8],
) -> Result<Vec<u8>, VerificationError> {
    let credential_id = auth_data.credential_id_bytes()?;
    let mut data = Vec::with_capacity(1 + 32 + client_data_hash.len() + credential_id.len() + 65);
    data.push(0x00);
    data.extend_from_slice(&auth_data.rp_id_hash);
    data.extend_from_slice(client_data_hash);
    data.extend_from_slice(credential_id);
    data.extend_from_slice(public_key_u2f);
    Ok(data)
}

/// Assertion signature over `rpIdHash || flags || counter || clientDataHash`.
///
/// Extension bytes following the header are not part of the signed data.
pub fn verify_assertion_signature(
    auth_data: &AuthData,
    client_data_hash: &[u8],
    signature: &[u8],
    public_key: &CoseKey,
    alg: CoseAlgorithm,
) -> Result<(), VerificationError> {
    let signed_data = concat_signed_data(auth_data.signed_header(), client_data_hash);
    verify_signature(&signed_data, signature, public_key, alg)
}

/// Maps a COSE algorithm identifier to its hash function.
pub fn get_digest(alg: i64) -> Result<&'static digest::Algorithm, VerificationError> {
    CoseAlgorithm::from_id(alg)?.digest()
}

pub fn verify_tpm_version(ver: &str) -> Result<(), VerificationError> {
    if ver != "2.0" {
        return Err(VerificationError::Verification(format!(
            "Unsupported TPM version: {ver}"
        )));
    }
    Ok(())
}
