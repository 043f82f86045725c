use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use ring::digest;
use thiserror::Error;

pub(crate) fn base64url_decode(input: &str) -> Result<Vec<u8>, UtilError> {
    let decoded = URL_SAFE_NO_PAD
        .decode(input.trim_end_matches('='))
        .map_err(|_| UtilError::Format("Failed to decode base64url".to_string()))?;
    Ok(decoded)
}

pub(crate) fn base64url_encode(input: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

/// Decodes standard (padded) base64, as used by JWS `x5c` headers and SafetyNet nonces.
pub(crate) fn base64_decode(input: &str) -> Result<Vec<u8>, UtilError> {
    STANDARD
        .decode(input)
        .map_err(|_| UtilError::Format("Failed to decode base64".to_string()))
}

pub(crate) fn sha256(data: &[u8]) -> [u8; 32] {
    let hash = digest::digest(&digest::SHA256, data);
    let mut out = [0u8; 32];
    out.copy_from_slice(hash.as_ref());
    out
}

/// Concatenates the authenticator data with the client data hash.
///
/// This is the byte sequence signed by packed, android-key and android-safetynet
/// attestations and by every WebAuthn assertion.
pub(crate) fn concat_signed_data(auth_data: &[u8], client_data_hash: &[u8]) -> Vec<u8> {
    let mut signed_data = Vec::with_capacity(auth_data.len() + client_data_hash.len());
    signed_data.extend_from_slice(auth_data);
    signed_data.extend_from_slice(client_data_hash);
    signed_data
}

#[derive(Debug, Error, Clone)]
pub enum UtilError {
    #[error("Invalid format: {0}")]
    Format(String),
}
