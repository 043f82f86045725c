use thiserror::Error;

use crate::utils::UtilError;

/// Errors that can occur while verifying FIDO2 attestation and assertion responses.
///
/// Every failed check surfaces as [`VerificationError::Verification`] with a
/// reason naming the failing site. Callers must reject the registration or
/// assertion outright on any error.
#[derive(Debug, Error)]
pub enum VerificationError {
    /// Error related to verifier configuration (e.g., empty RP ID or invalid origin)
    #[error("Configuration error: {0}")]
    Config(String),

    /// An attestation or assertion check did not pass
    #[error("Verification error: {0}")]
    Verification(String),

    /// The format identifier is not one of the supported attestation/assertion formats
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Error reading or updating a stored credential record
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<UtilError> for VerificationError {
    fn from(err: UtilError) -> Self {
        // Decode failures of any kind are verification failures
        VerificationError::Verification(err.to_string())
    }
}
