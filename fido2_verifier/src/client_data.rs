use serde::Deserialize;

use crate::errors::VerificationError;
use crate::utils::sha256;

/// Expected value of the `type` member of `clientDataJSON`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientDataType {
    Create,
    Get,
}

impl ClientDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientDataType::Create => "webauthn.create",
            ClientDataType::Get => "webauthn.get",
        }
    }
}

/// The subset of `clientDataJSON` the verifier inspects.
///
/// Challenge comparison belongs to the session layer; the decoded challenge is
/// exposed for it.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientData {
    #[serde(rename = "type")]
    pub type_: String,
    pub challenge: String,
    pub origin: String,
    #[serde(rename = "crossOrigin", default)]
    pub cross_origin: Option<bool>,
}

impl ClientData {
    pub fn from_json(raw: &[u8]) -> Result<Self, VerificationError> {
        serde_json::from_slice(raw).map_err(|e| {
            VerificationError::Verification(format!("Failed to parse client data JSON: {e}"))
        })
    }

    /// Checks the ceremony type and the origin the browser reported.
    pub fn verify(&self, expected: ClientDataType, origin: &str) -> Result<(), VerificationError> {
        if self.type_ != expected.as_str() {
            return Err(VerificationError::Verification(format!(
                "Invalid client data type: expected {}, got {}",
                expected.as_str(),
                self.type_
            )));
        }

        if self.origin != origin {
            return Err(VerificationError::Verification(format!(
                "Invalid origin. Expected: {}, Got: {}",
                origin, self.origin
            )));
        }

        if self.cross_origin == Some(true) {
            return Err(VerificationError::Verification(
                "Cross-origin client data is not accepted".to_string(),
            ));
        }

        Ok(())
    }
}

/// SHA-256 over the raw `clientDataJSON` bytes.
pub fn client_data_hash(raw: &[u8]) -> [u8; 32] {
    sha256(raw)
}
