use serde::{Deserialize, Serialize};

use crate::authenticator_data::{AuthData, auth_data_flags};
use crate::client_data::{ClientData, ClientDataType, client_data_hash};
use crate::common::{
    verify_assertion_signature, verify_counter, verify_rp_id_hash, verify_user_present,
    verify_user_verification,
};
use crate::config::VerifierConfig;
use crate::cose::{CoseAlgorithm, CoseKey};
use crate::credential::{CredentialRecord, CredentialStore};
use crate::errors::VerificationError;
use crate::utils::{base64url_decode, sha256};

/// Authentication response as posted by the client, binary members base64url encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResponse {
    /// base64url credential ID
    pub id: String,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    /// Absent for legacy U2F responses, whose `signature` carries the signatureData
    #[serde(default)]
    pub authenticator_data: Option<String>,
    pub signature: String,
    #[serde(default)]
    pub user_handle: Option<String>,
}

/// Outcome of a verified assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssertionResult {
    pub credential_id: String,
    /// The counter presented by the authenticator, to be persisted
    pub counter: u32,
    pub user_verified: bool,
}

/// The closed set of assertion formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionFormat {
    /// WebAuthn assertion over `authenticatorData || clientDataHash`
    Fido2,
    /// Raw FIDO U2F authentication response
    FidoU2f,
}

impl AssertionFormat {
    /// Looks up a format identifier. Hyphens and underscores are interchangeable.
    pub fn resolve(format_id: &str) -> Result<Self, VerificationError> {
        match format_id.replace('-', "_").as_str() {
            "fido2" => Ok(AssertionFormat::Fido2),
            "fido_u2f" => Ok(AssertionFormat::FidoU2f),
            _ => {
                tracing::warn!("Unsupported assertion format: {}", format_id);
                Err(VerificationError::UnsupportedFormat(format_id.to_string()))
            }
        }
    }

    /// WebAuthn responses carry authenticator data; U2F responses do not.
    pub fn detect(response: &AssertionResponse) -> Self {
        if response.authenticator_data.is_some() {
            AssertionFormat::Fido2
        } else {
            AssertionFormat::FidoU2f
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssertionFormat::Fido2 => "fido2",
            AssertionFormat::FidoU2f => "fido-u2f",
        }
    }

    /// Verifies `response` against a stored credential without touching storage.
    pub fn verify(
        self,
        config: &VerifierConfig,
        response: &AssertionResponse,
        record: &CredentialRecord,
    ) -> Result<AssertionResult, VerificationError> {
        tracing::debug!(
            "Verifying '{}' assertion for credential {}",
            self.as_str(),
            record.credential_id
        );

        let raw_client_data = base64url_decode(&response.client_data_json)?;
        let client_data_hash = client_data_hash(&raw_client_data);
        let signature = base64url_decode(&response.signature)?;
        let cose_key = CoseKey::from_base64(&record.public_key)?;

        let (auth_data, signature, algorithm) = match self {
            AssertionFormat::Fido2 => {
                let encoded = response.authenticator_data.as_deref().ok_or_else(|| {
                    VerificationError::Verification(
                        "Missing authenticator data in assertion".to_string(),
                    )
                })?;
                let auth_data = AuthData::from_base64(encoded)?;
                verify_client_data(config, &raw_client_data)?;
                (auth_data, signature, cose_key.algorithm()?)
            }
            AssertionFormat::FidoU2f => {
                let (auth_data, signature) = split_u2f_signature_data(record, &signature)?;
                (auth_data, signature, CoseAlgorithm::ES256)
            }
        };

        if let Some(stored) = record.signature_algorithm {
            if stored != cose_key.alg {
                tracing::debug!(
                    "Stored attestation algorithm {} differs from credential key algorithm {}",
                    stored,
                    cose_key.alg
                );
            }
        }

        verify_rp_id_hash(&auth_data, &record.rp_id)?;
        verify_user_present(&auth_data)?;
        verify_user_verification(&auth_data, config.user_verification)?;

        verify_assertion_signature(&auth_data, &client_data_hash, &signature, &cose_key, algorithm)
            .inspect_err(|_| {
                tracing::error!(
                    "Assertion signature verification failed for credential {}",
                    record.credential_id
                );
            })?;

        verify_counter(record.counter, auth_data.counter)?;

        Ok(AssertionResult {
            credential_id: record.credential_id.clone(),
            counter: auth_data.counter,
            user_verified: auth_data.is_user_verified(),
        })
    }
}

/// Client data of a WebAuthn assertion must be a `webauthn.get` ceremony for our origin.
fn verify_client_data(config: &VerifierConfig, raw: &[u8]) -> Result<(), VerificationError> {
    let client_data = ClientData::from_json(raw)?;
    tracing::debug!("Parsed client data: {:?}", client_data);
    client_data.verify(ClientDataType::Get, &config.origin)
}

/// Splits U2F signatureData, `userPresence(1) || counter(4) || signature`,
/// into an equivalent assertion authenticator data and the DER signature.
fn split_u2f_signature_data(
    record: &CredentialRecord,
    signature_data: &[u8],
) -> Result<(AuthData, Vec<u8>), VerificationError> {
    if signature_data.len() < 6 {
        return Err(VerificationError::Verification(
            "U2F signature data too short".to_string(),
        ));
    }
    let (prefix, signature) = signature_data.split_at(5);
    if prefix[0] & !auth_data_flags::UP != 0 {
        tracing::debug!("Ignoring reserved U2F user presence bits: {:#04x}", prefix[0]);
    }

    let mut raw = sha256(record.rp_id.as_bytes()).to_vec();
    raw.extend_from_slice(prefix);
    Ok((AuthData::parse_assertion(&raw)?, signature.to_vec()))
}

/// Verifies an assertion for a stored credential and persists the new counter.
///
/// The counter is written back with a compare-and-swap against the value read,
/// so of two concurrent assertions carrying the same counter only one succeeds.
pub fn finish_assertion(
    config: &VerifierConfig,
    store: &dyn CredentialStore,
    response: &AssertionResponse,
) -> Result<AssertionResult, VerificationError> {
    let record = store.get_credential(&response.id)?.ok_or_else(|| {
        tracing::error!("Credential not found: {}", response.id);
        VerificationError::Verification("Credential not found".to_string())
    })?;

    let format = AssertionFormat::detect(response);
    let result = format.verify(config, response, &record)?;

    store.update_counter(&record.credential_id, record.counter, result.counter)?;
    tracing::info!(
        "Assertion verified for credential {} (counter {})",
        result.credential_id,
        result.counter
    );
    Ok(result)
}
