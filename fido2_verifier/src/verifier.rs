use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::assertion::{AssertionResponse, AssertionResult, finish_assertion};
use crate::attestation::{
    AttestationFormat, AttestationObject, CredAndCounterData, VerificationContext,
    verify_attestation,
};
use crate::authenticator_data::AuthData;
use crate::client_data::{ClientData, ClientDataType, client_data_hash};
use crate::common::{verify_rp_id_hash, verify_user_present, verify_user_verification};
use crate::config::VerifierConfig;
use crate::credential::{CredentialRecord, CredentialStore};
use crate::errors::VerificationError;
use crate::trust::TrustAnchorProvider;
use crate::utils::base64url_decode;

/// Registration response as posted by the client, binary members base64url encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    /// base64url credential ID
    pub id: String,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    pub attestation_object: String,
}

/// Entry point tying the relying party configuration to its trust anchors.
#[derive(Clone)]
pub struct Verifier {
    config: VerifierConfig,
    trust_anchors: Arc<dyn TrustAnchorProvider>,
}

impl Verifier {
    pub fn new(
        config: VerifierConfig,
        trust_anchors: Arc<dyn TrustAnchorProvider>,
    ) -> Self {
        Self {
            config,
            trust_anchors,
        }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// A verification context pinned to the current time.
    pub fn context(&self) -> VerificationContext<'_> {
        VerificationContext::new(&self.config, self.trust_anchors.as_ref())
    }

    /// Verifies a registration ceremony from raw attestation object and client data bytes.
    pub fn verify_registration(
        &self,
        attestation_object: &[u8],
        client_data_json: &[u8],
    ) -> Result<CredAndCounterData, VerificationError> {
        let client_data = ClientData::from_json(client_data_json)?;
        tracing::debug!("Parsed client data: {:?}", client_data);
        client_data.verify(ClientDataType::Create, &self.config.origin)?;

        let attestation = AttestationObject::from_cbor(attestation_object)?;
        let format = AttestationFormat::resolve(&attestation.fmt)?;

        let auth_data = AuthData::parse(&attestation.auth_data)?;
        verify_rp_id_hash(&auth_data, &self.config.rp_id)?;
        verify_user_present(&auth_data)?;
        verify_user_verification(&auth_data, self.config.user_verification)?;

        tracing::debug!(
            "Verifying '{}' registration for RP ID {}",
            format.as_str(),
            self.config.rp_id
        );
        let record = CredentialRecord::pending(&self.config.rp_id);
        verify_attestation(
            &self.context(),
            &attestation,
            &record,
            &client_data_hash(client_data_json),
        )
    }

    /// Verifies a registration response and persists the new credential.
    pub fn register(
        &self,
        store: &dyn CredentialStore,
        response: &RegistrationResponse,
    ) -> Result<CredentialRecord, VerificationError> {
        let attestation_object = base64url_decode(&response.attestation_object)?;
        let client_data_json = base64url_decode(&response.client_data_json)?;
        let data = self.verify_registration(&attestation_object, &client_data_json)?;

        if data.cred_id != response.id {
            return Err(VerificationError::Verification(format!(
                "Credential ID mismatch: response {}, authenticator data {}",
                response.id, data.cred_id
            )));
        }

        let record = CredentialRecord::from_attestation(&self.config.rp_id, &data);
        store.store_credential(record.clone())?;
        tracing::info!(
            "Registered credential {} with '{}' attestation",
            record.credential_id,
            record.attestation_type
        );
        Ok(record)
    }

    /// Verifies an assertion for a stored credential and persists the new counter.
    pub fn verify_assertion(
        &self,
        store: &dyn CredentialStore,
        response: &AssertionResponse,
    ) -> Result<AssertionResult, VerificationError> {
        finish_assertion(&self.config, store, response)
    }
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
