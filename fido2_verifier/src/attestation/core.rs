use chrono::{DateTime, Utc};

use crate::authenticator_data::AuthData;
use crate::config::VerifierConfig;
use crate::credential::CredentialRecord;
use crate::errors::VerificationError;
use crate::trust::TrustAnchorProvider;

use super::android_key::verify_android_key_attestation;
use super::none::verify_none_attestation;
use super::packed::verify_packed_attestation;
use super::safetynet::verify_safetynet_attestation;
use super::tpm::verify_tpm_attestation;
use super::types::{AttestationObject, AttestationStatement, CredAndCounterData};
use super::u2f::verify_u2f_attestation;

/// Collaborators and clock handed to every attestation processor.
#[derive(Clone, Copy)]
pub struct VerificationContext<'a> {
    pub config: &'a VerifierConfig,
    pub trust_anchors: &'a dyn TrustAnchorProvider,
    /// Reference time for certificate validity and SafetyNet timestamps
    pub now: DateTime<Utc>,
}

impl<'a> VerificationContext<'a> {
    pub fn new(config: &'a VerifierConfig, trust_anchors: &'a dyn TrustAnchorProvider) -> Self {
        Self {
            config,
            trust_anchors,
            now: Utc::now(),
        }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Trust anchors for the authenticator's AAGUID. Lookup errors fail the verification.
    pub(crate) fn anchors_for(&self, auth_data: &AuthData) -> Result<Vec<Vec<u8>>, VerificationError> {
        let aaguid = auth_data.aaguid_uuid()?;
        self.trust_anchors.trust_anchors(&aaguid).map_err(|e| {
            tracing::warn!("Trust anchor lookup failed for AAGUID {}: {}", aaguid, e);
            VerificationError::Verification(format!(
                "Trust anchor lookup failed for AAGUID {aaguid}"
            ))
        })
    }

    pub(crate) fn root_certificates(&self) -> Result<Vec<Vec<u8>>, VerificationError> {
        self.trust_anchors.root_certificates().map_err(|e| {
            tracing::warn!("Root certificate lookup failed: {}", e);
            VerificationError::Verification("Root certificate lookup failed".to_string())
        })
    }
}

/// The closed set of supported attestation statement formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationFormat {
    None,
    Packed,
    Tpm,
    AndroidKey,
    AndroidSafetyNet,
    FidoU2f,
}

impl AttestationFormat {
    /// Looks up a format identifier. Hyphens and underscores are interchangeable.
    pub fn resolve(format_id: &str) -> Result<Self, VerificationError> {
        match format_id.replace('-', "_").as_str() {
            "none" => Ok(AttestationFormat::None),
            "packed" => Ok(AttestationFormat::Packed),
            "tpm" => Ok(AttestationFormat::Tpm),
            "android_key" => Ok(AttestationFormat::AndroidKey),
            "android_safetynet" => Ok(AttestationFormat::AndroidSafetyNet),
            "fido_u2f" => Ok(AttestationFormat::FidoU2f),
            _ => {
                tracing::warn!("Unsupported attestation format: {}", format_id);
                Err(VerificationError::UnsupportedFormat(format_id.to_string()))
            }
        }
    }

    /// The WebAuthn registry identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            AttestationFormat::None => "none",
            AttestationFormat::Packed => "packed",
            AttestationFormat::Tpm => "tpm",
            AttestationFormat::AndroidKey => "android-key",
            AttestationFormat::AndroidSafetyNet => "android-safetynet",
            AttestationFormat::FidoU2f => "fido-u2f",
        }
    }

    /// Runs this format's processor.
    pub fn verify(
        self,
        ctx: &VerificationContext<'_>,
        att_stmt: &AttestationStatement,
        auth_data: &AuthData,
        record: &CredentialRecord,
        client_data_hash: &[u8],
    ) -> Result<CredAndCounterData, VerificationError> {
        tracing::debug!("Using '{}' attestation format", self.as_str());
        let result = match self {
            // for platform authenticators
            AttestationFormat::None => verify_none_attestation(att_stmt, auth_data),
            AttestationFormat::Packed => {
                verify_packed_attestation(ctx, att_stmt, auth_data, client_data_hash)
            }
            AttestationFormat::Tpm => {
                verify_tpm_attestation(ctx, att_stmt, auth_data, client_data_hash)
            }
            AttestationFormat::AndroidKey => {
                verify_android_key_attestation(ctx, att_stmt, auth_data, client_data_hash)
            }
            AttestationFormat::AndroidSafetyNet => {
                verify_safetynet_attestation(ctx, att_stmt, auth_data, client_data_hash)
            }
            // for FIDO U2F security keys
            AttestationFormat::FidoU2f => {
                verify_u2f_attestation(ctx, att_stmt, auth_data, record, client_data_hash)
            }
        };

        if let Err(e) = &result {
            tracing::debug!("'{}' attestation rejected: {}", self.as_str(), e);
        }
        result
    }
}

/// Verifies a decoded attestation object against a precomputed client data hash.
///
/// The format is resolved before the authenticator data is parsed, so an
/// unknown format always surfaces as [`VerificationError::UnsupportedFormat`].
pub fn verify_attestation(
    ctx: &VerificationContext<'_>,
    attestation: &AttestationObject,
    record: &CredentialRecord,
    client_data_hash: &[u8],
) -> Result<CredAndCounterData, VerificationError> {
    let format = AttestationFormat::resolve(&attestation.fmt)?;
    let auth_data = AuthData::parse(&attestation.auth_data)?;
    format.verify(ctx, &attestation.att_stmt, &auth_data, record, client_data_hash)
}
