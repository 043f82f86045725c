use crate::authenticator_data::AuthData;
use crate::certificate::{
    select_root_certificates, verify_attestation_certificates, verify_with_certificate,
};
use crate::common::{
    u2f_verification_data, verify_aaguid_zeroed, verify_rp_id_hash, verify_signature,
    verify_user_present,
};
use crate::cose::{CoseAlgorithm, CoseKey, CosePublicKey, CURVE_P256};
use crate::credential::CredentialRecord;
use crate::errors::VerificationError;

use super::core::{AttestationFormat, VerificationContext};
use super::types::{AttestationStatement, CredAndCounterData, required};

/// Verifies a FIDO U2F attestation statement
///
/// U2F devices always sign with ES256. When the statement carries `x5c`, the
/// chain is anchored in the global root store and the leaf verifies the
/// signature. Without a certificate, the credential key itself is used.
pub(super) fn verify_u2f_attestation(
    ctx: &VerificationContext<'_>,
    att_stmt: &AttestationStatement,
    auth_data: &AuthData,
    record: &CredentialRecord,
    client_data_hash: &[u8],
) -> Result<CredAndCounterData, VerificationError> {
    verify_aaguid_zeroed(auth_data)?;
    verify_user_present(auth_data)?;
    verify_rp_id_hash(auth_data, &record.rp_id)?;

    let sig = required(att_stmt.sig()?, "sig")?;
    let cose_key = CoseKey::decode(auth_data.credential_public_key()?)?;
    let public_key_u2f = u2f_public_key(&cose_key)?;
    let verification_data = u2f_verification_data(auth_data, client_data_hash, &public_key_u2f)?;

    if att_stmt.ecdaa_key_id()?.is_some() {
        return Err(VerificationError::Verification(
            "ECDAA attestation not supported".to_string(),
        ));
    }

    match att_stmt.x5c()? {
        Some(x5c) => {
            tracing::debug!("U2F attestation with {} certificate(s)", x5c.len());
            let roots = ctx.root_certificates()?;
            let top = x5c.last().ok_or_else(|| {
                VerificationError::Verification("Empty x5c in attestation statement".to_string())
            })?;
            let candidates = select_root_certificates(top, &roots)?;
            if candidates.is_empty() {
                tracing::warn!("No root certificate matches the U2F attestation chain");
                return Err(VerificationError::Verification(
                    "No matching root certificate for U2F attestation".to_string(),
                ));
            }

            let leaf_der = verify_attestation_certificates(&x5c, &candidates, ctx.now)?;
            verify_with_certificate(&leaf_der, CoseAlgorithm::ES256, &verification_data, sig)
                .inspect_err(|_| tracing::error!("U2F attestation signature invalid"))?;
        }
        None => {
            tracing::debug!("U2F attestation without certificate, using credential key");
            verify_signature(&verification_data, sig, &cose_key, CoseAlgorithm::ES256)?;
        }
    }

    CredAndCounterData::new(AttestationFormat::FidoU2f, auth_data, &cose_key, None)
}

/// Raw `0x04 || X || Y` P-256 point of the credential key.
fn u2f_public_key(cose_key: &CoseKey) -> Result<Vec<u8>, VerificationError> {
    match &cose_key.key {
        CosePublicKey::Ec2 { curve, x, y }
            if *curve == CURVE_P256 && x.len() == 32 && y.len() == 32 =>
        {
            Ok(cose_key.raw_public_key())
        }
        _ => Err(VerificationError::Verification(
            "U2F credential key must be an uncompressed P-256 point".to_string(),
        )),
    }
}
