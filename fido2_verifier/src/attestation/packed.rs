use crate::authenticator_data::AuthData;
use crate::certificate::{
    certificate_key_type, is_ca, is_self_signed, parse_certificate,
    verify_attestation_certificates, verify_certificate_aaguid, verify_with_certificate,
};
use crate::common::{verify_algorithm, verify_packed_signature};
use crate::cose::CoseKey;
use crate::errors::VerificationError;
use crate::utils::concat_signed_data;

use super::core::{AttestationFormat, VerificationContext};
use super::types::{AttestationStatement, CredAndCounterData, required};

/// Verifies a packed attestation statement
///
/// # Arguments
/// * `ctx` - Verification context supplying trust anchors and the clock
/// * `att_stmt` - The packed attestation statement
/// * `auth_data` - The parsed authenticator data
/// * `client_data_hash` - SHA-256 of the client data JSON
///
/// # Errors
/// * `VerificationError::Verification` - If the attestation is invalid
///
pub(super) fn verify_packed_attestation(
    ctx: &VerificationContext<'_>,
    att_stmt: &AttestationStatement,
    auth_data: &AuthData,
    client_data_hash: &[u8],
) -> Result<CredAndCounterData, VerificationError> {
    let alg = required(att_stmt.alg()?, "alg")?;
    let sig = required(att_stmt.sig()?, "sig")?;
    let cose_key = CoseKey::decode(auth_data.credential_public_key()?)?;

    match (att_stmt.x5c()?, att_stmt.ecdaa_key_id()?) {
        (Some(x5c), None) => {
            tracing::debug!("Full attestation with certificate chain");
            verify_full_attestation(ctx, &x5c, alg, sig, auth_data, client_data_hash)?;
        }
        (None, Some(_)) => {
            return Err(VerificationError::Verification(
                "ECDAA attestation not supported".to_string(),
            ));
        }
        (None, None) => {
            tracing::debug!("Self attestation");
            if alg != cose_key.alg {
                return Err(VerificationError::Verification(format!(
                    "Self attestation algorithm {alg} does not match credential key algorithm {}",
                    cose_key.alg
                )));
            }
            let algorithm = verify_algorithm(alg, cose_key.key_type())?;
            verify_packed_signature(auth_data, client_data_hash, sig, &cose_key, algorithm)?;
        }
        (Some(_), Some(_)) => {
            return Err(VerificationError::Verification(
                "Invalid attestation: both x5c and ecdaaKeyId present".to_string(),
            ));
        }
    }

    CredAndCounterData::new(AttestationFormat::Packed, auth_data, &cose_key, Some(alg))
}

fn verify_full_attestation(
    ctx: &VerificationContext<'_>,
    x5c: &[Vec<u8>],
    alg: i64,
    sig: &[u8],
    auth_data: &AuthData,
    client_data_hash: &[u8],
) -> Result<(), VerificationError> {
    let trust_anchors = ctx.anchors_for(auth_data)?;
    if trust_anchors.is_empty() {
        tracing::warn!(
            "No trust anchors for AAGUID {}",
            auth_data.aaguid_uuid()?.hyphenated()
        );
        return Err(VerificationError::Verification(
            "No certificates in metadata for this authenticator".to_string(),
        ));
    }

    let leaf_der = verify_attestation_certificates(x5c, &trust_anchors, ctx.now)?;
    let leaf = parse_certificate(&leaf_der)?;

    if is_ca(&leaf) {
        return Err(VerificationError::Verification(
            "Certificate must not be a CA certificate".to_string(),
        ));
    }
    verify_certificate_aaguid(&leaf, auth_data.aaguid_bytes()?)?;

    let algorithm = verify_algorithm(alg, certificate_key_type(&leaf)?)?;
    let signed_data = concat_signed_data(auth_data.attestation_buffer(), client_data_hash);
    verify_with_certificate(&leaf_der, algorithm, &signed_data, sig).inspect_err(|_| {
        tracing::error!("Packed attestation signature invalid");
    })?;

    if is_self_signed(&leaf_der)? {
        return Err(VerificationError::Verification(
            "Attestation certificate is a self signed certificate".to_string(),
        ));
    }

    Ok(())
}
