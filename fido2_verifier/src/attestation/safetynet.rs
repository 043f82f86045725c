use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use x509_parser::{prelude::*, public_key::PublicKey};

use crate::authenticator_data::AuthData;
use crate::certificate::{parse_certificate, verify_attestation_certificates};
use crate::cose::CoseKey;
use crate::errors::VerificationError;
use crate::utils::{base64_decode, concat_signed_data, sha256};

use super::core::{AttestationFormat, VerificationContext};
use super::types::{AttestationStatement, CredAndCounterData, required};

/// Claims of a SafetyNet attestation response that the verifier relies on.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SafetyNetPayload {
    nonce: String,
    timestamp_ms: i64,
    cts_profile_match: bool,
    #[serde(default)]
    basic_integrity: bool,
    apk_package_name: Option<String>,
}

/// The compact JWS carried in `response`, either as its UTF-8 bytes or base64 encoded.
fn compact_jws(response: &[u8]) -> Result<String, VerificationError> {
    let text = std::str::from_utf8(response).map_err(|_| {
        VerificationError::Verification("SafetyNet response is not valid UTF-8".to_string())
    })?;
    if text.split('.').count() == 3 {
        return Ok(text.to_string());
    }
    let decoded = base64_decode(text.trim())?;
    String::from_utf8(decoded).map_err(|_| {
        VerificationError::Verification("SafetyNet response is not a compact JWS".to_string())
    })
}

/// Verifies an Android SafetyNet attestation statement
///
/// The `response` member is a compact JWS whose `x5c` header must chain to
/// the AAGUID's trust anchors. Its payload binds the registration through the
/// nonce and must be fresh and report a CTS-compatible device.
pub(super) fn verify_safetynet_attestation(
    ctx: &VerificationContext<'_>,
    att_stmt: &AttestationStatement,
    auth_data: &AuthData,
    client_data_hash: &[u8],
) -> Result<CredAndCounterData, VerificationError> {
    let ver = required(att_stmt.ver()?, "ver")?;
    if ver.is_empty() {
        return Err(VerificationError::Verification(
            "Empty ver in SafetyNet attestation".to_string(),
        ));
    }
    let response = required(att_stmt.response()?, "response")?;
    let jws = compact_jws(response)?;
    let jws = jws.as_str();
    let cose_key = CoseKey::decode(auth_data.credential_public_key()?)?;

    let header = decode_header(jws).map_err(|e| {
        VerificationError::Verification(format!("Invalid SafetyNet JWS header: {e}"))
    })?;
    let x5c = header
        .x5c
        .as_ref()
        .filter(|certs| !certs.is_empty())
        .ok_or_else(|| {
            VerificationError::Verification("Missing x5c in SafetyNet JWS header".to_string())
        })?
        .iter()
        .map(|cert| base64_decode(cert).map_err(VerificationError::from))
        .collect::<Result<Vec<_>, _>>()?;

    let trust_anchors = ctx.anchors_for(auth_data)?;
    if trust_anchors.is_empty() {
        return Err(VerificationError::Verification(
            "No certificates in metadata for this authenticator".to_string(),
        ));
    }
    let leaf_der = verify_attestation_certificates(&x5c, &trust_anchors, ctx.now)?;
    let leaf = parse_certificate(&leaf_der)?;
    verify_hostname(&leaf, &ctx.config.safetynet_hostname)?;

    let payload = verify_jws(jws, header.alg, &leaf)?;
    tracing::debug!(
        "SafetyNet payload for {:?}, basicIntegrity: {}",
        payload.apk_package_name,
        payload.basic_integrity
    );

    let expected_nonce = sha256(&concat_signed_data(
        auth_data.attestation_buffer(),
        client_data_hash,
    ));
    let nonce = base64_decode(&payload.nonce)?;
    if !bool::from(nonce.as_slice().ct_eq(&expected_nonce[..])) {
        return Err(VerificationError::Verification(
            "SafetyNet nonce does not match authenticator and client data".to_string(),
        ));
    }

    if !payload.cts_profile_match {
        return Err(VerificationError::Verification(
            "SafetyNet ctsProfileMatch is false".to_string(),
        ));
    }

    let now_ms = ctx.now.timestamp_millis();
    if payload.timestamp_ms > now_ms {
        return Err(VerificationError::Verification(
            "SafetyNet timestampMs is in the future".to_string(),
        ));
    }
    if now_ms - payload.timestamp_ms > ctx.config.safetynet_max_age.num_milliseconds() {
        return Err(VerificationError::Verification(format!(
            "SafetyNet timestampMs is older than {} seconds",
            ctx.config.safetynet_max_age.num_seconds()
        )));
    }

    CredAndCounterData::new(AttestationFormat::AndroidSafetyNet, auth_data, &cose_key, None)
}

fn verify_hostname(leaf: &X509Certificate, hostname: &str) -> Result<(), VerificationError> {
    let common_name = leaf
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok());
    if common_name != Some(hostname) {
        tracing::warn!("SafetyNet certificate issued to {:?}", common_name);
        return Err(VerificationError::Verification(format!(
            "SafetyNet certificate is not issued to {hostname}"
        )));
    }
    Ok(())
}

fn verify_jws(
    jws: &str,
    alg: Algorithm,
    leaf: &X509Certificate,
) -> Result<SafetyNetPayload, VerificationError> {
    let key_bytes = leaf.public_key().subject_public_key.data.as_ref();
    let key = match (alg, leaf.public_key().parsed()) {
        (Algorithm::ES256 | Algorithm::ES384, Ok(PublicKey::EC(_))) => {
            DecodingKey::from_ec_der(key_bytes)
        }
        (
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512,
            Ok(PublicKey::RSA(_)),
        ) => DecodingKey::from_rsa_der(key_bytes),
        (alg, _) => {
            return Err(VerificationError::Verification(format!(
                "SafetyNet JWS algorithm {alg:?} does not match certificate key"
            )));
        }
    };

    let mut validation = Validation::new(alg);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let token = decode::<SafetyNetPayload>(jws, &key, &validation).map_err(|e| {
        tracing::error!("SafetyNet JWS verification failed: {}", e);
        VerificationError::Verification(format!("Invalid SafetyNet JWS: {e}"))
    })?;
    Ok(token.claims)
}
