use crate::authenticator_data::AuthData;
use crate::cose::CoseKey;
use crate::errors::VerificationError;

use super::core::AttestationFormat;
use super::types::{AttestationStatement, CredAndCounterData};

/// Verifies a `none` attestation statement.
///
/// No attestation signature exists, so the only requirement is an empty
/// statement. The credential public key must still decode.
pub(super) fn verify_none_attestation(
    att_stmt: &AttestationStatement,
    auth_data: &AuthData,
) -> Result<CredAndCounterData, VerificationError> {
    if !att_stmt.is_empty() {
        return Err(VerificationError::Verification(
            "attStmt must be empty for none attestation".to_string(),
        ));
    }

    let cose_key = CoseKey::decode(auth_data.credential_public_key()?)?;
    tracing::debug!("None attestation with {:?} credential key", cose_key.key_type());

    CredAndCounterData::new(AttestationFormat::None, auth_data, &cose_key, None)
}
