use ciborium::value::Value as CborValue;
use serde::Serialize;
use uuid::Uuid;

use crate::authenticator_data::AuthData;
use crate::cose::CoseKey;
use crate::errors::VerificationError;
use crate::utils::{base64url_decode, base64url_encode};

use super::core::AttestationFormat;

/// The decoded outer attestation object: `{fmt, authData, attStmt}`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttestationObject {
    pub fmt: String,
    pub auth_data: Vec<u8>,
    pub att_stmt: AttestationStatement,
}

impl AttestationObject {
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, VerificationError> {
        let value: CborValue = ciborium::de::from_reader(bytes).map_err(|e| {
            VerificationError::Verification(format!("Invalid attestation object CBOR: {e}"))
        })?;
        let CborValue::Map(entries) = value else {
            return Err(VerificationError::Verification(
                "Attestation object is not a CBOR map".to_string(),
            ));
        };

        let mut fmt = None;
        let mut auth_data = None;
        let mut att_stmt = None;

        for (key, value) in entries {
            match (key, value) {
                (CborValue::Text(k), CborValue::Text(v)) if k == "fmt" => fmt = Some(v),
                (CborValue::Text(k), CborValue::Bytes(v)) if k == "authData" => {
                    auth_data = Some(v)
                }
                (CborValue::Text(k), v @ CborValue::Map(_)) if k == "attStmt" => {
                    att_stmt = Some(AttestationStatement::from_cbor(v)?)
                }
                _ => {}
            }
        }

        Ok(Self {
            fmt: fmt.ok_or_else(|| {
                VerificationError::Verification("Missing fmt in attestation object".to_string())
            })?,
            auth_data: auth_data.ok_or_else(|| {
                VerificationError::Verification(
                    "Missing authData in attestation object".to_string(),
                )
            })?,
            att_stmt: att_stmt.ok_or_else(|| {
                VerificationError::Verification(
                    "Missing attStmt in attestation object".to_string(),
                )
            })?,
        })
    }

    pub fn from_base64(encoded: &str) -> Result<Self, VerificationError> {
        let bytes = base64url_decode(encoded)?;
        Self::from_cbor(&bytes)
    }
}

/// Read-only view of a format-specific attestation statement map.
///
/// Accessors return `Ok(None)` for an absent member and an error for a member
/// present with the wrong CBOR type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttestationStatement {
    entries: Vec<(CborValue, CborValue)>,
}

impl AttestationStatement {
    pub fn new(entries: Vec<(CborValue, CborValue)>) -> Self {
        Self { entries }
    }

    pub fn from_cbor(value: CborValue) -> Result<Self, VerificationError> {
        match value {
            CborValue::Map(entries) => Ok(Self { entries }),
            _ => Err(VerificationError::Verification(
                "Attestation statement is not a CBOR map".to_string(),
            )),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn field(&self, name: &str) -> Option<&CborValue> {
        self.entries.iter().find_map(|(k, v)| match k {
            CborValue::Text(key) if key == name => Some(v),
            _ => None,
        })
    }

    fn bytes_field(&self, name: &str) -> Result<Option<&[u8]>, VerificationError> {
        match self.field(name) {
            None => Ok(None),
            Some(CborValue::Bytes(b)) => Ok(Some(b.as_slice())),
            Some(_) => Err(invalid_member(name)),
        }
    }

    pub fn alg(&self) -> Result<Option<i64>, VerificationError> {
        match self.field("alg") {
            None => Ok(None),
            Some(CborValue::Integer(i)) => i64::try_from(*i)
                .map(Some)
                .map_err(|_| invalid_member("alg")),
            Some(_) => Err(invalid_member("alg")),
        }
    }

    pub fn sig(&self) -> Result<Option<&[u8]>, VerificationError> {
        self.bytes_field("sig")
    }

    /// Certificate chain, leaf first. An empty array is rejected.
    pub fn x5c(&self) -> Result<Option<Vec<Vec<u8>>>, VerificationError> {
        match self.field("x5c") {
            None => Ok(None),
            Some(CborValue::Array(certs)) => {
                let mut chain = Vec::with_capacity(certs.len());
                for cert in certs {
                    match cert {
                        CborValue::Bytes(der) => chain.push(der.clone()),
                        _ => return Err(invalid_member("x5c")),
                    }
                }
                if chain.is_empty() {
                    return Err(VerificationError::Verification(
                        "Empty x5c in attestation statement".to_string(),
                    ));
                }
                Ok(Some(chain))
            }
            Some(_) => Err(invalid_member("x5c")),
        }
    }

    pub fn ecdaa_key_id(&self) -> Result<Option<&[u8]>, VerificationError> {
        self.bytes_field("ecdaaKeyId")
    }

    pub fn ver(&self) -> Result<Option<&str>, VerificationError> {
        match self.field("ver") {
            None => Ok(None),
            Some(CborValue::Text(v)) => Ok(Some(v.as_str())),
            Some(_) => Err(invalid_member("ver")),
        }
    }

    pub fn response(&self) -> Result<Option<&[u8]>, VerificationError> {
        self.bytes_field("response")
    }

    pub fn pub_area(&self) -> Result<Option<&[u8]>, VerificationError> {
        self.bytes_field("pubArea")
    }

    pub fn cert_info(&self) -> Result<Option<&[u8]>, VerificationError> {
        self.bytes_field("certInfo")
    }
}

fn invalid_member(name: &str) -> VerificationError {
    VerificationError::Verification(format!("Invalid {name} in attestation statement"))
}

/// Fails with a "missing member" error when an attestation statement member is absent.
pub(crate) fn required<T>(value: Option<T>, name: &str) -> Result<T, VerificationError> {
    value.ok_or_else(|| {
        VerificationError::Verification(format!("Missing {name} in attestation statement"))
    })
}

/// Result of a successful attestation verification, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredAndCounterData {
    /// Attestation format identifier, e.g. `packed` or `fido-u2f`
    pub attestation_type: String,
    /// base64url of the credential ID
    pub cred_id: String,
    /// base64url of the raw public key (`0x04 || X || Y` for EC keys)
    pub uncompressed_ec_point: String,
    /// base64url of the COSE_Key, used to verify later assertions
    pub public_key: String,
    /// Set only for formats whose statement carries an explicit `alg`
    pub signature_algorithm: Option<i64>,
    pub aaguid: Uuid,
    pub counter: u32,
}

impl CredAndCounterData {
    pub(crate) fn new(
        format: AttestationFormat,
        auth_data: &AuthData,
        cose_key: &CoseKey,
        signature_algorithm: Option<i64>,
    ) -> Result<Self, VerificationError> {
        Ok(Self {
            attestation_type: format.as_str().to_string(),
            cred_id: base64url_encode(auth_data.credential_id_bytes()?),
            uncompressed_ec_point: base64url_encode(&cose_key.raw_public_key()),
            public_key: base64url_encode(auth_data.credential_public_key()?),
            signature_algorithm,
            aaguid: auth_data.aaguid_uuid()?,
            counter: auth_data.counter,
        })
    }
}
