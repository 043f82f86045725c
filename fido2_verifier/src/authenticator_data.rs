use ciborium::value::Value as CborValue;
use uuid::Uuid;

use crate::errors::VerificationError;
use crate::utils::base64url_decode;

/// Flag bits of the authenticator data `flags` byte.
pub mod auth_data_flags {
    /// User Present
    pub const UP: u8 = 1 << 0;
    /// User Verified
    pub const UV: u8 = 1 << 2;
    /// Backup Eligibility
    pub const BE: u8 = 1 << 3;
    /// Backup State
    pub const BS: u8 = 1 << 4;
    /// Attested Credential Data Included
    pub const AT: u8 = 1 << 6;
    /// Extension Data Included
    pub const ED: u8 = 1 << 7;
}

const RP_ID_HASH_LEN: usize = 32;
const HEADER_LEN: usize = 37;
const AAGUID_LEN: usize = 16;
const MAX_CREDENTIAL_ID_LEN: usize = 1023;

/// Parsed authenticator data.
///
/// `raw` holds the exact bytes received. They are the signed prefix of every
/// attestation and assertion signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub counter: u32,
    pub aaguid: Option<[u8; 16]>,
    pub credential_id: Option<Vec<u8>>,
    /// CBOR bytes of the credential public key exactly as encoded by the authenticator
    pub cose_public_key: Option<Vec<u8>>,
    pub extensions: Option<Vec<u8>>,
    pub raw: Vec<u8>,
}

impl AuthData {
    /// Parses authenticator data from a registration response.
    ///
    /// The attested credential data block is mandatory here.
    pub fn parse(bytes: &[u8]) -> Result<Self, VerificationError> {
        let auth_data = Self::parse_any(bytes)?;
        if !auth_data.has_attested_credential_data() {
            return Err(VerificationError::Verification(
                "Attested credential data not present in authenticator data".to_string(),
            ));
        }
        Ok(auth_data)
    }

    /// Parses authenticator data from an assertion response.
    pub fn parse_assertion(bytes: &[u8]) -> Result<Self, VerificationError> {
        let auth_data = Self::parse_any(bytes)?;
        if auth_data.has_attested_credential_data() {
            return Err(VerificationError::Verification(
                "Unexpected attested credential data in assertion".to_string(),
            ));
        }
        Ok(auth_data)
    }

    /// Parses base64url-encoded assertion authenticator data.
    pub fn from_base64(auth_data: &str) -> Result<Self, VerificationError> {
        let bytes = base64url_decode(auth_data)?;
        Self::parse_assertion(&bytes)
    }

    fn parse_any(bytes: &[u8]) -> Result<Self, VerificationError> {
        if bytes.len() < HEADER_LEN {
            return Err(VerificationError::Verification(format!(
                "Authenticator data too short: {} bytes",
                bytes.len()
            )));
        }

        let mut rp_id_hash = [0u8; RP_ID_HASH_LEN];
        rp_id_hash.copy_from_slice(&bytes[..RP_ID_HASH_LEN]);
        let flags = bytes[32];
        let counter = u32::from_be_bytes([bytes[33], bytes[34], bytes[35], bytes[36]]);

        let mut rest = &bytes[HEADER_LEN..];
        let mut aaguid = None;
        let mut credential_id = None;
        let mut cose_public_key = None;
        let mut extensions = None;

        if flags & auth_data_flags::AT != 0 {
            if rest.len() < AAGUID_LEN + 2 {
                return Err(VerificationError::Verification(
                    "Attested credential data truncated".to_string(),
                ));
            }
            let mut guid = [0u8; AAGUID_LEN];
            guid.copy_from_slice(&rest[..AAGUID_LEN]);
            aaguid = Some(guid);

            let cred_id_len = u16::from_be_bytes([rest[16], rest[17]]) as usize;
            rest = &rest[AAGUID_LEN + 2..];
            if cred_id_len == 0 || cred_id_len > MAX_CREDENTIAL_ID_LEN {
                return Err(VerificationError::Verification(format!(
                    "Invalid credential ID length: {cred_id_len}"
                )));
            }
            if rest.len() < cred_id_len {
                return Err(VerificationError::Verification(
                    "Credential ID truncated".to_string(),
                ));
            }
            credential_id = Some(rest[..cred_id_len].to_vec());
            rest = &rest[cred_id_len..];

            let (key_bytes, remaining) = split_cbor_item(rest, "credential public key")?;
            cose_public_key = Some(key_bytes.to_vec());
            rest = remaining;
        }

        if flags & auth_data_flags::ED != 0 {
            let (ext_bytes, remaining) = split_cbor_item(rest, "extensions")?;
            extensions = Some(ext_bytes.to_vec());
            rest = remaining;
        }

        if !rest.is_empty() {
            return Err(VerificationError::Verification(format!(
                "Leftover bytes in authenticator data: {}",
                rest.len()
            )));
        }

        Ok(Self {
            rp_id_hash,
            flags,
            counter,
            aaguid,
            credential_id,
            cose_public_key,
            extensions,
            raw: bytes.to_vec(),
        })
    }

    pub fn is_user_present(&self) -> bool {
        self.flags & auth_data_flags::UP != 0
    }

    pub fn is_user_verified(&self) -> bool {
        self.flags & auth_data_flags::UV != 0
    }

    pub fn has_attested_credential_data(&self) -> bool {
        self.flags & auth_data_flags::AT != 0
    }

    pub fn has_extension_data(&self) -> bool {
        self.flags & auth_data_flags::ED != 0
    }

    pub fn is_backup_eligible(&self) -> bool {
        self.flags & auth_data_flags::BE != 0
    }

    pub fn is_backed_up(&self) -> bool {
        self.flags & auth_data_flags::BS != 0
    }

    /// The bytes signed together with the client data hash.
    pub fn attestation_buffer(&self) -> &[u8] {
        &self.raw
    }

    /// `rpIdHash || flags || counter`, the fixed 37-byte header.
    pub fn signed_header(&self) -> &[u8] {
        &self.raw[..HEADER_LEN]
    }

    pub fn aaguid_bytes(&self) -> Result<&[u8; 16], VerificationError> {
        self.aaguid.as_ref().ok_or_else(|| {
            VerificationError::Verification("AAGUID not present in authenticator data".to_string())
        })
    }

    pub fn aaguid_uuid(&self) -> Result<Uuid, VerificationError> {
        Ok(Uuid::from_bytes(*self.aaguid_bytes()?))
    }

    pub fn credential_id_bytes(&self) -> Result<&[u8], VerificationError> {
        self.credential_id.as_deref().ok_or_else(|| {
            VerificationError::Verification(
                "Credential ID not present in authenticator data".to_string(),
            )
        })
    }

    pub fn credential_public_key(&self) -> Result<&[u8], VerificationError> {
        self.cose_public_key.as_deref().ok_or_else(|| {
            VerificationError::Verification(
                "Credential public key not present in authenticator data".to_string(),
            )
        })
    }
}

/// Splits one CBOR data item off the front of `bytes`.
fn split_cbor_item<'a>(
    bytes: &'a [u8],
    what: &str,
) -> Result<(&'a [u8], &'a [u8]), VerificationError> {
    let mut reader = bytes;
    let _: CborValue = ciborium::de::from_reader(&mut reader)
        .map_err(|e| VerificationError::Verification(format!("Invalid CBOR in {what}: {e}")))?;
    let consumed = bytes.len() - reader.len();
    Ok(bytes.split_at(consumed))
}
