use der_parser::{
    der::*,
    error::{BerError, BerResult},
};
use subtle::ConstantTimeEq;

use crate::authenticator_data::AuthData;
use crate::certificate::{
    certificate_key_matches, certificate_key_type, parse_certificate,
    verify_attestation_certificates, verify_with_certificate,
};
use crate::common::verify_algorithm;
use crate::cose::CoseKey;
use crate::errors::VerificationError;
use crate::utils::concat_signed_data;

use super::core::{AttestationFormat, VerificationContext};
use super::types::{AttestationStatement, CredAndCounterData, required};

// OID for Android key attestation: 1.3.6.1.4.1.11129.2.1.17
const OID_ANDROID_KEY_ATTESTATION: &[u8] = &[
    0x2B, 0x06, 0x01, 0x04, 0x01, 0xD6, 0x79, 0x02, 0x01, 0x11,
];

const KM_ORIGIN_GENERATED: u32 = 0;
const KM_PURPOSE_SIGN: u32 = 2;

const KM_TAG_PURPOSE: u32 = 1;
const KM_TAG_ALL_APPLICATIONS: u32 = 600;
const KM_TAG_ORIGIN: u32 = 702;

/// Where a key or its attestation is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SecurityLevel {
    Software,
    TrustedEnvironment,
    StrongBox,
}

impl SecurityLevel {
    fn from_u32(value: u32) -> Result<Self, BerError> {
        match value {
            0 => Ok(SecurityLevel::Software),
            1 => Ok(SecurityLevel::TrustedEnvironment),
            2 => Ok(SecurityLevel::StrongBox),
            _ => Err(BerError::InvalidTag),
        }
    }
}

/// The Keymaster authorization fields relevant to WebAuthn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct AuthorizationList {
    all_applications: bool,
    origin: Option<u32>,
    purpose: Vec<u32>,
}

impl AuthorizationList {
    fn parse(i: &[u8]) -> BerResult<'_, Self> {
        parse_der_container(|mut i: &[u8], hdr: Header| {
            if hdr.tag() != Tag::Sequence {
                return Err(BerError::BerTypeError)?;
            }

            let mut list = AuthorizationList::default();
            while !i.is_empty() {
                let (rest, (tag, content)) = parse_tagged_element(i)?;
                i = rest;
                match tag {
                    Tag(KM_TAG_ALL_APPLICATIONS) => list.all_applications = true,
                    Tag(KM_TAG_ORIGIN) => {
                        let (_, origin) = parse_der_integer(content)?;
                        list.origin = Some(origin.as_u32()?);
                    }
                    Tag(KM_TAG_PURPOSE) => {
                        let (_, purpose) = parse_integer_set(content)?;
                        list.purpose = purpose;
                    }
                    _ => continue,
                }
            }

            Ok((i, list))
        })(i)
    }

    /// `Ok(true)` when the list declares a generated signing key, `Ok(false)`
    /// when it declares neither origin nor purpose.
    fn is_generated_signing_key(&self, name: &str) -> Result<bool, VerificationError> {
        match (self.origin, self.purpose.is_empty()) {
            (None, true) => Ok(false),
            (Some(KM_ORIGIN_GENERATED), false) if self.purpose.contains(&KM_PURPOSE_SIGN) => {
                Ok(true)
            }
            _ => Err(VerificationError::Verification(format!(
                "Invalid key origin or purpose in {name} authorization list"
            ))),
        }
    }
}

/// Element of an AuthorizationList: its tag and the content octets.
fn parse_tagged_element(i: &[u8]) -> BerResult<'_, (Tag, &[u8])> {
    parse_der_container(|content: &[u8], hdr: Header| {
        Ok((&content[content.len()..], (hdr.tag(), content)))
    })(i)
}

fn parse_integer_set(i: &[u8]) -> BerResult<'_, Vec<u32>> {
    parse_der_container(|mut i: &[u8], hdr: Header| {
        if hdr.tag() != Tag::Set {
            return Err(BerError::BerTypeError)?;
        }
        let mut values = Vec::new();
        while !i.is_empty() {
            let (rest, value) = parse_der_integer(i)?;
            values.push(value.as_u32()?);
            i = rest;
        }
        Ok((i, values))
    })(i)
}

/// The Android KeyDescription attestation extension.
#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyDescription {
    attestation_version: u32,
    attestation_security_level: SecurityLevel,
    keymaster_version: u32,
    keymaster_security_level: SecurityLevel,
    attestation_challenge: Vec<u8>,
    software_enforced: AuthorizationList,
    tee_enforced: AuthorizationList,
}

impl KeyDescription {
    fn parse(i: &[u8]) -> BerResult<'_, Self> {
        parse_der_container(|i: &[u8], hdr: Header| {
            if hdr.tag() != Tag::Sequence {
                return Err(BerError::BerTypeError)?;
            }
            let (i, attestation_version) = parse_der_integer(i)?;
            let attestation_version = attestation_version.as_u32()?;
            let (i, attestation_security_level) = parse_der_enum(i)?;
            let attestation_security_level =
                SecurityLevel::from_u32(attestation_security_level.as_u32()?)?;
            let (i, keymaster_version) = parse_der_integer(i)?;
            let keymaster_version = keymaster_version.as_u32()?;
            let (i, keymaster_security_level) = parse_der_enum(i)?;
            let keymaster_security_level =
                SecurityLevel::from_u32(keymaster_security_level.as_u32()?)?;

            let (i, attestation_challenge) = parse_der_octetstring(i)?;
            let attestation_challenge = attestation_challenge.as_slice()?.to_vec();
            let (i, _unique_id) = parse_der_octetstring(i)?;

            let (i, software_enforced) = AuthorizationList::parse(i)?;
            let (i, tee_enforced) = AuthorizationList::parse(i)?;

            Ok((
                i,
                KeyDescription {
                    attestation_version,
                    attestation_security_level,
                    keymaster_version,
                    keymaster_security_level,
                    attestation_challenge,
                    software_enforced,
                    tee_enforced,
                },
            ))
        })(i)
    }

    fn verify(&self, client_data_hash: &[u8]) -> Result<(), VerificationError> {
        if !bool::from(self.attestation_challenge.ct_eq(client_data_hash)) {
            return Err(VerificationError::Verification(
                "Android key attestation challenge does not match client data hash".to_string(),
            ));
        }

        // The credential must be scoped to the RP ID
        if self.software_enforced.all_applications || self.tee_enforced.all_applications {
            return Err(VerificationError::Verification(
                "allApplications must not be set in Android key authorization lists".to_string(),
            ));
        }

        let software_set = self
            .software_enforced
            .is_generated_signing_key("softwareEnforced")?;
        let tee_set = self.tee_enforced.is_generated_signing_key("teeEnforced")?;
        if !software_set && !tee_set {
            return Err(VerificationError::Verification(
                "Neither softwareEnforced nor teeEnforced declares a generated signing key"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Verifies an Android Key attestation statement
///
/// The leaf of `x5c` must chain to the AAGUID's trust anchors, carry the
/// credential public key, and embed a key description whose challenge is the
/// client data hash.
pub(super) fn verify_android_key_attestation(
    ctx: &VerificationContext<'_>,
    att_stmt: &AttestationStatement,
    auth_data: &AuthData,
    client_data_hash: &[u8],
) -> Result<CredAndCounterData, VerificationError> {
    let alg = required(att_stmt.alg()?, "alg")?;
    let sig = required(att_stmt.sig()?, "sig")?;
    let x5c = required(att_stmt.x5c()?, "x5c")?;
    let cose_key = CoseKey::decode(auth_data.credential_public_key()?)?;

    let trust_anchors = ctx.anchors_for(auth_data)?;
    if trust_anchors.is_empty() {
        return Err(VerificationError::Verification(
            "No certificates in metadata for this authenticator".to_string(),
        ));
    }
    let leaf_der = verify_attestation_certificates(&x5c, &trust_anchors, ctx.now)?;
    let leaf = parse_certificate(&leaf_der)?;

    let algorithm = verify_algorithm(alg, certificate_key_type(&leaf)?)?;
    let signed_data = concat_signed_data(auth_data.attestation_buffer(), client_data_hash);
    verify_with_certificate(&leaf_der, algorithm, &signed_data, sig).inspect_err(|_| {
        tracing::error!("Android key attestation signature invalid");
    })?;

    if !certificate_key_matches(&leaf, &cose_key)? {
        return Err(VerificationError::Verification(
            "Attestation certificate key does not match credential public key".to_string(),
        ));
    }

    let extension = leaf
        .extensions()
        .iter()
        .find(|ext| ext.oid.as_bytes() == OID_ANDROID_KEY_ATTESTATION)
        .ok_or_else(|| {
            VerificationError::Verification(
                "Missing Android key attestation extension".to_string(),
            )
        })?;
    let (_, description) = KeyDescription::parse(extension.value).map_err(|e| {
        VerificationError::Verification(format!("Invalid Android key description: {e}"))
    })?;
    tracing::debug!(
        "Android key description: version {}, attestation {:?}, keymaster {} {:?}",
        description.attestation_version,
        description.attestation_security_level,
        description.keymaster_version,
        description.keymaster_security_level
    );
    description.verify(client_data_hash)?;

    CredAndCounterData::new(AttestationFormat::AndroidKey, auth_data, &cose_key, Some(alg))
}
