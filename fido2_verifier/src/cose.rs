use ciborium::value::Value as CborValue;
use ring::{
    digest,
    signature::{self, RsaParameters, RsaPublicKeyComponents, UnparsedPublicKey},
};

use crate::errors::VerificationError;
use crate::utils::base64url_decode;

// COSE key map labels (RFC 8152 section 7 and 13)
const LABEL_KTY: i64 = 1;
const LABEL_ALG: i64 = 3;
const LABEL_CRV_OR_N: i64 = -1;
const LABEL_X_OR_E: i64 = -2;
const LABEL_Y: i64 = -3;

const KTY_OKP: i64 = 1;
const KTY_EC2: i64 = 2;
const KTY_RSA: i64 = 3;

pub const CURVE_P256: i64 = 1;
pub const CURVE_P384: i64 = 2;
pub const CURVE_P521: i64 = 3;
pub const CURVE_ED25519: i64 = 6;

/// COSE key type family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Okp,
    Ec2,
    Rsa,
}

impl KeyType {
    fn from_kty(kty: i64) -> Result<Self, VerificationError> {
        match kty {
            KTY_OKP => Ok(KeyType::Okp),
            KTY_EC2 => Ok(KeyType::Ec2),
            KTY_RSA => Ok(KeyType::Rsa),
            other => Err(VerificationError::Verification(format!(
                "Unsupported COSE key type: {other}"
            ))),
        }
    }
}

/// COSE signature algorithms accepted in attestation statements and credential keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoseAlgorithm {
    ES256,
    ES384,
    ES512,
    EdDSA,
    PS256,
    PS384,
    PS512,
    RS256,
    RS384,
    RS512,
    RS1,
}

impl CoseAlgorithm {
    pub fn from_id(id: i64) -> Result<Self, VerificationError> {
        match id {
            -7 => Ok(CoseAlgorithm::ES256),
            -35 => Ok(CoseAlgorithm::ES384),
            -36 => Ok(CoseAlgorithm::ES512),
            -8 => Ok(CoseAlgorithm::EdDSA),
            -37 => Ok(CoseAlgorithm::PS256),
            -38 => Ok(CoseAlgorithm::PS384),
            -39 => Ok(CoseAlgorithm::PS512),
            -257 => Ok(CoseAlgorithm::RS256),
            -258 => Ok(CoseAlgorithm::RS384),
            -259 => Ok(CoseAlgorithm::RS512),
            -65535 => Ok(CoseAlgorithm::RS1),
            other => Err(VerificationError::Verification(format!(
                "Unsupported or unrecognized algorithm: {other}"
            ))),
        }
    }

    pub fn id(self) -> i64 {
        match self {
            CoseAlgorithm::ES256 => -7,
            CoseAlgorithm::ES384 => -35,
            CoseAlgorithm::ES512 => -36,
            CoseAlgorithm::EdDSA => -8,
            CoseAlgorithm::PS256 => -37,
            CoseAlgorithm::PS384 => -38,
            CoseAlgorithm::PS512 => -39,
            CoseAlgorithm::RS256 => -257,
            CoseAlgorithm::RS384 => -258,
            CoseAlgorithm::RS512 => -259,
            CoseAlgorithm::RS1 => -65535,
        }
    }

    pub fn key_type(self) -> KeyType {
        match self {
            CoseAlgorithm::ES256 | CoseAlgorithm::ES384 | CoseAlgorithm::ES512 => KeyType::Ec2,
            CoseAlgorithm::EdDSA => KeyType::Okp,
            _ => KeyType::Rsa,
        }
    }

    /// The COSE curve an EC2/OKP algorithm is bound to.
    pub fn curve(self) -> Option<i64> {
        match self {
            CoseAlgorithm::ES256 => Some(CURVE_P256),
            CoseAlgorithm::ES384 => Some(CURVE_P384),
            CoseAlgorithm::ES512 => Some(CURVE_P521),
            CoseAlgorithm::EdDSA => Some(CURVE_ED25519),
            _ => None,
        }
    }

    /// Hash function the algorithm signs over.
    pub fn digest(self) -> Result<&'static digest::Algorithm, VerificationError> {
        match self {
            CoseAlgorithm::ES256 | CoseAlgorithm::PS256 | CoseAlgorithm::RS256 => {
                Ok(&digest::SHA256)
            }
            CoseAlgorithm::ES384 | CoseAlgorithm::PS384 | CoseAlgorithm::RS384 => {
                Ok(&digest::SHA384)
            }
            CoseAlgorithm::ES512 | CoseAlgorithm::PS512 | CoseAlgorithm::RS512 => {
                Ok(&digest::SHA512)
            }
            CoseAlgorithm::RS1 => Ok(&digest::SHA1_FOR_LEGACY_USE_ONLY),
            CoseAlgorithm::EdDSA => Err(VerificationError::Verification(
                "No digest defined for EdDSA".to_string(),
            )),
        }
    }

    /// ring verifier for keys given as an EC point, an Ed25519 key or a PKCS#1 RSA key.
    pub(crate) fn ring_algorithm(
        self,
    ) -> Result<&'static dyn signature::VerificationAlgorithm, VerificationError> {
        match self {
            CoseAlgorithm::ES256 => Ok(&signature::ECDSA_P256_SHA256_ASN1),
            CoseAlgorithm::ES384 => Ok(&signature::ECDSA_P384_SHA384_ASN1),
            CoseAlgorithm::EdDSA => Ok(&signature::ED25519),
            CoseAlgorithm::ES512 => Err(VerificationError::Verification(
                "Signature algorithm ES512 is not supported".to_string(),
            )),
            _ => Ok(self.rsa_parameters()?),
        }
    }

    fn rsa_parameters(self) -> Result<&'static RsaParameters, VerificationError> {
        match self {
            CoseAlgorithm::PS256 => Ok(&signature::RSA_PSS_2048_8192_SHA256),
            CoseAlgorithm::PS384 => Ok(&signature::RSA_PSS_2048_8192_SHA384),
            CoseAlgorithm::PS512 => Ok(&signature::RSA_PSS_2048_8192_SHA512),
            CoseAlgorithm::RS256 => Ok(&signature::RSA_PKCS1_2048_8192_SHA256),
            CoseAlgorithm::RS384 => Ok(&signature::RSA_PKCS1_2048_8192_SHA384),
            CoseAlgorithm::RS512 => Ok(&signature::RSA_PKCS1_2048_8192_SHA512),
            CoseAlgorithm::RS1 => Ok(&signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY),
            other => Err(VerificationError::Verification(format!(
                "{other:?} is not an RSA algorithm"
            ))),
        }
    }

    /// webpki algorithm used when verifying with an end-entity certificate.
    ///
    /// `None` for algorithms webpki does not offer; those fall back to ring.
    pub(crate) fn webpki_algorithm(self) -> Option<&'static webpki::SignatureAlgorithm> {
        match self {
            CoseAlgorithm::ES256 => Some(&webpki::ECDSA_P256_SHA256),
            CoseAlgorithm::ES384 => Some(&webpki::ECDSA_P384_SHA384),
            CoseAlgorithm::EdDSA => Some(&webpki::ED25519),
            CoseAlgorithm::RS256 => Some(&webpki::RSA_PKCS1_2048_8192_SHA256),
            CoseAlgorithm::RS384 => Some(&webpki::RSA_PKCS1_2048_8192_SHA384),
            CoseAlgorithm::RS512 => Some(&webpki::RSA_PKCS1_2048_8192_SHA512),
            _ => None,
        }
    }
}

/// Public key parameters of a decoded COSE key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CosePublicKey {
    Ec2 { curve: i64, x: Vec<u8>, y: Vec<u8> },
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Okp { curve: i64, x: Vec<u8> },
}

/// A credential public key decoded from its COSE_Key map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseKey {
    /// Value of the `alg` (3) label
    pub alg: i64,
    pub key: CosePublicKey,
}

impl CoseKey {
    /// Decodes a COSE_Key from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, VerificationError> {
        let value: CborValue = ciborium::de::from_reader(bytes).map_err(|e| {
            VerificationError::Verification(format!("Invalid public key CBOR: {e}"))
        })?;
        Self::from_cbor(&value)
    }

    /// Decodes a base64url-encoded COSE_Key, the form kept in credential records.
    pub fn from_base64(encoded: &str) -> Result<Self, VerificationError> {
        let bytes = base64url_decode(encoded)?;
        Self::decode(&bytes)
    }

    pub fn from_cbor(value: &CborValue) -> Result<Self, VerificationError> {
        let CborValue::Map(entries) = value else {
            return Err(VerificationError::Verification(
                "COSE key is not a CBOR map".to_string(),
            ));
        };

        let mut params: Vec<(i64, &CborValue)> = Vec::with_capacity(entries.len());
        for (label, value) in entries {
            if let CborValue::Integer(i) = label {
                if let Ok(label) = i64::try_from(*i) {
                    params.push((label, value));
                }
            }
        }

        let kty = int_param(&params, LABEL_KTY)?.ok_or_else(|| {
            VerificationError::Verification("Missing key type in COSE key".to_string())
        })?;
        let alg = int_param(&params, LABEL_ALG)?.ok_or_else(|| {
            VerificationError::Verification("Missing algorithm in COSE key".to_string())
        })?;

        let key = match KeyType::from_kty(kty)? {
            KeyType::Ec2 => {
                let curve = required_int(&params, LABEL_CRV_OR_N, "curve")?;
                let x = required_bytes(&params, LABEL_X_OR_E, "x-coordinate")?;
                let y = required_bytes(&params, LABEL_Y, "y-coordinate")?;
                let size = match curve {
                    CURVE_P256 => 32,
                    CURVE_P384 => 48,
                    CURVE_P521 => 66,
                    other => {
                        return Err(VerificationError::Verification(format!(
                            "Unsupported EC2 curve: {other}"
                        )));
                    }
                };
                if x.len() != size || y.len() != size {
                    return Err(VerificationError::Verification(
                        "Invalid EC2 coordinate length".to_string(),
                    ));
                }
                CosePublicKey::Ec2 { curve, x, y }
            }
            KeyType::Rsa => {
                let n = required_bytes(&params, LABEL_CRV_OR_N, "RSA modulus")?;
                let e = required_bytes(&params, LABEL_X_OR_E, "RSA exponent")?;
                CosePublicKey::Rsa { n, e }
            }
            KeyType::Okp => {
                let curve = required_int(&params, LABEL_CRV_OR_N, "curve")?;
                if curve != CURVE_ED25519 {
                    return Err(VerificationError::Verification(format!(
                        "Unsupported OKP curve: {curve}"
                    )));
                }
                let x = required_bytes(&params, LABEL_X_OR_E, "public key")?;
                if x.len() != 32 {
                    return Err(VerificationError::Verification(
                        "Invalid Ed25519 public key length".to_string(),
                    ));
                }
                CosePublicKey::Okp { curve, x }
            }
        };

        Ok(Self { alg, key })
    }

    pub fn algorithm(&self) -> Result<CoseAlgorithm, VerificationError> {
        CoseAlgorithm::from_id(self.alg)
    }

    pub fn key_type(&self) -> KeyType {
        match self.key {
            CosePublicKey::Ec2 { .. } => KeyType::Ec2,
            CosePublicKey::Rsa { .. } => KeyType::Rsa,
            CosePublicKey::Okp { .. } => KeyType::Okp,
        }
    }

    /// Raw key bytes: `0x04 || X || Y` for EC2, the modulus for RSA, `x` for OKP.
    pub fn raw_public_key(&self) -> Vec<u8> {
        match &self.key {
            CosePublicKey::Ec2 { x, y, .. } => {
                let mut point = Vec::with_capacity(1 + x.len() + y.len());
                point.push(0x04); // Uncompressed point format
                point.extend_from_slice(x);
                point.extend_from_slice(y);
                point
            }
            CosePublicKey::Rsa { n, .. } => n.clone(),
            CosePublicKey::Okp { x, .. } => x.clone(),
        }
    }

    /// Verifies `signature` over `data` with this key.
    pub fn verify(
        &self,
        alg: CoseAlgorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), VerificationError> {
        if alg.key_type() != self.key_type() {
            return Err(VerificationError::Verification(format!(
                "Algorithm {alg:?} does not match key type {:?}",
                self.key_type()
            )));
        }

        let verified = match &self.key {
            CosePublicKey::Ec2 { curve, .. } | CosePublicKey::Okp { curve, .. } => {
                if alg.curve() != Some(*curve) {
                    return Err(VerificationError::Verification(format!(
                        "Algorithm {alg:?} does not match curve {curve}"
                    )));
                }
                let public_key = self.raw_public_key();
                UnparsedPublicKey::new(alg.ring_algorithm()?, &public_key).verify(data, signature)
            }
            CosePublicKey::Rsa { n, e } => {
                let components = RsaPublicKeyComponents {
                    n: strip_leading_zeros(n),
                    e: strip_leading_zeros(e),
                };
                components.verify(alg.rsa_parameters()?, data, signature)
            }
        };

        verified.map_err(|_| {
            tracing::debug!("Signature verification failed for {:?}", alg);
            VerificationError::Verification("Signature verification failed".to_string())
        })
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(bytes.len().saturating_sub(1));
    &bytes[start..]
}

fn int_param(params: &[(i64, &CborValue)], label: i64) -> Result<Option<i64>, VerificationError> {
    match params.iter().find(|(l, _)| *l == label) {
        None => Ok(None),
        Some((_, CborValue::Integer(i))) => i64::try_from(*i).map(Some).map_err(|_| {
            VerificationError::Verification(format!("COSE label {label} out of range"))
        }),
        Some(_) => Err(VerificationError::Verification(format!(
            "COSE label {label} is not an integer"
        ))),
    }
}

fn required_int(
    params: &[(i64, &CborValue)],
    label: i64,
    what: &str,
) -> Result<i64, VerificationError> {
    int_param(params, label)?
        .ok_or_else(|| VerificationError::Verification(format!("Missing {what} in COSE key")))
}

fn required_bytes(
    params: &[(i64, &CborValue)],
    label: i64,
    what: &str,
) -> Result<Vec<u8>, VerificationError> {
    match params.iter().find(|(l, _)| *l == label) {
        Some((_, CborValue::Bytes(b))) => Ok(b.clone()),
        Some(_) => Err(VerificationError::Verification(format!(
            "Invalid {what} in COSE key"
        ))),
        None => Err(VerificationError::Verification(format!(
            "Missing {what} in COSE key"
        ))),
    }
}
