use chrono::{DateTime, Utc};
use ring::digest;
use x509_parser::prelude::*;

use crate::authenticator_data::AuthData;
use crate::certificate::{
    certificate_key_type, is_ca, parse_certificate, verify_attestation_certificates,
    verify_certificate_aaguid, verify_issued_by, verify_validity, verify_with_certificate,
};
use crate::common::{verify_algorithm, verify_tpm_version};
use crate::cose::{CoseKey, CosePublicKey, CURVE_P256, CURVE_P384, CURVE_P521};
use crate::errors::VerificationError;
use crate::utils::concat_signed_data;

use super::core::{AttestationFormat, VerificationContext};
use super::types::{AttestationStatement, CredAndCounterData, required};

const TPM_GENERATED_VALUE: u32 = 0xff544347; // 0xFF + "TCG"
const TPM_ST_ATTEST_CERTIFY: u16 = 0x8017;

const TPM_ALG_RSA: u16 = 0x0001;
const TPM_ALG_SHA1: u16 = 0x0004;
const TPM_ALG_SHA256: u16 = 0x000B;
const TPM_ALG_SHA384: u16 = 0x000C;
const TPM_ALG_SHA512: u16 = 0x000D;
const TPM_ALG_NULL: u16 = 0x0010;
const TPM_ALG_ECC: u16 = 0x0023;

const TPM_ECC_NIST_P256: u16 = 0x0003;
const TPM_ECC_NIST_P384: u16 = 0x0004;
const TPM_ECC_NIST_P521: u16 = 0x0005;

const TPM_RSA_DEFAULT_EXPONENT: u32 = 65537;

// OID for TCG-KP-AIKCertificate: 2.23.133.8.3
const OID_TCG_KP_AIK_CERTIFICATE: &[u8] = &[0x67, 0x81, 0x05, 0x08, 0x03];

/// An anchor that issues the AIK directly must be a CA within its validity period.
fn is_valid_ca_anchor(anchor_der: &[u8], now: DateTime<Utc>) -> bool {
    match parse_certificate(anchor_der) {
        Ok(anchor) => verify_validity(&anchor, now).is_ok() && is_ca(&anchor),
        Err(e) => {
            tracing::warn!("Skipping unparsable trust anchor: {}", e);
            false
        }
    }
}

/// Verifies a TPM attestation statement
///
/// # Arguments
/// * `ctx` - Verification context supplying trust anchors and the clock
/// * `att_stmt` - The TPM attestation statement
/// * `auth_data` - The parsed authenticator data
/// * `client_data_hash` - SHA-256 of the client data JSON
///
/// # Errors
/// * `VerificationError::Verification` - If the attestation is invalid
///
pub(super) fn verify_tpm_attestation(
    ctx: &VerificationContext<'_>,
    att_stmt: &AttestationStatement,
    auth_data: &AuthData,
    client_data_hash: &[u8],
) -> Result<CredAndCounterData, VerificationError> {
    verify_tpm_version(required(att_stmt.ver()?, "ver")?)?;
    let alg = required(att_stmt.alg()?, "alg")?;
    let sig = required(att_stmt.sig()?, "sig")?;
    let x5c = required(att_stmt.x5c()?, "x5c")?;
    let pub_area_bytes = required(att_stmt.pub_area()?, "pubArea")?;
    let cert_info_bytes = required(att_stmt.cert_info()?, "certInfo")?;

    if att_stmt.ecdaa_key_id()?.is_some() {
        return Err(VerificationError::Verification(
            "ECDAA attestation not supported".to_string(),
        ));
    }

    let cose_key = CoseKey::decode(auth_data.credential_public_key()?)?;
    let hash_alg = cose_key.algorithm()?.digest()?;
    let hashed_buffer = digest::digest(
        hash_alg,
        &concat_signed_data(auth_data.attestation_buffer(), client_data_hash),
    );

    // AIK certificate first, then the chain up to a trust anchor
    let (aik_der, chain) = x5c.split_first().ok_or_else(|| {
        VerificationError::Verification("Missing AIK certificate in x5c".to_string())
    })?;
    let aik = parse_certificate(aik_der)?;
    verify_aik_certificate(&aik)?;
    verify_validity(&aik, ctx.now)?;

    let trust_anchors = ctx.anchors_for(auth_data)?;
    if trust_anchors.is_empty() {
        return Err(VerificationError::Verification(
            "No certificates in metadata for this authenticator".to_string(),
        ));
    }

    let verified_cert = if chain.is_empty() {
        trust_anchors
            .iter()
            .find(|anchor| {
                is_valid_ca_anchor(anchor, ctx.now) && verify_issued_by(aik_der, anchor).is_ok()
            })
            .cloned()
            .ok_or_else(|| {
                VerificationError::Verification(
                    "AIK certificate is not issued by a trusted anchor".to_string(),
                )
            })?
    } else {
        verify_attestation_certificates(chain, &trust_anchors, ctx.now)?
    };

    verify_certificate_aaguid(&aik, auth_data.aaguid_bytes()?)?;
    verify_issued_by(aik_der, &verified_cert)?;

    let algorithm = verify_algorithm(alg, certificate_key_type(&aik)?)?;
    verify_with_certificate(aik_der, algorithm, cert_info_bytes, sig).inspect_err(|_| {
        tracing::error!("TPM certInfo signature invalid");
    })?;

    let pub_area = TpmPublicArea::parse(pub_area_bytes)?;
    let cert_info = TpmAttestation::parse(cert_info_bytes)?;

    // 1. magic and structure type
    if cert_info.magic != TPM_GENERATED_VALUE {
        return Err(VerificationError::Verification(format!(
            "Invalid magic value: {:x}, expected: {:x}",
            cert_info.magic, TPM_GENERATED_VALUE
        )));
    }
    if cert_info.attest_type != TPM_ST_ATTEST_CERTIFY {
        return Err(VerificationError::Verification(format!(
            "Invalid attestation type: {:x}, expected: {:x}",
            cert_info.attest_type, TPM_ST_ATTEST_CERTIFY
        )));
    }

    // 2. attested name is the digest of pubArea under its nameAlg
    verify_attested_name(&cert_info.attested_name, pub_area.name_alg, pub_area_bytes)?;

    // 3. extraData is the hash of the attested data
    if cert_info.extra_data != hashed_buffer.as_ref() {
        return Err(VerificationError::Verification(
            "TPM extraData does not match the hash of authenticator and client data".to_string(),
        ));
    }

    // 4. pubArea carries the credential public key
    pub_area.verify_matches(&cose_key)?;

    tracing::debug!("TPM attestation verified");
    CredAndCounterData::new(AttestationFormat::Tpm, auth_data, &cose_key, Some(alg))
}

fn verify_aik_certificate(aik: &X509Certificate) -> Result<(), VerificationError> {
    if aik.version() != X509Version::V3 {
        return Err(VerificationError::Verification(
            "AIK certificate must be version 3".to_string(),
        ));
    }
    if aik.subject().iter().next().is_some() {
        return Err(VerificationError::Verification(
            "AIK certificate subject must be empty".to_string(),
        ));
    }
    if is_ca(aik) {
        return Err(VerificationError::Verification(
            "AIK certificate must not be a CA certificate".to_string(),
        ));
    }

    let has_aik_usage = match aik.extended_key_usage() {
        Ok(Some(eku)) => eku
            .value
            .other
            .iter()
            .any(|oid| oid.as_bytes() == OID_TCG_KP_AIK_CERTIFICATE),
        _ => false,
    };
    if !has_aik_usage {
        return Err(VerificationError::Verification(
            "AIK certificate missing tcg-kp-AIKCertificate extended key usage".to_string(),
        ));
    }
    Ok(())
}

fn name_digest_algorithm(name_alg: u16) -> Result<&'static digest::Algorithm, VerificationError> {
    match name_alg {
        TPM_ALG_SHA1 => Ok(&digest::SHA1_FOR_LEGACY_USE_ONLY),
        TPM_ALG_SHA256 => Ok(&digest::SHA256),
        TPM_ALG_SHA384 => Ok(&digest::SHA384),
        TPM_ALG_SHA512 => Ok(&digest::SHA512),
        other => Err(VerificationError::Verification(format!(
            "Unsupported TPM name algorithm: {other:04x}"
        ))),
    }
}

fn verify_attested_name(
    attested_name: &[u8],
    name_alg: u16,
    pub_area_bytes: &[u8],
) -> Result<(), VerificationError> {
    if attested_name.len() < 2 {
        return Err(VerificationError::Verification(
            "TPM attested name too short".to_string(),
        ));
    }
    let (prefix, name_digest) = attested_name.split_at(2);
    if u16::from_be_bytes([prefix[0], prefix[1]]) != name_alg {
        return Err(VerificationError::Verification(
            "TPM attested name algorithm does not match pubArea nameAlg".to_string(),
        ));
    }

    let expected = digest::digest(name_digest_algorithm(name_alg)?, pub_area_bytes);
    if name_digest != expected.as_ref() {
        return Err(VerificationError::Verification(
            "TPM attested name does not match pubArea".to_string(),
        ));
    }
    Ok(())
}

/// Big-endian cursor over a TPM structure.
struct TpmReader<'a> {
    data: &'a [u8],
    offset: usize,
    structure: &'static str,
}

impl<'a> TpmReader<'a> {
    fn new(data: &'a [u8], structure: &'static str) -> Self {
        Self {
            data,
            offset: 0,
            structure,
        }
    }

    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8], VerificationError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                VerificationError::Verification(format!(
                    "TPM {} too short to parse {field}",
                    self.structure
                ))
            })?;
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn u16(&mut self, field: &str) -> Result<u16, VerificationError> {
        let b = self.take(2, field)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, field: &str) -> Result<u32, VerificationError> {
        let b = self.take(4, field)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// TPM2B: a u16 size followed by that many bytes.
    fn sized(&mut self, field: &str) -> Result<&'a [u8], VerificationError> {
        let len = self.u16(field)? as usize;
        self.take(len, field)
    }

    fn finish(&self) -> Result<(), VerificationError> {
        if self.offset != self.data.len() {
            return Err(VerificationError::Verification(format!(
                "TPM {} has {} trailing bytes",
                self.structure,
                self.data.len() - self.offset
            )));
        }
        Ok(())
    }
}

/// The public key parameters a TPM object carries in its `unique` field.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TpmUnique {
    Rsa { modulus: Vec<u8>, exponent: u32 },
    Ecc { curve_id: u16, x: Vec<u8>, y: Vec<u8> },
}

/// The subset of TPMT_PUBLIC needed to bind the credential key.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TpmPublicArea {
    name_alg: u16,
    unique: TpmUnique,
}

impl TpmPublicArea {
    fn parse(bytes: &[u8]) -> Result<Self, VerificationError> {
        let mut r = TpmReader::new(bytes, "pubArea");
        let alg_type = r.u16("type")?;
        let name_alg = r.u16("nameAlg")?;
        let _object_attributes = r.u32("objectAttributes")?;
        let _auth_policy = r.sized("authPolicy")?;

        // TPMT_SYM_DEF_OBJECT: keyBits and mode follow unless the algorithm is NULL
        let symmetric = r.u16("symmetric algorithm")?;
        if symmetric != TPM_ALG_NULL {
            r.u16("symmetric keyBits")?;
            r.u16("symmetric mode")?;
        }
        let scheme = r.u16("scheme")?;
        if scheme != TPM_ALG_NULL {
            r.u16("scheme hash algorithm")?;
        }

        let unique = match alg_type {
            TPM_ALG_RSA => {
                let _key_bits = r.u16("RSA keyBits")?;
                let exponent = match r.u32("RSA exponent")? {
                    0 => TPM_RSA_DEFAULT_EXPONENT,
                    e => e,
                };
                let modulus = r.sized("RSA modulus")?.to_vec();
                TpmUnique::Rsa { modulus, exponent }
            }
            TPM_ALG_ECC => {
                let curve_id = r.u16("ECC curveID")?;
                let kdf = r.u16("ECC kdf")?;
                if kdf != TPM_ALG_NULL {
                    r.u16("ECC kdf hash algorithm")?;
                }
                let x = r.sized("ECC x coordinate")?.to_vec();
                let y = r.sized("ECC y coordinate")?.to_vec();
                TpmUnique::Ecc { curve_id, x, y }
            }
            other => {
                return Err(VerificationError::Verification(format!(
                    "Unsupported TPM algorithm type: {other:04x}"
                )));
            }
        };
        r.finish()?;

        Ok(Self { name_alg, unique })
    }

    fn verify_matches(&self, cose_key: &CoseKey) -> Result<(), VerificationError> {
        let matches = match (&self.unique, &cose_key.key) {
            (TpmUnique::Rsa { modulus, exponent }, CosePublicKey::Rsa { n, e }) => {
                let e_value = e.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
                modulus == n && e.len() <= 8 && e_value == u64::from(*exponent)
            }
            (TpmUnique::Ecc { curve_id, x: tx, y: ty }, CosePublicKey::Ec2 { curve, x, y }) => {
                let tpm_curve = match *curve {
                    CURVE_P256 => TPM_ECC_NIST_P256,
                    CURVE_P384 => TPM_ECC_NIST_P384,
                    CURVE_P521 => TPM_ECC_NIST_P521,
                    _ => 0,
                };
                *curve_id == tpm_curve && tx == x && ty == y
            }
            _ => false,
        };

        if !matches {
            return Err(VerificationError::Verification(
                "Public key in TPM pubArea does not match credential public key".to_string(),
            ));
        }
        Ok(())
    }
}

/// The subset of TPMS_ATTEST checked for a certify attestation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TpmAttestation {
    magic: u32,
    attest_type: u16,
    extra_data: Vec<u8>,
    attested_name: Vec<u8>,
}

impl TpmAttestation {
    fn parse(bytes: &[u8]) -> Result<Self, VerificationError> {
        let mut r = TpmReader::new(bytes, "certInfo");
        let magic = r.u32("magic")?;
        let attest_type = r.u16("type")?;
        let _qualified_signer = r.sized("qualifiedSigner")?;
        let extra_data = r.sized("extraData")?.to_vec();
        // clock(8) resetCount(4) restartCount(4) safe(1)
        let _clock_info = r.take(17, "clockInfo")?;
        let _firmware_version = r.take(8, "firmwareVersion")?;
        let attested_name = r.sized("attested name")?.to_vec();
        let _qualified_name = r.sized("attested qualifiedName")?;
        r.finish()?;

        Ok(Self {
            magic,
            attest_type,
            extra_data,
            attested_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticator_data::auth_data_flags::{AT, UP, UV};
    use crate::config::VerifierConfig;
    use crate::test_utils::{
        CertOptions, TEST_RP_ID, TestCertificate, TestKey, build_auth_data, ec2_cose_key, flip,
        generate_key, rsa_cose_key, statement, test_client_data_hash, x5c_value,
    };
    use chrono::TimeZone;
    use crate::trust::StaticTrustAnchors;
    use ciborium::value::Value as CborValue;
    use uuid::Uuid;

    const AAGUID: [u8; 16] = [0x08; 16];

    fn tpm2b(bytes: &[u8]) -> Vec<u8> {
        let mut out = (bytes.len() as u16).to_be_bytes().to_vec();
        out.extend_from_slice(bytes);
        out
    }

    fn ecc_pub_area(point: &[u8]) -> Vec<u8> {
        let mut area = Vec::new();
        area.extend_from_slice(&TPM_ALG_ECC.to_be_bytes());
        area.extend_from_slice(&TPM_ALG_SHA256.to_be_bytes());
        area.extend_from_slice(&0x0006_0472u32.to_be_bytes());
        area.extend_from_slice(&tpm2b(&[]));
        area.extend_from_slice(&TPM_ALG_NULL.to_be_bytes());
        area.extend_from_slice(&TPM_ALG_NULL.to_be_bytes());
        area.extend_from_slice(&TPM_ECC_NIST_P256.to_be_bytes());
        area.extend_from_slice(&TPM_ALG_NULL.to_be_bytes());
        area.extend_from_slice(&tpm2b(&point[1..33]));
        area.extend_from_slice(&tpm2b(&point[33..65]));
        area
    }

    fn cert_info(magic: u32, extra_data: &[u8], name: &[u8]) -> Vec<u8> {
        let mut info = Vec::new();
        info.extend_from_slice(&magic.to_be_bytes());
        info.extend_from_slice(&TPM_ST_ATTEST_CERTIFY.to_be_bytes());
        info.extend_from_slice(&tpm2b(&[0xAA; 34]));
        info.extend_from_slice(&tpm2b(extra_data));
        info.extend_from_slice(&[0; 17]);
        info.extend_from_slice(&[0; 8]);
        info.extend_from_slice(&tpm2b(name));
        info.extend_from_slice(&tpm2b(&[0xBB; 34]));
        info
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Corruption {
        None,
        Magic,
        NameDigest,
        ExtraData,
        PublicKey,
    }

    struct Fixture {
        auth_data: AuthData,
        client_data_hash: [u8; 32],
        root: TestCertificate,
        aik: TestCertificate,
        stmt: AttestationStatement,
    }

    fn fixture(corruption: Corruption) -> Fixture {
        let credential_key = generate_key();
        let bytes = build_auth_data(
            TEST_RP_ID,
            UP | UV | AT,
            0,
            AAGUID,
            &[0x21; 32],
            &ec2_cose_key(&credential_key.public_point(), -7),
        );
        let auth_data = AuthData::parse(&bytes).unwrap();
        let client_data_hash = test_client_data_hash();

        let root = TestCertificate::self_signed("TPM Root CA", CertOptions::ca());
        let aik = root.issue("", CertOptions::aik().with_aaguid(AAGUID));

        // Each corruption is applied before signing, so only the targeted check fails
        let pub_area = if corruption == Corruption::PublicKey {
            ecc_pub_area(&generate_key().public_point())
        } else {
            ecc_pub_area(&credential_key.public_point())
        };
        let mut name = TPM_ALG_SHA256.to_be_bytes().to_vec();
        name.extend_from_slice(digest::digest(&digest::SHA256, &pub_area).as_ref());
        if corruption == Corruption::NameDigest {
            name = flip(&name, 5);
        }
        let mut extra_data = digest::digest(
            &digest::SHA256,
            &concat_signed_data(&auth_data.raw, &client_data_hash),
        )
        .as_ref()
        .to_vec();
        if corruption == Corruption::ExtraData {
            extra_data = flip(&extra_data, 0);
        }
        let magic = if corruption == Corruption::Magic {
            0xff544348
        } else {
            TPM_GENERATED_VALUE
        };
        let info = cert_info(magic, &extra_data, &name);
        let sig = aik.key.sign(&info);

        let stmt = statement(vec![
            ("ver", CborValue::Text("2.0".to_string())),
            ("alg", CborValue::Integer((-7).into())),
            ("x5c", x5c_value(&[&aik.der])),
            ("sig", CborValue::Bytes(sig)),
            ("certInfo", CborValue::Bytes(info)),
            ("pubArea", CborValue::Bytes(pub_area)),
        ]);

        Fixture {
            auth_data,
            client_data_hash,
            root,
            aik,
            stmt,
        }
    }

    fn anchors_with(root: &TestCertificate) -> StaticTrustAnchors {
        let mut anchors = StaticTrustAnchors::new();
        anchors.add_der(Uuid::from_bytes(AAGUID), &root.der).unwrap();
        anchors
    }

    fn run(f: &Fixture, stmt: &AttestationStatement) -> Result<CredAndCounterData, VerificationError> {
        let config = VerifierConfig::default();
        let anchors = anchors_with(&f.root);
        let ctx = VerificationContext::new(&config, &anchors);
        verify_tpm_attestation(&ctx, stmt, &f.auth_data, &f.client_data_hash)
    }

    fn error_message(result: Result<CredAndCounterData, VerificationError>) -> String {
        match result {
            Err(VerificationError::Verification(msg)) => msg,
            other => panic!("Expected VerificationError::Verification, got {other:?}"),
        }
    }

    #[test]
    fn test_tpm_attestation_success() {
        let f = fixture(Corruption::None);

        let result = run(&f, &f.stmt).unwrap();

        assert_eq!(result.attestation_type, "tpm");
        assert_eq!(result.signature_algorithm, Some(-7));
        assert_eq!(result.aaguid, Uuid::from_bytes(AAGUID));
    }

    /// The fixture's certInfo and pubArea signed by `aik_key`, with `x5c` as given.
    fn restated(f: &Fixture, aik_key: &TestKey, x5c: &[&[u8]]) -> AttestationStatement {
        let info = f.stmt.cert_info().unwrap().unwrap().to_vec();
        statement(vec![
            ("ver", CborValue::Text("2.0".to_string())),
            ("alg", CborValue::Integer((-7).into())),
            ("x5c", x5c_value(x5c)),
            ("sig", CborValue::Bytes(aik_key.sign(&info))),
            ("certInfo", CborValue::Bytes(info)),
            (
                "pubArea",
                CborValue::Bytes(f.stmt.pub_area().unwrap().unwrap().to_vec()),
            ),
        ])
    }

    #[test]
    fn test_tpm_attestation_with_intermediate() {
        let f = fixture(Corruption::None);
        let intermediate = f.root.issue("TPM Intermediate CA", CertOptions::ca());
        let aik = intermediate.issue("", CertOptions::aik());
        let stmt = restated(&f, &aik.key, &[&aik.der, &intermediate.der]);

        assert!(run(&f, &stmt).is_ok());
    }

    #[test]
    fn test_tpm_attestation_tampered_aik_key() {
        let f = fixture(Corruption::None);
        let stmt = restated(&f, &f.aik.key, &[&f.aik.tampered_key_der()]);

        assert!(run(&f, &stmt).is_err());
        assert!(run(&f, &restated(&f, &f.aik.key, &[&f.aik.der])).is_ok());
    }

    #[test]
    fn test_tpm_attestation_aik_anchor_must_be_valid_ca() {
        let f = fixture(Corruption::None);
        let config = VerifierConfig::default();
        let verify = |anchor: &TestCertificate, now: DateTime<Utc>| {
            let aik = anchor.issue("", CertOptions::aik().with_aaguid(AAGUID));
            let stmt = restated(&f, &aik.key, &[&aik.der]);
            let anchors = anchors_with(anchor);
            let ctx = VerificationContext::new(&config, &anchors).at(now);
            verify_tpm_attestation(&ctx, &stmt, &f.auth_data, &f.client_data_hash)
        };
        let now = Utc::now();

        // An end-entity anchor cannot vouch for the AIK
        let end_entity = TestCertificate::self_signed("TPM Vendor Key", CertOptions::leaf());
        assert!(error_message(verify(&end_entity, now)).contains("not issued by a trusted anchor"));

        // An expired anchor cannot either, even though the AIK is still valid
        let short_lived = TestCertificate::self_signed(
            "TPM Root CA",
            CertOptions::ca().with_validity("200101000000Z", "301231235959Z"),
        );
        let after_anchor_expiry = Utc.with_ymd_and_hms(2035, 1, 1, 0, 0, 0).unwrap();
        assert!(error_message(verify(&short_lived, after_anchor_expiry))
            .contains("not issued by a trusted anchor"));
        let before_anchor_expiry = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert!(verify(&short_lived, before_anchor_expiry).is_ok());
    }

    #[test]
    fn test_tpm_attestation_corrupted_magic() {
        let f = fixture(Corruption::Magic);
        assert!(error_message(run(&f, &f.stmt)).contains("Invalid magic value"));
    }

    #[test]
    fn test_tpm_attestation_corrupted_name_digest() {
        let f = fixture(Corruption::NameDigest);
        assert!(error_message(run(&f, &f.stmt)).contains("attested name"));
    }

    #[test]
    fn test_tpm_attestation_corrupted_extra_data() {
        let f = fixture(Corruption::ExtraData);
        assert!(error_message(run(&f, &f.stmt)).contains("extraData"));
    }

    #[test]
    fn test_tpm_attestation_corrupted_public_key() {
        let f = fixture(Corruption::PublicKey);
        assert!(error_message(run(&f, &f.stmt)).contains("does not match credential public key"));
    }

    #[test]
    fn test_tpm_attestation_tampered_signature() {
        let f = fixture(Corruption::None);
        let sig = f.stmt.sig().unwrap().unwrap().to_vec();
        let stmt = statement(vec![
            ("ver", CborValue::Text("2.0".to_string())),
            ("alg", CborValue::Integer((-7).into())),
            ("x5c", x5c_value(&[&f.aik.der])),
            ("sig", CborValue::Bytes(flip(&sig, 9))),
            (
                "certInfo",
                CborValue::Bytes(f.stmt.cert_info().unwrap().unwrap().to_vec()),
            ),
            (
                "pubArea",
                CborValue::Bytes(f.stmt.pub_area().unwrap().unwrap().to_vec()),
            ),
        ]);

        assert!(run(&f, &stmt).is_err());
    }

    #[test]
    fn test_tpm_attestation_rejects_version_and_untrusted_aik() {
        let f = fixture(Corruption::None);
        let stmt = statement(vec![
            ("ver", CborValue::Text("1.2".to_string())),
            ("alg", CborValue::Integer((-7).into())),
        ]);
        assert!(error_message(run(&f, &stmt)).contains("Unsupported TPM version"));

        // An AIK issued by a root missing from the metadata
        let config = VerifierConfig::default();
        let other_root = TestCertificate::self_signed("Other Root CA", CertOptions::ca());
        let anchors = anchors_with(&other_root);
        let ctx = VerificationContext::new(&config, &anchors);
        let result = verify_tpm_attestation(&ctx, &f.stmt, &f.auth_data, &f.client_data_hash);
        assert!(error_message(result).contains("not issued by a trusted anchor"));
    }

    #[test]
    fn test_verify_aik_certificate_requirements() {
        let root = TestCertificate::self_signed("TPM Root CA", CertOptions::ca());

        let aik = root.issue("", CertOptions::aik());
        assert!(verify_aik_certificate(&parse_certificate(&aik.der).unwrap()).is_ok());

        let named = root.issue("Named AIK", CertOptions::aik().with_subject());
        let result = verify_aik_certificate(&parse_certificate(&named.der).unwrap());
        assert!(result.is_err());

        let ca = root.issue("", CertOptions::aik().with_ca(true));
        assert!(verify_aik_certificate(&parse_certificate(&ca.der).unwrap()).is_err());

        let no_eku = root.issue("", CertOptions::leaf());
        assert!(verify_aik_certificate(&parse_certificate(&no_eku.der).unwrap()).is_err());
    }

    #[test]
    fn test_parse_rsa_pub_area() {
        let modulus = vec![0xC5; 256];
        let mut area = Vec::new();
        area.extend_from_slice(&TPM_ALG_RSA.to_be_bytes());
        area.extend_from_slice(&TPM_ALG_SHA1.to_be_bytes());
        area.extend_from_slice(&0x0006_0472u32.to_be_bytes());
        area.extend_from_slice(&tpm2b(&[0x11; 32]));
        area.extend_from_slice(&TPM_ALG_NULL.to_be_bytes());
        // RSASSA scheme with SHA-256
        area.extend_from_slice(&0x0014u16.to_be_bytes());
        area.extend_from_slice(&TPM_ALG_SHA256.to_be_bytes());
        area.extend_from_slice(&2048u16.to_be_bytes());
        area.extend_from_slice(&0u32.to_be_bytes());
        area.extend_from_slice(&tpm2b(&modulus));

        let parsed = TpmPublicArea::parse(&area).unwrap();

        assert_eq!(parsed.name_alg, TPM_ALG_SHA1);
        assert_eq!(
            parsed.unique,
            TpmUnique::Rsa {
                modulus: modulus.clone(),
                exponent: 65537
            }
        );
        let matching = CoseKey::decode(&rsa_cose_key(&modulus, &[1, 0, 1], -257)).unwrap();
        assert!(parsed.verify_matches(&matching).is_ok());
        let other = CoseKey::decode(&rsa_cose_key(&modulus, &[3], -257)).unwrap();
        assert!(parsed.verify_matches(&other).is_err());

        // Truncated and over-long structures are malformed
        assert!(TpmPublicArea::parse(&area[..area.len() - 1]).is_err());
        let mut long = area.clone();
        long.push(0);
        assert!(TpmPublicArea::parse(&long).is_err());
    }

    #[test]
    fn test_parse_cert_info_truncated() {
        let info = cert_info(TPM_GENERATED_VALUE, &[1; 32], &[2; 34]);
        assert!(TpmAttestation::parse(&info).is_ok());
        assert!(TpmAttestation::parse(&info[..20]).is_err());
    }
}
