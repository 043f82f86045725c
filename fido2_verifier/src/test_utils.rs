//! Test utilities for building genuine attestation material
//!
//! Certificates are assembled as DER by hand and signed with freshly generated
//! ring ECDSA P-256 keys, so every positive-path test exercises real signatures
//! and real chain building. Nothing here is compiled outside of tests.

use std::sync::atomic::{AtomicU32, Ordering};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use ciborium::value::Value as CborValue;
use ring::{
    rand::SystemRandom,
    signature::{ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair, KeyPair},
};

use crate::attestation::AttestationStatement;
use crate::utils::sha256;

pub(crate) const TEST_RP_ID: &str = "example.com";
pub(crate) const TEST_ORIGIN: &str = "https://example.com";

const OID_EC_PUBLIC_KEY: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01];
const OID_PRIME256V1: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x03, 0x01, 0x07];
const OID_ECDSA_WITH_SHA256: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x02];
const OID_ED25519: &[u8] = &[0x2B, 0x65, 0x70];
const OID_COMMON_NAME: &[u8] = &[0x55, 0x04, 0x03];
const OID_BASIC_CONSTRAINTS: &[u8] = &[0x55, 0x1D, 0x13];
const OID_EXTENDED_KEY_USAGE: &[u8] = &[0x55, 0x1D, 0x25];
const OID_FIDO_GEN_CE_AAGUID: &[u8] = &[
    0x2B, 0x06, 0x01, 0x04, 0x01, 0x82, 0xE5, 0x1C, 0x01, 0x01, 0x04,
];
pub(crate) const OID_TCG_KP_AIK_CERTIFICATE: &[u8] = &[0x67, 0x81, 0x05, 0x08, 0x03];

static SERIAL: AtomicU32 = AtomicU32::new(1);

/// ECDSA P-256 key pair with its PKCS#8 document.
pub(crate) struct TestKey {
    pub pkcs8: Vec<u8>,
    key_pair: EcdsaKeyPair,
}

impl TestKey {
    /// Uncompressed public point, `0x04 || X || Y`
    pub fn public_point(&self) -> Vec<u8> {
        self.key_pair.public_key().as_ref().to_vec()
    }

    /// ASN.1 DER encoded ECDSA signature over SHA-256(msg)
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        let rng = SystemRandom::new();
        self.key_pair
            .sign(&rng, msg)
            .expect("signing with a test key")
            .as_ref()
            .to_vec()
    }
}

pub(crate) fn generate_key() -> TestKey {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
        .expect("generating a test key");
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
        .expect("loading a test key");
    TestKey {
        pkcs8: pkcs8.as_ref().to_vec(),
        key_pair,
    }
}

// DER building blocks

pub(crate) fn der_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&der_length(content.len()));
    out.extend_from_slice(content);
    out
}

fn der_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes = (len as u32).to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(3);
    let mut out = vec![0x80 | (4 - start) as u8];
    out.extend_from_slice(&bytes[start..]);
    out
}

pub(crate) fn der_sequence(parts: &[Vec<u8>]) -> Vec<u8> {
    der_tlv(0x30, &parts.concat())
}

pub(crate) fn der_set(parts: &[Vec<u8>]) -> Vec<u8> {
    der_tlv(0x31, &parts.concat())
}

pub(crate) fn der_oid(oid: &[u8]) -> Vec<u8> {
    der_tlv(0x06, oid)
}

pub(crate) fn der_octet_string(content: &[u8]) -> Vec<u8> {
    der_tlv(0x04, content)
}

/// Non-negative INTEGER in minimal form.
pub(crate) fn der_integer(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(7);
    let mut content = bytes[start..].to_vec();
    if content[0] & 0x80 != 0 {
        content.insert(0, 0x00);
    }
    der_tlv(0x02, &content)
}

pub(crate) fn der_enumerated(value: u8) -> Vec<u8> {
    der_tlv(0x0A, &[value])
}

/// Context-specific constructed tag, using the high-tag-number form above 30.
pub(crate) fn der_explicit(tag_number: u32, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    if tag_number < 31 {
        out.push(0xA0 | tag_number as u8);
    } else {
        out.push(0xBF);
        let mut groups = Vec::new();
        let mut n = tag_number;
        loop {
            groups.push((n & 0x7F) as u8);
            n >>= 7;
            if n == 0 {
                break;
            }
        }
        groups.reverse();
        let last = groups.len() - 1;
        for (i, g) in groups.iter().enumerate() {
            out.push(if i == last { *g } else { *g | 0x80 });
        }
    }
    out.extend_from_slice(&der_length(content.len()));
    out.extend_from_slice(content);
    out
}

fn der_bit_string(content: &[u8]) -> Vec<u8> {
    let mut bits = vec![0x00];
    bits.extend_from_slice(content);
    der_tlv(0x03, &bits)
}

fn der_name(common_name: Option<&str>) -> Vec<u8> {
    match common_name {
        Some(cn) => der_sequence(&[der_set(&[der_sequence(&[
            der_oid(OID_COMMON_NAME),
            der_tlv(0x0C, cn.as_bytes()),
        ])])]),
        None => der_sequence(&[]),
    }
}

/// X.509 extension with an arbitrary DER value.
pub(crate) fn der_extension(oid: &[u8], critical: bool, value: &[u8]) -> Vec<u8> {
    let mut parts = vec![der_oid(oid)];
    if critical {
        parts.push(der_tlv(0x01, &[0xFF]));
    }
    parts.push(der_octet_string(value));
    der_sequence(&parts)
}

/// Options for a generated certificate.
#[derive(Clone)]
pub(crate) struct CertOptions {
    ca: bool,
    empty_subject: bool,
    aaguid: Option<[u8; 16]>,
    aik_eku: bool,
    extensions: Vec<Vec<u8>>,
    ed25519_key: Option<Vec<u8>>,
    not_before: &'static str,
    not_after: &'static str,
}

impl CertOptions {
    pub fn ca() -> Self {
        Self {
            ca: true,
            empty_subject: false,
            aaguid: None,
            aik_eku: false,
            extensions: Vec::new(),
            ed25519_key: None,
            not_before: "200101000000Z",
            not_after: "491231235959Z",
        }
    }

    pub fn leaf() -> Self {
        Self {
            ca: false,
            ..Self::ca()
        }
    }

    /// TPM attestation identity key certificate: empty subject and the AIK EKU.
    pub fn aik() -> Self {
        Self {
            empty_subject: true,
            aik_eku: true,
            ..Self::leaf()
        }
    }

    pub fn with_aaguid(mut self, aaguid: [u8; 16]) -> Self {
        self.aaguid = Some(aaguid);
        self
    }

    pub fn with_extension(mut self, extension: Vec<u8>) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn with_ca(mut self, ca: bool) -> Self {
        self.ca = ca;
        self
    }

    /// Certifies the given Ed25519 public key instead of the P-256 key.
    pub fn with_ed25519_key(mut self, public_key: &[u8]) -> Self {
        self.ed25519_key = Some(public_key.to_vec());
        self
    }

    pub fn with_validity(mut self, not_before: &'static str, not_after: &'static str) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }

    pub fn with_subject(mut self) -> Self {
        self.empty_subject = false;
        self
    }
}

/// A generated certificate together with its private key.
pub(crate) struct TestCertificate {
    pub der: Vec<u8>,
    pub key: TestKey,
    subject: Vec<u8>,
}

impl TestCertificate {
    pub fn self_signed(common_name: &str, options: CertOptions) -> Self {
        let key = generate_key();
        let subject = der_name(Some(common_name));
        let tbs = build_tbs(&subject, &subject, &key.public_point(), &options);
        let der = sign_tbs(&tbs, &key);
        Self { der, key, subject }
    }

    pub fn issue(&self, common_name: &str, options: CertOptions) -> TestCertificate {
        self.issue_with_key(common_name, generate_key(), options)
    }

    pub fn issue_with_key(
        &self,
        common_name: &str,
        key: TestKey,
        options: CertOptions,
    ) -> TestCertificate {
        let subject = if options.empty_subject {
            der_name(None)
        } else {
            der_name(Some(common_name))
        };
        let tbs = build_tbs(&self.subject, &subject, &key.public_point(), &options);
        let der = sign_tbs(&tbs, &self.key);
        TestCertificate { der, key, subject }
    }

    /// The certificate DER with one byte of its public key flipped.
    pub fn tampered_key_der(&self) -> Vec<u8> {
        let point = self.key.public_point();
        let position = self
            .der
            .windows(point.len())
            .position(|w| w == point.as_slice())
            .unwrap();
        flip(&self.der, position + 10)
    }
}

fn build_tbs(issuer: &[u8], subject: &[u8], public_point: &[u8], options: &CertOptions) -> Vec<u8> {
    let serial = SERIAL.fetch_add(1, Ordering::Relaxed);
    let mut serial_bytes = vec![0x10];
    serial_bytes.extend_from_slice(&serial.to_be_bytes());

    let basic_constraints = if options.ca {
        der_extension(
            OID_BASIC_CONSTRAINTS,
            true,
            &der_sequence(&[der_tlv(0x01, &[0xFF])]),
        )
    } else {
        der_extension(OID_BASIC_CONSTRAINTS, true, &der_sequence(&[]))
    };
    let mut extensions = vec![basic_constraints];
    if options.aik_eku {
        extensions.push(der_extension(
            OID_EXTENDED_KEY_USAGE,
            false,
            &der_sequence(&[der_oid(OID_TCG_KP_AIK_CERTIFICATE)]),
        ));
    }
    if let Some(aaguid) = options.aaguid {
        extensions.push(der_extension(
            OID_FIDO_GEN_CE_AAGUID,
            false,
            &der_octet_string(&aaguid),
        ));
    }
    extensions.extend(options.extensions.iter().cloned());

    let spki = match &options.ed25519_key {
        Some(key) => der_sequence(&[der_sequence(&[der_oid(OID_ED25519)]), der_bit_string(key)]),
        None => der_sequence(&[
            der_sequence(&[der_oid(OID_EC_PUBLIC_KEY), der_oid(OID_PRIME256V1)]),
            der_bit_string(public_point),
        ]),
    };

    der_sequence(&[
        der_tlv(0xA0, &der_tlv(0x02, &[0x02])),
        der_tlv(0x02, &serial_bytes),
        der_sequence(&[der_oid(OID_ECDSA_WITH_SHA256)]),
        issuer.to_vec(),
        der_sequence(&[
            der_tlv(0x17, options.not_before.as_bytes()),
            der_tlv(0x17, options.not_after.as_bytes()),
        ]),
        subject.to_vec(),
        spki,
        der_tlv(0xA3, &der_sequence(&extensions)),
    ])
}

fn sign_tbs(tbs: &[u8], issuer_key: &TestKey) -> Vec<u8> {
    let signature = issuer_key.sign(tbs);
    der_sequence(&[
        tbs.to_vec(),
        der_sequence(&[der_oid(OID_ECDSA_WITH_SHA256)]),
        der_bit_string(&signature),
    ])
}

pub(crate) fn pem_encode(der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for chunk in encoded.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

// WebAuthn structures

pub(crate) fn ec2_cose_key(point: &[u8], alg: i64) -> Vec<u8> {
    let map = CborValue::Map(vec![
        (CborValue::Integer(1.into()), CborValue::Integer(2.into())),
        (CborValue::Integer(3.into()), CborValue::Integer(alg.into())),
        (CborValue::Integer((-1).into()), CborValue::Integer(1.into())),
        (
            CborValue::Integer((-2).into()),
            CborValue::Bytes(point[1..33].to_vec()),
        ),
        (
            CborValue::Integer((-3).into()),
            CborValue::Bytes(point[33..65].to_vec()),
        ),
    ]);
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(&map, &mut bytes).expect("encoding COSE key");
    bytes
}

pub(crate) fn rsa_cose_key(n: &[u8], e: &[u8], alg: i64) -> Vec<u8> {
    let map = CborValue::Map(vec![
        (CborValue::Integer(1.into()), CborValue::Integer(3.into())),
        (CborValue::Integer(3.into()), CborValue::Integer(alg.into())),
        (CborValue::Integer((-1).into()), CborValue::Bytes(n.to_vec())),
        (CborValue::Integer((-2).into()), CborValue::Bytes(e.to_vec())),
    ]);
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(&map, &mut bytes).expect("encoding COSE key");
    bytes
}

pub(crate) fn build_auth_data(
    rp_id: &str,
    flags: u8,
    counter: u32,
    aaguid: [u8; 16],
    credential_id: &[u8],
    cose_key: &[u8],
) -> Vec<u8> {
    let mut auth_data = build_assertion_auth_data(rp_id, flags, counter);
    auth_data.extend_from_slice(&aaguid);
    auth_data.extend_from_slice(&(credential_id.len() as u16).to_be_bytes());
    auth_data.extend_from_slice(credential_id);
    auth_data.extend_from_slice(cose_key);
    auth_data
}

pub(crate) fn build_assertion_auth_data(rp_id: &str, flags: u8, counter: u32) -> Vec<u8> {
    let mut auth_data = sha256(rp_id.as_bytes()).to_vec();
    auth_data.push(flags);
    auth_data.extend_from_slice(&counter.to_be_bytes());
    auth_data
}

/// Builds an attestation statement from `(name, value)` pairs.
pub(crate) fn statement(entries: Vec<(&str, CborValue)>) -> AttestationStatement {
    AttestationStatement::new(
        entries
            .into_iter()
            .map(|(k, v)| (CborValue::Text(k.to_string()), v))
            .collect(),
    )
}

pub(crate) fn x5c_value(chain: &[&[u8]]) -> CborValue {
    CborValue::Array(chain.iter().map(|c| CborValue::Bytes(c.to_vec())).collect())
}

pub(crate) fn test_client_data_hash() -> [u8; 32] {
    sha256(br#"{"type":"webauthn.create","challenge":"dGVzdA","origin":"https://example.com"}"#)
}

/// Flips one bit of the byte at `index`.
pub(crate) fn flip(bytes: &[u8], index: usize) -> Vec<u8> {
    let mut out = bytes.to_vec();
    out[index] ^= 0x01;
    out
}
