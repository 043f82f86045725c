use chrono::{DateTime, Utc};
use der_parser::der::parse_der_octetstring;
use webpki::EndEntityCert;
use x509_parser::{
    extensions::ParsedExtension,
    prelude::*,
    public_key::PublicKey,
    time::ASN1Time,
};

use crate::cose::{CoseAlgorithm, CoseKey, CosePublicKey, KeyType};
use crate::errors::VerificationError;

// OID for FIDO AAGUID extension: 1.3.6.1.4.1.45724.1.1.4
pub(crate) const OID_FIDO_GEN_CE_AAGUID: &[u8] = &[
    0x2B, 0x06, 0x01, 0x04, 0x01, 0x82, 0xE5, 0x1C, 0x01, 0x01, 0x04,
];

pub(crate) fn parse_certificate(der: &[u8]) -> Result<X509Certificate<'_>, VerificationError> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|e| {
        VerificationError::Verification(format!("Failed to parse certificate: {e}"))
    })?;
    Ok(cert)
}

fn asn1_time(now: DateTime<Utc>) -> Result<ASN1Time, VerificationError> {
    ASN1Time::from_timestamp(now.timestamp())
        .map_err(|e| VerificationError::Verification(format!("Failed to convert time: {e}")))
}

pub(crate) fn verify_validity(
    cert: &X509Certificate,
    now: DateTime<Utc>,
) -> Result<(), VerificationError> {
    if !cert.validity().is_valid_at(asn1_time(now)?) {
        return Err(VerificationError::Verification(
            "Certificate is expired or not yet valid".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn is_ca(cert: &X509Certificate) -> bool {
    cert.extensions().iter().any(|ext| {
        ext.oid.as_bytes() == oid_registry::OID_X509_EXT_BASIC_CONSTRAINTS.as_bytes()
            && matches!(ext.parsed_extension(), ParsedExtension::BasicConstraints(bc) if bc.ca)
    })
}

/// Validates an attestation chain (leaf first) against a set of trust anchors.
///
/// Each certificate must be within its validity period at `now`, every
/// certificate above the leaf must be a CA, each link must be signed by the
/// next certificate, and the last certificate must be one of the anchors or be
/// issued by one. Returns the DER of the leaf certificate.
pub fn verify_attestation_certificates(
    chain: &[Vec<u8>],
    trust_anchors: &[Vec<u8>],
    now: DateTime<Utc>,
) -> Result<Vec<u8>, VerificationError> {
    let leaf_der = chain.first().ok_or_else(|| {
        VerificationError::Verification("Empty attestation certificate chain".to_string())
    })?;
    if trust_anchors.is_empty() {
        return Err(VerificationError::Verification(
            "No trust anchors available for attestation chain".to_string(),
        ));
    }

    let time = asn1_time(now)?;
    let certs = chain
        .iter()
        .map(|der| parse_certificate(der))
        .collect::<Result<Vec<_>, _>>()?;

    for (position, cert) in certs.iter().enumerate() {
        if !cert.validity().is_valid_at(time) {
            return Err(VerificationError::Verification(format!(
                "Certificate {position} in chain is expired or not yet valid"
            )));
        }
        if position > 0 && !is_ca(cert) {
            return Err(VerificationError::Verification(format!(
                "Certificate {position} in chain is not a CA certificate"
            )));
        }
    }

    for (position, pair) in certs.windows(2).enumerate() {
        pair[0]
            .verify_signature(Some(pair[1].public_key()))
            .map_err(|_| {
                VerificationError::Verification(format!(
                    "Certificate {position} in chain is not signed by its issuer"
                ))
            })?;
    }

    let (last_der, last) = match (chain.last(), certs.last()) {
        (Some(der), Some(cert)) => (der, cert),
        _ => {
            return Err(VerificationError::Verification(
                "Empty attestation certificate chain".to_string(),
            ));
        }
    };

    let anchored = trust_anchors.iter().any(|anchor_der| {
        if anchor_der == last_der {
            return true;
        }
        let Ok((_, anchor)) = X509Certificate::from_der(anchor_der) else {
            tracing::warn!("Skipping unparsable trust anchor");
            return false;
        };
        anchor.subject().as_raw() == last.issuer().as_raw()
            && anchor.validity().is_valid_at(time)
            && is_ca(&anchor)
            && last.verify_signature(Some(anchor.public_key())).is_ok()
    });

    if !anchored {
        return Err(VerificationError::Verification(
            "Certificate chain does not terminate at a trusted anchor".to_string(),
        ));
    }

    tracing::debug!("Attestation chain of {} certificate(s) verified", chain.len());
    Ok(leaf_der.clone())
}

/// Picks candidate roots for a legacy U2F leaf certificate from a global root store.
///
/// Roots whose subject equals the leaf issuer are preferred; otherwise roots
/// whose subject key identifier equals the leaf's authority key identifier.
pub fn select_root_certificates(
    leaf_der: &[u8],
    roots: &[Vec<u8>],
) -> Result<Vec<Vec<u8>>, VerificationError> {
    let leaf = parse_certificate(leaf_der)?;

    let parsed_roots: Vec<(&Vec<u8>, X509Certificate)> = roots
        .iter()
        .filter_map(|der| X509Certificate::from_der(der).ok().map(|(_, c)| (der, c)))
        .collect();

    let by_subject: Vec<Vec<u8>> = parsed_roots
        .iter()
        .filter(|(_, root)| root.subject().as_raw() == leaf.issuer().as_raw())
        .map(|(der, _)| (*der).clone())
        .collect();
    if !by_subject.is_empty() {
        return Ok(by_subject);
    }

    let Some(authority_key_id) = authority_key_identifier(&leaf) else {
        return Ok(Vec::new());
    };
    Ok(parsed_roots
        .iter()
        .filter(|(_, root)| subject_key_identifier(root) == Some(authority_key_id))
        .map(|(der, _)| (*der).clone())
        .collect())
}

fn authority_key_identifier<'a>(cert: &'a X509Certificate) -> Option<&'a [u8]> {
    cert.extensions()
        .iter()
        .find_map(|ext| match ext.parsed_extension() {
            ParsedExtension::AuthorityKeyIdentifier(aki) => {
                aki.key_identifier.as_ref().map(|id| id.0)
            }
            _ => None,
        })
}

fn subject_key_identifier<'a>(cert: &'a X509Certificate) -> Option<&'a [u8]> {
    cert.extensions()
        .iter()
        .find_map(|ext| match ext.parsed_extension() {
            ParsedExtension::SubjectKeyIdentifier(ski) => Some(ski.0),
            _ => None,
        })
}

/// Checks that `child` is signed by the key of `issuer`.
pub fn verify_issued_by(child_der: &[u8], issuer_der: &[u8]) -> Result<(), VerificationError> {
    let child = parse_certificate(child_der)?;
    let issuer = parse_certificate(issuer_der)?;
    child
        .verify_signature(Some(issuer.public_key()))
        .map_err(|_| {
            VerificationError::Verification(
                "Certificate is not signed by the expected issuer".to_string(),
            )
        })
}

/// True when the certificate's signature verifies against its own public key.
pub fn is_self_signed(der: &[u8]) -> Result<bool, VerificationError> {
    let cert = parse_certificate(der)?;
    Ok(cert.verify_signature(None).is_ok())
}

/// Verifies `signature` over `data` with the public key of a certificate.
pub fn verify_with_certificate(
    cert_der: &[u8],
    alg: CoseAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> Result<(), VerificationError> {
    if let Some(webpki_alg) = alg.webpki_algorithm() {
        let cert = EndEntityCert::try_from(cert_der).map_err(|e| {
            VerificationError::Verification(format!(
                "Failed to parse attestation certificate: {e:?}"
            ))
        })?;
        return cert
            .verify_signature(webpki_alg, data, signature)
            .map_err(|_| {
                VerificationError::Verification("Attestation signature invalid".to_string())
            });
    }

    // Algorithms webpki does not offer are checked with ring against the SPKI key
    let cert = parse_certificate(cert_der)?;
    let key = cert.public_key().subject_public_key.data.as_ref();
    ring::signature::UnparsedPublicKey::new(alg.ring_algorithm()?, key)
        .verify(data, signature)
        .map_err(|_| VerificationError::Verification("Attestation signature invalid".to_string()))
}

/// Compares a certificate's subject public key with a credential public key.
pub fn certificate_key_matches(
    cert: &X509Certificate,
    cose_key: &CoseKey,
) -> Result<bool, VerificationError> {
    let spki = cert.public_key();
    match &cose_key.key {
        CosePublicKey::Ec2 { .. } | CosePublicKey::Okp { .. } => {
            Ok(spki.subject_public_key.data.as_ref() == cose_key.raw_public_key().as_slice())
        }
        CosePublicKey::Rsa { n, e } => match spki.parsed() {
            Ok(PublicKey::RSA(rsa)) => Ok(trim_zeros(rsa.modulus) == trim_zeros(n)
                && trim_zeros(rsa.exponent) == trim_zeros(e)),
            Ok(_) => Ok(false),
            Err(e) => Err(VerificationError::Verification(format!(
                "Failed to parse certificate public key: {e}"
            ))),
        },
    }
}

/// Key family of a certificate's subject public key.
pub(crate) fn certificate_key_type(cert: &X509Certificate) -> Result<KeyType, VerificationError> {
    let spki = cert.public_key();
    // x509-parser reports Ed25519 keys as `PublicKey::Unknown`
    if spki.algorithm.algorithm == oid_registry::OID_SIG_ED25519 {
        return Ok(KeyType::Okp);
    }
    match spki.parsed() {
        Ok(PublicKey::EC(_)) => Ok(KeyType::Ec2),
        Ok(PublicKey::RSA(_)) => Ok(KeyType::Rsa),
        Ok(_) => Err(VerificationError::Verification(
            "Unsupported certificate public key type".to_string(),
        )),
        Err(e) => Err(VerificationError::Verification(format!(
            "Failed to parse certificate public key: {e}"
        ))),
    }
}

fn trim_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Reads the FIDO AAGUID extension (id-fido-gen-ce-aaguid) if the certificate carries one.
pub fn certificate_aaguid(cert: &X509Certificate) -> Result<Option<[u8; 16]>, VerificationError> {
    let Some(ext) = cert
        .extensions()
        .iter()
        .find(|ext| ext.oid.as_bytes() == OID_FIDO_GEN_CE_AAGUID)
    else {
        return Ok(None);
    };

    // The extension value is an OCTET STRING wrapping the 16 AAGUID bytes
    let (_, octets) = parse_der_octetstring(ext.value).map_err(|_| {
        VerificationError::Verification("Invalid AAGUID extension format".to_string())
    })?;
    let content = octets.as_slice().map_err(|_| {
        VerificationError::Verification("Invalid AAGUID extension format".to_string())
    })?;
    let aaguid: [u8; 16] = content.try_into().map_err(|_| {
        VerificationError::Verification("Invalid AAGUID extension length".to_string())
    })?;
    Ok(Some(aaguid))
}

/// Fails if the certificate carries an AAGUID extension that differs from `aaguid`.
pub(crate) fn verify_certificate_aaguid(
    cert: &X509Certificate,
    aaguid: &[u8; 16],
) -> Result<(), VerificationError> {
    if let Some(cert_aaguid) = certificate_aaguid(cert)? {
        tracing::debug!(
            "Certificate AAGUID: {}",
            uuid::Uuid::from_bytes(cert_aaguid).hyphenated()
        );
        if &cert_aaguid != aaguid {
            return Err(VerificationError::Verification(
                "AAGUID mismatch between certificate and authenticator data".to_string(),
            ));
        }
    }
    Ok(())
}
