use std::collections::HashMap;

use uuid::Uuid;
use x509_parser::{pem::Pem, prelude::*};

use crate::errors::VerificationError;

/// Source of attestation trust anchors, usually backed by a metadata service.
///
/// Implementations hand out already-fetched DER certificates. Any error is
/// treated by the verifier as a failed verification, never as a skipped check.
pub trait TrustAnchorProvider: Send + Sync {
    /// Trust anchors registered for an authenticator model. May be empty.
    fn trust_anchors(&self, aaguid: &Uuid) -> Result<Vec<Vec<u8>>, VerificationError>;

    /// Global root store searched for legacy U2F attestation chains.
    fn root_certificates(&self) -> Result<Vec<Vec<u8>>, VerificationError>;
}

/// In-memory trust anchor store.
#[derive(Debug, Clone, Default)]
pub struct StaticTrustAnchors {
    anchors: HashMap<Uuid, Vec<Vec<u8>>>,
    roots: Vec<Vec<u8>>,
}

impl StaticTrustAnchors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a DER certificate as trust anchor for `aaguid`.
    pub fn add_der(&mut self, aaguid: Uuid, der: &[u8]) -> Result<(), VerificationError> {
        ensure_certificate(der)?;
        tracing::debug!("Adding trust anchor for AAGUID {}", aaguid);
        self.anchors.entry(aaguid).or_default().push(der.to_vec());
        Ok(())
    }

    /// Registers every certificate in a PEM bundle as trust anchor for `aaguid`.
    pub fn add_pem(&mut self, aaguid: Uuid, pem: &str) -> Result<usize, VerificationError> {
        let certs = certificates_from_pem(pem)?;
        let count = certs.len();
        for der in certs {
            self.add_der(aaguid, &der)?;
        }
        Ok(count)
    }

    /// Adds a certificate to the global root store.
    pub fn add_root_der(&mut self, der: &[u8]) -> Result<(), VerificationError> {
        ensure_certificate(der)?;
        self.roots.push(der.to_vec());
        Ok(())
    }

    pub fn add_root_pem(&mut self, pem: &str) -> Result<usize, VerificationError> {
        let certs = certificates_from_pem(pem)?;
        let count = certs.len();
        for der in certs {
            self.add_root_der(&der)?;
        }
        Ok(count)
    }
}

impl TrustAnchorProvider for StaticTrustAnchors {
    fn trust_anchors(&self, aaguid: &Uuid) -> Result<Vec<Vec<u8>>, VerificationError> {
        Ok(self.anchors.get(aaguid).cloned().unwrap_or_default())
    }

    fn root_certificates(&self) -> Result<Vec<Vec<u8>>, VerificationError> {
        Ok(self.roots.clone())
    }
}

fn ensure_certificate(der: &[u8]) -> Result<(), VerificationError> {
    X509Certificate::from_der(der).map_err(|e| {
        VerificationError::Config(format!("Failed to parse trust anchor certificate: {e}"))
    })?;
    Ok(())
}

fn certificates_from_pem(pem: &str) -> Result<Vec<Vec<u8>>, VerificationError> {
    let mut certs = Vec::new();
    for block in Pem::iter_from_buffer(pem.as_bytes()) {
        let block = block
            .map_err(|e| VerificationError::Config(format!("Failed to parse PEM: {e}")))?;
        if block.label == "CERTIFICATE" {
            certs.push(block.contents);
        }
    }
    if certs.is_empty() {
        return Err(VerificationError::Config(
            "No certificate found in PEM data".to_string(),
        ));
    }
    Ok(certs)
}
