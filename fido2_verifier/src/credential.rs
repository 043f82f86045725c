use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attestation::CredAndCounterData;
use crate::errors::VerificationError;

/// A registered credential as the verifier reads and updates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// base64url credential ID
    pub credential_id: String,
    pub rp_id: String,
    /// base64url COSE_Key
    pub public_key: String,
    pub signature_algorithm: Option<i64>,
    /// Last accepted signature counter, `None` until first recorded
    pub counter: Option<u32>,
    pub attestation_type: String,
    pub aaguid: Uuid,
}

impl CredentialRecord {
    /// Record for a registration in progress: only the RP ID is known yet.
    pub fn pending(rp_id: &str) -> Self {
        Self {
            credential_id: String::new(),
            rp_id: rp_id.to_string(),
            public_key: String::new(),
            signature_algorithm: None,
            counter: None,
            attestation_type: String::new(),
            aaguid: Uuid::nil(),
        }
    }

    /// Builds the record to persist from a verified attestation.
    pub fn from_attestation(rp_id: &str, data: &CredAndCounterData) -> Self {
        Self {
            credential_id: data.cred_id.clone(),
            rp_id: rp_id.to_string(),
            public_key: data.public_key.clone(),
            signature_algorithm: data.signature_algorithm,
            counter: Some(data.counter),
            attestation_type: data.attestation_type.clone(),
            aaguid: data.aaguid,
        }
    }
}

/// Persistence seam for credential records.
///
/// `update_counter` is a compare-and-swap: it succeeds only when the stored
/// counter still equals `expected`, so two assertions racing on the same
/// credential cannot both be accepted.
pub trait CredentialStore: Send + Sync {
    fn get_credential(&self, credential_id: &str)
    -> Result<Option<CredentialRecord>, VerificationError>;

    fn store_credential(&self, record: CredentialRecord) -> Result<(), VerificationError>;

    fn update_counter(
        &self,
        credential_id: &str,
        expected: Option<u32>,
        new_counter: u32,
    ) -> Result<(), VerificationError>;
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, CredentialRecord>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        tracing::info!("Creating new in-memory credential store");
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, CredentialRecord>>, VerificationError>
    {
        self.entries
            .lock()
            .map_err(|_| VerificationError::Storage("Credential store lock poisoned".to_string()))
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get_credential(
        &self,
        credential_id: &str,
    ) -> Result<Option<CredentialRecord>, VerificationError> {
        Ok(self.lock()?.get(credential_id).cloned())
    }

    fn store_credential(&self, record: CredentialRecord) -> Result<(), VerificationError> {
        let mut entries = self.lock()?;
        if entries.contains_key(&record.credential_id) {
            return Err(VerificationError::Storage(format!(
                "Credential already registered: {}",
                record.credential_id
            )));
        }
        entries.insert(record.credential_id.clone(), record);
        Ok(())
    }

    fn update_counter(
        &self,
        credential_id: &str,
        expected: Option<u32>,
        new_counter: u32,
    ) -> Result<(), VerificationError> {
        let mut entries = self.lock()?;
        let record = entries.get_mut(credential_id).ok_or_else(|| {
            VerificationError::Storage(format!("Credential not found: {credential_id}"))
        })?;
        if record.counter != expected {
            return Err(VerificationError::Storage(format!(
                "Counter for {credential_id} changed concurrently"
            )));
        }
        record.counter = Some(new_counter);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_record(id: &str, counter: Option<u32>) -> CredentialRecord {
        CredentialRecord {
            credential_id: id.to_string(),
            counter,
            public_key: "pk".to_string(),
            attestation_type: "none".to_string(),
            ..CredentialRecord::pending("example.com")
        }
    }

    #[test]
    fn test_store_and_get_credential() {
        let store = MemoryCredentialStore::new();
        store.store_credential(test_record("cred-1", Some(0))).unwrap();

        let record = store.get_credential("cred-1").unwrap().unwrap();
        assert_eq!(record.rp_id, "example.com");
        assert!(store.get_credential("missing").unwrap().is_none());

        let duplicate = store.store_credential(test_record("cred-1", None));
        assert!(matches!(duplicate, Err(VerificationError::Storage(_))));
    }

    #[test]
    fn test_update_counter_compare_and_swap() {
        let store = MemoryCredentialStore::new();
        store.store_credential(test_record("cred-1", Some(3))).unwrap();

        // Given two assertions that both read counter 3
        assert!(store.update_counter("cred-1", Some(3), 4).is_ok());
        // Then the second write-back with the stale value is rejected
        let result = store.update_counter("cred-1", Some(3), 4);
        assert!(matches!(result, Err(VerificationError::Storage(msg)) if msg.contains("changed concurrently")));

        assert_eq!(
            store.get_credential("cred-1").unwrap().unwrap().counter,
            Some(4)
        );
        assert!(store.update_counter("missing", None, 1).is_err());
    }
}
