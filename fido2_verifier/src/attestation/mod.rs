mod android_key;
mod core;
mod none;
mod packed;
mod safetynet;
mod tpm;
mod types;
mod u2f;

pub use self::core::{AttestationFormat, VerificationContext, verify_attestation};
pub use self::types::{AttestationObject, AttestationStatement, CredAndCounterData};
