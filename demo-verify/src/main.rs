use std::{env, fs, sync::Arc};

use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use fido2_verifier::{
    AssertionResponse, MemoryCredentialStore, RegistrationResponse, StaticTrustAnchors, Verifier,
    VerifierConfig,
};

/// A recorded ceremony: one registration followed by any number of assertions.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ceremony {
    #[serde(default)]
    trust_anchors: Vec<TrustAnchor>,
    /// PEM bundles of FIDO U2F root certificates
    #[serde(default)]
    root_certificates: Vec<String>,
    registration: RegistrationResponse,
    #[serde(default)]
    assertions: Vec<AssertionResponse>,
}

#[derive(Debug, Deserialize)]
struct TrustAnchor {
    aaguid: Uuid,
    pem: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fido2_verifier=debug,demo_verify=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = env::args()
        .nth(1)
        .ok_or("usage: demo-verify <ceremony.json>")?;
    let ceremony: Ceremony = serde_json::from_str(&fs::read_to_string(&path)?)?;

    let mut anchors = StaticTrustAnchors::new();
    for anchor in &ceremony.trust_anchors {
        let count = anchors.add_pem(anchor.aaguid, &anchor.pem)?;
        tracing::debug!("Loaded {} trust anchor(s) for {}", count, anchor.aaguid);
    }
    for pem in &ceremony.root_certificates {
        anchors.add_root_pem(pem)?;
    }

    let config = VerifierConfig::from_env()?;
    tracing::info!("Verifying {} for RP ID {}", path, config.rp_id);
    let verifier = Verifier::new(config, Arc::new(anchors));
    let store = MemoryCredentialStore::new();

    let record = verifier.register(&store, &ceremony.registration)?;
    println!("{}", serde_json::to_string_pretty(&record)?);

    for (i, response) in ceremony.assertions.iter().enumerate() {
        match verifier.verify_assertion(&store, response) {
            Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
            Err(e) => {
                tracing::error!("Assertion {} rejected: {}", i, e);
                return Err(e.into());
            }
        }
    }

    Ok(())
}
