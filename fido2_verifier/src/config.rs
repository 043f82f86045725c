use std::{env, str::FromStr};

use chrono::TimeDelta;

use crate::errors::VerificationError;

const DEFAULT_SAFETYNET_MAX_AGE_SECS: i64 = 60;
const DEFAULT_SAFETYNET_HOSTNAME: &str = "attest.android.com";

/// Relying-party policy for the user-verified (UV) flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserVerificationPolicy {
    /// UV flag must be set, otherwise verification fails
    Required,
    /// UV is requested from the authenticator but not enforced
    #[default]
    Preferred,
    /// UV is neither requested nor enforced
    Discouraged,
}

impl UserVerificationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserVerificationPolicy::Required => "required",
            UserVerificationPolicy::Preferred => "preferred",
            UserVerificationPolicy::Discouraged => "discouraged",
        }
    }
}

impl FromStr for UserVerificationPolicy {
    type Err = VerificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "required" => Ok(UserVerificationPolicy::Required),
            "preferred" => Ok(UserVerificationPolicy::Preferred),
            "discouraged" => Ok(UserVerificationPolicy::Discouraged),
            invalid => Err(VerificationError::Config(format!(
                "Invalid user verification: {invalid}"
            ))),
        }
    }
}

/// Relying-party settings consumed by the verification engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierConfig {
    pub rp_id: String,
    pub origin: String,
    pub user_verification: UserVerificationPolicy,
    /// Oldest acceptable SafetyNet `timestampMs`, relative to verification time
    pub safetynet_max_age: TimeDelta,
    /// Expected common name of the SafetyNet JWS signing certificate
    pub safetynet_hostname: String,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            rp_id: "localhost".to_string(),
            origin: "http://localhost:3000".to_string(),
            user_verification: UserVerificationPolicy::default(),
            safetynet_max_age: TimeDelta::seconds(DEFAULT_SAFETYNET_MAX_AGE_SECS),
            safetynet_hostname: DEFAULT_SAFETYNET_HOSTNAME.to_string(),
        }
    }
}

impl VerifierConfig {
    /// Creates a configuration for the given origin, deriving the RP ID from its host.
    pub fn new(origin: &str) -> Result<Self, VerificationError> {
        let rp_id = rp_id_from_origin(origin)?;
        Ok(Self {
            rp_id,
            origin: origin.to_string(),
            ..Default::default()
        })
    }

    /// Loads the configuration from environment variables.
    ///
    /// `ORIGIN` is required. `PASSKEY_RP_ID` overrides the RP ID derived from it.
    /// `PASSKEY_USER_VERIFICATION`, `SAFETYNET_MAX_AGE_SECS` and
    /// `SAFETYNET_HOSTNAME` fall back to their defaults when unset or invalid.
    pub fn from_env() -> Result<Self, VerificationError> {
        let origin = env::var("ORIGIN")
            .map_err(|_| VerificationError::Config("ORIGIN must be set".to_string()))?;
        let mut config = Self::new(&origin)?;

        if let Ok(rp_id) = env::var("PASSKEY_RP_ID") {
            if !rp_id.is_empty() {
                config.rp_id = rp_id;
            }
        }

        config.user_verification = match env::var("PASSKEY_USER_VERIFICATION").ok() {
            None => UserVerificationPolicy::default(),
            Some(v) => v.parse().unwrap_or_else(|_| {
                tracing::warn!("Invalid user verification: {}. Using default 'preferred'", v);
                UserVerificationPolicy::default()
            }),
        };

        config.safetynet_max_age = env::var("SAFETYNET_MAX_AGE_SECS")
            .ok()
            .and_then(|v| match v.parse::<i64>() {
                Ok(secs) if secs > 0 => Some(TimeDelta::seconds(secs)),
                _ => {
                    tracing::warn!(
                        "Invalid SafetyNet max age: {}. Using default {}s",
                        v,
                        DEFAULT_SAFETYNET_MAX_AGE_SECS
                    );
                    None
                }
            })
            .unwrap_or(TimeDelta::seconds(DEFAULT_SAFETYNET_MAX_AGE_SECS));

        if let Ok(hostname) = env::var("SAFETYNET_HOSTNAME") {
            if !hostname.is_empty() {
                config.safetynet_hostname = hostname;
            }
        }

        tracing::debug!(
            "Verifier configured for RP ID {} (origin {}, user verification {})",
            config.rp_id,
            config.origin,
            config.user_verification.as_str()
        );
        Ok(config)
    }

    pub fn with_user_verification(mut self, policy: UserVerificationPolicy) -> Self {
        self.user_verification = policy;
        self
    }

    pub fn with_rp_id(mut self, rp_id: &str) -> Self {
        self.rp_id = rp_id.to_string();
        self
    }

    pub fn with_safetynet_max_age(mut self, max_age: TimeDelta) -> Self {
        self.safetynet_max_age = max_age;
        self
    }

    pub fn with_safetynet_hostname(mut self, hostname: &str) -> Self {
        self.safetynet_hostname = hostname.to_string();
        self
    }
}

fn rp_id_from_origin(origin: &str) -> Result<String, VerificationError> {
    origin
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split(['/', ':'])
        .next()
        .filter(|host| !host.is_empty())
        .map(|host| host.to_string())
        .ok_or_else(|| {
            VerificationError::Config(format!("Could not extract RP ID from origin: {origin}"))
        })
}
