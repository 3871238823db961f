use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::domain::CredentialSource;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("Invalid secret: {0}")]
    InvalidSecret(String),
}

/// API key plus HMAC-SHA256 secret, signing payloads as lowercase hex
#[derive(Clone)]
pub struct HmacCredentials {
    api_key: String,
    mac: HmacSha256,
}

impl HmacCredentials {
    pub fn new(api_key: impl Into<String>, secret: &str) -> Result<Self, SignerError> {
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| SignerError::InvalidSecret(e.to_string()))?;
        Ok(HmacCredentials {
            api_key: api_key.into(),
            mac,
        })
    }
}

impl CredentialSource for HmacCredentials {
    fn api_key(&self) -> &str {
        &self.api_key
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for HmacCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacCredentials")
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}
