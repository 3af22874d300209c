//! Request signing for state-mutating endpoints.
//!
//! Parameters are canonicalised (sorted by key, URL-encoded), a `timestamp`
//! and `recvWindow` are added, and an HMAC-SHA256 of the canonical string is
//! appended as `signature`. The API key travels in a header and is held as a
//! secret so it never lands in `Debug` output.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
#[error("HMAC key error: {0}")]
pub struct SigningError(String);

/// Header carrying the API key on signed requests.
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

#[derive(Debug)]
pub struct Signer {
    api_key: SecretString,
    secret_key: SecretString,
    recv_window_ms: u64,
}

impl Signer {
    pub fn new(api_key: SecretString, secret_key: SecretString, recv_window_ms: u64) -> Self {
        Self {
            api_key,
            secret_key,
            recv_window_ms,
        }
    }

    /// Value for [`API_KEY_HEADER`].
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.expose_secret().is_empty() && !self.secret_key.expose_secret().is_empty()
    }

    /// Hex HMAC-SHA256 of `payload` under the secret key.
    pub fn sign_payload(&self, payload: &str) -> Result<String, SigningError> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.expose_secret().as_bytes())
            .map_err(|e| SigningError(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Canonical query string with `timestamp`, `recvWindow` and `signature`
    /// appended, ready to send as a query or form body.
    pub fn signed_query(
        &self,
        params: &[(&str, String)],
        timestamp_ms: i64,
    ) -> Result<String, SigningError> {
        let mut all: Vec<(&str, String)> = params.to_vec();
        all.push(("timestamp", timestamp_ms.to_string()));
        all.push(("recvWindow", self.recv_window_ms.to_string()));
        let canonical = canonical_query(&all);
        let signature = self.sign_payload(&canonical)?;
        Ok(format!("{canonical}&signature={signature}"))
    }
}

/// Sort by key and URL-encode into `k=v&k=v` form.
pub fn canonical_query(params: &[(&str, String)]) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.cmp(&b.1)));
    sorted
        .into_iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}
