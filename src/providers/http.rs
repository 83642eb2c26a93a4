//! HTTP plumbing shared by the REST adapters.
//!
//! [`Transport`] owns the `reqwest` client and the authentication headers an
//! adapter was configured with, and turns every response into either a JSON
//! body or a [`CallFailure`] that maps one-to-one onto an [`Outcome`] variant.

use super::{Outcome, Provider};
use crate::config::{Credentials, ProviderConfig};
use base64::prelude::*;
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use sha2::{Sha256, Sha512};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum CallFailure {
    /// 4xx: the provider understood and refused.
    Rejected {
        reason: String,
        raw: serde_json::Value,
    },
    /// Transport error, timeout, 5xx or an unparseable body.
    Unavailable(String),
}

impl From<CallFailure> for Outcome {
    fn from(failure: CallFailure) -> Self {
        match failure {
            CallFailure::Rejected { reason, raw } => Outcome::Rejected { reason, raw },
            CallFailure::Unavailable(reason) => Outcome::Unavailable { reason },
        }
    }
}

pub type CallResult = std::result::Result<serde_json::Value, CallFailure>;

pub struct Transport {
    provider: Provider,
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
}

impl Transport {
    /// Builds a transport for `config`. Returns `None` when the credentials
    /// cannot be expressed as headers, which callers treat as "run simulated".
    pub fn new(provider: Provider, config: &ProviderConfig) -> Option<Self> {
        let headers = auth_headers(&config.credentials)?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| warn!(%provider, error = %e, "failed to build HTTP client"))
            .ok()?;
        Some(Self {
            provider,
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            headers,
        })
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> CallResult {
        let request = self
            .client
            .post(self.url(path))
            .headers(self.headers.clone())
            .json(body);
        self.send(request).await
    }

    pub async fn get(&self, path: &str) -> CallResult {
        let request = self.client.get(self.url(path)).headers(self.headers.clone());
        self.send(request).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> CallResult {
        let response = request.send().await.map_err(|e| {
            warn!(provider = %self.provider, error = %e, "provider request failed");
            CallFailure::Unavailable(if e.is_timeout() {
                "request timed out".to_string()
            } else {
                format!("request failed: {e}")
            })
        })?;

        let status = response.status();
        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(e) if status.is_success() => {
                return Err(CallFailure::Unavailable(format!(
                    "unparseable response body: {e}"
                )));
            }
            Err(_) => serde_json::Value::Null,
        };
        debug!(provider = %self.provider, status = status.as_u16(), "provider responded");

        if status.is_success() {
            Ok(body)
        } else if status.is_client_error() {
            Err(CallFailure::Rejected {
                reason: error_message(&body)
                    .unwrap_or_else(|| format!("provider returned {status}")),
                raw: body,
            })
        } else {
            Err(CallFailure::Unavailable(format!("provider returned {status}")))
        }
    }
}

/// The transport an adapter should call through, or `None` for simulated mode.
///
/// Simulated mode is chosen when configuration forces it, when no
/// credentials are configured, or when `well_formed` rejects them.
pub fn live_transport(
    provider: Provider,
    config: &ProviderConfig,
    well_formed: impl Fn(&Credentials) -> bool,
) -> Option<Transport> {
    if config.simulated {
        info!(%provider, "simulated mode forced by configuration");
        return None;
    }
    if config.credentials.is_none() {
        warn!(%provider, "no credentials configured, running simulated");
        return None;
    }
    if !well_formed(&config.credentials) {
        warn!(%provider, "malformed credentials, running simulated");
        return None;
    }
    Transport::new(provider, config)
}

/// Picks the human-readable reason out of the usual error body shapes.
pub fn error_message(body: &serde_json::Value) -> Option<String> {
    ["message", "error", "reason", "detail"]
        .iter()
        .find_map(|key| body.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

fn auth_headers(credentials: &Credentials) -> Option<HeaderMap> {
    let mut headers = HeaderMap::new();
    match credentials {
        Credentials::None => return None,
        Credentials::Bearer(key) => {
            headers.insert(AUTHORIZATION, sensitive(&format!("Bearer {}", key.as_str()))?);
        }
        Credentials::ClientPair {
            client_id,
            client_secret,
        } => {
            headers.insert(
                HeaderName::from_static("x-client-id"),
                HeaderValue::from_str(client_id).ok()?,
            );
            headers.insert(
                HeaderName::from_static("x-client-secret"),
                sensitive(client_secret)?,
            );
        }
        Credentials::ApiKey(key) => {
            headers.insert(HeaderName::from_static("x-api-key"), sensitive(key)?);
        }
    }
    Some(headers)
}

fn sensitive(value: &str) -> Option<HeaderValue> {
    let mut value = HeaderValue::from_str(value).ok()?;
    value.set_sensitive(true);
    Some(value)
}

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Signs `payload` the way providers sign webhook bodies. HMAC takes keys of
/// any length, so the empty fallback is unreachable.
pub fn hmac_sha256(secret: &[u8], payload: &[u8]) -> Vec<u8> {
    match HmacSha256::new_from_slice(secret) {
        Ok(mut mac) => {
            mac.update(payload);
            mac.finalize().into_bytes().to_vec()
        }
        Err(_) => Vec::new(),
    }
}

pub fn hmac_sha512(secret: &[u8], payload: &[u8]) -> Vec<u8> {
    match HmacSha512::new_from_slice(secret) {
        Ok(mut mac) => {
            mac.update(payload);
            mac.finalize().into_bytes().to_vec()
        }
        Err(_) => Vec::new(),
    }
}

/// Constant-time check of a hex-encoded HMAC-SHA256 signature.
pub fn verify_sha256_hex(secret: &[u8], payload: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Constant-time check of a hex-encoded HMAC-SHA512 signature.
pub fn verify_sha512_hex(secret: &[u8], payload: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Constant-time check of a base64-encoded HMAC-SHA256 signature.
pub fn verify_sha256_base64(secret: &[u8], payload: &[u8], signature: &str) -> bool {
    let Ok(expected) = BASE64_STANDARD.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}
