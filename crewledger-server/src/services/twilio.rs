//! Twilio integration: request signatures and MMS media download

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::time::Duration;
use thiserror::Error;

type HmacSha1 = Hmac<Sha1>;

const DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Media download errors
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Download failed with HTTP {0}")]
    Status(u16),

    #[error("Empty media body")]
    Empty,
}

/// Downloaded media payload
#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Fetches MMS attachments from the gateway
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<MediaPayload, MediaError>;
}

/// Downloads Twilio media URLs with account credentials
pub struct TwilioMediaFetcher {
    http_client: reqwest::Client,
    account_sid: String,
    auth_token: String,
}

impl TwilioMediaFetcher {
    pub fn new(account_sid: String, auth_token: String) -> Result<Self, MediaError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()
            .map_err(|e| MediaError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            account_sid,
            auth_token,
        })
    }
}

#[async_trait]
impl MediaFetcher for TwilioMediaFetcher {
    /// Single attempt; the caller flags the record on failure
    async fn fetch(&self, url: &str) -> Result<MediaPayload, MediaError> {
        let response = self
            .http_client
            .get(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| MediaError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| MediaError::Network(e.to_string()))?;
        if bytes.is_empty() {
            return Err(MediaError::Empty);
        }

        Ok(MediaPayload {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

/// Compute the `X-Twilio-Signature` for a form POST
///
/// Twilio signs the full URL followed by every POST parameter, sorted by
/// name, with each name immediately followed by its value.
pub fn compute_signature(auth_token: &str, url: &str, params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let mut payload = String::from(url);
    for (key, value) in sorted {
        payload.push_str(key);
        payload.push_str(value);
    }

    // HMAC accepts keys of any length
    let mut mac = match HmacSha1::new_from_slice(auth_token.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Check a request signature in constant time
pub fn validate_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
    provided: &str,
) -> bool {
    let expected = compute_signature(auth_token, url, params);
    if expected.is_empty() || expected.len() != provided.len() {
        return false;
    }
    expected
        .bytes()
        .zip(provided.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// File extension for a media content type, `jpg` when unknown
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
        .as_str()
    {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/heic" => "heic",
        "application/pdf" => "pdf",
        _ => "jpg",
    }
}
