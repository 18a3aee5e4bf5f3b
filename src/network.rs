//! Shared HTTP engine: pooled client, page fetches, key exchange.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::consts::{headers, limits, VS_API_URL};
use crate::error::{Error, Result};

/// Payload returned by the key-exchange API, prior to decryption.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub timestamp: i64,
    pub url: String,
}

/// One pooled client shared by every concurrent link flow.
///
/// Constructed once at startup and passed down by `Arc`; per-request state
/// lives in the requests themselves.
pub struct HttpEngine {
    client: Client,
}

impl HttpEngine {
    pub fn new() -> Arc<Self> {
        let mut default_headers = reqwest::header::HeaderMap::new();
        default_headers.insert(
            reqwest::header::REFERER,
            reqwest::header::HeaderValue::from_static(headers::REFERER),
        );

        // No client-wide deadline: downloads stream for as long as they keep
        // moving. Page and key-exchange requests set their own timeouts.
        let client = Client::builder()
            .user_agent(headers::USER_AGENT)
            .default_headers(default_headers)
            .connect_timeout(Duration::from_secs(limits::CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| panic!("HTTP client construction failed: {e}"));

        Arc::new(Self { client })
    }

    /// Raw client handle for streamed downloads.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Fetch an album or item page as text. Non-200 is an upstream failure.
    pub async fn fetch_page(&self, url: &str) -> Result<String> {
        let res = self
            .client
            .get(url)
            .timeout(Duration::from_secs(limits::PAGE_TIMEOUT_SECS))
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            return Err(Error::Upstream {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(res.text().await?)
    }

    /// Trade a slug for its encryption envelope.
    ///
    /// One POST, bounded timeout, no retry here. Callers retry whole-item
    /// resolution with backoff.
    pub async fn exchange_slug(&self, slug: &str) -> Result<Envelope> {
        let res = self
            .client
            .post(VS_API_URL)
            .timeout(Duration::from_secs(limits::VS_TIMEOUT_SECS))
            .json(&serde_json::json!({ "slug": slug }))
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            log::warn!("HTTP {status} getting encryption data for slug {slug}");
            return Err(Error::Upstream {
                url: VS_API_URL.to_string(),
                status: status.as_u16(),
            });
        }

        res.json::<Envelope>().await.map_err(Error::from)
    }
}
