//! Link resolution: slug -> envelope -> decrypted direct URL.

use std::sync::Arc;
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;

use crate::consts::SECRET_KEY_BASE;
use crate::error::{Error, Result};
use crate::network::{Envelope, HttpEngine};
use crate::utils::{backoff_delay, percent_decode};

/// A direct, time-limited download target.
///
/// The URL embeds an hour-bucketed key and goes stale quickly; consume it
/// promptly and never persist it.
#[derive(Debug, Clone)]
pub struct ResolvedItem {
    pub url: String,
    pub name: String,
    pub size: i64,
}

impl ResolvedItem {
    pub fn new(url: String, name: String) -> Self {
        Self { url, name, size: -1 }
    }
}

fn slug_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/([fv])/([a-zA-Z0-9_-]+)").unwrap())
}

fn tail_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/([a-zA-Z0-9_-]+)$").unwrap())
}

/// Isolate the content slug from a share URL.
///
/// Prefers the `/f/<slug>` and `/v/<slug>` forms; falls back to the trailing
/// path segment. The result is percent-decoded.
pub fn extract_slug(url: &str) -> Result<String> {
    if let Some(caps) = slug_regex().captures(url) {
        return Ok(percent_decode(&caps[2]));
    }
    if let Some(caps) = tail_regex().captures(url) {
        return Ok(percent_decode(&caps[1]));
    }
    Err(Error::Resolution(url.to_string()))
}

/// Derive the textual XOR key for an envelope timestamp (hour bucket).
pub fn derive_secret_key(timestamp: i64) -> String {
    format!("{SECRET_KEY_BASE}{}", timestamp.div_euclid(3600))
}

/// Recover the plaintext URL from an envelope.
///
/// Single-byte-key XOR against the cycled key bytes; each plain byte maps to
/// the char with the same code point (Latin-1), reproducing the upstream
/// scheme byte for byte. A wrong hour bucket yields garbage, not an error.
pub fn decrypt_url(envelope: &Envelope) -> Result<String> {
    let cipher = BASE64
        .decode(&envelope.url)
        .map_err(|e| Error::Decryption(e.to_string()))?;
    let key = derive_secret_key(envelope.timestamp);
    let key_bytes = key.as_bytes();

    let plain: String = cipher
        .iter()
        .enumerate()
        .map(|(i, &b)| (b ^ key_bytes[i % key_bytes.len()]) as char)
        .collect();
    Ok(plain)
}

/// Resolve one Bunkr item page URL to a direct download target.
pub async fn resolve_bunkr_item(
    engine: &HttpEngine,
    page_url: &str,
    name: &str,
) -> Result<ResolvedItem> {
    let slug = extract_slug(page_url)?;
    let envelope = engine.exchange_slug(&slug).await?;
    let url = decrypt_url(&envelope)?;
    Ok(ResolvedItem::new(url, name.to_string()))
}

/// Resolve one Cyberdrop item via its JSON endpoint (`/f/` -> `/api/f/`).
pub async fn resolve_cyberdrop_item(engine: &HttpEngine, page_url: &str) -> Result<ResolvedItem> {
    let api_url = page_url.replace("/f/", "/api/f/");
    let body = engine.fetch_page(&api_url).await?;
    let data: serde_json::Value =
        serde_json::from_str(&body).map_err(|e| Error::Decryption(e.to_string()))?;

    let url = data["url"]
        .as_str()
        .ok_or_else(|| Error::Resolution(page_url.to_string()))?
        .to_string();
    let name = data["name"].as_str().unwrap_or("file").to_string();
    Ok(ResolvedItem::new(url, name))
}

/// Whole-item resolution with bounded exponential backoff.
pub async fn resolve_with_retry(
    engine: &Arc<HttpEngine>,
    page_url: &str,
    name: &str,
    is_bunkr: bool,
    attempts: u32,
) -> Result<ResolvedItem> {
    let mut last_err = Error::Resolution(page_url.to_string());
    for attempt in 0..attempts.max(1) {
        if attempt > 0 {
            backoff_delay(attempt - 1).await;
        }
        let result = if is_bunkr {
            resolve_bunkr_item(engine, page_url, name).await
        } else {
            resolve_cyberdrop_item(engine, page_url).await
        };
        match result {
            Ok(item) => return Ok(item),
            Err(e) => {
                log::warn!("Resolution attempt {}/{attempts} failed for {page_url}: {e}", attempt + 1);
                last_err = e;
            }
        }
    }
    Err(last_err)
}
