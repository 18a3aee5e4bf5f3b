use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use rand::Rng;
use tokio::time::sleep;

/// Format of the timestamp shown next to each album item.
pub const PAGE_DATE_FORMAT: &str = "%H:%M:%S %d/%m/%Y";

/// Base of the exponential backoff schedule: `2^attempt` seconds, capped.
pub fn backoff_base(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.min(6))
}

/// Exponential backoff with a little jitter on top.
pub async fn backoff_delay(attempt: u32) {
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
    sleep(backoff_base(attempt) + jitter).await;
}

/// Replace filesystem-hostile characters with `-` and trim whitespace.
pub fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | '\'' => '-',
            c if (c as u32) <= 0x1F => '-',
            c => c,
        })
        .collect();
    cleaned.trim().to_string()
}

/// Minimal percent-decoding for URL path segments (%41 -> 'A').
/// Invalid escapes pass through untouched.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                decoded.push(byte);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

/// File name, extension (without dot) and host pulled out of a direct URL.
pub struct UrlData {
    pub file_name: String,
    pub extension: String,
    pub host: String,
}

pub fn url_data(url: &str) -> UrlData {
    let (host, path) = match reqwest::Url::parse(url) {
        Ok(parsed) => (
            parsed.host_str().unwrap_or_default().to_string(),
            parsed.path().to_string(),
        ),
        Err(_) => (String::new(), url.to_string()),
    };
    let file_name = path.rsplit('/').next().unwrap_or_default().to_string();
    let extension = Path::new(&file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    UrlData { file_name, extension, host }
}

/// Upgrade to https and swap domains known to be parked.
pub fn normalize_share_url(url: &str) -> String {
    let https = if let Some(rest) = url.strip_prefix("http://") {
        format!("https://{rest}")
    } else {
        url.to_string()
    };
    https
        .replace("bunkr.pk", "bunkr.su")
        .replace("bunkr.is", "bunkr.su")
}

/// Character-safe truncation for status lines and error echoes.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect::<String>() + "…"
}

/// Inclusive date-window check against a page-displayed timestamp.
/// Unparseable timestamps are excluded (logged by the caller's filter).
pub fn is_date_in_range(
    shown: &str,
    before: Option<NaiveDateTime>,
    after: Option<NaiveDateTime>,
) -> bool {
    match NaiveDateTime::parse_from_str(shown.trim(), PAGE_DATE_FORMAT) {
        Ok(ts) => {
            before.map_or(true, |b| ts <= b) && after.map_or(true, |a| ts >= a)
        }
        Err(_) => {
            log::warn!("Invalid file date {shown:?}");
            false
        }
    }
}

/// Build `<root>/<album>` and make sure it exists.
pub fn prepare_download_path(root: Option<&str>, album_name: &str) -> std::io::Result<PathBuf> {
    let mut path = PathBuf::from(root.unwrap_or("downloads"));
    path.push(album_name.replace('\n', ""));
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

/// Cooperative cancellation flag checked inside the per-item loop.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
