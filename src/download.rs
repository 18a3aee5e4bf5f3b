//! Streamed downloads with retry, mirror fallback and ledger bookkeeping.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use futures::StreamExt;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

use crate::consts::{limits, MAINTENANCE_URL, MIRROR_DOMAINS};
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::network::HttpEngine;
use crate::progress::{format_transfer, ProgressGate, StatusTx, TransferKind};
use crate::resolve::ResolvedItem;
use crate::utils::{backoff_delay, url_data, CancelToken};

/// Per-item download policy.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Backoff retry budget for connection errors and soft HTTP failures.
    pub retries: u32,
    /// Ordered mirror hosts tried on 410/401. First entry is canonical.
    pub mirrors: Vec<String>,
    /// Mirror rotation only applies to Bunkr-hosted items.
    pub is_bunkr: bool,
    /// Longest wait for headers or the next body chunk. Bounds stalls, not
    /// the transfer as a whole.
    pub idle_timeout: Duration,
    /// Position within the album, for status lines.
    pub idx: usize,
    pub total_files: usize,
}

impl DownloadOptions {
    pub fn new(is_bunkr: bool, retries: u32) -> Self {
        Self {
            retries,
            mirrors: MIRROR_DOMAINS.iter().map(|d| d.to_string()).collect(),
            is_bunkr,
            idle_timeout: Duration::from_secs(limits::DOWNLOAD_IDLE_TIMEOUT_SECS),
            idx: 1,
            total_files: 1,
        }
    }

    pub fn position(mut self, idx: usize, total_files: usize) -> Self {
        self.idx = idx;
        self.total_files = total_files;
        self
    }
}

#[derive(Debug)]
pub enum DownloadOutcome {
    Downloaded(PathBuf),
    /// Ledger hit: the URL was fetched on an earlier run.
    AlreadyHave,
}

fn host_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^https?://[^/]+").unwrap())
}

/// Swap the URL's host for a mirror domain.
pub fn rewrite_host(url: &str, mirror: &str) -> String {
    host_regex().replace(url, mirror).into_owned()
}

/// What one streaming attempt asked the caller to do next.
enum Attempt {
    Done { written: u64, expected: Option<u64> },
    NextMirror(u16),
    Retry(Error),
}

/// Download one resolved item into `dir`.
///
/// The ledger is consulted before the first byte moves and written only
/// after size verification passes. Failures surface as `Err` so the caller
/// can skip the item and keep the album going.
pub async fn download_item(
    engine: &HttpEngine,
    item: &ResolvedItem,
    dir: &Path,
    opts: &DownloadOptions,
    ledger: &mut Ledger,
    status: &StatusTx,
    cancel: &CancelToken,
) -> Result<DownloadOutcome> {
    if ledger.contains(&item.url) {
        log::info!("Skipping {} (already downloaded)", item.name);
        return Ok(DownloadOutcome::AlreadyHave);
    }

    let file_name = if item.name.is_empty() {
        url_data(&item.url).file_name
    } else {
        item.name.clone()
    };
    let final_path = dir.join(&file_name);

    let mirrors: Vec<&str> = if opts.is_bunkr {
        opts.mirrors.iter().map(String::as_str).collect()
    } else {
        vec![""]
    };

    let mut attempt = 0u32;
    'retry: loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        for (mirror_idx, mirror) in mirrors.iter().enumerate() {
            let download_url = if opts.is_bunkr && mirror_idx > 0 {
                log::info!("Trying alternative domain {mirror} for {file_name}");
                rewrite_host(&item.url, mirror)
            } else {
                item.url.clone()
            };

            match stream_once(engine, &download_url, &final_path, &file_name, opts, status, cancel)
                .await?
            {
                Attempt::Done { written, expected } => {
                    if let Some(expected) = expected.filter(|&e| e > 0) {
                        if written != expected {
                            // Corrupt-looking file: discard rather than upload garbage.
                            log::warn!("{file_name} size check failed ({written}/{expected}), discarding");
                            let _ = tokio::fs::remove_file(&final_path).await;
                            return Err(Error::SizeMismatch { written, expected });
                        }
                    }
                    ledger.record(&item.url)?;
                    return Ok(DownloadOutcome::Downloaded(final_path));
                }
                Attempt::NextMirror(code) => {
                    log::warn!("HTTP {code} for {file_name}, trying next domain");
                    continue;
                }
                Attempt::Retry(err) => {
                    attempt += 1;
                    if attempt >= opts.retries.max(1) {
                        return Err(err);
                    }
                    log::warn!(
                        "Download attempt {attempt}/{} failed for {file_name}: {err}",
                        opts.retries
                    );
                    backoff_delay(attempt - 1).await;
                    continue 'retry;
                }
            }
        }

        return Err(Error::Download(format!(
            "all domains exhausted for {file_name}"
        )));
    }
}

/// One streaming GET into the destination file.
async fn stream_once(
    engine: &HttpEngine,
    url: &str,
    final_path: &Path,
    file_name: &str,
    opts: &DownloadOptions,
    status: &StatusTx,
    cancel: &CancelToken,
) -> Result<Attempt> {
    // No whole-request deadline: a large file may legitimately stream for
    // many minutes. Only waiting is bounded.
    let response = match timeout(opts.idle_timeout, engine.client().get(url).send()).await {
        Ok(Ok(r)) => r,
        Ok(Err(e)) => return Ok(Attempt::Retry(Error::Http(e))),
        Err(_) => {
            return Ok(Attempt::Retry(Error::Download(format!(
                "no response headers within {:?}",
                opts.idle_timeout
            ))))
        }
    };

    let code = response.status().as_u16();
    if code == 410 || code == 401 {
        return Ok(Attempt::NextMirror(code));
    }
    if !response.status().is_success() {
        return Ok(Attempt::Retry(Error::Upstream {
            url: url.to_string(),
            status: code,
        }));
    }
    if response.url().as_str() == MAINTENANCE_URL {
        return Err(Error::Download(
            "server is down for maintenance".to_string(),
        ));
    }

    let expected = response.content_length().filter(|&len| len > 0);
    let total = expected.unwrap_or(0);

    log::info!("Downloading {file_name}");
    let mut file = tokio::fs::File::create(final_path).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    let started = Instant::now();
    let mut gate = ProgressGate::new();

    loop {
        let next = match timeout(opts.idle_timeout, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                drop(file);
                let _ = tokio::fs::remove_file(final_path).await;
                return Ok(Attempt::Retry(Error::Download(format!(
                    "stream stalled after {written} bytes"
                ))));
            }
        };
        let Some(chunk) = next else {
            break;
        };
        if cancel.is_cancelled() {
            drop(file);
            let _ = tokio::fs::remove_file(final_path).await;
            return Err(Error::Cancelled);
        }
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(final_path).await;
                return Ok(Attempt::Retry(Error::Http(e)));
            }
        };
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;

        if total > 0 && gate.ready() {
            let _ = status.send(format_transfer(
                TransferKind::Download,
                file_name,
                opts.idx,
                opts.total_files,
                written,
                total,
                started.elapsed(),
            ));
        }
    }
    file.flush().await?;

    Ok(Attempt::Done { written, expected })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[test]
    fn rewrite_host_swaps_only_the_domain() {
        assert_eq!(
            rewrite_host("https://kebab.bunkr.ru/media/a.mp4?x=1", "https://bunkr.sk"),
            "https://bunkr.sk/media/a.mp4?x=1"
        );
        assert_eq!(
            rewrite_host("http://bunkr.cr/f/abc", "https://bunkr.su"),
            "https://bunkr.su/f/abc"
        );
    }

    #[test]
    fn options_default_to_canonical_mirror_list() {
        let opts = DownloadOptions::new(true, 3);
        assert_eq!(opts.mirrors.len(), MIRROR_DOMAINS.len());
        assert_eq!(opts.mirrors[0], MIRROR_DOMAINS[0]);
    }

    /// Scripted one-connection-per-entry loopback server.
    enum Conn {
        /// Accept and close without answering.
        Hangup,
        /// Read the request head, write the bytes, close.
        Respond(Vec<u8>),
        /// Answer the head, then dribble the body out chunk by chunk.
        Trickle {
            body_chunks: Vec<Vec<u8>>,
            gap: Duration,
        },
        /// Answer the head with a larger Content-Length, send a few bytes,
        /// then hold the socket open without sending more.
        Stall { partial: Vec<u8>, claimed_len: usize },
    }

    async fn spawn_server(script: Vec<Conn>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for conn in script {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                match conn {
                    Conn::Hangup => drop(sock),
                    Conn::Respond(bytes) => {
                        let mut head = [0u8; 2048];
                        let _ = sock.read(&mut head).await;
                        let _ = sock.write_all(&bytes).await;
                        let _ = sock.shutdown().await;
                    }
                    Conn::Trickle { body_chunks, gap } => {
                        let mut head = [0u8; 2048];
                        let _ = sock.read(&mut head).await;
                        let total: usize = body_chunks.iter().map(Vec::len).sum();
                        let _ = sock.write_all(response_head(200, total).as_bytes()).await;
                        for chunk in body_chunks {
                            tokio::time::sleep(gap).await;
                            let _ = sock.write_all(&chunk).await;
                        }
                        let _ = sock.shutdown().await;
                    }
                    Conn::Stall { partial, claimed_len } => {
                        let mut head = [0u8; 2048];
                        let _ = sock.read(&mut head).await;
                        let _ = sock
                            .write_all(response_head(200, claimed_len).as_bytes())
                            .await;
                        let _ = sock.write_all(&partial).await;
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                }
            }
        });
        addr
    }

    fn response_head(code: u16, body_len: usize) -> String {
        let reason = match code {
            200 => "OK",
            410 => "Gone",
            _ => "Error",
        };
        format!(
            "HTTP/1.1 {code} {reason}\r\nContent-Length: {body_len}\r\nConnection: close\r\n\r\n"
        )
    }

    fn full_response(code: u16, body: &str) -> Vec<u8> {
        let mut bytes = response_head(code, body.len()).into_bytes();
        bytes.extend_from_slice(body.as_bytes());
        bytes
    }

    fn sink() -> StatusTx {
        let (tx, _rx) = mpsc::unbounded_channel();
        tx
    }

    fn item(addr: SocketAddr, name: &str) -> ResolvedItem {
        ResolvedItem {
            url: format!("http://{addr}/media/{name}"),
            name: name.to_string(),
            size: -1,
        }
    }

    #[tokio::test]
    async fn two_connection_failures_then_success_writes_file_and_ledger() {
        let body = "0123456789abcdef";
        let addr = spawn_server(vec![
            Conn::Hangup,
            Conn::Hangup,
            Conn::Respond(full_response(200, body)),
        ])
        .await;

        let engine = HttpEngine::new();
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::load(dir.path()).unwrap();
        let item = item(addr, "clip.bin");
        let opts = DownloadOptions::new(false, 5);

        let out = download_item(
            &engine,
            &item,
            dir.path(),
            &opts,
            &mut ledger,
            &sink(),
            &CancelToken::new(),
        )
        .await
        .unwrap();

        let DownloadOutcome::Downloaded(path) = out else {
            panic!("expected a fresh download");
        };
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), body);
        assert!(ledger.contains(&item.url));
    }

    #[tokio::test]
    async fn gone_status_rotates_to_the_next_mirror() {
        let primary = spawn_server(vec![Conn::Respond(full_response(410, ""))]).await;
        let fallback = spawn_server(vec![Conn::Respond(full_response(200, "payload"))]).await;

        let engine = HttpEngine::new();
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::load(dir.path()).unwrap();
        let item = item(primary, "pic.jpg");
        let mut opts = DownloadOptions::new(true, 3);
        opts.mirrors = vec![format!("http://{primary}"), format!("http://{fallback}")];

        let out = download_item(
            &engine,
            &item,
            dir.path(),
            &opts,
            &mut ledger,
            &sink(),
            &CancelToken::new(),
        )
        .await
        .unwrap();

        let DownloadOutcome::Downloaded(path) = out else {
            panic!("expected the fallback mirror to serve the file");
        };
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "payload");
        // The ledger keys on the canonical URL, not the mirror that answered.
        assert!(ledger.contains(&item.url));
    }

    #[tokio::test]
    async fn slow_but_progressing_stream_outlives_the_idle_window() {
        // Eight chunks 120 ms apart: the transfer takes well over the idle
        // window below, but no single wait comes close to it.
        let chunks: Vec<Vec<u8>> = (0..8).map(|_| b"ab".to_vec()).collect();
        let addr = spawn_server(vec![Conn::Trickle {
            body_chunks: chunks,
            gap: Duration::from_millis(120),
        }])
        .await;

        let engine = HttpEngine::new();
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::load(dir.path()).unwrap();
        let item = item(addr, "slow.bin");
        let mut opts = DownloadOptions::new(false, 1);
        opts.idle_timeout = Duration::from_millis(500);

        let out = download_item(
            &engine,
            &item,
            dir.path(),
            &opts,
            &mut ledger,
            &sink(),
            &CancelToken::new(),
        )
        .await
        .unwrap();

        let DownloadOutcome::Downloaded(path) = out else {
            panic!("expected the slow transfer to complete");
        };
        assert_eq!(tokio::fs::read(&path).await.unwrap().len(), 16);
        assert!(ledger.contains(&item.url));
    }

    #[tokio::test]
    async fn stalled_stream_fails_and_leaves_no_trace() {
        let addr = spawn_server(vec![Conn::Stall {
            partial: b"head".to_vec(),
            claimed_len: 64,
        }])
        .await;

        let engine = HttpEngine::new();
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::load(dir.path()).unwrap();
        let item = item(addr, "stuck.bin");
        let mut opts = DownloadOptions::new(false, 1);
        opts.idle_timeout = Duration::from_millis(200);

        let err = download_item(
            &engine,
            &item,
            dir.path(),
            &opts,
            &mut ledger,
            &sink(),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Download(_)), "got {err:?}");
        assert!(!dir.path().join("stuck.bin").exists());
        assert!(!ledger.contains(&item.url));
    }
}
