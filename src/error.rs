use thiserror::Error;

/// Failure taxonomy for link processing.
///
/// Every variant except upload failures marks a single item as skipped; the
/// album keeps going. Only an error escaping the per-item loop aborts the
/// whole link.
#[derive(Error, Debug)]
pub enum Error {
    #[error("could not isolate a slug from {0}")]
    Resolution(String),

    #[error("upstream HTTP {status} for {url}")]
    Upstream { url: String, status: u16 },

    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed envelope: {0}")]
    Decryption(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("size mismatch: wrote {written} of {expected} bytes")]
    SizeMismatch { written: u64, expected: u64 },

    #[error("upload rejected: {0}")]
    Upload(#[from] teloxide::RequestError),

    #[error("cancelled")]
    Cancelled,

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
