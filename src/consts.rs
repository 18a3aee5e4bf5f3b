//! Static operational configuration.
//! All strings are &'static str to avoid lifetime complexity.

/// Key-exchange endpoint used to trade a slug for an encrypted URL.
pub const VS_API_URL: &str = "https://bunkr.cr/api/vs";

/// Prefix of the hour-bucketed XOR key.
pub const SECRET_KEY_BASE: &str = "SECRET_KEY_";

/// CDN redirect served while the origin is down for maintenance.
pub const MAINTENANCE_URL: &str = "https://bnkr.b-cdn.net/maintenance.mp4";

/// Mirror domains tried in order when a download answers 410/401.
/// The first entry is the canonical host.
pub static MIRROR_DOMAINS: &[&str] = &[
    "https://bunkr.cr",
    "https://bunkr.sk",
    "https://bunkr.su",
    "https://bunkr.ru",
    "https://bunkr.is",
];

/// Share links recognized in free-form message text.
pub const SHARE_LINK_PATTERN: &str =
    r"(?i)(https?://(?:bunkr\.(?:is|su|la|ac|fi|ax|ci|ps|ph|si|pk|ru|cr|sk)|bunkrrr\.org|cyberdrop\.me)[^\s]+)";

/// Extensions dispatched as video uploads.
pub static VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "mov", "avi"];

/// Extensions dispatched as photo uploads.
pub static IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// HTTP headers presented to the source CDN.
pub mod headers {
    pub const USER_AGENT: &str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36";
    pub const REFERER: &str = "https://bunkr.sk/";
}

/// CSS selectors for album and item pages.
pub mod selectors {
    /// `<title>` marker distinguishing Bunkr pages from Cyberdrop ones.
    pub const BUNKR_TITLE_MARKER: &str = "| Bunkr";

    // Single-item page markers
    pub const SINGLE_VIDEO: &str = r#"span[class~="ic-videos"]"#;
    pub const SINGLE_GALLERY: &str = "div.lightgallery";

    // Album listing
    pub const ALBUM_ITEM: &str = "div.theItem";
    pub const ITEM_ANCHOR: &str = r#"a[class~="after:absolute"]"#;
    pub const ITEM_CAPTION: &str = "p";
    pub const ITEM_CLOCK: &str = r#"span[class~="ic-clock"]"#;

    // Headings
    pub const HEADING_WIDE: &str = r#"h1[class~="text-[20px]"]"#;
    pub const HEADING_TRUNCATE: &str = "h1.truncate";
    pub const CYBERDROP_TITLE: &str = "h1#title";
    pub const CYBERDROP_ITEM: &str = "a.image";

    // Pagination
    pub const PAGINATION: &str = "nav.pagination";
    pub const PAGINATION_ACTIVE: &str = "span.active";
    pub const PAGINATION_LINK: &str = "a";

    pub const PAGE_TITLE: &str = "title";
}

/// Limits and thresholds.
pub mod limits {
    /// Timeout for album/item page fetches.
    pub const PAGE_TIMEOUT_SECS: u64 = 25;
    /// Timeout for the key-exchange POST.
    pub const VS_TIMEOUT_SECS: u64 = 10;
    /// TCP connect timeout for every request.
    pub const CONNECT_TIMEOUT_SECS: u64 = 15;
    /// Longest wait for response headers or the next body chunk while
    /// streaming a download. A transfer that keeps moving never trips it.
    pub const DOWNLOAD_IDLE_TIMEOUT_SECS: u64 = 45;

    /// Resolution attempts per item on the bot path.
    pub const BOT_RESOLVE_ATTEMPTS: u32 = 4;
    /// Default download retry budget for the CLI.
    pub const DEFAULT_RETRIES: u32 = 10;

    /// Minimum seconds between status-message edits.
    pub const PROGRESS_INTERVAL_SECS: u64 = 5;
    /// Width of the textual progress bar.
    pub const PROGRESS_BAR_SLOTS: usize = 20;

    /// Longest file name shown in a status line.
    pub const STATUS_NAME_CHARS: usize = 28;
    /// Longest error text echoed back to the chat.
    pub const ERROR_TEXT_CHARS: usize = 200;
}
