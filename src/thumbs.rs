//! Video metadata and still-frame thumbnails via the system ffmpeg tools.
//!
//! Everything here is best-effort: a missing binary or an unreadable file
//! degrades to `None` and the upload proceeds without metadata.

use std::path::{Path, PathBuf};

use tokio::process::Command;

/// Seek offset for the thumbnail frame.
const THUMB_FRAME_SECS: &str = "1.8";

#[derive(Debug, Clone, Copy)]
pub struct VideoMeta {
    pub duration_secs: u32,
    pub width: u32,
    pub height: u32,
}

/// Probe duration and resolution with `ffprobe`.
pub async fn probe(path: &Path) -> Option<VideoMeta> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let data: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;
    let stream = data["streams"]
        .as_array()?
        .iter()
        .find(|s| s["codec_type"].as_str() == Some("video"))?;

    Some(VideoMeta {
        duration_secs: data["format"]["duration"]
            .as_str()
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0) as u32,
        width: stream["width"].as_u64().unwrap_or(0) as u32,
        height: stream["height"].as_u64().unwrap_or(0) as u32,
    })
}

/// Extract a single still frame next to the video file.
pub async fn extract(path: &Path) -> Option<PathBuf> {
    let thumb_path = path.with_extension("thumb.jpg");
    let status = Command::new("ffmpeg")
        .args(["-y", "-loglevel", "error", "-ss", THUMB_FRAME_SECS, "-i"])
        .arg(path)
        .args(["-frames:v", "1"])
        .arg(&thumb_path)
        .status()
        .await
        .ok()?;

    if status.success() && thumb_path.exists() {
        Some(thumb_path)
    } else {
        log::warn!("Thumbnail extraction failed for {}", path.display());
        let _ = std::fs::remove_file(&thumb_path);
        None
    }
}
