//! Re-upload of downloaded files into the requesting chat.

use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile};
use tokio::io::{AsyncRead, ReadBuf};

use crate::consts::{limits, IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};
use crate::error::Result;
use crate::progress::{format_transfer, StatusTx, TransferKind};
use crate::thumbs;

/// Upload variant, decided once from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaClass {
    Video,
    Image,
    Document,
}

impl MediaClass {
    pub fn from_name(name: &str) -> Self {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaClass::Video
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            MediaClass::Image
        } else {
            MediaClass::Document
        }
    }
}

/// Byte counter shared between the upload reader and the ticker task.
#[derive(Clone, Default)]
struct UploadCounter(Arc<AtomicU64>);

impl UploadCounter {
    fn add(&self, bytes: usize) {
        self.0.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// AsyncRead wrapper that counts the bytes Telegram has pulled so far.
struct ProgressReader {
    inner: tokio::fs::File,
    counter: UploadCounter,
}

impl AsyncRead for ProgressReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let after = buf.filled().len();
            if after > before {
                self.counter.add(after - before);
            }
        }
        poll
    }
}

/// Send one local file to the chat as photo/video/document.
///
/// The source file and any generated thumbnail are removed on every exit
/// path, success or failure.
pub async fn upload_file(
    bot: &Bot,
    chat_id: ChatId,
    path: &Path,
    display_name: &str,
    idx: usize,
    total_files: usize,
    status: &StatusTx,
) -> Result<()> {
    let class = MediaClass::from_name(display_name);

    let (meta, thumb_path) = if class == MediaClass::Video {
        (thumbs::probe(path).await, thumbs::extract(path).await)
    } else {
        (None, None)
    };

    let result = send_media(
        bot,
        chat_id,
        path,
        display_name,
        class,
        meta,
        thumb_path.as_deref(),
        idx,
        total_files,
        status,
    )
    .await;

    // Cleanup is unconditional.
    let _ = tokio::fs::remove_file(path).await;
    if let Some(thumb) = thumb_path {
        let _ = tokio::fs::remove_file(thumb).await;
    }

    result
}

#[allow(clippy::too_many_arguments)]
async fn send_media(
    bot: &Bot,
    chat_id: ChatId,
    path: &Path,
    display_name: &str,
    class: MediaClass,
    meta: Option<thumbs::VideoMeta>,
    thumb_path: Option<&Path>,
    idx: usize,
    total_files: usize,
    status: &StatusTx,
) -> Result<()> {
    let total = tokio::fs::metadata(path).await?.len();
    let counter = UploadCounter::default();
    let reader = ProgressReader {
        inner: tokio::fs::File::open(path).await?,
        counter: counter.clone(),
    };
    let input = InputFile::read(reader).file_name(display_name.to_string());

    let ticker = spawn_ticker(
        counter,
        total,
        display_name.to_string(),
        idx,
        total_files,
        status.clone(),
    );

    let caption = display_name.to_string();
    let sent = match class {
        MediaClass::Video => {
            let mut request = bot.send_video(chat_id, input).caption(caption);
            if let Some(meta) = meta {
                request = request
                    .duration(meta.duration_secs)
                    .width(meta.width)
                    .height(meta.height);
            }
            if let Some(thumb) = thumb_path {
                request = request.thumb(InputFile::file(thumb.to_path_buf()));
            }
            request.await
        }
        MediaClass::Image => bot.send_photo(chat_id, input).caption(caption).await,
        MediaClass::Document => bot.send_document(chat_id, input).caption(caption).await,
    };

    ticker.abort();
    sent?;
    Ok(())
}

/// Periodic upload status lines while Telegram drains the reader.
fn spawn_ticker(
    counter: UploadCounter,
    total: u64,
    name: String,
    idx: usize,
    total_files: usize,
    status: StatusTx,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let started = Instant::now();
        let interval = Duration::from_secs(limits::PROGRESS_INTERVAL_SECS);
        loop {
            tokio::time::sleep(interval).await;
            let done = counter.get();
            if total == 0 || done >= total {
                break;
            }
            let _ = status.send(format_transfer(
                TransferKind::Upload,
                &name,
                idx,
                total_files,
                done,
                total,
                started.elapsed(),
            ));
        }
    })
}
