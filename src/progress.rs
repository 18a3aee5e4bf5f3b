//! Progress formatting and rate-limited status reporting.
//!
//! Download and upload code pushes formatted lines into a status channel;
//! the bot drains it into message edits, the CLI into the log. Edits are
//! time-gated and duplicate-suppressed to stay under platform limits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId};
use teloxide::{ApiError, RequestError};
use tokio::sync::mpsc;

use crate::consts::limits;
use crate::utils::truncate_chars;

/// Sink for human-readable status lines.
pub type StatusTx = mpsc::UnboundedSender<String>;

/// Direction tag for the transfer status line.
#[derive(Debug, Clone, Copy)]
pub enum TransferKind {
    Download,
    Upload,
}

impl TransferKind {
    fn glyph(self) -> &'static str {
        match self {
            TransferKind::Download => "⬇️",
            TransferKind::Upload => "📤",
        }
    }
}

pub fn human_bytes(size: u64) -> String {
    let mut value = size as f64;
    for unit in ["B", "KiB", "MiB", "GiB", "TiB"] {
        if value < 1024.0 {
            return if unit == "B" {
                format!("{size} B")
            } else {
                format!("{value:.2} {unit}")
            };
        }
        value /= 1024.0;
    }
    format!("{value:.2} PiB")
}

pub fn progress_bar(percent: u64) -> String {
    let slots = limits::PROGRESS_BAR_SLOTS as u64;
    let filled = (percent * slots / 100).min(slots) as usize;
    "█".repeat(filled) + &"░".repeat(limits::PROGRESS_BAR_SLOTS - filled)
}

/// One `[idx/total] name / bar / throughput / ETA` status line.
pub fn format_transfer(
    kind: TransferKind,
    name: &str,
    idx: usize,
    total_files: usize,
    done: u64,
    total: u64,
    elapsed: Duration,
) -> String {
    let percent = if total > 0 { done * 100 / total } else { 0 };
    let speed = if elapsed.as_secs_f64() > 0.0 {
        done as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };
    let eta_secs = if speed > 0.0 && total > done {
        ((total - done) as f64 / speed) as u64
    } else {
        0
    };

    format!(
        "{} [{idx}/{total_files}] {}\n[{}] {percent}%\n{} / {}\n↑ {}/s  •  ETA {}m {}s",
        kind.glyph(),
        truncate_chars(name, limits::STATUS_NAME_CHARS),
        progress_bar(percent),
        human_bytes(done),
        human_bytes(total),
        human_bytes(speed as u64),
        eta_secs / 60,
        eta_secs % 60,
    )
}

/// Monotonic time gate between status emissions.
pub struct ProgressGate {
    last: Instant,
    interval: Duration,
}

impl ProgressGate {
    pub fn new() -> Self {
        Self::with_interval(Duration::from_secs(limits::PROGRESS_INTERVAL_SECS))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            last: Instant::now(),
            interval,
        }
    }

    /// True at most once per interval; the first window is gated too.
    pub fn ready(&mut self) -> bool {
        self.ready_at(Instant::now())
    }

    fn ready_at(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last) >= self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }
}

impl Default for ProgressGate {
    fn default() -> Self {
        Self::new()
    }
}

/// One editable status message in a chat.
///
/// Duplicate-content edits are suppressed locally, and the platform's
/// "message is not modified" answer is swallowed when it happens anyway.
pub struct StatusHandle {
    bot: Bot,
    chat: ChatId,
    message: MessageId,
    last_text: tokio::sync::Mutex<String>,
}

impl StatusHandle {
    pub fn new(bot: Bot, chat: ChatId, message: MessageId, initial: String) -> Self {
        Self {
            bot,
            chat,
            message,
            last_text: tokio::sync::Mutex::new(initial),
        }
    }

    pub async fn set(&self, text: &str) {
        {
            let mut last = self.last_text.lock().await;
            if *last == text {
                return;
            }
            *last = text.to_string();
        }
        match self.bot.edit_message_text(self.chat, self.message, text).await {
            Ok(_) => {}
            Err(RequestError::Api(ApiError::MessageNotModified)) => {}
            Err(e) => log::warn!("Status edit failed: {e}"),
        }
    }

    /// Drain a status channel into message edits until the senders drop.
    pub fn spawn_editor(self: Arc<Self>) -> StatusTx {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                self.set(&text).await;
            }
        });
        tx
    }
}

/// Status sink for the CLI: every line goes to the log.
pub fn spawn_log_sink() -> StatusTx {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            log::info!("{}", text.replace('\n', " | "));
        }
    });
    tx
}
