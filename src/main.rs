//! Courier bot - mirrors Bunkr/Cyberdrop share links into the chat.

use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex};

use regex::Regex;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use teloxide::utils::command::BotCommands;

use bunkr_courier::consts::{limits, SHARE_LINK_PATTERN};
use bunkr_courier::download::{download_item, DownloadOptions, DownloadOutcome};
use bunkr_courier::error::Error;
use bunkr_courier::ledger::Ledger;
use bunkr_courier::network::HttpEngine;
use bunkr_courier::parse::{collect_album, DateFilter};
use bunkr_courier::progress::StatusHandle;
use bunkr_courier::resolve::resolve_with_retry;
use bunkr_courier::upload::upload_file;
use bunkr_courier::utils::{
    normalize_share_url, prepare_download_path, truncate_chars, CancelToken,
};

#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
enum Command {
    #[command(description = "Show usage")]
    Start,
    #[command(description = "Show usage")]
    Help,
    #[command(description = "Stop the album currently processing in this chat")]
    Cancel,
}

/// Cancellation tokens of in-flight albums, keyed by chat.
#[derive(Default)]
struct ActiveJobs(Mutex<HashMap<ChatId, CancelToken>>);

impl ActiveJobs {
    /// Claim the chat for a new flow. `None` means a flow is already
    /// running there; its token must not be disturbed.
    fn try_register(&self, chat: ChatId) -> Option<CancelToken> {
        let mut map = self.0.lock().unwrap();
        if map.contains_key(&chat) {
            return None;
        }
        let token = CancelToken::new();
        map.insert(chat, token.clone());
        Some(token)
    }

    fn remove(&self, chat: ChatId) {
        self.0.lock().unwrap().remove(&chat);
    }

    fn cancel(&self, chat: ChatId) -> bool {
        match self.0.lock().unwrap().get(&chat) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

const USAGE: &str = "📁 Bunkr / Cyberdrop Downloader Bot\n\n\
    Send bunkr or cyberdrop link(s) and I will download the albums and \
    upload every file right here.\n\n\
    /cancel — stop the album currently processing\n\
    /help — this message";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("Courier bot starting...");

    let bot = Bot::from_env();
    let engine = HttpEngine::new();
    let jobs = Arc::new(ActiveJobs::default());

    let handler = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(dptree::endpoint(handle_text));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![engine, jobs])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    jobs: Arc<ActiveJobs>,
) -> ResponseResult<()> {
    match cmd {
        Command::Start | Command::Help => {
            bot.send_message(msg.chat.id, USAGE).await?;
        }
        Command::Cancel => {
            let text = if jobs.cancel(msg.chat.id) {
                "⛔ Cancelling after the current file..."
            } else {
                "Nothing is running in this chat."
            };
            bot.send_message(msg.chat.id, text).await?;
        }
    }
    Ok(())
}

fn share_link_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(SHARE_LINK_PATTERN).unwrap())
}

async fn handle_text(
    bot: Bot,
    msg: Message,
    engine: Arc<HttpEngine>,
    jobs: Arc<ActiveJobs>,
) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let links: Vec<String> = share_link_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();

    if links.is_empty() {
        return Ok(());
    }

    // One flow per chat at a time. A concurrent message must not steal or
    // drop the running flow's cancellation token.
    let Some(token) = jobs.try_register(msg.chat.id) else {
        bot.send_message(
            msg.chat.id,
            "✋ Another album is already processing in this chat. /cancel it first.",
        )
        .await?;
        return Ok(());
    };

    for link in links {
        if token.is_cancelled() {
            break;
        }
        let result = process_link(&bot, &msg, &link, &engine, &token).await;

        // Nothing escaping the per-link flow may take the dispatcher down.
        if let Err(e) = result {
            log::error!("Link flow failed for {link}: {e}");
            let text = format!(
                "❌ Error: {}",
                truncate_chars(&e.to_string(), limits::ERROR_TEXT_CHARS)
            );
            let _ = bot.send_message(msg.chat.id, text).await;
        }
    }
    jobs.remove(msg.chat.id);
    Ok(())
}

/// Process one share link end to end: parse, resolve, download, upload.
///
/// Per-item failures are collected and summarized; only errors outside the
/// item loop bubble up to the caller.
async fn process_link(
    bot: &Bot,
    msg: &Message,
    link: &str,
    engine: &Arc<HttpEngine>,
    cancel: &CancelToken,
) -> Result<(), Error> {
    let chat_id = msg.chat.id;
    let initial = format!("🔄 Processing {}", truncate_chars(link, 65));
    let status_msg = bot.send_message(chat_id, initial.as_str()).await?;
    let handle = Arc::new(StatusHandle::new(
        bot.clone(),
        chat_id,
        status_msg.id,
        initial,
    ));
    let status_tx = Arc::clone(&handle).spawn_editor();

    let url = normalize_share_url(link);
    let album = collect_album(engine, &url, DateFilter::default()).await?;

    if album.items.is_empty() {
        handle.set("❌ No files found").await;
        return Ok(());
    }

    let downloads_root = env::var("DOWNLOADS_DIR").ok();
    let dir = prepare_download_path(downloads_root.as_deref(), &album.name)?;
    let mut ledger = Ledger::load(&dir)?;

    let total = album.items.len();
    handle
        .set(&format!("Found {total} file(s). Downloading..."))
        .await;

    let mut sent = 0usize;
    let mut skipped: Vec<String> = Vec::new();
    let mut cancelled = false;

    for (i, item_link) in album.items.iter().enumerate() {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        let idx = i + 1;
        handle
            .set(&format!(
                "⬇️ [{idx}/{total}] {} …",
                truncate_chars(&item_link.name, 32)
            ))
            .await;

        let resolved = match resolve_with_retry(
            engine,
            &item_link.url,
            &item_link.name,
            album.is_bunkr,
            limits::BOT_RESOLVE_ATTEMPTS,
        )
        .await
        {
            Ok(item) => item,
            Err(e) => {
                log::warn!("Unable to find a download link for {}: {e}", item_link.url);
                skipped.push(item_link.name.clone());
                continue;
            }
        };

        let opts = DownloadOptions::new(album.is_bunkr, limits::BOT_RESOLVE_ATTEMPTS)
            .position(idx, total);
        let local = match download_item(
            engine, &resolved, &dir, &opts, &mut ledger, &status_tx, cancel,
        )
        .await
        {
            Ok(DownloadOutcome::Downloaded(path)) => path,
            Ok(DownloadOutcome::AlreadyHave) => continue,
            Err(Error::Cancelled) => {
                cancelled = true;
                break;
            }
            Err(e) => {
                log::warn!("Download failed for {}: {e}", resolved.name);
                skipped.push(resolved.name.clone());
                continue;
            }
        };

        handle
            .set(&format!(
                "📤 Uploading [{idx}/{total}] {} …",
                truncate_chars(&resolved.name, 32)
            ))
            .await;

        match upload_file(bot, chat_id, &local, &resolved.name, idx, total, &status_tx).await {
            Ok(()) => sent += 1,
            Err(e) => {
                log::warn!("Upload failed for {}: {e}", resolved.name);
                skipped.push(resolved.name.clone());
            }
        }
    }

    handle.set(&summary(&album.name, sent, &skipped, cancelled)).await;
    Ok(())
}

fn summary(album: &str, sent: usize, skipped: &[String], cancelled: bool) -> String {
    let mut text = if cancelled {
        format!("⛔ Cancelled — {album} ({sent} file(s) sent)")
    } else {
        format!("✅ Done — {album} ({sent} file(s) sent)")
    };
    if !skipped.is_empty() {
        let shown: Vec<&str> = skipped.iter().take(3).map(String::as_str).collect();
        text.push_str(&format!("\nSkipped: {}", shown.join(", ")));
        if skipped.len() > shown.len() {
            text.push_str(&format!(" and {} more", skipped.len() - shown.len()));
        }
    }
    text
}
