//! bunkr-dump - batch download/export CLI, independent of the bot.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDateTime;
use clap::Parser;

use bunkr_courier::consts::limits;
use bunkr_courier::download::{download_item, DownloadOptions};
use bunkr_courier::error::Error;
use bunkr_courier::ledger::{export_url, Ledger};
use bunkr_courier::network::HttpEngine;
use bunkr_courier::parse::{collect_album, DateFilter};
use bunkr_courier::progress::{spawn_log_sink, StatusTx};
use bunkr_courier::resolve::resolve_with_retry;
use bunkr_courier::utils::{normalize_share_url, prepare_download_path, url_data, CancelToken};

const CLI_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Parser, Debug)]
#[command(
    name = "bunkr-dump",
    about = "Download or export Bunkr/Cyberdrop albums from the command line"
)]
struct Args {
    /// Url to fetch
    #[arg(short)]
    u: Option<String>,

    /// File with a list of URLs to download
    #[arg(short)]
    f: Option<PathBuf>,

    /// Amount of retries in case the connection fails
    #[arg(short, default_value_t = limits::DEFAULT_RETRIES)]
    r: u32,

    /// Extensions to download (comma separated, empty = all)
    #[arg(short)]
    e: Option<String>,

    /// Path to custom downloads folder
    #[arg(short)]
    p: Option<String>,

    /// Export url list (ex: for wget) instead of downloading
    #[arg(short)]
    w: bool,

    /// Only files shown before this date (yyyy-mm-ddThh:mm:ss)
    #[arg(long, value_parser = parse_cli_date)]
    before: Option<NaiveDateTime>,

    /// Only files shown after this date (yyyy-mm-ddThh:mm:ss)
    #[arg(long, value_parser = parse_cli_date)]
    after: Option<NaiveDateTime>,
}

fn parse_cli_date(value: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(value, CLI_DATE_FORMAT)
        .map_err(|_| "Invalid date format. Use: yyyy-mm-ddThh:mm:ss".to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();

    let urls = match (&args.u, &args.f) {
        (Some(url), None) => vec![url.clone()],
        (None, Some(file)) => match std::fs::read_to_string(file) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(e) => {
                eprintln!("[-] Could not read {}: {e}", file.display());
                return ExitCode::from(1);
            }
        },
        (Some(_), Some(_)) => {
            eprintln!("[-] Please provide only one URL or file");
            return ExitCode::from(1);
        }
        (None, None) => {
            eprintln!("[-] No URL or file provided");
            return ExitCode::from(1);
        }
    };

    let engine = HttpEngine::new();
    let status = spawn_log_sink();

    for url in urls {
        log::info!("Processing {url:?}...");
        if let Err(e) = process_url(&engine, &url, &args, &status).await {
            log::error!("Failed to process {url}: {e}");
        }
    }
    ExitCode::SUCCESS
}

async fn process_url(
    engine: &std::sync::Arc<HttpEngine>,
    url: &str,
    args: &Args,
    status: &StatusTx,
) -> Result<(), Error> {
    let filter = DateFilter {
        before: args.before,
        after: args.after,
    };
    let album = collect_album(engine, &normalize_share_url(url), filter).await?;
    let dir = prepare_download_path(args.p.as_deref(), &album.name)?;
    let mut ledger = Ledger::load(&dir)?;

    let extensions: Vec<String> = args
        .e
        .as_deref()
        .map(|list| {
            list.split(',')
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let total = album.items.len();
    let cancel = CancelToken::new();

    for (i, link) in album.items.iter().enumerate() {
        let resolved =
            match resolve_with_retry(engine, &link.url, &link.name, album.is_bunkr, args.r).await {
                Ok(item) => item,
                Err(e) => {
                    log::warn!("Unable to find a download link for {}: {e}", link.url);
                    continue;
                }
            };

        let extension = url_data(&resolved.url).extension;
        if !extensions.is_empty() && !extensions.contains(&extension) {
            continue;
        }
        if ledger.contains(&resolved.url) {
            log::info!("Skipping {} (already downloaded)", resolved.name);
            continue;
        }

        if args.w {
            export_url(&dir, &resolved.url)?;
            continue;
        }

        let opts = DownloadOptions::new(album.is_bunkr, args.r).position(i + 1, total);
        if let Err(e) = download_item(engine, &resolved, &dir, &opts, &mut ledger, status, &cancel).await
        {
            log::warn!("Download failed for {}: {e}", resolved.name);
        }
    }

    if args.w {
        log::info!("File list exported in {}", dir.join("url_list.txt").display());
    } else {
        log::info!("Download completed for {}", album.name);
    }
    Ok(())
}
