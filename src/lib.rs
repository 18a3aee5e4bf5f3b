//! Bunkr/Cyberdrop link resolution, download and re-upload pipeline.
//!
//! Shared by the `courier-bot` Telegram frontend and the `bunkr-dump`
//! batch CLI.

pub mod consts;
pub mod download;
pub mod error;
pub mod ledger;
pub mod network;
pub mod parse;
pub mod progress;
pub mod resolve;
pub mod thumbs;
pub mod upload;
pub mod utils;
