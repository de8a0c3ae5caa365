pub mod config;
pub mod logging;

pub mod assembler;
pub mod control;
pub mod downloader;
pub mod manifest;
pub mod progress;
pub mod retry;
pub mod session;
pub mod storage;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use session::{DownloadSession, ReadyDownload, StartOutcome};
