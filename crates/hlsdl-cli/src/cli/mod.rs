//! CLI for the hlsdl HLS downloader.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hlsdl_core::config;
use hlsdl_core::progress::ResumeDb;
use hlsdl_core::storage::DirStagingRoot;
use hlsdl_core::transport::CurlTransport;
use hlsdl_core::DownloadSession;
use std::path::PathBuf;
use std::sync::Arc;

use commands::{run_discard, run_get, run_save, run_status, GetArgs};

/// Top-level CLI for the hlsdl downloader.
#[derive(Debug, Parser)]
#[command(name = "hlsdl")]
#[command(about = "hlsdl: resumable HLS downloader", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download the best rendition of a master playlist and save it.
    /// Re-running after an interruption resumes where it stopped.
    Get {
        /// URL of the master (variant index) playlist.
        url: String,
        /// Output filename (default: download_<unix millis>.ts).
        #[arg(short, long, value_name = "NAME")]
        output: Option<String>,
        /// Directory to write the output into (default: current directory).
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Concurrent segment downloads (default from config, 3).
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,
        /// Retries per segment after the first attempt (default from config, 3).
        #[arg(long, value_name = "N")]
        max_retries: Option<u32>,
    },

    /// Assemble an already complete download into a file.
    Save {
        /// URL the download was started with.
        url: String,
        #[arg(short, long, value_name = "NAME")]
        output: Option<String>,
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
    },

    /// Show stored download progress.
    Status,

    /// Forget a download: drop its progress and staged segments.
    Discard {
        /// URL the download was started with.
        url: String,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        let db = ResumeDb::open_default().await?;
        let staging = DirStagingRoot::open_default()?;
        let transport = CurlTransport::new(cfg.http_config());
        let session = Arc::new(DownloadSession::new(
            Arc::new(transport),
            Arc::new(db),
            Arc::new(staging),
        ));

        match cli.command {
            CliCommand::Get {
                url,
                output,
                dir,
                concurrency,
                max_retries,
            } => {
                let args = GetArgs {
                    url,
                    output,
                    dir: output_dir(dir)?,
                    concurrency,
                    max_retries,
                };
                run_get(session, &cfg, args).await?;
            }
            CliCommand::Save { url, output, dir } => {
                run_save(session, &url, output.as_deref(), &output_dir(dir)?).await?;
            }
            CliCommand::Status => run_status(&session).await?,
            CliCommand::Discard { url } => run_discard(&session, &url).await?,
        }

        Ok(())
    }
}

fn output_dir(dir: Option<PathBuf>) -> Result<PathBuf> {
    match dir {
        Some(d) => Ok(d),
        None => Ok(std::env::current_dir()?),
    }
}

#[cfg(test)]
mod tests;
