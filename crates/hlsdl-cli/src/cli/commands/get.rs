//! `hlsdl get <url>` – download (or resume) a stream, then save it.

use anyhow::{Context, Result};
use hlsdl_core::config::HlsdlConfig;
use hlsdl_core::downloader::{DownloadOptions, ProgressCallback};
use hlsdl_core::{DownloadSession, StartOutcome};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::save::write_output;
use super::spawn_ctrl_c_handler;

const PROGRESS_INTERVAL_MS: u128 = 500;

#[derive(Debug)]
pub struct GetArgs {
    pub url: String,
    pub output: Option<String>,
    pub dir: PathBuf,
    pub concurrency: Option<usize>,
    pub max_retries: Option<u32>,
}

/// Options from config with CLI flags on top.
fn download_options(cfg: &HlsdlConfig, args: &GetArgs) -> DownloadOptions {
    let retry = cfg.retry_config();
    DownloadOptions {
        concurrency: args.concurrency.unwrap_or(cfg.concurrency),
        max_retries: args.max_retries.unwrap_or(retry.max_retries),
        base_delay: Duration::from_millis(retry.base_delay_ms),
        on_progress: None,
    }
}

/// Redraw the progress line in place; the line is ended only at 100%.
fn write_progress(out: &mut impl Write, fraction: f64) -> io::Result<()> {
    write!(out, "\r  {:.1}%  ", fraction * 100.0)?;
    if fraction >= 1.0 {
        writeln!(out)?;
    }
    out.flush()
}

/// Print the fraction at most every `PROGRESS_INTERVAL_MS`, and always at 100%.
fn progress_printer() -> ProgressCallback {
    let last_print: Mutex<Option<Instant>> = Mutex::new(None);
    Arc::new(move |fraction: f64| {
        let mut last = last_print.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let due = last.map_or(true, |t| {
            now.duration_since(t).as_millis() >= PROGRESS_INTERVAL_MS
        });
        if due || fraction >= 1.0 {
            let _ = write_progress(&mut io::stdout().lock(), fraction);
            *last = Some(now);
        }
    })
}

pub async fn run_get(
    session: Arc<DownloadSession>,
    cfg: &HlsdlConfig,
    args: GetArgs,
) -> Result<()> {
    let mut options = download_options(cfg, &args);
    options.on_progress = Some(progress_printer());
    tracing::debug!(url = %args.url, ?options, "get");

    let save_token = CancellationToken::new();
    let ctrl_c = spawn_ctrl_c_handler(Arc::clone(&session), save_token.clone());

    let res: Result<()> = async {
        let outcome = session
            .start(&args.url, options)
            .await
            .with_context(|| format!("downloading {}", args.url))?;
        match outcome {
            StartOutcome::Aborted { source_url } => {
                // Ends the progress line.
                println!();
                println!("Stopped. Run `hlsdl get {source_url}` again to resume.");
                Ok(())
            }
            StartOutcome::Ready(ready) => {
                if save_token.is_cancelled() {
                    println!(
                        "Download complete but interrupted before saving; run `hlsdl save {}`.",
                        ready.source_url
                    );
                    return Ok(());
                }
                let filename = args
                    .output
                    .clone()
                    .unwrap_or_else(|| ready.suggested_filename.clone());
                let token = save_token.clone();
                write_output(&session, &ready.source_url, &filename, &args.dir, token).await
            }
        }
    }
    .await;

    ctrl_c.abort();
    res
}
