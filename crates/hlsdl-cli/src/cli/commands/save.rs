//! `hlsdl save <url>` – assemble a completed download into a file.

use anyhow::{Context, Result};
use hlsdl_core::assembler::{FileDestination, SaveError};
use hlsdl_core::session::suggested_filename;
use hlsdl_core::DownloadSession;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::spawn_ctrl_c_handler;

pub async fn run_save(
    session: Arc<DownloadSession>,
    url: &str,
    output: Option<&str>,
    dir: &Path,
) -> Result<()> {
    let token = CancellationToken::new();
    let ctrl_c = spawn_ctrl_c_handler(Arc::clone(&session), token.clone());
    let filename = output.map(str::to_string).unwrap_or_else(suggested_filename);
    let res = write_output(&session, url, &filename, dir, token).await;
    ctrl_c.abort();
    res
}

/// Assemble into `dir/filename`, reporting the result. Shared with `get`.
pub(super) async fn write_output(
    session: &DownloadSession,
    url: &str,
    filename: &str,
    dir: &Path,
    token: CancellationToken,
) -> Result<()> {
    let staging = session.staging_for(url);
    let mut sink = FileDestination::with_token(dir, token);
    match session.save(url, staging.as_ref(), filename, &mut sink).await {
        Ok(report) => {
            let path = sink
                .written_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| filename.to_string());
            println!(
                "Saved {} segment(s), {:.1} MiB to {}",
                report.segments,
                report.bytes as f64 / 1_048_576.0,
                path
            );
            Ok(())
        }
        Err(SaveError::Cancelled) => {
            println!(
                "Save cancelled; run `hlsdl get {url}` to fetch what is missing, then save again."
            );
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("saving {url}")),
    }
}
