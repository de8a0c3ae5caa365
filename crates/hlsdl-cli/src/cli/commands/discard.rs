//! `hlsdl discard <url>` – drop a download's progress and staged segments.

use anyhow::Result;
use hlsdl_core::DownloadSession;

pub async fn run_discard(session: &DownloadSession, url: &str) -> Result<()> {
    session.discard(url).await?;
    println!("Discarded {url}");
    Ok(())
}
