//! `hlsdl status` – show stored download progress.

use anyhow::Result;
use hlsdl_core::DownloadSession;

pub async fn run_status(session: &DownloadSession) -> Result<()> {
    let records = session.records().await?;
    if records.is_empty() {
        println!("No downloads in progress.");
    } else {
        println!("{:<12} {:<8} {}", "SEGMENTS", "DONE", "URL");
        for (url, record) in records {
            let state = if record.is_complete() { "ready" } else { "partial" };
            println!(
                "{:<12} {:<8} {}",
                format!("{}/{}", record.downloaded_count(), record.total_segments),
                state,
                url
            );
        }
    }
    Ok(())
}
