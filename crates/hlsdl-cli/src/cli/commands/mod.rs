//! CLI command handlers. Each command is in its own file.

mod discard;
mod get;
mod save;
mod status;

pub use discard::run_discard;
pub use get::{run_get, GetArgs};
pub use save::run_save;
pub use status::run_status;

use hlsdl_core::DownloadSession;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// On Ctrl-C, abort the running download and cancel any output being written.
/// Abort the returned handle once the command is done.
fn spawn_ctrl_c_handler(
    session: Arc<DownloadSession>,
    save_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted; stopping...");
            session.abort();
            save_token.cancel();
        }
    })
}
