//! Exclusive activity slot for one session.
//!
//! A download, a save and a discard all touch the same record and staging
//! area, so only one of them may run at a time. Each claims the slot through
//! [`DownloadControl::acquire`] and holds the returned guard for as long as it
//! runs; dropping the guard (also when the future owning it is dropped)
//! cancels its token and frees the slot. `abort` from anywhere (a Ctrl-C
//! handler, a UI button) cancels a running download.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Download,
    Save,
    Discard,
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Activity::Download => "download",
            Activity::Save => "save",
            Activity::Discard => "discard",
        })
    }
}

#[derive(Debug)]
struct Slot {
    activity: Activity,
    token: CancellationToken,
}

/// Holds what the session is doing right now, if anything.
#[derive(Debug, Default)]
pub struct DownloadControl {
    active: Mutex<Option<Slot>>,
}

/// Proof of holding the slot. Frees it on drop.
#[derive(Debug)]
pub struct ActiveGuard<'a> {
    control: &'a DownloadControl,
    token: CancellationToken,
}

impl ActiveGuard<'_> {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        // Anything still running under this token (spawned workers) must stop.
        self.token.cancel();
        self.control
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl DownloadControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `activity`, or return the activity holding it.
    pub fn acquire(&self, activity: Activity) -> Result<ActiveGuard<'_>, Activity> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = &*active {
            return Err(slot.activity);
        }
        let token = CancellationToken::new();
        *active = Some(Slot {
            activity,
            token: token.clone(),
        });
        Ok(ActiveGuard {
            control: self,
            token,
        })
    }

    /// Cancel the running download. Idempotent; a no-op when no download
    /// holds the slot. Returns whether one did.
    pub fn request_abort(&self) -> bool {
        match &*self.active.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(Slot {
                activity: Activity::Download,
                token,
            }) => {
                if !token.is_cancelled() {
                    tracing::info!("abort requested");
                }
                token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn current(&self) -> Option<Activity> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|slot| slot.activity)
    }
}
