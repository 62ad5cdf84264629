//! Cancellation watchdog
//!
//! Writes to the transport are not context-aware. While a batch is being
//! sent, a watchdog task waits on the context and, if it fires, runs a close
//! action (shutting the socket down) so that the pending write or read
//! returns instead of blocking forever.
//!
//! The close action sits behind a mutex. Disarming takes it out under the
//! lock, so once `disarm` returns the action has either already run to
//! completion or will never run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::context::Context;

type CloseAction = Box<dyn FnOnce() + Send>;

/// Handle to an armed watchdog; disarms on drop
#[must_use = "dropping the guard disarms the watchdog immediately"]
pub struct WatchdogGuard {
    action: Arc<Mutex<Option<CloseAction>>>,
    fired: Arc<AtomicBool>,
    stop: CancellationToken,
}

/// Arm a watchdog that runs `on_cancel` once if `ctx` is cancelled or
/// reaches its deadline before the guard is disarmed
///
/// Must be called from within a tokio runtime.
pub fn arm<F>(ctx: &Context, on_cancel: F) -> WatchdogGuard
where
    F: FnOnce() + Send + 'static,
{
    let guard = WatchdogGuard {
        action: Arc::new(Mutex::new(Some(Box::new(on_cancel) as CloseAction))),
        fired: Arc::new(AtomicBool::new(false)),
        stop: CancellationToken::new(),
    };

    let ctx = ctx.clone();
    let action = Arc::clone(&guard.action);
    let fired = Arc::clone(&guard.fired);
    let stop = guard.stop.clone();

    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = stop.cancelled() => {}
            reason = ctx.done() => {
                let mut slot = action.lock();
                if let Some(close) = slot.take() {
                    fired.store(true, Ordering::Release);
                    tracing::debug!(reason = %reason, "context done, closing transport");
                    close();
                }
            }
        }
    });

    guard
}

impl WatchdogGuard {
    /// Stop the watchdog; returns whether it fired
    pub fn disarm(&self) -> bool {
        self.stop.cancel();
        self.action.lock().take();
        self.fired()
    }

    /// Whether the close action ran
    #[inline]
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl Drop for WatchdogGuard {
    fn drop(&mut self) {
        self.disarm();
    }
}

impl std::fmt::Debug for WatchdogGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchdogGuard")
            .field("fired", &self.fired())
            .field("stopped", &self.stop.is_cancelled())
            .finish()
    }
}
