//! Signal handling for the runner
//!
//! SIGINT and SIGTERM cancel the run through the same token the watchdog
//! uses, so an interrupted run stops at the next epoch boundary.

use std::sync::OnceLock;

use crate::watchdog::{CancelReason, CancellationToken};

static CANCEL_TOKEN: OnceLock<CancellationToken> = OnceLock::new();

/// Set up SIGINT/SIGTERM handlers that cancel `token`
///
/// Only the first registered token is used; later calls are no-ops.
///
/// # Example
/// ```ignore
/// let token = CancellationToken::new();
/// setup_signal_handlers(token.clone());
/// ```
pub fn setup_signal_handlers(token: CancellationToken) {
    if CANCEL_TOKEN.set(token).is_err() {
        return;
    }

    #[cfg(unix)]
    {
        use libc::{SIGINT, SIGTERM};
        // SAFETY: the handler only touches atomics through the token
        unsafe {
            libc::signal(SIGINT, cancel_signal_handler as libc::sighandler_t);
            libc::signal(SIGTERM, cancel_signal_handler as libc::sighandler_t);
        }
        tracing::debug!("signal handlers registered: SIGINT/SIGTERM cancel the run");
    }
}

#[cfg(unix)]
extern "C" fn cancel_signal_handler(_: libc::c_int) {
    if let Some(token) = CANCEL_TOKEN.get() {
        token.cancel(CancelReason::Signal);
    }
}
