//! Run-wide deadline
//!
//! The watchdog bounds the whole benchmark run, not individual calls. On
//! expiry it cancels the shared [`CancellationToken`], which the driver
//! checks at every epoch boundary. If the run is still going after a grace
//! period (for example stuck in a barrier whose peer died), the expiry
//! action terminates the process.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::constants::WATCHDOG_GRACE_MS;
use crate::error::{BenchError, BenchResult};

/// Why a run was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Timeout,
    Signal,
}

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: AtomicBool,
    reason: AtomicU8,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, reason: CancelReason) {
        // Keep the first reason
        let code = match reason {
            CancelReason::Timeout => 1,
            CancelReason::Signal => 2,
        };
        let _ = self
            .inner
            .reason
            .compare_exchange(0, code, Ordering::SeqCst, Ordering::SeqCst);
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<CancelReason> {
        match self.inner.reason.load(Ordering::SeqCst) {
            1 => Some(CancelReason::Timeout),
            2 => Some(CancelReason::Signal),
            _ => None,
        }
    }

    /// Fail if the run was cancelled; `timeout_secs` names the deadline
    pub fn check(&self, timeout_secs: u64) -> BenchResult<()> {
        if !self.is_cancelled() {
            return Ok(());
        }

        match self.reason() {
            Some(CancelReason::Signal) => Err(BenchError::Interrupted),
            _ => Err(BenchError::TimeoutExceeded { secs: timeout_secs }),
        }
    }
}

/// Action run when the grace period after expiry elapses
pub type ExpiryAction = Box<dyn FnOnce(Duration) + Send + 'static>;

/// Default expiry action: diagnostic on stderr, exit status 1
pub fn exit_process() -> ExpiryAction {
    Box::new(|timeout: Duration| {
        eprintln!("!!! watchdog: deadline of {}s exceeded !!!", timeout.as_secs());
        eprintln!("alarm clock");
        std::process::exit(1);
    })
}

/// Armed run deadline
pub struct Watchdog {
    disarm: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Arm a deadline that terminates the process
    pub fn arm(timeout: Duration, token: CancellationToken) -> std::io::Result<Self> {
        Self::arm_with(
            timeout,
            Duration::from_millis(WATCHDOG_GRACE_MS),
            token,
            exit_process(),
        )
    }

    /// Arm a deadline with an explicit grace period and expiry action
    pub fn arm_with(
        timeout: Duration,
        grace: Duration,
        token: CancellationToken,
        on_expiry: ExpiryAction,
    ) -> std::io::Result<Self> {
        let (disarm, disarmed) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || {
                match disarmed.recv_timeout(timeout) {
                    Err(RecvTimeoutError::Timeout) => {}
                    // Disarmed, or the watchdog itself was dropped
                    _ => return,
                }

                tracing::error!("watchdog deadline of {:?} exceeded, cancelling run", timeout);
                token.cancel(CancelReason::Timeout);

                if let Err(RecvTimeoutError::Timeout) = disarmed.recv_timeout(grace) {
                    on_expiry(timeout);
                }
            })?;

        tracing::debug!("watchdog armed for {:?}", timeout);
        Ok(Self {
            disarm: Some(disarm),
            thread: Some(thread),
        })
    }

    /// Stop the timer; the expiry action will not run afterwards
    pub fn disarm(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(disarm) = self.disarm.take() {
            let _ = disarm.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
