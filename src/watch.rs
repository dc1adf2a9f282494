//! Settlement watching: a bounded race between the automatic watchtower
//! claim and the caller's manual fallback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::chain::{ChainRpc, EscrowStatus};
use crate::error::{Result, SwapError};

/// Cooperative cancellation for bounded waits. Cancelling never mutates the
/// persisted swap state; it only aborts the wait with
/// [`SwapError::Cancelled`]. A token may carry its own deadline, after which
/// it counts as cancelled.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                flag: AtomicBool::new(false),
                notify: Notify::new(),
                deadline: Some(deadline),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
            || self.inner.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.inner.flag.load(Ordering::SeqCst) {
                return;
            }
            match self.inner.deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(deadline) => return,
                    }
                }
                None => notified.await,
            }
            if self.inner.flag.load(Ordering::SeqCst) {
                return;
            }
        }
    }
}

/// Checks a cancel token before/while waiting.
pub(crate) fn check_cancel(cancel: Option<&CancelToken>) -> Result<()> {
    if cancel.is_some_and(CancelToken::is_cancelled) {
        return Err(SwapError::Cancelled);
    }
    Ok(())
}

/// Watches for an automatic third-party settlement of one swap.
///
/// The watcher only reports the outcome; deciding whether to run the manual
/// claim stays with the caller.
pub struct SettlementWatcher {
    poll_interval: Duration,
}

impl SettlementWatcher {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Waits up to `window` for the escrow to be claimed by a watchtower.
    ///
    /// Returns the claim txid if settlement landed, `Ok(None)` once the
    /// window elapses without one. An optional `push` signal (fed from LP
    /// notifications) short-circuits the poll loop; `cancel` aborts with
    /// [`SwapError::Cancelled`].
    pub async fn wait_settled(
        &self,
        rpc: &dyn ChainRpc,
        escrow_id: &str,
        window: Duration,
        push: Option<&Notify>,
        cancel: Option<&CancelToken>,
    ) -> Result<Option<String>> {
        let deadline = Instant::now() + window;

        loop {
            check_cancel(cancel)?;

            match rpc.escrow_status(escrow_id).await? {
                EscrowStatus::Claimed { txid, .. } => {
                    tracing::info!(escrow_id, %txid, "settled automatically");
                    return Ok(Some(txid));
                }
                EscrowStatus::Refunded { txid } => {
                    return Err(SwapError::OnChainRejection(format!(
                        "escrow refunded in {txid} while awaiting settlement"
                    )));
                }
                EscrowStatus::Open | EscrowStatus::NotFound => {}
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::info!(escrow_id, "settlement window elapsed");
                return Ok(None);
            }
            let tick = self.poll_interval.min(deadline - now);

            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = async {
                    match push {
                        Some(n) => n.notified().await,
                        None => std::future::pending().await,
                    }
                } => {}
                _ = async {
                    match cancel {
                        Some(c) => c.cancelled().await,
                        None => std::future::pending().await,
                    }
                } => return Err(SwapError::Cancelled),
            }
        }
    }
}
