//! Cooperative cancellation for in-flight queries.
//!
//! A [`CancelHandle`] flips a watch channel; every network await in the
//! client is raced against the matching [`CancelToken`].

use crate::error::Cancelled;
use std::future::Future;
use tokio::sync::watch;

/// Fires the cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes the cancellation signal. Cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

/// A connected handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx: Some(rx) })
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves once cancellation is requested. Never resolves for
    /// [`CancelToken::never`] or when the handle was dropped uncancelled.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Run `fut` unless cancellation comes first.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Cancelled),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_never_token_runs_future() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
        assert_eq!(token.guard(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_cancel_before_run() {
        let (handle, token) = cancel_pair();
        handle.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.guard(async { 7 }).await, Err(Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let (handle, token) = cancel_pair();
        let task = tokio::spawn(async move {
            token
                .guard(tokio::time::sleep(Duration::from_secs(3600)))
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        assert_eq!(task.await.unwrap(), Err(Cancelled));
    }

    #[tokio::test]
    async fn test_dropped_handle_never_cancels() {
        let (handle, token) = cancel_pair();
        drop(handle);
        assert_eq!(token.guard(async { "done" }).await, Ok("done"));
    }
}
