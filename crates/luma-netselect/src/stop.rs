//! Stop signals and their bridge to cancellation tokens.
//!
//! A [`StopSignal`] fires when its [`StopHandle`] calls [`StopHandle::stop`]
//! or is dropped. [`StopSignal::context`] turns it into a [`StopContext`]
//! whose token can be handed to code built around `CancellationToken`.

use crate::error::SelectError;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx: Some(rx) })
}

#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl StopSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_stopped(&self) -> bool {
        match &self.rx {
            None => false,
            Some(rx) => *rx.borrow() || rx.has_changed().is_err(),
        }
    }

    /// Completes once the signal fires.
    pub async fn stopped(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Wraps the signal into a cancellation context. Must be called within a
    /// Tokio runtime.
    pub fn context(&self) -> StopContext {
        let token = CancellationToken::new();
        let watcher = if self.is_stopped() {
            token.cancel();
            None
        } else if self.rx.is_some() {
            let signal = self.clone();
            let cancel = token.clone();
            Some(tokio::spawn(async move {
                signal.stopped().await;
                cancel.cancel();
            }))
        } else {
            None
        };
        StopContext {
            signal: self.clone(),
            token,
            watcher,
        }
    }
}

/// Cancellation context driven by a [`StopSignal`].
#[derive(Debug)]
pub struct StopContext {
    signal: StopSignal,
    token: CancellationToken,
    watcher: Option<JoinHandle<()>>,
}

impl StopContext {
    /// Completes once the underlying signal fires.
    pub fn done(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Reports cancellation if and only if the stop signal has fired.
    pub fn err(&self) -> Option<SelectError> {
        self.signal.is_stopped().then_some(SelectError::Canceled)
    }

    /// Stop contexts never carry a deadline.
    pub fn deadline(&self) -> Option<Instant> {
        None
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns a child token the caller may cancel early on its own; it is
    /// also cancelled when the stop signal fires.
    pub fn with_cancel(&self) -> CancellationToken {
        self.token.child_token()
    }
}

impl Drop for StopContext {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stop_cancels_context() {
        let (handle, signal) = stop_channel();
        let ctx = signal.context();
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());

        handle.stop();
        tokio::time::timeout(Duration::from_secs(5), ctx.done())
            .await
            .expect("context should be cancelled");
        assert!(matches!(ctx.err(), Some(SelectError::Canceled)));
    }

    #[tokio::test]
    async fn test_dropping_handle_is_a_stop() {
        let (handle, signal) = stop_channel();
        let ctx = signal.context();
        drop(handle);
        tokio::time::timeout(Duration::from_secs(5), ctx.done())
            .await
            .expect("closed channel should cancel");
        assert!(signal.is_stopped());
    }

    #[tokio::test]
    async fn test_already_stopped_signal() {
        let (handle, signal) = stop_channel();
        handle.stop();
        let ctx = signal.context();
        assert!(ctx.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_touch_signal() {
        let (_handle, signal) = stop_channel();
        let ctx = signal.context();
        let child = ctx.with_cancel();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!ctx.token().is_cancelled());
        assert!(ctx.err().is_none());
    }

    #[tokio::test]
    async fn test_parent_stop_reaches_child() {
        let (handle, signal) = stop_channel();
        let ctx = signal.context();
        let child = ctx.with_cancel();
        handle.stop();
        tokio::time::timeout(Duration::from_secs(5), child.cancelled())
            .await
            .expect("child should observe stop");
    }

    #[tokio::test]
    async fn test_never_signal() {
        let signal = StopSignal::never();
        let ctx = signal.context();
        assert!(!signal.is_stopped());
        assert!(ctx.err().is_none());
        assert!(tokio::time::timeout(Duration::from_millis(20), ctx.done())
            .await
            .is_err());
    }
}
