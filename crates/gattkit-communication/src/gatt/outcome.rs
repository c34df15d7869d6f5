//! Single-settlement result plumbing for transactions

use gattkit_core::{GattError, TransportError};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use super::request::GattRequestStatus;

/// Raw result carried from a transaction to its caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    /// Bytes read from the characteristic
    Value(Vec<u8>),
    /// Write or notification toggle completed
    Done,
}

/// Write-once completion slot
///
/// The first `settle` wins; every later call is a no-op.
pub struct Outcome<T> {
    sender: Mutex<Option<oneshot::Sender<Result<T, GattError>>>>,
}

impl<T> Outcome<T> {
    /// Create an unsettled outcome and the receiver that observes it
    pub fn channel() -> (Self, oneshot::Receiver<Result<T, GattError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Deliver a result; returns false if one was already delivered
    pub fn settle(&self, result: Result<T, GattError>) -> bool {
        match self.sender.lock().take() {
            Some(tx) => {
                // A dropped receiver means the caller stopped waiting
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Whether a result has already been delivered
    pub fn is_settled(&self) -> bool {
        self.sender.lock().is_none()
    }
}

enum State {
    Failed(Option<GattError>),
    Pending(oneshot::Receiver<Result<Settled, GattError>>),
}

/// Handle to an in-flight attribute operation
///
/// Awaiting it yields the operation's result. Dropping it does not cancel the
/// transaction; the timeout still bounds it.
pub struct PendingOperation<T> {
    state: State,
    map: fn(Settled) -> T,
    status: Option<Arc<Mutex<GattRequestStatus>>>,
}

impl<T> PendingOperation<T> {
    pub(crate) fn pending(
        receiver: oneshot::Receiver<Result<Settled, GattError>>,
        status: Arc<Mutex<GattRequestStatus>>,
        map: fn(Settled) -> T,
    ) -> Self {
        Self {
            state: State::Pending(receiver),
            map,
            status: Some(status),
        }
    }

    /// An operation that failed before it started
    pub(crate) fn failed(error: GattError, map: fn(Settled) -> T) -> Self {
        Self {
            state: State::Failed(Some(error)),
            map,
            status: None,
        }
    }

    /// Current stage of the underlying transaction
    ///
    /// Operations rejected before starting report `Disconnected`.
    pub fn status(&self) -> GattRequestStatus {
        self.status
            .as_ref()
            .map_or(GattRequestStatus::Disconnected, |s| *s.lock())
    }

    /// Whether the transaction never started
    pub fn is_rejected(&self) -> bool {
        matches!(self.state, State::Failed(_))
    }
}

impl<T> Future for PendingOperation<T> {
    type Output = Result<T, GattError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let map = this.map;
        match &mut this.state {
            State::Failed(error) => Poll::Ready(Err(error.take().unwrap_or(GattError::NotConnected))),
            State::Pending(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Ok(result)) => Poll::Ready(result.map(map)),
                Poll::Ready(Err(_)) => Poll::Ready(Err(GattError::Transport(TransportError::new(
                    "transaction dropped before settling",
                )))),
            },
        }
    }
}

impl<T> std::fmt::Debug for PendingOperation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOperation")
            .field("status", &self.status())
            .field("rejected", &self.is_rejected())
            .finish()
    }
}

pub(crate) fn into_value(settled: Settled) -> Vec<u8> {
    match settled {
        Settled::Value(bytes) => bytes,
        Settled::Done => Vec::new(),
    }
}

pub(crate) fn into_unit(_: Settled) {}
