//! Host-side handle for an observed engine promise

use crate::error::Rejection;
use crate::value::ScriptValue;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Outcome of an observed promise.
pub type Settlement = Result<ScriptValue, Rejection>;

/// Single-assignment completion of an engine promise.
///
/// Resolves with the fulfilled value or fails with a [`Rejection`]. It only
/// makes progress while the pump runs, and it must be awaited on the engine
/// thread.
#[derive(Debug)]
pub struct Completion {
    receiver: oneshot::Receiver<Settlement>,
}

impl Completion {
    pub(crate) fn channel() -> (Self, oneshot::Sender<Settlement>) {
        let (sender, receiver) = oneshot::channel();
        (Self { receiver }, sender)
    }

    /// Take the settlement if it has already happened.
    ///
    /// Returns `None` while pending. Once a settlement is returned, later
    /// calls report the completion as abandoned.
    pub fn try_settled(&mut self) -> Option<Settlement> {
        match self.receiver.try_recv() {
            Ok(settlement) => Some(settlement),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(Rejection::abandoned())),
        }
    }
}

impl Future for Completion {
    type Output = Settlement;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(settlement)) => Poll::Ready(settlement),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Rejection::abandoned())),
            Poll::Pending => Poll::Pending,
        }
    }
}
