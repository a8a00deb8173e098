//! Result channel of a submitted invocation.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::{Error, Result};

pub(crate) type ResultSender<R> = oneshot::Sender<Result<R>>;

/// Typed result of an `invoke` running on a named thread.
///
/// Dropping the handle discards the result; the work still runs to
/// completion. The handle can be waited on from plain threads with
/// [`wait`](Self::wait) or awaited from async code.
#[derive(Debug)]
pub struct InvocationHandle<R> {
    thread: String,
    receiver: oneshot::Receiver<Result<R>>,
}

impl<R> InvocationHandle<R> {
    pub(crate) fn channel(thread: impl Into<String>) -> (ResultSender<R>, Self) {
        let (sender, receiver) = oneshot::channel();
        (
            sender,
            Self {
                thread: thread.into(),
                receiver,
            },
        )
    }

    /// Name of the thread running the call.
    pub fn thread_name(&self) -> &str {
        &self.thread
    }

    /// Block until the call returns.
    ///
    /// Must not be called from an async runtime worker; await the handle there.
    pub fn wait(self) -> Result<R> {
        let thread = self.thread;
        self.receiver
            .blocking_recv()
            .unwrap_or_else(|_| Err(lost(&thread)))
    }

    /// The result if the call already returned.
    pub fn try_take(&mut self) -> Option<Result<R>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(lost(&self.thread))),
        }
    }
}

impl<R> Future for InvocationHandle<R> {
    type Output = Result<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(lost(&this.thread))))
    }
}

/// The unit of work ended without sending, which means it panicked.
fn lost(thread: &str) -> Error {
    Error::disconnected(format!("thread '{}' ended without a result", thread))
}
