//! The stream type handed to notification consumers.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use tokio::sync::mpsc;

/// A stream of notification events. Created by a notifier backend; consumed
/// through its [`futures::Stream`] implementation.
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Wraps a channel receiver. Only notifier backends (and test doubles)
    /// should need this.
    pub fn from_receiver(receiver: mpsc::UnboundedReceiver<T>) -> Subscription<T> {
        Subscription { receiver }
    }

    /// Receives the next event, or `None` once the producer is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }
}

impl<T> futures::Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}
