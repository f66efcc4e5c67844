//! Lazy, cancellable listing stream.
//!
//! A [`Listing`] is fed by one spawned producer through a bounded
//! channel.  The producer pages through the provider sequentially and
//! ends with a [`ListStatus`], which the consumer can read once the
//! items are drained.  Cancelling (or dropping) the listing stops the
//! producer at its next send.

use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::errors::Error;

/// How a listing ended.
#[derive(Debug)]
pub enum ListStatus {
    /// Every page was read.
    Complete,
    /// A page could not be fetched; only items before it were delivered.
    /// Listing again from `resume_marker` picks up where this one stopped.
    Truncated {
        error: Error,
        resume_marker: Option<String>,
    },
    /// The consumer cancelled, or the producer went away without reporting.
    Cancelled,
}

impl ListStatus {
    /// True for [`ListStatus::Complete`].
    pub fn is_complete(&self) -> bool {
        matches!(self, ListStatus::Complete)
    }
}

/// Producer side of a [`Listing`].
pub struct ListSender<T> {
    tx: mpsc::Sender<T>,
    cancel: CancellationToken,
}

impl<T: Send> ListSender<T> {
    /// Deliver one item. Returns `false` once the consumer has cancelled
    /// or gone away; the producer should then stop and report
    /// [`ListStatus::Cancelled`].
    pub async fn send(&self, item: T) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(item) => sent.is_ok(),
        }
    }

    /// Whether the consumer has cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

/// Ordered, single-pass sequence of listing results.
pub struct Listing<T> {
    rx: mpsc::Receiver<T>,
    status_rx: Option<oneshot::Receiver<ListStatus>>,
    status: Option<ListStatus>,
    cancel: CancellationToken,
}

impl<T: Send + 'static> Listing<T> {
    /// Spawn `produce` on the runtime, feeding a channel of `capacity`.
    pub fn spawn<F, Fut>(capacity: usize, produce: F) -> Self
    where
        F: FnOnce(ListSender<T>) -> Fut,
        Fut: Future<Output = ListStatus> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (status_tx, status_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let fut = produce(ListSender {
            tx,
            cancel: cancel.clone(),
        });
        tokio::spawn(async move {
            let status = fut.await;
            let _ = status_tx.send(status);
        });
        Self {
            rx,
            status_rx: Some(status_rx),
            status: None,
            cancel,
        }
    }

    /// A listing that yields `items` and then completes. Needs no runtime.
    pub fn from_items(items: Vec<T>) -> Self {
        Self::finished(items, ListStatus::Complete)
    }

    /// A listing that yields `items` and then ends with `status`.
    pub fn finished(items: Vec<T>, status: ListStatus) -> Self {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            // Capacity covers every item.
            let _ = tx.try_send(item);
        }
        Self {
            rx,
            status_rx: None,
            status: Some(status),
            cancel: CancellationToken::new(),
        }
    }

    /// Next item, or `None` once the producer has finished. After `None`,
    /// [`Listing::status`] holds the terminal status.
    pub async fn next(&mut self) -> Option<T> {
        match self.rx.recv().await {
            Some(item) => Some(item),
            None => {
                self.resolve().await;
                None
            }
        }
    }

    /// Terminal status, available after [`Listing::next`] returned `None`.
    pub fn status(&self) -> Option<&ListStatus> {
        self.status.as_ref()
    }

    /// Ask the producer to stop. Items already buffered can still be read.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain everything, returning the items and the terminal status.
    pub async fn collect(mut self) -> (Vec<T>, ListStatus) {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item);
        }
        let status = self.status.take().unwrap_or(ListStatus::Cancelled);
        (items, status)
    }

    async fn resolve(&mut self) {
        if self.status.is_some() {
            return;
        }
        let status = match self.status_rx.take() {
            Some(rx) => rx.await.unwrap_or(ListStatus::Cancelled),
            None => ListStatus::Cancelled,
        };
        self.status = Some(status);
    }
}

impl<T> Drop for Listing<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
