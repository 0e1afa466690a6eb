//! Broadcast channel carrying subscription change events.
//!
//! [`ChangeFeed`] wraps a [`tokio::sync::broadcast`] channel. Store
//! implementations publish a [`SubscriptionChange`] after every committed
//! mutation; the orchestrator's feed reader is the single long-lived
//! consumer of a [`ChangeStream`].

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::SubscriptionChange;

/// Error returned by [`ChangeStream::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The reader fell behind and the given number of events were dropped.
    #[error("change feed lagged; {0} events dropped")]
    Lagged(u64),

    /// The feed was closed by its producer. Not recoverable.
    #[error("change feed closed")]
    Closed,
}

/// Producer side of the subscription change feed.
///
/// Cloning yields another handle to the same channel. Once [`close`] is
/// called every open stream reports [`FeedError::Closed`] after draining
/// the events already buffered.
///
/// [`close`]: ChangeFeed::close
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<SubscriptionChange>,
    closed: CancellationToken,
}

impl ChangeFeed {
    /// Creates a feed with the given ring-buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            closed: CancellationToken::new(),
        }
    }

    /// Publishes a change to every open stream.
    ///
    /// Returns the number of streams that received it. Publishing with no
    /// open stream silently drops the event.
    pub fn publish(&self, change: SubscriptionChange) -> usize {
        if self.closed.is_cancelled() {
            return 0;
        }
        self.sender.send(change).unwrap_or(0)
    }

    /// Opens a stream receiving every change published from now on.
    #[must_use]
    pub fn subscribe(&self) -> ChangeStream {
        ChangeStream {
            receiver: self.sender.subscribe(),
            closed: self.closed.clone(),
        }
    }

    /// Closes the feed. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Returns `true` once [`ChangeFeed::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Returns the current number of open streams.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Consumer side of a [`ChangeFeed`].
#[derive(Debug)]
pub struct ChangeStream {
    receiver: broadcast::Receiver<SubscriptionChange>,
    closed: CancellationToken,
}

impl ChangeStream {
    /// Waits for the next change.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Lagged`] when events were dropped because this
    /// reader was too slow, and [`FeedError::Closed`] once the feed is
    /// closed and drained.
    pub async fn next(&mut self) -> Result<SubscriptionChange, FeedError> {
        tokio::select! {
            biased;
            event = self.receiver.recv() => match event {
                Ok(change) => Ok(change),
                Err(broadcast::error::RecvError::Lagged(n)) => Err(FeedError::Lagged(n)),
                Err(broadcast::error::RecvError::Closed) => Err(FeedError::Closed),
            },
            () = self.closed.cancelled() => Err(FeedError::Closed),
        }
    }
}
