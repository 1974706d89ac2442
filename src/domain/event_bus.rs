//! Broadcast channel for job lifecycle events.
//!
//! [`EventBus`] wraps a [`tokio::sync::broadcast`] channel. The scheduler
//! publishes a [`JobEvent`] for every start, completion, failure and
//! cancellation; handlers, the admin API and tests subscribe to observe
//! outcomes.

use tokio::sync::broadcast;

use super::JobEvent;

/// Broadcast bus for [`JobEvent`]s.
///
/// Backed by a `tokio::broadcast` channel with a configurable capacity.
/// When the ring buffer is full, the oldest events are dropped for lagging
/// receivers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Creates a new `EventBus` with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event.
    /// If there are no active receivers, the event is silently dropped.
    pub fn publish(&self, event: JobEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Creates a new receiver that will receive all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

/// Waits for the next `Completed` or `Failed` event on `rx`.
///
/// Start and cancellation events are skipped, and so are lag notices: a
/// lagging receiver resumes at the oldest retained event. Returns `None`
/// once every sender is gone.
pub async fn next_terminal(rx: &mut broadcast::Receiver<JobEvent>) -> Option<JobEvent> {
    loop {
        match rx.recv().await {
            Ok(event) if event.is_terminal() => return Some(event),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "job event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
