//! Telemetry events published by the receive loop.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::broadcast;
use tracing::trace;

use crate::telemetry::TelemetryState;

/// Capacity of the telemetry broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Event decoded from an inbound datagram.
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// A real-time state record
    State(Arc<TelemetryState>),
    /// A text reply, NUL-trimmed
    TextReply(String),
}

/// Fan-out point for decoded telemetry.
///
/// Consumers either await events from [`TelemetryHub::subscribe`] or poll the
/// most recent state with [`TelemetryHub::latest_state`].
pub struct TelemetryHub {
    event_tx: broadcast::Sender<TelemetryEvent>,
    latest: ArcSwapOption<TelemetryState>,
}

impl TelemetryHub {
    /// Create a hub with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { event_tx, latest: ArcSwapOption::empty() }
    }

    /// Get a receiver for future events.
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.event_tx.subscribe()
    }

    /// The most recently decoded state, if any.
    #[must_use]
    pub fn latest_state(&self) -> Option<Arc<TelemetryState>> {
        self.latest.load_full()
    }

    pub(crate) fn publish_state(&self, state: TelemetryState) {
        let state = Arc::new(state);
        self.latest.store(Some(Arc::clone(&state)));
        // No receivers is not an error; the snapshot is still updated
        let receivers = self.event_tx.send(TelemetryEvent::State(state)).unwrap_or(0);
        trace!(receivers, "Published RT state");
    }

    pub(crate) fn publish_text(&self, text: String) {
        let receivers = self.event_tx.send(TelemetryEvent::TextReply(text)).unwrap_or(0);
        trace!(receivers, "Published text reply");
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers_and_snapshot() {
        let hub = TelemetryHub::new();
        let mut rx = hub.subscribe();
        assert!(hub.latest_state().is_none());

        hub.publish_state(TelemetryState { sample_rate: 44_100, ..TelemetryState::default() });
        hub.publish_text("ok".to_string());

        assert_matches!(rx.recv().await, Ok(TelemetryEvent::State(s)) if s.sample_rate == 44_100);
        assert_matches!(rx.recv().await, Ok(TelemetryEvent::TextReply(t)) if t == "ok");
        assert_eq!(hub.latest_state().map(|s| s.sample_rate), Some(44_100));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = TelemetryHub::new();
        hub.publish_state(TelemetryState::default());
        assert!(hub.latest_state().is_some());
    }
}
