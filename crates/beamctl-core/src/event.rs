//! Event system for framing runs
//!
//! Provides:
//! - Event types published while an outline framing run progresses
//! - Event dispatcher for publishing events to subscribers

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Phase of a framing run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FramingPhase {
    /// No run in progress
    #[default]
    Idle,
    /// Target polygon is being computed
    Computing,
    /// Device state and add-ons are being checked
    Initializing,
    /// Device is being prepared for tracing
    SettingUp,
    /// Head is moving along the polygon
    Tracing,
    /// Device is being restored
    TearingDown,
}

impl fmt::Display for FramingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FramingPhase::Idle => "Idle",
            FramingPhase::Computing => "Computing",
            FramingPhase::Initializing => "Initializing",
            FramingPhase::SettingUp => "SettingUp",
            FramingPhase::Tracing => "Tracing",
            FramingPhase::TearingDown => "TearingDown",
        };
        write!(f, "{}", name)
    }
}

/// Framing event types
#[derive(Debug, Clone, PartialEq)]
pub enum FramingEvent {
    /// Working status changed
    StatusChanged(bool),
    /// Run entered a new phase
    PhaseChanged(FramingPhase),
    /// Progress message for the operator
    Message(String),
    /// Previously shown progress message should be dismissed
    CloseMessage,
    /// Non-blocking warning
    Warning {
        /// Stable key identifying the warning.
        key: String,
        /// Warning text.
        text: String,
    },
    /// Blocking alert; the run has stopped
    Alert(String),
}

impl fmt::Display for FramingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingEvent::StatusChanged(working) => write!(f, "Working: {}", working),
            FramingEvent::PhaseChanged(phase) => write!(f, "Phase: {}", phase),
            FramingEvent::Message(msg) => write!(f, "Message: {}", msg),
            FramingEvent::CloseMessage => write!(f, "Message closed"),
            FramingEvent::Warning { key, text } => write!(f, "Warning [{}]: {}", key, text),
            FramingEvent::Alert(msg) => write!(f, "Alert: {}", msg),
        }
    }
}

/// Event dispatcher for publishing events to subscribers
#[derive(Clone)]
pub struct EventDispatcher {
    /// Broadcast sender channel for framing events.
    tx: broadcast::Sender<FramingEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the broadcast buffer (default 100)
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size);
        Self { tx }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<FramingEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers
    ///
    /// Returns the number of subscribers that received it; publishing with no
    /// subscribers is not an error.
    pub fn publish(&self, event: FramingEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let dispatcher = EventDispatcher::default();
        assert_eq!(dispatcher.publish(FramingEvent::CloseMessage), 0);

        let mut rx = dispatcher.subscribe();
        assert_eq!(dispatcher.subscriber_count(), 1);
        assert_eq!(
            dispatcher.publish(FramingEvent::PhaseChanged(FramingPhase::Tracing)),
            1
        );
        assert_eq!(
            rx.recv().await.ok(),
            Some(FramingEvent::PhaseChanged(FramingPhase::Tracing))
        );
    }
}
