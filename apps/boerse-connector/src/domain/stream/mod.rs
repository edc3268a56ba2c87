//! Stream Model
//!
//! Subscription lifecycle states, server-sent event records and the
//! message buffer a subscription fills.

use serde_json::Value;

// =============================================================================
// Lifecycle
// =============================================================================

/// Lifecycle state of a stream subscription.
///
/// `Idle → Running → Stopping → Idle`. A running subscription also returns
/// to `Idle` on its own when the connection ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    /// No background task.
    #[default]
    Idle,
    /// Background task is receiving events.
    Running,
    /// Stop requested, waiting for the task to exit.
    Stopping,
}

impl StreamState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Events
// =============================================================================

/// Event type the server uses for payload-carrying events.
pub const MESSAGE_EVENT: &str = "message";

/// One dispatched `text/event-stream` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    /// Event type, `message` unless the server set one.
    pub event: String,
    /// Data lines joined by `\n`.
    pub data: String,
    /// Last event id seen on the stream.
    pub id: Option<String>,
    /// Reconnection delay hint in milliseconds.
    pub retry: Option<u64>,
}

impl ServerEvent {
    /// Create a `message` event with the given data.
    #[must_use]
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            event: MESSAGE_EVENT.to_string(),
            data: data.into(),
            id: None,
            retry: None,
        }
    }

    /// Whether this event carries a payload.
    #[must_use]
    pub fn is_message(&self) -> bool {
        self.event == MESSAGE_EVENT
    }
}

// =============================================================================
// Buffer
// =============================================================================

/// How received payloads are retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferMode {
    /// Keep only the most recent payload.
    #[default]
    Latest,
    /// Keep every payload in receipt order.
    Cache,
}

/// Payloads received by one subscription.
#[derive(Debug, Clone, Default)]
pub struct MessageBuffer {
    mode: BufferMode,
    messages: Vec<Value>,
}

impl MessageBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub const fn new(mode: BufferMode) -> Self {
        Self {
            mode,
            messages: Vec::new(),
        }
    }

    /// Retention mode.
    #[must_use]
    pub const fn mode(&self) -> BufferMode {
        self.mode
    }

    /// Store a payload.
    pub fn push(&mut self, message: Value) {
        if self.mode == BufferMode::Latest {
            self.messages.clear();
        }
        self.messages.push(message);
    }

    /// Most recent payload.
    #[must_use]
    pub fn latest(&self) -> Option<&Value> {
        self.messages.last()
    }

    /// All retained payloads, oldest first.
    #[must_use]
    pub fn all(&self) -> &[Value] {
        &self.messages
    }

    /// Number of retained payloads.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether nothing has been retained.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop all retained payloads.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn latest_mode_keeps_one_slot() {
        let mut buffer = MessageBuffer::new(BufferMode::Latest);
        buffer.push(json!(1));
        buffer.push(json!(2));
        assert_eq!(buffer.all(), &[json!(2)]);
        assert_eq!(buffer.latest(), Some(&json!(2)));
    }

    #[test]
    fn cache_mode_keeps_receipt_order() {
        let mut buffer = MessageBuffer::new(BufferMode::Cache);
        for i in 0..5 {
            buffer.push(json!(i));
        }
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.all()[0], json!(0));
        assert_eq!(buffer.latest(), Some(&json!(4)));
    }

    #[test]
    fn state_names() {
        assert_eq!(StreamState::default(), StreamState::Idle);
        assert_eq!(StreamState::Running.to_string(), "running");
        assert_eq!(StreamState::Stopping.as_str(), "stopping");
    }

    #[test]
    fn only_message_events_carry_payloads() {
        assert!(ServerEvent::message("{}").is_message());
        let heartbeat = ServerEvent {
            event: "ping".to_string(),
            ..ServerEvent::message("")
        };
        assert!(!heartbeat.is_message());
    }
}
