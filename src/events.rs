//! EventBus (C11) — process-wide pub/sub. Subscribers are local, receive
//! events FIFO, and a slow/dropped subscriber never blocks the publisher
//! (fire-and-forget via `tokio::sync::broadcast`, same shape the teacher
//! uses for its `nostr-status` / channel status emits, just in-process
//! instead of through a Tauri `AppHandle`).

use serde::Serialize;
use serde_json::Value;

/// Every SSE-visible event kind (§6 `/events`).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignetEvent {
    Connected,
    Reconnected,
    RequestCreated { id: String },
    RequestApproved { id: String },
    RequestDenied { id: String },
    RequestExpired { id: String },
    RequestAutoApproved { id: String },
    AppConnected { id: i64 },
    AppRevoked { id: i64 },
    AppUpdated { id: i64 },
    KeyCreated { name: String },
    KeyUnlocked { name: String },
    KeyLocked { name: String },
    KeyDeleted { name: String },
    KeyRenamed { old_name: String, new_name: String },
    KeyUpdated { name: String },
    StatsUpdated,
    RelaysUpdated,
    AdminEvent { event_type: String },
    DeadmanPanic,
    DeadmanReset,
    DeadmanUpdated,
    LogEntry { level: String, message: String },
    PoolReset,
    SleepDetected,
    Ping,
}

impl SignetEvent {
    pub fn to_sse_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<SignetEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = tokio::sync::broadcast::channel(1024);
        EventBus { tx }
    }

    /// Fire-and-forget: a publish with zero subscribers is not an error,
    /// and a lagging subscriber only loses old events, never blocks us.
    pub fn publish(&self, event: SignetEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SignetEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(SignetEvent::Ping);
    }

    #[tokio::test]
    async fn subscriber_receives_events_fifo() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(SignetEvent::RequestCreated { id: "a".into() });
        bus.publish(SignetEvent::RequestCreated { id: "b".into() });
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        match (first, second) {
            (SignetEvent::RequestCreated { id: a }, SignetEvent::RequestCreated { id: b }) => {
                assert_eq!(a, "a");
                assert_eq!(b, "b");
            }
            _ => panic!("unexpected variants"),
        }
    }

    #[test]
    fn serializes_with_tagged_type() {
        let json = SignetEvent::KeyCreated { name: "alice".into() }.to_sse_json();
        assert_eq!(json["type"], "key_created");
        assert_eq!(json["name"], "alice");
    }
}
