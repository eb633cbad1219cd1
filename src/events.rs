//! In-process event bus feeding the server-sent-events channel.
//!
//! Subscribers receive all future events; there is no replay. Sending with
//! zero subscribers is a no-op, so producers never block on slow or absent
//! consumers.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// One event on the stream: `job_update`, `log`, or `suggestion`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineEvent {
    pub event: String,
    pub data: Value,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn broadcast(&self, event: &str, data: Value) {
        let _ = self.tx.send(EngineEvent {
            event: event.to_string(),
            data,
        });
    }

    pub fn notify_job_update(&self, job_id: &str, status: &str, progress: i64, message: &str) {
        self.broadcast(
            "job_update",
            serde_json::json!({
                "job_id": job_id,
                "status": status,
                "progress": progress,
                "message": message,
            }),
        );
    }

    pub fn notify_log(&self, level: &str, message: &str) {
        self.broadcast(
            "log",
            serde_json::json!({
                "level": level,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
        );
    }

    pub fn notify_suggestion(&self, data: Value) {
        self.broadcast("suggestion", data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_future_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.notify_job_update("j1", "running", 40, "working");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event, "job_update");
        assert_eq!(event.data["job_id"], "j1");
        assert_eq!(event.data["progress"], 40);
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_a_noop() {
        let bus = EventBus::new();
        bus.notify_log("info", "nobody listening");
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn late_subscribers_miss_earlier_events() {
        let bus = EventBus::new();
        bus.notify_log("info", "before subscribe");
        let mut rx = bus.subscribe();
        bus.notify_log("info", "after subscribe");
        let event = rx.recv().await.unwrap();
        assert_eq!(event.data["message"], "after subscribe");
    }
}
