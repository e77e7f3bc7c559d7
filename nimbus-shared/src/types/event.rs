use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// RabbitMQ Event envelope wrapping all domain events.
///
/// Routing key format: `nimbus.{domain}.{entity}.{action}`
/// Example: `nimbus.notification.send.requested`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T: Serialize> {
    pub id: Uuid,
    pub source: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub data: T,
}

impl<T: Serialize> Event<T> {
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, data: T) -> Self {
        Self {
            id: Uuid::now_v7(),
            source: source.into(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            correlation_id: None,
            user_id: None,
            data,
        }
    }
}

/// RabbitMQ routing keys
pub mod routing_keys {
    // Notification events
    pub const NOTIFICATION_SEND_REQUESTED: &str = "nimbus.notification.send.requested";
}

/// Common event data payloads
pub mod payloads {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// Queued variant of a notification dispatch: the HTTP layer publishes this
    /// and the notification subscriber runs the same dispatch engine on it.
    ///
    /// `notification_type` travels as a string and is parsed into the closed
    /// enum at the consuming edge.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SendNotificationRequested {
        pub notification_type: String,
        pub title: String,
        pub body: String,
        #[serde(default)]
        pub user_ids: Vec<Uuid>,
        #[serde(default)]
        pub user_emails: Vec<String>,
        pub data: Option<serde_json::Value>,
        pub image: Option<String>,
    }
}
