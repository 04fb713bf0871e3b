//! Cloud API webhook payload.
//!
//! Every level is lenient: an absent, mistyped or malformed node reads as
//! empty instead of failing the whole delivery.

use mrelay_core::domain::{EventId, InboundEvent, PayloadKind, UserId};
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WebhookPayload {
    pub object: String,
    #[serde(deserialize_with = "lenient_vec")]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Entry {
    pub id: String,
    #[serde(deserialize_with = "lenient_vec")]
    pub changes: Vec<Change>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Change {
    pub field: String,
    #[serde(deserialize_with = "lenient")]
    pub value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChangeValue {
    pub messaging_product: String,
    #[serde(deserialize_with = "lenient")]
    pub metadata: Option<Metadata>,
    #[serde(deserialize_with = "lenient_vec")]
    pub messages: Vec<Message>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub display_phone_number: String,
    pub phone_number_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Message {
    pub id: String,
    pub from: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(deserialize_with = "lenient")]
    pub text: Option<TextBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TextBody {
    pub body: String,
}

impl Message {
    fn into_event(self) -> Option<InboundEvent> {
        if self.id.trim().is_empty() || self.from.trim().is_empty() {
            debug!(msg_type = %self.message_type, "message without id or sender, skipping");
            return None;
        }
        let (payload_kind, body) = match (self.message_type.as_str(), self.text) {
            ("text", Some(text)) => (PayloadKind::Text, text.body),
            (other, _) => (PayloadKind::Other(other.to_string()), String::new()),
        };
        Some(InboundEvent {
            event_id: EventId(self.id),
            sender_id: UserId(self.from),
            payload_kind,
            body,
        })
    }
}

impl WebhookPayload {
    /// Every message across every entry and change, in delivery order.
    pub fn into_events(self) -> Vec<InboundEvent> {
        self.entry
            .into_iter()
            .flat_map(|entry| entry.changes)
            .filter(|change| change.field.is_empty() || change.field == "messages")
            .flat_map(|change| change.value.messages)
            .filter_map(Message::into_event)
            .collect()
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let items = match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Array(items) => items,
        _ => return Ok(Vec::new()),
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}
