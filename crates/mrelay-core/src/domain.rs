use std::fmt;

/// Platform-assigned identifier of one inbound message (webhook event).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventId(pub String);

/// Platform user address (phone number / wa_id). Opaque.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayloadKind {
    Text,
    Other(String),
}

/// One user action delivered by the webhook. Immutable once received.
#[derive(Clone, Debug)]
pub struct InboundEvent {
    pub event_id: EventId,
    pub sender_id: UserId,
    pub payload_kind: PayloadKind,
    pub body: String,
}

impl InboundEvent {
    pub fn text(event_id: impl Into<String>, sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            event_id: EventId(event_id.into()),
            sender_id: UserId(sender.into()),
            payload_kind: PayloadKind::Text,
            body: body.into(),
        }
    }
}

/// What one pipeline run is going to fetch. Owned by that run only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchJob {
    pub source_url: String,
    pub derived_title: String,
    pub derived_identifier: String,
}

/// One fetched embedded resource (usually an image), in page order.
#[derive(Clone, Debug)]
pub struct SubResource {
    pub locator: String,
    pub content: Vec<u8>,
    pub media_type: String,
}

/// Platform-issued reference to uploaded binary content. Used for exactly one send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaHandle(pub String);
