//! WhatsApp Cloud API adapter for [`OutboundPort`].
//!
//! One attempt per call: a failed send is surfaced, never retried, so the
//! user cannot receive the same document twice.

use std::time::Duration;

use async_trait::async_trait;
use mrelay_core::{
    domain::{MediaHandle, UserId},
    errors::Error,
    messaging::{MediaUpload, OutboundPort},
    Result,
};
use serde_json::{json, Value};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct CloudApiClient {
    http: reqwest::Client,
    base_url: String,
    phone_number_id: String,
    token: String,
}

impl CloudApiClient {
    /// `base_url` is the versioned Graph API root, e.g.
    /// `https://graph.facebook.com/v17.0`.
    pub fn new(
        base_url: impl Into<String>,
        phone_number_id: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            phone_number_id: phone_number_id.into(),
            token: token.into(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}/{path}", self.base_url, self.phone_number_id)
    }

    async fn read(resp: reqwest::Response, what: &str) -> Result<Value> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "whatsapp {what} failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        resp.json()
            .await
            .map_err(|e| Error::External(format!("whatsapp {what} json error: {e}")))
    }

    async fn post_message(&self, message: Value, what: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.endpoint("messages"))
            .bearer_auth(&self.token)
            .json(&message)
            .send()
            .await
            .map_err(|e| Error::External(format!("whatsapp {what} request error: {e}")))?;
        let v = Self::read(resp, what).await?;
        debug!(what, message_id = ?first_message_id(&v), "message accepted");
        Ok(())
    }
}

#[async_trait]
impl OutboundPort for CloudApiClient {
    async fn upload_media(&self, media: MediaUpload) -> Result<MediaHandle> {
        let size = media.bytes.len();
        let part = reqwest::multipart::Part::bytes(media.bytes)
            .file_name(media.file_name)
            .mime_str(&media.media_type)
            .map_err(|e| Error::External(format!("whatsapp multipart error: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("messaging_product", "whatsapp")
            .text("type", media.media_type)
            .part("file", part);

        let resp = self
            .http
            .post(self.endpoint("media"))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::External(format!("whatsapp upload request error: {e}")))?;
        let v = Self::read(resp, "upload").await?;

        let id = v.get("id").and_then(Value::as_str).unwrap_or("").to_string();
        if id.is_empty() {
            return Err(Error::External("whatsapp upload returned no media id".to_string()));
        }
        debug!(bytes = size, media_id = %id, "media uploaded");
        Ok(MediaHandle(id))
    }

    async fn send_text(&self, recipient: &UserId, text: &str) -> Result<()> {
        self.post_message(text_message(recipient, text), "text").await
    }

    async fn send_document(
        &self,
        recipient: &UserId,
        handle: &MediaHandle,
        caption: &str,
        file_name: &str,
    ) -> Result<()> {
        self.post_message(
            document_message(recipient, handle, caption, file_name),
            "document",
        )
        .await
    }
}

fn text_message(to: &UserId, body: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to.0,
        "type": "text",
        "text": { "body": body },
    })
}

fn document_message(to: &UserId, handle: &MediaHandle, caption: &str, file_name: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to.0,
        "type": "document",
        "document": {
            "id": handle.0,
            "caption": caption,
            "filename": file_name,
        },
    })
}

fn first_message_id(v: &Value) -> Option<&str> {
    v.pointer("/messages/0/id").and_then(Value::as_str)
}
